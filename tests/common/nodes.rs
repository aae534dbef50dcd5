use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use stepgraph::node::{Next, Node, NodeContext, NodeEffects, NodeError, NodeOutput, NodePolicy};
use stepgraph::retry::RetryPolicy;

use super::fixtures::FlowState;

/// Bumps the counter, logs its name, and routes as configured.
pub struct Visit {
    pub name: String,
    pub next: Next,
}

impl Visit {
    pub fn new(name: impl Into<String>, next: Next) -> Self {
        Self {
            name: name.into(),
            next,
        }
    }
}

#[async_trait]
impl Node<FlowState> for Visit {
    async fn run(&self, _: NodeContext, _: FlowState) -> Result<NodeOutput<FlowState>, NodeError> {
        let delta = FlowState {
            counter: 1,
            visits: vec![self.name.clone()],
            ..Default::default()
        };
        Ok(NodeOutput::new(self.next.clone()).with_delta(delta))
    }
}

/// Fails with a rate-limit error until `succeed_after` attempts have been
/// burned, then completes. Carries its own retry policy.
pub struct Flaky {
    pub name: &'static str,
    pub succeed_after: u32,
    pub attempts_seen: Arc<AtomicU32>,
    pub retry: RetryPolicy,
}

impl Flaky {
    pub fn new(name: &'static str, succeed_after: u32, retry: RetryPolicy) -> Self {
        Self {
            name,
            succeed_after,
            attempts_seen: Arc::new(AtomicU32::new(0)),
            retry,
        }
    }
}

#[async_trait]
impl Node<FlowState> for Flaky {
    async fn run(&self, _: NodeContext, _: FlowState) -> Result<NodeOutput<FlowState>, NodeError> {
        let attempt = self.attempts_seen.fetch_add(1, Ordering::SeqCst);
        if attempt < self.succeed_after {
            return Err(NodeError::RateLimited {
                message: format!("attempt {attempt} rejected"),
            });
        }
        Ok(NodeOutput::stop().with_delta(FlowState {
            counter: 1,
            visits: vec![self.name.to_string()],
            ..Default::default()
        }))
    }

    fn policy(&self) -> NodePolicy {
        NodePolicy::new().with_retry(self.retry.clone())
    }
}

/// Fails immediately with a non-retryable error.
pub struct Broken;

#[async_trait]
impl Node<FlowState> for Broken {
    async fn run(&self, _: NodeContext, _: FlowState) -> Result<NodeOutput<FlowState>, NodeError> {
        Err(NodeError::ValidationFailed("broken by design".into()))
    }
}

/// Sleeps, then stops. For timeout and budget tests.
pub struct Sleeper {
    pub delay: Duration,
}

#[async_trait]
impl Node<FlowState> for Sleeper {
    async fn run(&self, _: NodeContext, _: FlowState) -> Result<NodeOutput<FlowState>, NodeError> {
        tokio::time::sleep(self.delay).await;
        Ok(NodeOutput::stop())
    }
}

/// Issues one recordable external call and stores the response as a note.
pub struct Caller {
    pub name: &'static str,
    pub live_responses: Arc<AtomicU32>,
    pub next: Next,
}

impl Caller {
    pub fn new(name: &'static str, next: Next) -> Self {
        Self {
            name,
            live_responses: Arc::new(AtomicU32::new(0)),
            next,
        }
    }
}

#[async_trait]
impl Node<FlowState> for Caller {
    async fn run(
        &self,
        ctx: NodeContext,
        _: FlowState,
    ) -> Result<NodeOutput<FlowState>, NodeError> {
        let live = Arc::clone(&self.live_responses);
        let name = self.name;
        let response = ctx
            .recorded(&json!({"ask": name}), || async move {
                let n = live.fetch_add(1, Ordering::SeqCst);
                Ok(json!(format!("{name}-live-{n}")))
            })
            .await?;
        let mut delta = FlowState::default();
        delta
            .notes
            .insert(name.to_string(), response.as_str().unwrap_or("").to_string());
        Ok(NodeOutput::new(self.next.clone()).with_delta(delta))
    }

    fn effects(&self) -> NodeEffects {
        NodeEffects::new().recordable()
    }
}

/// Fails while a shared fuse is armed; succeeds once it is disarmed.
/// Models "the process crashed here" across run + resume.
pub struct Fused {
    pub name: &'static str,
    pub fuse: Arc<AtomicU32>,
}

#[async_trait]
impl Node<FlowState> for Fused {
    async fn run(&self, _: NodeContext, _: FlowState) -> Result<NodeOutput<FlowState>, NodeError> {
        if self.fuse.load(Ordering::SeqCst) > 0 {
            return Err(NodeError::ValidationFailed(format!(
                "{} fuse armed",
                self.name
            )));
        }
        Ok(NodeOutput::edges().with_delta(FlowState {
            counter: 1,
            visits: vec![self.name.to_string()],
            ..Default::default()
        }))
    }
}
