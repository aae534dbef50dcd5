//! Chat-model collaborator contract.
//!
//! The engine itself never talks to a language model. Nodes that do so
//! depend on [`ChatModel`] and route the call through
//! [`NodeContext::recorded`](crate::node::NodeContext::recorded) so the
//! exchange participates in record/replay. Provider adapters live outside
//! this crate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::node::NodeError;

/// A message in a conversation, containing a role and text content.
///
/// # Examples
///
/// ```
/// use stepgraph::llm::Message;
///
/// let user_msg = Message::user("Summarize this diff");
/// let assistant_msg = Message::assistant("The diff renames two modules.");
/// assert!(user_msg.has_role(Message::USER));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Message {
    /// The role of the message sender (e.g., "user", "assistant", "system").
    pub role: String,
    /// The text content of the message.
    pub content: String,
}

impl Message {
    /// User input message role.
    pub const USER: &'static str = "user";
    /// Model response message role.
    pub const ASSISTANT: &'static str = "assistant";
    /// System prompt or instruction message role.
    pub const SYSTEM: &'static str = "system";

    /// Creates a new message with the specified role and content.
    #[must_use]
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }

    /// Creates a user message.
    #[must_use]
    pub fn user(content: &str) -> Self {
        Self::new(Self::USER, content)
    }

    /// Creates an assistant message.
    #[must_use]
    pub fn assistant(content: &str) -> Self {
        Self::new(Self::ASSISTANT, content)
    }

    /// Creates a system message.
    #[must_use]
    pub fn system(content: &str) -> Self {
        Self::new(Self::SYSTEM, content)
    }

    /// Returns true if this message has the specified role.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.role == role
    }
}

/// A tool a chat model may call, described to the provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the tool's arguments.
    pub parameters: Value,
}

/// A tool invocation requested by the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Value,
}

/// A chat completion result.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatOut {
    pub text: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

/// Contract implemented by chat-model provider adapters.
///
/// The engine is agnostic to the provider; implementations are supplied by
/// application code and invoked from nodes.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Produce a completion for the given conversation.
    async fn chat(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<ChatOut, NodeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convenience_constructors_set_roles() {
        assert_eq!(Message::user("hi").role, Message::USER);
        assert_eq!(Message::assistant("yo").role, Message::ASSISTANT);
        assert_eq!(Message::system("be terse").role, Message::SYSTEM);
        assert!(Message::new("function", "out").has_role("function"));
    }

    #[test]
    fn chat_out_round_trips() {
        let out = ChatOut {
            text: "done".into(),
            tool_calls: vec![ToolCall {
                name: "lookup".into(),
                arguments: serde_json::json!({"q": "x"}),
            }],
        };
        let json = serde_json::to_string(&out).unwrap();
        let back: ChatOut = serde_json::from_str(&json).unwrap();
        assert_eq!(back, out);
    }
}
