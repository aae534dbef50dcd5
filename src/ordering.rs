//! Deterministic 64-bit ordering keys and run-scoped seeds.
//!
//! Every work item carries an ordering key that fixes its merge position
//! relative to sibling branches. Keys are derived with FNV-1a 64: the root
//! item's key hashes the run id, and each successor hashes its parent's key
//! together with the successor's edge index. The function is stable across
//! platforms and releases; changing it would silently reorder merges in
//! resumed runs.
//!
//! The same hash also derives the run RNG seed from the run id and the
//! per-worker RNG seeds from `(run_seed, worker_index)`, so retry jitter is
//! reproducible without any shared RNG.

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a 64 over a byte slice.
#[must_use]
pub fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Ordering key for the successor at `edge_index` of an item keyed
/// `parent_key`.
///
/// Hashes the big-endian encodings of both values so the derivation is
/// byte-order independent of the host.
#[must_use]
pub fn child_key(parent_key: u64, edge_index: u64) -> u64 {
    let mut buf = [0u8; 16];
    buf[..8].copy_from_slice(&parent_key.to_be_bytes());
    buf[8..].copy_from_slice(&edge_index.to_be_bytes());
    fnv1a64(&buf)
}

/// Ordering key for a run's root work item.
#[must_use]
pub fn root_key(run_id: &str) -> u64 {
    fnv1a64(run_id.as_bytes())
}

/// Run-scoped RNG seed, derived from the run id.
#[must_use]
pub fn run_seed(run_id: &str) -> u64 {
    fnv1a64(run_id.as_bytes())
}

/// Per-worker RNG seed. Each worker owns its RNG; a shared RNG under
/// concurrent access would be both a data race and a determinism hazard.
#[must_use]
pub fn worker_seed(run_seed: u64, worker_index: usize) -> u64 {
    let mut buf = [0u8; 16];
    buf[..8].copy_from_slice(&run_seed.to_be_bytes());
    buf[8..].copy_from_slice(&(worker_index as u64).to_be_bytes());
    fnv1a64(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv_matches_reference_vectors() {
        // Standard FNV-1a 64 vectors.
        assert_eq!(fnv1a64(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a64(b"a"), 0xaf63_dc4c_8601_ec8c);
        assert_eq!(fnv1a64(b"foobar"), 0x8594_4171_f739_67e8);
    }

    #[test]
    fn child_keys_are_stable_and_distinct() {
        let parent = root_key("run-1");
        let k0 = child_key(parent, 0);
        let k1 = child_key(parent, 1);
        assert_ne!(k0, k1);
        assert_eq!(k0, child_key(parent, 0));
    }

    #[test]
    fn worker_seeds_differ_per_worker() {
        let seed = run_seed("run-1");
        assert_ne!(worker_seed(seed, 0), worker_seed(seed, 1));
        assert_eq!(worker_seed(seed, 3), worker_seed(seed, 3));
    }

    #[test]
    fn root_key_depends_on_run_id() {
        assert_ne!(root_key("run-a"), root_key("run-b"));
    }
}
