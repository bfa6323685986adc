use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Source of uniqueness for a queue id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueEntropy<'a> {
    /// Raised while replaying a block: every replica derives the same id.
    Block { height: u64, tx_hash: &'a str },
    /// Raised outside block processing.
    AdHoc,
}

/// Deterministic id derived from the entropy, entity and URI. Replicas that
/// observe the same block produce identical ids and collide on insert.
pub fn deterministic_queue_id(entropy: &str, entity_id: &str, uri: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(entropy.as_bytes());
    hasher.update(b"-");
    hasher.update(entity_id.as_bytes());
    hasher.update(b"-");
    hasher.update(uri.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn random_queue_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn queue_id(entropy: QueueEntropy<'_>, entity_id: &str, uri: &str) -> String {
    match entropy {
        QueueEntropy::Block { height, tx_hash } => {
            deterministic_queue_id(&format!("{height}-{tx_hash}"), entity_id, uri)
        }
        QueueEntropy::AdHoc => random_queue_id(),
    }
}

/// Partition owning a queue id.
pub fn load_balance_id(id: &str, partitions: u32) -> u32 {
    let digest = Sha256::digest(id.as_bytes());
    let prefix = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    prefix % partitions.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_ids_are_stable() {
        let entropy = QueueEntropy::Block {
            height: 10,
            tx_hash: "ABCD",
        };
        let first = queue_id(entropy, "1", "ipfs://a");
        assert_eq!(first, queue_id(entropy, "1", "ipfs://a"));
        assert_ne!(first, queue_id(entropy, "2", "ipfs://a"));
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn ad_hoc_ids_differ() {
        assert_ne!(
            queue_id(QueueEntropy::AdHoc, "1", "x"),
            queue_id(QueueEntropy::AdHoc, "1", "x")
        );
    }

    #[test]
    fn partitions_stay_in_range() {
        for n in 0..50 {
            let id = deterministic_queue_id("e", &n.to_string(), "u");
            assert!(load_balance_id(&id, 3) < 3);
            assert_eq!(load_balance_id(&id, 1), 0);
            assert_eq!(load_balance_id(&id, 0), 0);
        }
    }
}
