//! Item IDs: a type prefix plus a short content hash.

use crate::types::ItemType;
use chrono::{DateTime, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};

const HASH_CHARS: usize = 10;

/// `task-` or `epic-` followed by the first ten hex digits of
/// SHA-256(type, title, creation time, 8 random bytes).
pub fn generate_id(item_type: ItemType, title: &str, created_at: DateTime<Utc>) -> String {
    let salt: [u8; 8] = rand::rng().random();
    let digest = Sha256::new()
        .chain_update(item_type.as_str())
        .chain_update(title)
        .chain_update(created_at.timestamp_micros().to_le_bytes())
        .chain_update(salt)
        .finalize();

    let hex: String = digest.iter().map(|byte| format!("{:02x}", byte)).collect();
    format!("{}-{}", item_type.as_str(), &hex[..HASH_CHARS])
}
