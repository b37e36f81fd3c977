//! Deterministic hashing used for bucketing units and for matching hashed identifiers in ID lists.
use std::{collections::HashMap, sync::Mutex};

use base64::{engine::general_purpose::STANDARD, Engine};
use sha2::{Digest, Sha256};

/// Number of segments a pass percentage is resolved against (`passPercentage * 100`).
pub(crate) const PASS_PERCENTAGE_SEGMENTS: u64 = 10_000;

/// Number of buckets used by `user_bucket` conditions.
pub(crate) const USER_BUCKETS: u64 = 1_000;

/// Length of the hashed identifier prefix stored in ID lists.
const ID_LIST_HASH_LEN: usize = 8;

/// Maximum number of entries [`HashMemo`] holds before it is cleared.
pub(crate) const MAX_HASH_MEMO_SIZE: usize = 1_000;

/// Compute a 64-bit unsigned hash of `input`: first 8 bytes of its SHA-256 digest, big-endian.
///
/// The value is stable across runs and platforms.
pub fn hash64(input: &str) -> u64 {
    let digest = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Hash a unit identifier into the form stored in ID lists: base64 of the SHA-256 digest,
/// truncated to 8 characters.
pub fn hash_id_list_value(value: &str) -> String {
    let mut encoded = hashed_name(value);
    encoded.truncate(ID_LIST_HASH_LEN);
    encoded
}

/// Obfuscate a name as base64-encoded SHA-256 digest.
pub fn hashed_name(name: &str) -> String {
    STANDARD.encode(Sha256::digest(name.as_bytes()))
}

/// Bounded memo from hash input to [`hash64`] result.
///
/// Eviction is intentionally coarse: once the memo holds [`MAX_HASH_MEMO_SIZE`] entries it is
/// cleared entirely. A cleared entry only costs one extra digest.
#[derive(Debug, Default)]
pub(crate) struct HashMemo {
    entries: Mutex<HashMap<String, u64>>,
}

impl HashMemo {
    pub fn new() -> HashMemo {
        HashMemo::default()
    }

    pub fn hash(&self, input: &str) -> u64 {
        // A poisoned lock only means another evaluation panicked mid-insert. The memo has no
        // correctness role, so fall back to hashing directly.
        let Ok(mut entries) = self.entries.lock() else {
            return hash64(input);
        };

        if let Some(hash) = entries.get(input) {
            return *hash;
        }

        let hash = hash64(input);
        if entries.len() >= MAX_HASH_MEMO_SIZE {
            entries.clear();
        }
        entries.insert(input.to_owned(), hash);
        hash
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().map(|it| it.len()).unwrap_or(0)
    }
}

/// Bucketing helper used by the evaluation engine.
#[derive(Debug, Default)]
pub(crate) struct Hasher {
    memo: HashMemo,
}

impl Hasher {
    pub fn new() -> Hasher {
        Hasher {
            memo: HashMemo::new(),
        }
    }

    /// Decide whether `unit_id` passes a rule's percentage roll.
    pub fn passes_percentage(
        &self,
        spec_salt: &str,
        rule_salt: &str,
        unit_id: &str,
        pass_percentage: f64,
    ) -> bool {
        if pass_percentage <= 0.0 {
            return false;
        }
        if pass_percentage >= 100.0 {
            return true;
        }

        let hash = self
            .memo
            .hash(&format!("{spec_salt}.{rule_salt}.{unit_id}"));
        ((hash % PASS_PERCENTAGE_SEGMENTS) as f64) < pass_percentage * 100.0
    }

    /// Bucket number in `0..1000` used by `user_bucket` conditions.
    pub fn user_bucket(&self, salt: &str, unit_id: &str) -> u64 {
        self.memo.hash(&format!("{salt}.{unit_id}")) % USER_BUCKETS
    }
}
