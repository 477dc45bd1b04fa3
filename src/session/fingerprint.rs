//! Session content fingerprints.
//!
//! A fingerprint is a SHA-256 over the JSON serialization of a session's data.
//! The cookie is not part of the data, so refreshing the expiry never makes a
//! session look modified. Fingerprints are compared for equality only and are
//! never persisted or exposed.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use super::record::SessionRecord;

/// Fingerprint of a session's content, excluding its cookie.
pub fn digest(record: &SessionRecord) -> String {
    // top-level keys sorted so insertion order never affects the result
    let ordered: BTreeMap<&String, &serde_json::Value> = record.data().iter().collect();
    let serialized = serde_json::to_vec(&ordered).unwrap_or_default();
    hex::encode(Sha256::digest(&serialized))
}
