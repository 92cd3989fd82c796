//! Stable rule identity.
//!
//! A rule's identity is the first [`DIGEST_LENGTH`] lowercase hex characters
//! of a SHA-256 digest:
//!
//! 1. input is the UTF-8 definition id exactly as given, or
//! 2. when the id is empty, the canonical JSON of the compiled `Condition`
//!    (object keys sorted recursively, no whitespace).
//!
//! Changing either rule renames every generated rule, so both are fixed.

use serde_json::Value;
use sha2::{Digest, Sha256};

use canopy_contracts::rule::RULE_NAME_PREFIX;

/// Number of hex characters kept from the digest.
pub const DIGEST_LENGTH: usize = 12;

/// Compute the identity digest for a compiled rule.
pub fn digest(definition_id: &str, condition: &Value) -> String {
    let mut hasher = Sha256::new();
    if definition_id.is_empty() {
        hasher.update(canonical_json(condition).as_bytes());
    } else {
        hasher.update(definition_id.as_bytes());
    }
    let mut hex = hex::encode(hasher.finalize());
    hex.truncate(DIGEST_LENGTH);
    hex
}

/// `Azure.Policy.<digest>`.
pub fn rule_name(digest: &str) -> String {
    format!("{RULE_NAME_PREFIX}{digest}")
}

/// Serialize `value` with object keys sorted at every level.
///
/// `serde_json::Map` is a `BTreeMap` unless the `preserve_order` feature is
/// enabled, which this workspace does not do.
pub fn canonical_json(value: &Value) -> String {
    value.to_string()
}
