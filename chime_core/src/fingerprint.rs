//! Cache keys for composed and synthesized audio.
//!
//! A fingerprint is the SHA-256 of the semantically relevant request fields,
//! joined in a fixed order. Fields that only affect delivery (target
//! speakers, volume, the cache flag itself) are not part of it.

use std::collections::BTreeMap;

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Engine-specific options (voice, gender, tld, ...).
pub type Options = BTreeMap<String, Value>;

/// Fields hashed into a fingerprint, in hashing order.
pub const RELEVANT_FIELDS: [&str; 10] = [
    "message",
    "tts_platform",
    "gender",
    "tld",
    "voice",
    "language",
    "chime_path",
    "end_chime_path",
    "offset",
    "tts_playback_speed",
];

/// Supplies request fields by name for fingerprinting.
pub trait FingerprintSource {
    fn fingerprint_field(&self, name: &str) -> Option<String>;
}

/// Fingerprint of `params` plus `options`. For each relevant field the
/// request value and then the options value are appended when present and
/// non-empty; absent and empty are indistinguishable.
pub fn fingerprint<S: FingerprintSource + ?Sized>(params: &S, options: &Options) -> String {
    let mut unique = String::new();
    for field in RELEVANT_FIELDS {
        let from_params = params.fingerprint_field(field);
        let from_options = options.get(field).and_then(option_field);
        for value in [from_params, from_options].into_iter().flatten() {
            if !value.is_empty() {
                unique.push('-');
                unique.push_str(&value);
            }
        }
    }
    hash_string(&unique)
}

/// Hex SHA-256 of a string.
pub fn hash_string(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

/// Canonical text of a numeric field, so `100` and `100.0` hash alike.
pub fn number_field(value: f64) -> String {
    format!("{value}")
}

fn option_field(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
