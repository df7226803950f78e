//! Request signing for the wallet server API.
//!
//! ```text
//! X-Signature = hex(HMAC-SHA512(secret_key, "{timestamp}.{canonical_json(params)}"))
//! ```
//!
//! The canonical form is byte-compatible with
//! `json.dumps(params, separators=(",", ":"), sort_keys=True)`, which is what
//! the server recomputes on its side.

use crate::crypto::{CryptoError, Result};
use chrono::{SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha512;
use std::collections::BTreeMap;

type HmacSha512 = Hmac<Sha512>;

/// Request parameters. Values are strings; keys are kept sorted.
pub type RequestParams = BTreeMap<String, String>;

/// Render parameters as canonical JSON: sorted keys, no whitespace, and
/// every non-ASCII character escaped as `\uXXXX`.
pub fn canonical_json(params: &RequestParams) -> String {
    // BTreeMap serializes in key order and string serialization cannot fail
    let compact = serde_json::to_string(params).unwrap_or_else(|_| "{}".to_string());
    escape_non_ascii(&compact)
}

fn escape_non_ascii(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    for ch in json.chars() {
        if ch.is_ascii() {
            out.push(ch);
        } else {
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    out
}

/// Timestamp sent in `X-Timestamp`, e.g. `2026-10-15T12:00:00.000000+00:00`.
pub fn request_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

/// Sign a request. Returns the lowercase hex signature.
pub fn sign_request(secret_key: &str, timestamp: &str, canonical_params: &str) -> Result<String> {
    let mut mac = HmacSha512::new_from_slice(secret_key.as_bytes())
        .map_err(|_| CryptoError::InvalidSecret("Unusable HMAC key".to_string()))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(canonical_params.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}
