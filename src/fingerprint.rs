//! Fingerprint keys for cache lookup.
//!
//! A fingerprint is the hex SHA-256 of the request's identifying inputs:
//! agent, normalized request text, model, and output-affecting parameters.
//! Each field is length-prefixed so that `("ab", "c")` and `("a", "bc")`
//! hash differently. Parameters are hashed in key order with a compact JSON
//! rendering whose object keys are sorted at every depth, so the key does
//! not depend on how a caller happened to build a nested object.
//!
//! Unlike the in-memory `DefaultHasher` keys of a process-local cache,
//! these keys are persisted and must be identical across processes and
//! releases. Bump [`KEY_VERSION`] whenever the derivation changes.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

/// Domain separator mixed into every key.
pub const KEY_VERSION: &str = "huginn.fingerprint.v1";

/// Compute the cache key for a request.
///
/// `normalized_text` must already be passed through
/// [`normalize_request_text`]; [`AgentRequest::fingerprint`](crate::AgentRequest::fingerprint)
/// does this for you.
pub fn fingerprint(
    agent: &str,
    normalized_text: &str,
    model: &str,
    params: &BTreeMap<String, serde_json::Value>,
) -> String {
    let mut hasher = Sha256::new();
    write_field(&mut hasher, KEY_VERSION.as_bytes());
    write_field(&mut hasher, agent.as_bytes());
    write_field(&mut hasher, normalized_text.as_bytes());
    write_field(&mut hasher, model.as_bytes());
    hasher.update((params.len() as u64).to_be_bytes());
    for (name, value) in params {
        write_field(&mut hasher, name.as_bytes());
        let mut rendered = String::new();
        write_canonical(&mut rendered, value);
        write_field(&mut hasher, rendered.as_bytes());
    }
    hex::encode(hasher.finalize())
}

fn write_canonical(out: &mut String, value: &serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (name, inner)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::Value::String(name.clone()).to_string());
                out.push(':');
                write_canonical(out, inner);
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, inner) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(out, inner);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn write_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

/// Canonical form of request text for fingerprinting.
///
/// Converts CRLF/CR line endings to LF, strips trailing whitespace from
/// every line and trims leading/trailing blank lines and spaces. Interior
/// whitespace is significant and preserved.
pub fn normalize_request_text(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<&str> = unified.lines().map(str::trim_end).collect();
    lines.join("\n").trim().to_string()
}
