//! Input normalisation
//!
//! Descriptor fields arrive transport-encoded (base64). Normalisation
//! unwraps them once, before any module runs: the path and body become text,
//! the body additionally keeps its raw bytes, and the header blob is
//! reflowed from a JSON object into `Title-Case-Key: value` lines joined by
//! CRLF. Undecodable base64 is the identity: the string itself is checked.
//!
//! Pattern matching is decoding-invariant: every candidate string is tried
//! as-is, URL-form-decoded, and base64-decoded (when strictly valid), with
//! both pattern and input folded to lowercase.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::Value;

use crate::core::rules::CompiledRule;
use crate::models::{Descriptor, Phase};

/// A descriptor after transport decoding and header reflow.
#[derive(Debug, Clone)]
pub struct NormalizedRequest {
    pub ip: String,
    pub method: String,
    pub user_agent: String,
    /// `Title-Case-Key: value` lines joined by CRLF.
    pub headers: String,
    /// Decoded original path with query.
    pub path: String,
    /// Decoded body as text.
    pub body: String,
    /// Decoded body as raw bytes (empty when undecodable).
    pub body_bytes: Vec<u8>,
    pub phase: Phase,
}

/// Normalise a descriptor. Deterministic and idempotent for equal inputs.
pub fn normalize(descriptor: &Descriptor) -> NormalizedRequest {
    NormalizedRequest {
        ip: descriptor.ip.clone(),
        method: descriptor.method.clone(),
        user_agent: descriptor.user_agent.clone(),
        headers: reflow_headers(&descriptor.header),
        path: decode_text(&descriptor.path),
        body: decode_text(&descriptor.body),
        body_bytes: decode_bytes(&descriptor.body),
        phase: descriptor.phase,
    }
}

/// Base64-decode to text; undecodable input is returned unchanged.
pub fn decode_text(s: &str) -> String {
    if s.is_empty() {
        return String::new();
    }
    match BASE64.decode(s) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(_) => s.to_string(),
    }
}

/// Base64-decode to raw bytes; undecodable input yields no bytes.
pub fn decode_bytes(s: &str) -> Vec<u8> {
    if s.is_empty() {
        return Vec::new();
    }
    BASE64.decode(s).unwrap_or_default()
}

/// Decode the header blob and reflow its JSON object into canonical header
/// lines. Input that does not decode to a JSON object is matched as-is.
pub fn reflow_headers(encoded: &str) -> String {
    if encoded.is_empty() {
        return String::new();
    }
    let decoded = decode_text(encoded);
    match serde_json::from_str::<serde_json::Map<String, Value>>(&decoded) {
        Ok(map) => map
            .iter()
            .map(|(key, value)| format!("{}: {}", title_case(key), value_text(value)))
            .collect::<Vec<_>>()
            .join("\r\n"),
        Err(_) => decoded,
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Uppercase the first letter of each alphabetic run, lowercase the rest:
/// `content-type` becomes `Content-Type`.
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_alpha = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if prev_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(c);
            prev_alpha = false;
        }
    }
    out
}

/// URL-form decoding: `+` to space, `%XX` to bytes; malformed sequences are
/// kept verbatim.
pub fn url_decode(s: &str) -> String {
    let plussed = s.replace('+', " ");
    String::from_utf8_lossy(&urlencoding::decode_binary(plussed.as_bytes())).into_owned()
}

/// The base64 variant of a candidate string: its decoded text when strictly
/// valid base64, the string itself otherwise.
pub fn base64_variant(s: &str) -> String {
    match BASE64.decode(s) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(_) => s.to_string(),
    }
}

/// Decoding-invariant pattern check: the rule matches when any of the three
/// variants of `target` matches its lowercased pattern.
pub fn pattern_check(rule: &CompiledRule, target: &str) -> bool {
    let Some(regex) = &rule.regex else {
        return false;
    };
    let variants = [target.to_string(), url_decode(target), base64_variant(target)];
    variants
        .iter()
        .any(|variant| regex.is_match(&variant.to_lowercase()))
}
