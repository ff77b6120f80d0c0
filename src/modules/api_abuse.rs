//! API abuse detection: payload shape limits and injection screening for
//! JSON endpoints.

use lazy_static::lazy_static;
use regex::{Regex, RegexBuilder};
use serde_json::{json, Value};

use crate::core::journal::clip;
use crate::models::Decision;

use super::{skipped_response, DetectionModule, ModuleInput};

const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;
const MAX_ARRAY_LENGTH: usize = 1000;
const MAX_JSON_DEPTH: usize = 10;

/// Tokens abused for prototype pollution and NoSQL operator injection.
const SUSPICIOUS_PARAMS: [&str; 5] = ["__proto__", "constructor", "prototype", "$where", "$ne"];

lazy_static! {
    static ref INJECTION_PATTERNS: Vec<(&'static str, Regex)> = [
        r"<script",
        r"javascript:",
        r"onerror=",
        r"onload=",
        r"\$\(",
        r"eval\(",
        r"function\s*\(",
    ]
    .iter()
    .map(|p| {
        (
            *p,
            RegexBuilder::new(p)
                .case_insensitive(true)
                .build()
                .expect("embedded pattern must compile"),
        )
    })
    .collect();
}

/// Guards `/api` and `.json` endpoints: content type, payload size, JSON
/// shape, and code-injection content.
pub struct ApiAbuseDetection;

impl DetectionModule for ApiAbuseDetection {
    fn name(&self) -> &'static str {
        "APIAbuseDetection"
    }

    fn run(&self, input: &ModuleInput) -> Decision {
        if input.request.phase.is_response() {
            return skipped_response();
        }

        let request = &input.request;
        let path = &request.path;
        if !(path.to_lowercase().contains("/api") || path.ends_with(".json")) {
            return Decision::allow(json!("not_api_endpoint"));
        }

        let method = request.method.to_uppercase();
        if matches!(method.as_str(), "POST" | "PUT" | "PATCH") {
            if !request.headers.to_lowercase().contains("application/json") {
                return Decision::block(
                    "Invalid Content-Type for API endpoint",
                    json!({"expected": "application/json"}),
                );
            }

            let body = &request.body;
            if body.chars().count() > MAX_PAYLOAD_SIZE {
                return Decision::block(
                    format!("API payload too large: {} bytes", body.chars().count()),
                    json!({"size": body.chars().count(), "limit": MAX_PAYLOAD_SIZE}),
                );
            }

            if !body.is_empty() {
                if let Some(decision) = check_json_body(body) {
                    return decision;
                }
            }
        }

        for param in SUSPICIOUS_PARAMS {
            if path.contains(param) {
                return Decision::block(
                    format!("Suspicious API parameter detected: {param}"),
                    json!({"parameter": param}),
                );
            }
        }

        Decision::allow(json!({"validation": "passed"}))
    }
}

fn check_json_body(body: &str) -> Option<Decision> {
    let value: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(e) => {
            return Some(Decision::block(
                "Malformed JSON payload",
                json!({"error": clip(&e.to_string(), 100)}),
            ));
        }
    };

    let depth = json_depth(&value);
    if depth > MAX_JSON_DEPTH {
        return Some(Decision::block(
            format!("JSON too deeply nested: {depth} levels"),
            json!({"depth": depth, "limit": MAX_JSON_DEPTH}),
        ));
    }

    if let Value::Array(items) = &value {
        if items.len() > MAX_ARRAY_LENGTH {
            return Some(Decision::block(
                format!("JSON array too large: {} elements", items.len()),
                json!({"array_size": items.len(), "limit": MAX_ARRAY_LENGTH}),
            ));
        }
    }

    let text = value.to_string();
    for (pattern, regex) in INJECTION_PATTERNS.iter() {
        if regex.is_match(&text) {
            return Some(Decision::block(
                "Code injection detected in JSON payload",
                json!({"matched_pattern": pattern}),
            ));
        }
    }

    None
}

/// Container nesting depth: scalars are 0, each enclosing object or array
/// adds one.
fn json_depth(value: &Value) -> usize {
    match value {
        Value::Object(map) => map.values().map(json_depth).max().map_or(0, |d| d + 1),
        Value::Array(items) => items.iter().map(json_depth).max().map_or(0, |d| d + 1),
        _ => 0,
    }
}
