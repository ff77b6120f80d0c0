//! Generic HTTP brute-force detection over response status codes.

use chrono::Utc;
use serde_json::json;

use crate::models::{Decision, Phase};

use super::{skipped_request, DetectionModule, ModuleInput};

/// Status codes that indicate guessed credentials or throttled abuse.
const SUSPICIOUS_CODES: [u16; 3] = [401, 403, 429];

/// Response-phase module: counts suspicious status codes per address within
/// `window_seconds` and blocks past `window_max_requests`.
pub struct AntiHttpGenericBruteforce;

impl DetectionModule for AntiHttpGenericBruteforce {
    fn name(&self) -> &'static str {
        "AntiHTTPGenericBruteforce"
    }

    fn run(&self, input: &ModuleInput) -> Decision {
        if !input.config.anti_http_generic_bf {
            return Decision::allow(json!("module_disabled"));
        }

        let Phase::Response { status_code } = input.request.phase else {
            return skipped_request();
        };

        if !SUSPICIOUS_CODES.contains(&status_code) {
            return Decision::allow(json!({"response_pattern": "normal"}));
        }

        let hits = input.scratch.record(
            "response_hits",
            &input.request.ip,
            Utc::now(),
            input.config.window_seconds as i64,
        );

        if hits > input.config.window_max_requests {
            return Decision::block(
                format!("Suspicious response pattern: {hits} x {status_code}"),
                json!({"response_hits": hits, "status_code": status_code}),
            );
        }

        Decision::allow(json!({"response_hits": hits, "status_code": status_code}))
    }
}
