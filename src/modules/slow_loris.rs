//! Slow-HTTP attack detection: connection floods and drip-fed bodies.

use chrono::Utc;
use serde_json::json;

use crate::models::Decision;

use super::{skipped_response, DetectionModule, ModuleInput};

const MAX_CONCURRENT_CONNECTIONS: usize = 15;
const MAX_SLOW_REQUESTS: usize = 5;
const CONNECTION_WINDOW_SECS: i64 = 60;
const SLOW_WINDOW_SECS: i64 = 300;

/// Tracks per-address request rates for body-carrying methods. A body of
/// fewer than 10 characters on POST/PUT/PATCH counts as a drip-fed request.
pub struct SlowLorisProtection;

impl DetectionModule for SlowLorisProtection {
    fn name(&self) -> &'static str {
        "SlowLorisProtection"
    }

    fn run(&self, input: &ModuleInput) -> Decision {
        if input.request.phase.is_response() {
            return skipped_response();
        }

        let request = &input.request;
        let method = request.method.to_uppercase();
        if !matches!(method.as_str(), "POST" | "PUT" | "PATCH") {
            return Decision::allow(json!("not_applicable"));
        }

        let now = Utc::now();
        let ip = &request.ip;

        let connections =
            input
                .scratch
                .record("connection_tracker", ip, now, CONNECTION_WINDOW_SECS);
        if connections > MAX_CONCURRENT_CONNECTIONS {
            return Decision::block(
                format!("Too many concurrent connections: {connections}"),
                json!({
                    "concurrent_connections": connections,
                    "limit": MAX_CONCURRENT_CONNECTIONS,
                }),
            );
        }

        let body_len = request.body.chars().count();
        let slow_requests = if body_len > 0 && body_len < 10 {
            let slow = input
                .scratch
                .record("slow_requests", ip, now, SLOW_WINDOW_SECS);
            if slow > MAX_SLOW_REQUESTS {
                return Decision::block(
                    "Slow HTTP attack pattern detected",
                    json!({"slow_requests": slow, "pattern": "incomplete_post"}),
                );
            }
            slow
        } else {
            input.scratch.count("slow_requests", ip, now, SLOW_WINDOW_SECS)
        };

        Decision::allow(json!({
            "concurrent_connections": connections,
            "slow_requests": slow_requests,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Phase;
    use crate::modules::testutil;
    use crate::modules::ModuleInput;

    fn post(body: &str) -> ModuleInput {
        let mut request = testutil::request(Phase::Request);
        request.method = "POST".to_string();
        request.body = body.to_string();
        testutil::input(request)
    }

    #[test]
    fn test_safe_methods_not_tracked() {
        let input = testutil::input(testutil::request(Phase::Request));
        for _ in 0..50 {
            assert!(!SlowLorisProtection.run(&input).is_block());
        }
    }

    #[test]
    fn test_connection_flood_blocks() {
        let input = post("a large enough body");
        for _ in 0..MAX_CONCURRENT_CONNECTIONS {
            assert!(!SlowLorisProtection.run(&input).is_block());
        }
        // Fifteen within the window is tolerated; the sixteenth is not
        let decision = SlowLorisProtection.run(&input);
        assert!(decision.is_block());
        assert!(decision.reason.unwrap().contains("concurrent connections"));
    }

    #[test]
    fn test_drip_fed_bodies_block() {
        let input = post("ab");
        for _ in 0..MAX_SLOW_REQUESTS {
            assert!(!SlowLorisProtection.run(&input).is_block());
        }
        let decision = SlowLorisProtection.run(&input);
        assert!(decision.is_block());
        assert_eq!(
            decision.reason.as_deref(),
            Some("Slow HTTP attack pattern detected")
        );
    }

    #[test]
    fn test_empty_and_full_bodies_are_not_slow() {
        let empty = post("");
        let full = post("a body well beyond ten characters");
        for _ in 0..(MAX_SLOW_REQUESTS * 2) {
            assert!(!SlowLorisProtection.run(&empty).is_block());
        }
        // The connection window for `full` is separate input state
        for _ in 0..MAX_SLOW_REQUESTS {
            assert!(!SlowLorisProtection.run(&full).is_block());
        }
    }
}
