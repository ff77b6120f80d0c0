//! Static rule-file enforcement: IP blocklist, user-agent denylist, and
//! decoding-invariant pattern matching over headers, path and body.

use serde_json::json;
use std::sync::Arc;

use crate::core::rules::{RuleStore, RULE_TYPES};
use crate::models::Decision;
use crate::pipeline::normalize::pattern_check;

use super::{skipped_response, DetectionModule, ModuleInput};

/// Applies the rule store against the normalised request. Rule types are
/// evaluated in priority order; within a type, files in deterministic
/// (lexicographic) order.
pub struct BasicAttackRules {
    rules: Arc<RuleStore>,
}

impl BasicAttackRules {
    pub fn new(rules: Arc<RuleStore>) -> Self {
        Self { rules }
    }
}

impl DetectionModule for BasicAttackRules {
    fn name(&self) -> &'static str {
        "BasicAttackRules"
    }

    fn run(&self, input: &ModuleInput) -> Decision {
        if input.request.phase.is_response() {
            return skipped_response();
        }

        let request = &input.request;
        let rules = self.rules.snapshot();
        let user_agent = request.user_agent.to_lowercase();

        for rule_type in RULE_TYPES {
            let target: &str = match rule_type {
                "ip_blocklist" => &request.ip,
                "user_agents" => &user_agent,
                "headers" => &request.headers,
                "paths" => &request.path,
                _ => &request.body,
            };

            for (_file, file_rules) in rules.files_for(rule_type) {
                for rule in file_rules {
                    let matched = match rule_type {
                        "ip_blocklist" => request.ip == rule.raw,
                        "user_agents" => target.contains(&rule.raw.to_lowercase()),
                        _ => pattern_check(rule, target),
                    };
                    if !matched {
                        continue;
                    }
                    let reason = match rule_type {
                        "ip_blocklist" => "ip_blocklist".to_string(),
                        "user_agents" => "bad_user_agent".to_string(),
                        other => format!("{other}_blocked"),
                    };
                    return Decision::block(reason, json!({"matched_rule": rule.raw}));
                }
            }
        }

        Decision::allow(json!("no_match"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rules::default_rules;
    use crate::models::Phase;
    use crate::modules::testutil;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use std::fs;

    fn seeded_store(dir: &std::path::Path) -> Arc<RuleStore> {
        for (name, rules) in default_rules() {
            let list: Vec<String> = rules.iter().map(|s| s.to_string()).collect();
            fs::write(dir.join(name), serde_json::to_string(&list).unwrap()).unwrap();
        }
        Arc::new(RuleStore::load(dir))
    }

    fn run(
        store: Arc<RuleStore>,
        mutate: impl FnOnce(&mut crate::pipeline::normalize::NormalizedRequest),
    ) -> Decision {
        let mut request = testutil::request(Phase::Request);
        mutate(&mut request);
        BasicAttackRules::new(store).run(&testutil::input(request))
    }

    #[test]
    fn test_ip_blocklist_exact_match() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path());

        let decision = run(store.clone(), |r| r.ip = "192.168.1.100".to_string());
        assert!(decision.is_block());
        assert_eq!(decision.reason.as_deref(), Some("ip_blocklist"));
        assert_eq!(decision.matched_rule(), Some("192.168.1.100"));

        // Exact equality only, no prefix matching
        let decision = run(store, |r| r.ip = "192.168.1.1".to_string());
        assert!(!decision.is_block());
    }

    #[test]
    fn test_user_agent_substring() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path());

        let decision = run(store, |r| {
            r.user_agent = "Mozilla/5.0 SQLMap/1.7".to_string();
        });
        assert!(decision.is_block());
        assert_eq!(decision.reason.as_deref(), Some("bad_user_agent"));
        assert_eq!(decision.matched_rule(), Some("sqlmap"));
    }

    #[test]
    fn test_sqli_path_via_url_encoding() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path());

        let decision = run(store, |r| {
            r.path = "/search?q=%27+UNION+SELECT+1--".to_string();
        });
        assert!(decision.is_block());
        assert_eq!(decision.reason.as_deref(), Some("paths_blocked"));
    }

    #[test]
    fn test_body_pattern_via_base64_variant() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path());

        let decision = run(store, |r| {
            r.body = BASE64.encode("1 OR 1=1 --");
        });
        assert!(decision.is_block());
        assert_eq!(decision.reason.as_deref(), Some("body_blocked"));
    }

    #[test]
    fn test_header_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path());

        let decision = run(store, |r| {
            r.headers = "X-Payload: <?php system($_GET['c']); ?>".to_string();
        });
        assert!(decision.is_block());
        assert_eq!(decision.reason.as_deref(), Some("headers_blocked"));
    }

    #[test]
    fn test_benign_request_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path());

        let decision = run(store, |_| {});
        assert!(!decision.is_block());
        assert_eq!(decision.result, Some(json!("no_match")));
    }

    #[test]
    fn test_response_phase_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path());

        let mut request = testutil::request(Phase::Response { status_code: 200 });
        request.ip = "192.168.1.100".to_string();
        let decision = BasicAttackRules::new(store).run(&testutil::input(request));
        assert!(!decision.is_block());
    }
}
