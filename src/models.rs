//! Verdict and descriptor types shared across the pipeline.

use serde::{Deserialize, Serialize};

/// Allow/block outcome of a module or pipeline evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Allow,
    Block,
}

/// Verdict returned by a detection module and by the pipeline itself.
///
/// `result` carries module-specific diagnostics (matched rule, window
/// counters). Cached decisions are returned bit-identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl Decision {
    pub fn allow(result: impl Into<Option<serde_json::Value>>) -> Self {
        Self {
            action: Action::Allow,
            reason: None,
            result: result.into(),
        }
    }

    pub fn block(
        reason: impl Into<String>,
        result: impl Into<Option<serde_json::Value>>,
    ) -> Self {
        Self {
            action: Action::Block,
            reason: Some(reason.into()),
            result: result.into(),
        }
    }

    pub fn is_block(&self) -> bool {
        self.action == Action::Block
    }

    /// The `matched_rule` diagnostic, when the module reported one.
    pub fn matched_rule(&self) -> Option<&str> {
        self.result.as_ref()?.get("matched_rule")?.as_str()
    }
}

/// Which side of the exchange a descriptor talks about. Responses carry the
/// upstream status code; requests carry a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Request,
    Response { status_code: u16 },
}

impl Phase {
    pub fn is_response(&self) -> bool {
        matches!(self, Phase::Response { .. })
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Phase::Request => None,
            Phase::Response { status_code } => Some(*status_code),
        }
    }
}

/// An in-flight request (or response) as reported by the interceptor.
///
/// `header`, `path` and `body` are transport-encoded (base64); `ip`, `method`
/// and `user_agent` are plain strings.
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub ip: String,
    pub method: String,
    pub header: String,
    pub user_agent: String,
    pub path: String,
    pub body: String,
    pub phase: Phase,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decision_serializes_without_empty_fields() {
        let decision = Decision::allow(None);
        let text = serde_json::to_string(&decision).unwrap();
        assert_eq!(text, r#"{"action":"allow"}"#);
    }

    #[test]
    fn decision_block_carries_reason_and_result() {
        let decision = Decision::block("ip_blocklist", json!({"matched_rule": "10.0.0.2"}));
        let text = serde_json::to_string(&decision).unwrap();
        assert!(text.contains(r#""action":"block""#));
        assert!(text.contains(r#""reason":"ip_blocklist""#));
        assert_eq!(decision.matched_rule(), Some("10.0.0.2"));
    }

    #[test]
    fn phase_status_code() {
        assert_eq!(Phase::Request.status_code(), None);
        assert_eq!(Phase::Response { status_code: 401 }.status_code(), Some(401));
        assert!(Phase::Response { status_code: 401 }.is_response());
    }
}
