//! Detection modules
//!
//! A closed, statically registered set of independent checkers. Each module
//! is pure over its input and its own scratch slot: it never touches the ban
//! store, the journals, or another module's state. The orchestrator owns the
//! scratch map and injects one slot per module.

pub mod api_abuse;
pub mod basic_rules;
pub mod bot_detection;
pub mod brute_force;
pub mod file_upload;
pub mod slow_loris;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::config::Config;
use crate::core::RuleStore;
use crate::models::Decision;
use crate::pipeline::normalize::NormalizedRequest;

pub use api_abuse::ApiAbuseDetection;
pub use basic_rules::BasicAttackRules;
pub use bot_detection::BotDetection;
pub use brute_force::AntiHttpGenericBruteforce;
pub use file_upload::FileUploadProtection;
pub use slow_loris::SlowLorisProtection;

/// Everything a module may look at: the normalised request, its private
/// scratch slot, and the shared configuration.
pub struct ModuleInput {
    pub request: Arc<NormalizedRequest>,
    pub scratch: Arc<ScratchSlot>,
    pub config: Arc<Config>,
}

/// One detection module. Implementations must be phase-aware: request-only
/// modules skip response descriptors with [`skipped_response`], and vice
/// versa.
pub trait DetectionModule: Send + Sync {
    fn name(&self) -> &'static str;
    fn run(&self, input: &ModuleInput) -> Decision;
}

/// The module set in declaration order. Ties among concurrent blocks are
/// broken by this order: the first blocking module wins.
pub fn registry(rules: Arc<RuleStore>) -> Vec<Arc<dyn DetectionModule>> {
    vec![
        Arc::new(ApiAbuseDetection),
        Arc::new(BotDetection),
        Arc::new(BasicAttackRules::new(rules)),
        Arc::new(FileUploadProtection),
        Arc::new(SlowLorisProtection),
        Arc::new(AntiHttpGenericBruteforce),
    ]
}

pub(crate) fn skipped_response() -> Decision {
    Decision::allow(json!("skipped_response_phase"))
}

pub(crate) fn skipped_request() -> Decision {
    Decision::allow(json!("skipped_request_phase"))
}

// ── Scratch state ───────────────────────────────────────────────────────────

type Window = VecDeque<DateTime<Utc>>;

/// Per-module scratch: named sliding windows of timestamps keyed by client
/// address. Trim-then-update happens atomically under the slot's mutex, so
/// concurrent requests for the same address cannot interleave mid-window.
#[derive(Default)]
pub struct ScratchSlot {
    windows: Mutex<HashMap<&'static str, HashMap<String, Window>>>,
}

impl ScratchSlot {
    /// Trim entries older than `window_secs`, append `now`, return the count.
    pub fn record(
        &self,
        window: &'static str,
        key: &str,
        now: DateTime<Utc>,
        window_secs: i64,
    ) -> usize {
        let mut windows = self.windows.lock();
        let deque = windows
            .entry(window)
            .or_default()
            .entry(key.to_string())
            .or_default();
        deque.retain(|t| (now - *t).num_seconds() <= window_secs);
        deque.push_back(now);
        deque.len()
    }

    /// Trim entries older than `window_secs` without appending; the
    /// surviving count.
    pub fn count(
        &self,
        window: &'static str,
        key: &str,
        now: DateTime<Utc>,
        window_secs: i64,
    ) -> usize {
        let mut windows = self.windows.lock();
        match windows.get_mut(window).and_then(|w| w.get_mut(key)) {
            Some(deque) => {
                deque.retain(|t| (now - *t).num_seconds() <= window_secs);
                deque.len()
            }
            None => 0,
        }
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::models::Phase;

    /// A benign, already-normalised request for module tests.
    pub fn request(phase: Phase) -> NormalizedRequest {
        NormalizedRequest {
            ip: "203.0.113.5".to_string(),
            method: "GET".to_string(),
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) Firefox/115.0".to_string(),
            headers: "Host: example.test".to_string(),
            path: "/index.html".to_string(),
            body: String::new(),
            body_bytes: Vec::new(),
            phase,
        }
    }

    pub fn input(request: NormalizedRequest) -> ModuleInput {
        ModuleInput {
            request: Arc::new(request),
            scratch: Arc::new(ScratchSlot::default()),
            config: Arc::new(Config::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_record_trims_stale_entries() {
        let slot = ScratchSlot::default();
        let now = Utc::now();

        // Two live hits plus one outside the window
        assert_eq!(slot.record("w", "ip", now - Duration::seconds(120), 60), 1);
        assert_eq!(slot.record("w", "ip", now - Duration::seconds(10), 60), 1);
        assert_eq!(slot.record("w", "ip", now, 60), 2);
    }

    #[test]
    fn test_stale_timestamps_do_not_change_outcome() {
        // Running with old entries pre-seeded equals running without them
        let seeded = ScratchSlot::default();
        let fresh = ScratchSlot::default();
        let now = Utc::now();

        for age in [400, 350, 310] {
            seeded.record("w", "ip", now - Duration::seconds(age), 300);
        }
        let a = seeded.record("w", "ip", now, 300);
        let b = fresh.record("w", "ip", now, 300);
        assert_eq!(a, b);
    }

    #[test]
    fn test_windows_are_isolated_per_key_and_name() {
        let slot = ScratchSlot::default();
        let now = Utc::now();

        slot.record("a", "ip1", now, 60);
        slot.record("a", "ip1", now, 60);
        assert_eq!(slot.count("a", "ip1", now, 60), 2);
        assert_eq!(slot.count("a", "ip2", now, 60), 0);
        assert_eq!(slot.count("b", "ip1", now, 60), 0);
    }
}
