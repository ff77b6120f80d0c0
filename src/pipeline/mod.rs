//! Pipeline orchestrator
//!
//! Fans a descriptor out to the module set on a bounded worker pool,
//! reconciles verdicts (first block in declaration order wins), applies the
//! ban, writes the journals and memoises request-phase decisions.

pub mod normalize;

use futures_util::future;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::config::Config;
use crate::core::cache::Fingerprint;
use crate::core::{AlertJournal, BanStore, DecisionCache, RuleStore, TrafficJournal};
use crate::models::{Decision, Descriptor, Phase};
use crate::modules::{self, DetectionModule, ModuleInput, ScratchSlot};
use self::normalize::NormalizedRequest;

/// The assembled decision service: stores, journals, cache and module set.
pub struct Waf {
    config: Arc<Config>,
    pub rules: Arc<RuleStore>,
    pub bans: Arc<BanStore>,
    pub cache: Arc<DecisionCache>,
    pub alerts: Arc<AlertJournal>,
    pub traffic: Arc<TrafficJournal>,
    modules: Vec<Arc<dyn DetectionModule>>,
    scratch: HashMap<&'static str, Arc<ScratchSlot>>,
    pool: Arc<Semaphore>,
}

impl Waf {
    /// Assemble the service, loading rules, bans and the whitelist from the
    /// configured paths.
    pub fn new(config: Arc<Config>) -> Self {
        let rules = Arc::new(RuleStore::load(&config.rules_dir));
        let bans = Arc::new(BanStore::open(
            &config.bans_file,
            &config.whitelist_file,
            config.delay_ban_minutes,
        ));
        let cache = Arc::new(DecisionCache::new(config.cache_maxsize));
        let alerts = Arc::new(AlertJournal::new(&config.base_dir.join("alerts")));
        let traffic = Arc::new(TrafficJournal::new(&config.base_dir.join("traffic")));

        let modules = modules::registry(rules.clone());
        let scratch = modules
            .iter()
            .map(|module| (module.name(), Arc::new(ScratchSlot::default())))
            .collect();
        let pool = Arc::new(Semaphore::new(config.module_threads.max(1)));

        Self {
            config,
            rules,
            bans,
            cache,
            alerts,
            traffic,
            modules,
            scratch,
            pool,
        }
    }

    /// Reload rules, bans and whitelist from disk and flush the decision
    /// cache.
    pub fn reload(&self) {
        self.rules.reload();
        self.bans.load_bans();
        self.bans.load_whitelist();
        self.cache.clear();
        info!("Reloaded rules, bans and whitelist");
    }

    /// Evaluate a descriptor and return the verdict.
    pub async fn check(&self, descriptor: Descriptor) -> Decision {
        match descriptor.phase {
            Phase::Request => self.check_request(descriptor).await,
            Phase::Response { .. } => self.check_response(descriptor).await,
        }
    }

    /// Request phase: memoised module pipeline with a ban short-circuit on
    /// cache misses. Ban verdicts themselves are never memoised, so a ban
    /// running out restores the module verdict without any cache flush.
    async fn check_request(&self, descriptor: Descriptor) -> Decision {
        let key = Fingerprint::of(&descriptor);
        if let Some(decision) = self.cache.get(&key) {
            return decision;
        }

        let (banned, reason) = self.bans.is_banned(&descriptor.ip);
        if banned {
            let reason = reason.unwrap_or_else(|| "banned".to_string());
            info!(ip = %descriptor.ip, reason = %reason, "Blocked banned IP");
            return Decision::block(format!("banned: {reason}"), None);
        }

        let decision = self.evaluate(descriptor).await;
        self.cache.insert(key, decision.clone());
        decision
    }

    /// Response phase: same contract, no memoisation (rate state is
    /// time-sensitive).
    async fn check_response(&self, descriptor: Descriptor) -> Decision {
        if !self.config.enable_response_filter {
            return Decision::allow(None);
        }

        let (banned, reason) = self.bans.is_banned(&descriptor.ip);
        if banned {
            let reason = reason.unwrap_or_else(|| "banned".to_string());
            return Decision::block(format!("banned: {reason}"), None);
        }

        self.evaluate(descriptor).await
    }

    /// Run every module concurrently under the pool bound. The first block
    /// in declaration order wins; a panicking module counts as allow.
    async fn evaluate(&self, descriptor: Descriptor) -> Decision {
        let request = Arc::new(normalize::normalize(&descriptor));

        let mut handles = Vec::with_capacity(self.modules.len());
        for module in &self.modules {
            let permit = match self.pool.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break, // pool closed, shutting down
            };
            let module = module.clone();
            let input = ModuleInput {
                request: request.clone(),
                scratch: self.slot(module.name()),
                config: self.config.clone(),
            };
            handles.push(tokio::task::spawn_blocking(move || {
                let _permit = permit;
                module.run(&input)
            }));
        }

        let mut winner: Option<(usize, Decision)> = None;
        for (index, joined) in future::join_all(handles).await.into_iter().enumerate() {
            match joined {
                Ok(decision) => {
                    if decision.is_block() && winner.is_none() {
                        winner = Some((index, decision));
                    }
                }
                Err(e) => {
                    warn!(
                        module = self.modules[index].name(),
                        error = %e,
                        "Module failed, treating as allow"
                    );
                }
            }
        }

        match winner {
            Some((index, decision)) => {
                self.apply_block(self.modules[index].name(), &request, &decision);
                decision
            }
            None => {
                let (path, user_agent) = loggable(&request);
                self.traffic.log_request(
                    &request.ip,
                    &request.method,
                    path,
                    user_agent,
                    "allow",
                    "",
                    request.phase.status_code(),
                    "",
                    "",
                );
                Decision::allow(None)
            }
        }
    }

    /// Ban the client and write exactly one alert and one traffic entry
    /// under the blocking module's identity.
    fn apply_block(&self, module: &'static str, request: &NormalizedRequest, decision: &Decision) {
        let reason = decision.reason.clone().unwrap_or_default();
        self.bans.add_ban(&request.ip, None, &reason);

        let matched_rule = decision.matched_rule().unwrap_or_default();
        let (path, user_agent) = loggable(request);
        let status_code = request.phase.status_code();

        self.alerts.log_alert(
            module,
            "block",
            &reason,
            &request.ip,
            &request.method,
            path,
            user_agent,
            matched_rule,
            status_code,
        );
        self.traffic.log_request(
            &request.ip,
            &request.method,
            path,
            user_agent,
            "block",
            &reason,
            status_code,
            module,
            matched_rule,
        );
    }

    fn slot(&self, name: &str) -> Arc<ScratchSlot> {
        self.scratch.get(name).cloned().unwrap_or_default()
    }
}

/// Journal fields: responses carry no path or user agent.
fn loggable(request: &NormalizedRequest) -> (&str, &str) {
    match request.phase {
        Phase::Request => (request.path.as_str(), request.user_agent.as_str()),
        Phase::Response { .. } => ("", ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Action;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use std::path::Path;

    fn test_config(dir: &Path) -> Arc<Config> {
        let mut config = Config::default();
        config.base_dir = dir.to_path_buf();
        config.rules_dir = dir.join("rules");
        config.bans_file = dir.join("bans/bans.json");
        config.whitelist_file = dir.join("bans/whitelist.json");
        config.banned_page_file = dir.join("banned.html");
        Arc::new(config)
    }

    fn waf_in(dir: &Path) -> Waf {
        let config = test_config(dir);
        crate::bootstrap::ensure_layout(&dir.join("config.json"), &config).unwrap();
        Waf::new(config)
    }

    fn benign(ip: &str) -> Descriptor {
        Descriptor {
            ip: ip.to_string(),
            method: "GET".to_string(),
            header: BASE64.encode(r#"{"host":"example.test"}"#),
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) Firefox/115.0".to_string(),
            path: BASE64.encode("/index.html"),
            body: String::new(),
            phase: Phase::Request,
        }
    }

    #[tokio::test]
    async fn test_blocklisted_ip_blocks_bans_and_journals() {
        let dir = tempfile::tempdir().unwrap();
        let waf = waf_in(dir.path());

        let decision = waf.check(benign("192.168.1.100")).await;
        assert_eq!(decision.action, Action::Block);
        assert_eq!(decision.reason.as_deref(), Some("ip_blocklist"));

        let (banned, reason) = waf.bans.is_banned("192.168.1.100");
        assert!(banned);
        assert_eq!(reason.as_deref(), Some("ip_blocklist"));

        let alerts = waf.alerts.get_alerts(100);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].module, "BasicAttackRules");
        assert_eq!(alerts[0].ip, "192.168.1.100");
        assert_eq!(alerts[0].path, "/index.html");

        let traffic = waf.traffic.read_today();
        assert_eq!(traffic.len(), 1);
        assert_eq!(traffic[0].action, "block");
        assert_eq!(traffic[0].path, alerts[0].path);
    }

    #[tokio::test]
    async fn test_identical_request_served_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let waf = waf_in(dir.path());

        let mut descriptor = benign("203.0.113.5");
        descriptor.path = BASE64.encode("/search?q=' UNION SELECT 1--");

        let first = waf.check(descriptor.clone()).await;
        assert_eq!(first.reason.as_deref(), Some("paths_blocked"));

        let second = waf.check(descriptor).await;
        assert_eq!(first, second);
        assert_eq!(waf.cache.stats().hits, 1);
        // Side effects ran once: one alert, one traffic entry
        assert_eq!(waf.alerts.get_alerts(100).len(), 1);
        assert_eq!(waf.traffic.read_today().len(), 1);
    }

    #[tokio::test]
    async fn test_whitelisted_ip_blocks_without_ban() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        crate::bootstrap::ensure_layout(&dir.path().join("config.json"), &config).unwrap();
        crate::core::persist::write_json_atomic(
            &config.whitelist_file,
            &vec!["198.51.100.7".to_string()],
        )
        .unwrap();
        let waf = Waf::new(config);

        let mut descriptor = benign("198.51.100.7");
        descriptor.user_agent = "sqlmap/1.7".to_string();

        let decision = waf.check(descriptor).await;
        assert_eq!(decision.action, Action::Block);
        // The ban is a no-op for whitelisted addresses
        assert_eq!(waf.bans.is_banned("198.51.100.7"), (false, None));
        assert!(waf.bans.list_active().is_empty());
    }

    #[tokio::test]
    async fn test_banned_ip_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let waf = waf_in(dir.path());

        waf.bans.add_ban("203.0.113.77", None, "manual ban");
        let decision = waf.check(benign("203.0.113.77")).await;
        assert_eq!(decision.action, Action::Block);
        assert_eq!(decision.reason.as_deref(), Some("banned: manual ban"));
        // Short-circuit verdicts run no modules and write no journals
        assert!(waf.alerts.get_alerts(100).is_empty());
    }

    #[tokio::test]
    async fn test_allow_writes_traffic_entry() {
        let dir = tempfile::tempdir().unwrap();
        let waf = waf_in(dir.path());

        let decision = waf.check(benign("203.0.113.5")).await;
        assert_eq!(decision.action, Action::Allow);
        assert!(waf.alerts.get_alerts(100).is_empty());

        let traffic = waf.traffic.read_today();
        assert_eq!(traffic.len(), 1);
        assert_eq!(traffic[0].action, "allow");
    }

    #[tokio::test]
    async fn test_response_phase_brute_force_and_cache_bypass() {
        let dir = tempfile::tempdir().unwrap();
        let waf = waf_in(dir.path());

        let response = Descriptor {
            ip: "198.51.100.20".to_string(),
            method: "POST".to_string(),
            header: String::new(),
            user_agent: String::new(),
            path: String::new(),
            body: String::new(),
            phase: Phase::Response { status_code: 401 },
        };

        for _ in 0..5 {
            let decision = waf.check(response.clone()).await;
            assert_eq!(decision.action, Action::Allow, "first five must pass");
        }
        let decision = waf.check(response.clone()).await;
        assert_eq!(decision.action, Action::Block);
        assert!(decision.reason.as_deref().unwrap_or_default().contains("401"));

        // Nothing was memoised for the response phase
        let stats = waf.cache.stats();
        assert_eq!((stats.hits, stats.size), (0, 0));

        let alerts = waf.alerts.get_alerts(100);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].module, "AntiHTTPGenericBruteforce");
        assert_eq!(alerts[0].status_code, Some(401));
        assert_eq!(alerts[0].path, "");
    }

    #[tokio::test]
    async fn test_oversized_api_body_reports_payload_size() {
        let dir = tempfile::tempdir().unwrap();
        let waf = waf_in(dir.path());

        let body = serde_json::to_string(&vec![0u8; 2 * 1024 * 1024]).unwrap();
        let descriptor = Descriptor {
            ip: "203.0.113.40".to_string(),
            method: "POST".to_string(),
            header: BASE64.encode(r#"{"Content-Type":"application/json"}"#),
            user_agent: String::new(),
            path: BASE64.encode("/api/users"),
            body: BASE64.encode(&body),
            phase: Phase::Request,
        };

        let decision = waf.check(descriptor).await;
        assert_eq!(decision.action, Action::Block);
        // The payload verdict outranks the missing user agent
        assert!(decision.reason.unwrap().contains("payload too large"));
        assert_eq!(waf.alerts.get_alerts(10)[0].module, "APIAbuseDetection");
    }

    #[tokio::test]
    async fn test_ban_expiry_restores_allow() {
        let dir = tempfile::tempdir().unwrap();
        let waf = waf_in(dir.path());

        // 0.001 minutes = 60 ms
        waf.bans.add_ban("192.0.2.10", Some(0.001), "test");
        let decision = waf.check(benign("192.0.2.10")).await;
        assert_eq!(decision.reason.as_deref(), Some("banned: test"));

        tokio::time::sleep(std::time::Duration::from_millis(120)).await;
        let decision = waf.check(benign("192.0.2.10")).await;
        assert_eq!(decision.action, Action::Allow);
        assert!(waf.bans.list_active().is_empty());
    }

    #[tokio::test]
    async fn test_reload_clears_cache_and_rereads_rules() {
        let dir = tempfile::tempdir().unwrap();
        let waf = waf_in(dir.path());

        let _ = waf.check(benign("203.0.113.5")).await;
        let _ = waf.check(benign("203.0.113.5")).await;
        assert_eq!(waf.cache.stats().hits, 1);

        waf.reload();
        assert_eq!(waf.cache.stats().size, 0);
        assert!(!waf.rules.snapshot().is_empty());
    }
}
