//! Alert and traffic journals
//!
//! Append-only, date-partitioned JSON record sinks. Entries are accepted
//! into an in-memory per-date buffer under a small mutex; a background
//! flusher drains the buffer and merges it into
//! `<dir>/<YYYY-MM-DD>-<suffix>.json` with temp-file + rename writes.
//! Within one date's file, order reflects acceptance into the buffer.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::core::persist;

/// Clip a string to at most `max` characters.
pub(crate) fn clip(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn today() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

// ── Shared engine ───────────────────────────────────────────────────────────

struct DatedJournal<T> {
    dir: PathBuf,
    suffix: &'static str,
    pending: Mutex<BTreeMap<String, Vec<T>>>,
}

impl<T: Serialize + DeserializeOwned + Clone> DatedJournal<T> {
    fn new(dir: PathBuf, suffix: &'static str) -> Self {
        Self {
            dir,
            suffix,
            pending: Mutex::new(BTreeMap::new()),
        }
    }

    fn file_for(&self, date: &str) -> PathBuf {
        self.dir.join(format!("{date}-{}.json", self.suffix))
    }

    fn append(&self, entry: T) {
        self.pending.lock().entry(today()).or_default().push(entry);
    }

    /// Drain the pending buffer into the per-date files. A failed write
    /// re-queues its batch ahead of newer entries so order is preserved.
    fn flush(&self) {
        let drained = std::mem::take(&mut *self.pending.lock());
        for (date, batch) in drained {
            if batch.is_empty() {
                continue;
            }
            let path = self.file_for(&date);
            let mut entries: Vec<T> = match persist::read_json_or_default(&path) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "Unreadable journal file, starting fresh");
                    Vec::new()
                }
            };
            entries.extend(batch.iter().cloned());
            if let Err(e) = persist::write_json_atomic(&path, &entries) {
                warn!(file = %path.display(), error = %e, "Failed to write journal, re-queueing");
                let mut pending = self.pending.lock();
                let slot = pending.entry(date).or_default();
                let mut requeued = batch;
                requeued.extend(slot.drain(..));
                *slot = requeued;
            }
        }
    }

    /// Today's entries, flushed first so reads see everything accepted.
    fn read_today(&self) -> Vec<T> {
        self.flush();
        match persist::read_json_or_default(&self.file_for(&today())) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Failed to read journal");
                Vec::new()
            }
        }
    }

    /// Drop today's pending entries and delete today's file.
    fn clear_today(&self) -> bool {
        let date = today();
        self.pending.lock().remove(&date);
        let path = self.file_for(&date);
        if !path.exists() {
            return true;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!(file = %path.display(), "Cleared journal file");
                true
            }
            Err(e) => {
                warn!(file = %path.display(), error = %e, "Failed to clear journal file");
                false
            }
        }
    }
}

// ── Alerts ──────────────────────────────────────────────────────────────────

/// One blocked-request record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEntry {
    pub timestamp: DateTime<Utc>,
    pub module: String,
    pub action: String,
    pub reason: String,
    pub ip: String,
    pub method: String,
    pub path: String,
    pub user_agent: String,
    pub matched_rule: String,
    pub status_code: Option<u16>,
}

/// Journal of block verdicts, one file per UTC date.
pub struct AlertJournal {
    journal: DatedJournal<AlertEntry>,
}

impl AlertJournal {
    pub fn new(dir: &Path) -> Self {
        Self {
            journal: DatedJournal::new(dir.to_path_buf(), "alerts"),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn log_alert(
        &self,
        module: &str,
        action: &str,
        reason: &str,
        ip: &str,
        method: &str,
        path: &str,
        user_agent: &str,
        matched_rule: &str,
        status_code: Option<u16>,
    ) {
        self.journal.append(AlertEntry {
            timestamp: Utc::now(),
            module: module.to_string(),
            action: action.to_string(),
            reason: reason.to_string(),
            ip: ip.to_string(),
            method: method.to_string(),
            path: clip(path, 500),
            user_agent: clip(user_agent, 100),
            matched_rule: clip(matched_rule, 200),
            status_code,
        });
        warn!(
            module = %module,
            action = %action,
            reason = %reason,
            ip = %ip,
            "[ALERT]"
        );
    }

    /// The last `limit` of today's alerts.
    pub fn get_alerts(&self, limit: usize) -> Vec<AlertEntry> {
        tail(self.journal.read_today(), limit)
    }

    /// The last `limit` of today's alerts for one address.
    pub fn get_alerts_by_ip(&self, ip: &str, limit: usize) -> Vec<AlertEntry> {
        let filtered: Vec<AlertEntry> = self
            .journal
            .read_today()
            .into_iter()
            .filter(|entry| entry.ip == ip)
            .collect();
        tail(filtered, limit)
    }

    pub fn flush(&self) {
        self.journal.flush();
    }

    /// Truncate today's alert file.
    pub fn clear(&self) -> bool {
        self.journal.clear_today()
    }
}

// ── Traffic ─────────────────────────────────────────────────────────────────

/// One observed-request record, allow and block alike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficEntry {
    pub timestamp: DateTime<Utc>,
    pub ip: String,
    pub method: String,
    pub path: String,
    pub user_agent: String,
    pub action: String,
    pub reason: String,
    pub status_code: Option<u16>,
    pub module: String,
    pub matched_rule: String,
}

/// Journal of every evaluated descriptor, one file per UTC date.
pub struct TrafficJournal {
    journal: DatedJournal<TrafficEntry>,
}

impl TrafficJournal {
    pub fn new(dir: &Path) -> Self {
        Self {
            journal: DatedJournal::new(dir.to_path_buf(), "traffic"),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn log_request(
        &self,
        ip: &str,
        method: &str,
        path: &str,
        user_agent: &str,
        action: &str,
        reason: &str,
        status_code: Option<u16>,
        module: &str,
        matched_rule: &str,
    ) {
        self.journal.append(TrafficEntry {
            timestamp: Utc::now(),
            ip: ip.to_string(),
            method: method.to_string(),
            path: clip(path, 500),
            user_agent: clip(user_agent, 200),
            action: action.to_string(),
            reason: reason.to_string(),
            status_code,
            module: module.to_string(),
            matched_rule: clip(matched_rule, 200),
        });
    }

    pub fn read_today(&self) -> Vec<TrafficEntry> {
        self.journal.read_today()
    }

    pub fn flush(&self) {
        self.journal.flush();
    }
}

fn tail<T>(mut entries: Vec<T>, limit: usize) -> Vec<T> {
    if entries.len() > limit {
        entries.split_off(entries.len() - limit)
    } else {
        entries
    }
}
