//! Ban store
//!
//! Authoritative map of banned addresses with TTL expiry and whitelist
//! override. In-memory state is the source of truth; the JSON file is a
//! recovery log maintained by a coalescing background flusher with
//! temp-file + fsync + rename writes.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration as StdDuration, Instant};
use tracing::{debug, info, warn};

use crate::core::persist;

/// TTL of the `is_banned` read cache. Invalidated per address on add/delete.
const READ_CACHE_TTL: StdDuration = StdDuration::from_secs(5);

/// A single ban held in memory.
#[derive(Debug, Clone)]
pub struct BanEntry {
    pub until: DateTime<Utc>,
    pub reason: String,
}

/// Persisted/wire shape of a ban: `until` is ISO-8601 with a trailing `Z`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanRecord {
    pub until: String,
    pub reason: String,
}

/// One row of [`BanStore::list_all`], sorted by expiry descending.
#[derive(Debug, Clone, Serialize)]
pub struct BanListing {
    pub ip: String,
    pub until: String,
    pub reason: String,
    pub active: bool,
}

#[derive(Clone)]
struct CachedVerdict {
    banned: bool,
    reason: Option<String>,
    valid_until: Instant,
}

struct Inner {
    bans: HashMap<String, BanEntry>,
    whitelist: HashSet<String>,
    read_cache: HashMap<String, CachedVerdict>,
    dirty: bool,
}

/// Banned-address store with whitelist override and file persistence.
pub struct BanStore {
    bans_file: PathBuf,
    whitelist_file: PathBuf,
    default_ban_minutes: f64,
    inner: Mutex<Inner>,
}

impl BanStore {
    /// Open the store, loading bans and the whitelist from disk. Unreadable
    /// files are logged and treated as empty.
    pub fn open(bans_file: &Path, whitelist_file: &Path, default_ban_minutes: f64) -> Self {
        let store = Self {
            bans_file: bans_file.to_path_buf(),
            whitelist_file: whitelist_file.to_path_buf(),
            default_ban_minutes,
            inner: Mutex::new(Inner {
                bans: HashMap::new(),
                whitelist: HashSet::new(),
                read_cache: HashMap::new(),
                dirty: false,
            }),
        };
        store.load_bans();
        store.load_whitelist();
        store
    }

    /// Reload the ban map from disk, replacing in-memory entries.
    pub fn load_bans(&self) {
        let raw: HashMap<String, BanRecord> = match persist::read_json_or_default(&self.bans_file)
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(file = %self.bans_file.display(), error = %e, "Failed to load bans");
                return;
            }
        };

        let mut bans = HashMap::with_capacity(raw.len());
        for (ip, record) in raw {
            match DateTime::parse_from_rfc3339(&record.until) {
                Ok(until) => {
                    bans.insert(
                        ip,
                        BanEntry {
                            until: until.with_timezone(&Utc),
                            reason: record.reason,
                        },
                    );
                }
                Err(e) => {
                    warn!(ip = %ip, until = %record.until, error = %e, "Skipping unparsable ban entry");
                }
            }
        }

        let mut inner = self.inner.lock();
        inner.bans = bans;
        inner.read_cache.clear();
        info!(count = inner.bans.len(), file = %self.bans_file.display(), "Loaded bans");
    }

    /// Reload the whitelist from disk; a missing file is created empty.
    pub fn load_whitelist(&self) {
        let whitelist: HashSet<String> = if self.whitelist_file.exists() {
            match persist::read_json_or_default::<Vec<String>>(&self.whitelist_file) {
                Ok(list) => list.into_iter().collect(),
                Err(e) => {
                    warn!(file = %self.whitelist_file.display(), error = %e, "Failed to load whitelist");
                    HashSet::new()
                }
            }
        } else {
            if let Err(e) = persist::write_json_atomic(&self.whitelist_file, &Vec::<String>::new())
            {
                warn!(file = %self.whitelist_file.display(), error = %e, "Failed to create whitelist file");
            } else {
                info!(file = %self.whitelist_file.display(), "Created empty whitelist file");
            }
            HashSet::new()
        };

        let mut inner = self.inner.lock();
        inner.whitelist = whitelist;
        inner.read_cache.clear();
    }

    /// Whether the address is currently banned, and for which reason.
    ///
    /// Whitelisted addresses are never banned. An entry whose expiry has
    /// passed is evicted before returning.
    pub fn is_banned(&self, ip: &str) -> (bool, Option<String>) {
        let mut inner = self.inner.lock();
        if inner.whitelist.contains(ip) {
            return (false, None);
        }

        if let Some(cached) = inner.read_cache.get(ip) {
            if Instant::now() < cached.valid_until {
                return (cached.banned, cached.reason.clone());
            }
        }

        let now = Utc::now();
        let entry = inner
            .bans
            .get(ip)
            .map(|entry| (entry.until, entry.reason.clone()));

        // A positive verdict is cached no longer than the ban has left, so
        // expiry is never masked by the read cache.
        let (verdict, ttl) = match entry {
            None => ((false, None), READ_CACHE_TTL),
            Some((until, _)) if now >= until => {
                inner.bans.remove(ip);
                inner.dirty = true;
                ((false, None), READ_CACHE_TTL)
            }
            Some((until, reason)) => {
                let remaining = (until - now).to_std().unwrap_or(StdDuration::ZERO);
                ((true, Some(reason)), READ_CACHE_TTL.min(remaining))
            }
        };

        inner.read_cache.insert(
            ip.to_string(),
            CachedVerdict {
                banned: verdict.0,
                reason: verdict.1.clone(),
                valid_until: Instant::now() + ttl,
            },
        );
        verdict
    }

    /// Ban an address for `minutes` (default duration when `None`), replacing
    /// any existing entry and scheduling persistence. Returns `false` without
    /// changing anything when the address is whitelisted.
    pub fn add_ban(&self, ip: &str, minutes: Option<f64>, reason: &str) -> bool {
        let mut inner = self.inner.lock();
        if inner.whitelist.contains(ip) {
            info!(ip = %ip, "Attempt to ban whitelisted IP ignored");
            return false;
        }

        let minutes = minutes.unwrap_or(self.default_ban_minutes);
        let until = Utc::now() + Duration::milliseconds((minutes * 60_000.0) as i64);
        inner.bans.insert(
            ip.to_string(),
            BanEntry {
                until,
                reason: reason.to_string(),
            },
        );
        inner.read_cache.remove(ip);
        inner.dirty = true;
        info!(ip = %ip, until = %until, reason = %reason, "Added ban");
        true
    }

    /// Remove an address's ban, if any; schedules persistence when removed.
    pub fn delete_ban(&self, ip: &str) -> bool {
        let mut inner = self.inner.lock();
        if inner.bans.remove(ip).is_none() {
            return false;
        }
        inner.read_cache.remove(ip);
        inner.dirty = true;
        info!(ip = %ip, "Deleted ban");
        true
    }

    /// The current entry for an address, expired or not.
    pub fn entry(&self, ip: &str) -> Option<BanEntry> {
        self.inner.lock().bans.get(ip).cloned()
    }

    /// Snapshot of entries whose expiry is still in the future.
    pub fn list_active(&self) -> BTreeMap<String, BanRecord> {
        let now = Utc::now();
        let inner = self.inner.lock();
        inner
            .bans
            .iter()
            .filter(|(_, entry)| now < entry.until)
            .map(|(ip, entry)| (ip.clone(), record_of(entry)))
            .collect()
    }

    /// Snapshot of all entries with an `active` flag, sorted by expiry
    /// descending.
    pub fn list_all(&self) -> Vec<BanListing> {
        let now = Utc::now();
        let inner = self.inner.lock();
        let mut listings: Vec<(DateTime<Utc>, BanListing)> = inner
            .bans
            .iter()
            .map(|(ip, entry)| {
                (
                    entry.until,
                    BanListing {
                        ip: ip.clone(),
                        until: iso_z(entry.until),
                        reason: entry.reason.clone(),
                        active: now < entry.until,
                    },
                )
            })
            .collect();
        listings.sort_by(|a, b| b.0.cmp(&a.0));
        listings.into_iter().map(|(_, listing)| listing).collect()
    }

    /// Persist the ban map when dirty. Failures keep the dirty flag set so
    /// the next flush retries; in-memory state is unaffected.
    pub fn flush(&self) {
        let snapshot: BTreeMap<String, BanRecord> = {
            let mut inner = self.inner.lock();
            if !inner.dirty {
                return;
            }
            inner.dirty = false;
            inner
                .bans
                .iter()
                .map(|(ip, entry)| (ip.clone(), record_of(entry)))
                .collect()
        };

        if let Err(e) = persist::write_json_atomic(&self.bans_file, &snapshot) {
            warn!(file = %self.bans_file.display(), error = %e, "Failed to save bans, will retry");
            self.inner.lock().dirty = true;
        } else {
            debug!(count = snapshot.len(), file = %self.bans_file.display(), "Saved bans");
        }
    }
}

fn record_of(entry: &BanEntry) -> BanRecord {
    BanRecord {
        until: iso_z(entry.until),
        reason: entry.reason.clone(),
    }
}

/// ISO-8601 with a trailing `Z`.
pub(crate) fn iso_z(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &Path) -> BanStore {
        BanStore::open(&dir.join("bans.json"), &dir.join("whitelist.json"), 15.0)
    }

    #[test]
    fn test_add_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let bans = store(dir.path());

        assert_eq!(bans.is_banned("203.0.113.5"), (false, None));
        assert!(bans.add_ban("203.0.113.5", None, "paths_blocked"));
        assert_eq!(
            bans.is_banned("203.0.113.5"),
            (true, Some("paths_blocked".to_string()))
        );
    }

    #[test]
    fn test_whitelisted_address_never_banned() {
        let dir = tempfile::tempdir().unwrap();
        persist::write_json_atomic(
            &dir.path().join("whitelist.json"),
            &vec!["198.51.100.7".to_string()],
        )
        .unwrap();
        let bans = store(dir.path());

        assert!(!bans.add_ban("198.51.100.7", None, "manual ban"));
        assert_eq!(bans.is_banned("198.51.100.7"), (false, None));
        assert!(bans.list_active().is_empty());
    }

    #[test]
    fn test_expired_entry_evicted_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let bans = store(dir.path());

        assert!(bans.add_ban("192.0.2.10", Some(0.0), "test"));
        // Expiry equals insertion time, so the very next lookup evicts
        assert_eq!(bans.is_banned("192.0.2.10"), (false, None));
        assert!(bans.entry("192.0.2.10").is_none());
    }

    #[test]
    fn test_fractional_minutes_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let bans = store(dir.path());

        // 0.001 minutes = 60 ms
        assert!(bans.add_ban("192.0.2.11", Some(0.001), "test"));
        assert!(bans.entry("192.0.2.11").is_some());
        std::thread::sleep(StdDuration::from_millis(120));
        assert_eq!(bans.is_banned("192.0.2.11"), (false, None));
        assert!(bans.entry("192.0.2.11").is_none());
    }

    #[test]
    fn test_read_cache_invalidated_on_add_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let bans = store(dir.path());

        assert_eq!(bans.is_banned("10.1.1.1"), (false, None)); // cached as not banned
        assert!(bans.add_ban("10.1.1.1", None, "bf"));
        assert_eq!(bans.is_banned("10.1.1.1"), (true, Some("bf".to_string())));
        assert!(bans.delete_ban("10.1.1.1"));
        assert_eq!(bans.is_banned("10.1.1.1"), (false, None));
    }

    #[test]
    fn test_list_all_sorted_and_supersets_active() {
        let dir = tempfile::tempdir().unwrap();
        let bans = store(dir.path());

        bans.add_ban("10.0.0.1", Some(5.0), "short");
        bans.add_ban("10.0.0.2", Some(60.0), "long");
        bans.add_ban("10.0.0.3", Some(0.0), "expired");

        let all = bans.list_all();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].ip, "10.0.0.2"); // latest expiry first
        assert_eq!(all[1].ip, "10.0.0.1");
        assert!(!all[2].active);

        let active = bans.list_active();
        assert_eq!(active.len(), 2);
        for listing in all.iter().filter(|l| l.active) {
            assert!(active.contains_key(&listing.ip));
        }
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        {
            let bans = store(dir.path());
            bans.add_ban("203.0.113.9", Some(30.0), "bad_user_agent");
            bans.flush();
        }
        let reopened = store(dir.path());
        assert_eq!(
            reopened.is_banned("203.0.113.9"),
            (true, Some("bad_user_agent".to_string()))
        );
    }

    #[test]
    fn test_flush_is_a_noop_when_clean() {
        let dir = tempfile::tempdir().unwrap();
        let bans = store(dir.path());
        bans.flush();
        assert!(!dir.path().join("bans.json").exists());
    }

    #[test]
    fn test_replacing_ban_updates_reason() {
        let dir = tempfile::tempdir().unwrap();
        let bans = store(dir.path());

        bans.add_ban("10.9.9.9", None, "first");
        bans.add_ban("10.9.9.9", None, "second");
        assert_eq!(bans.is_banned("10.9.9.9"), (true, Some("second".to_string())));
    }
}
