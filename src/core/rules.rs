//! Rule store
//!
//! JSON rule files loaded from a directory into an in-memory set. Each file
//! is an array of rule strings; the file name decides which request fields
//! it applies to (§ rule-type tags below). Pattern rules are compiled once
//! per load; a string that is not a valid regex is warned about and treated
//! as non-matching.

use parking_lot::RwLock;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Rule-type tags in evaluation priority order. A file feeds every type
/// whose tag its name contains.
pub const RULE_TYPES: [&str; 5] = ["ip_blocklist", "user_agents", "headers", "paths", "body"];

/// A rule string plus its compiled lowercased pattern (`None` when the
/// string does not compile; exact-match rule types ignore it).
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub raw: String,
    pub regex: Option<Regex>,
}

/// An immutable snapshot of all loaded rule files, keyed by file name.
/// `BTreeMap` keeps iteration deterministic per load.
#[derive(Debug, Default)]
pub struct RuleSet {
    pub files: BTreeMap<String, Vec<CompiledRule>>,
}

impl RuleSet {
    /// Files whose name contains `tag`, in lexicographic order.
    pub fn files_for<'a>(
        &'a self,
        tag: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a Vec<CompiledRule>)> {
        self.files.iter().filter(move |(name, _)| name.contains(tag))
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Rule files held behind an atomically swappable snapshot.
pub struct RuleStore {
    rules_dir: PathBuf,
    current: RwLock<Arc<RuleSet>>,
}

impl RuleStore {
    /// Create the store and perform the initial load.
    pub fn load(rules_dir: &Path) -> Self {
        let store = Self {
            rules_dir: rules_dir.to_path_buf(),
            current: RwLock::new(Arc::new(RuleSet::default())),
        };
        store.reload();
        store
    }

    /// Re-scan the rules directory, fully replacing the in-memory set.
    /// Readers holding an old snapshot are unaffected.
    pub fn reload(&self) {
        let set = load_dir(&self.rules_dir);
        *self.current.write() = Arc::new(set);
    }

    /// The current rule set.
    pub fn snapshot(&self) -> Arc<RuleSet> {
        self.current.read().clone()
    }
}

fn load_dir(dir: &Path) -> RuleSet {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Rules directory unreadable");
            return RuleSet::default();
        }
    };

    let mut files = BTreeMap::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().map_or(true, |ext| ext != "json") {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(String::from) else {
            continue;
        };
        match read_rule_file(&path) {
            Ok(rules) => {
                info!(file = %name, count = rules.len(), "Loaded rules");
                files.insert(name, rules);
            }
            Err(e) => {
                warn!(file = %name, error = %e, "Failed to load rules file, skipping");
            }
        }
    }
    RuleSet { files }
}

fn read_rule_file(path: &Path) -> std::io::Result<Vec<CompiledRule>> {
    let raw = std::fs::read_to_string(path)?;
    let strings: Vec<String> = serde_json::from_str(&raw)?;
    Ok(strings.into_iter().map(|raw| compile(raw, path)).collect())
}

fn compile(raw: String, path: &Path) -> CompiledRule {
    // Patterns are folded to lowercase; matching inputs are folded the same
    // way, so matching stays case-insensitive end to end.
    let regex = match Regex::new(&raw.to_lowercase()) {
        Ok(regex) => Some(regex),
        Err(e) => {
            warn!(file = %path.display(), rule = %raw, error = %e, "Invalid rule pattern, treated as non-matching");
            None
        }
    };
    CompiledRule { raw, regex }
}

/// The rule files seeded on first start when a rules directory is empty.
pub fn default_rules() -> Vec<(&'static str, Vec<&'static str>)> {
    vec![
        ("ip_blocklist.json", vec!["192.168.1.100", "10.0.0.2"]),
        (
            "headers_patterns.json",
            vec![
                r"(?i)union\s+select",
                r"(?i)or\s+1=1",
                r"(?i)drop\s+table",
                r"<\?php",
                r"base64_decode",
            ],
        ),
        ("user_agents.json", vec!["sqlmap", "nikto", "fuzz", "curl"]),
        (
            "paths.json",
            vec![
                r"/wp-admin",
                r"/phpmyadmin",
                r"/\.env",
                r"../etc/passwd",
                r"<script>",
                r"<\?php",
                r"eval\(",
                r"(?i)union\s+select",
                r"(?i)or\s+1=1",
                r"(?i)drop\s+table",
                r"/\.git",
                r".*\.bak",
            ],
        ),
        (
            "body_patterns.json",
            vec![
                r"(?i)union\s+select",
                r"(?i)or\s+1=1",
                r"(?i)drop\s+table",
                r"<script>",
                r"<\?php",
                r"base64_decode",
            ],
        ),
    ]
}
