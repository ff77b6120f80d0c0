//! First-start layout
//!
//! Creates the data directories and seeds the config file, empty ban and
//! whitelist files, the default rule set and a minimal banned page. Existing
//! files are never overwritten.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use tracing::info;

use crate::config::Config;
use crate::core::persist;
use crate::core::rules::default_rules;

const DEFAULT_BANNED_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Access Denied</title></head>
<body>
  <h1>Access Denied</h1>
  <p>Your address {{IP}} has been blocked: {{REASON}}</p>
  <p>The block expires in {{REMAIN}} seconds (at epoch {{EXPIRY}} ms).</p>
</body>
</html>
"#;

/// Prepare the on-disk layout. Fails only on unusable directories; a
/// failure here is fatal at startup.
pub fn ensure_layout(config_path: &Path, config: &Config) -> io::Result<()> {
    fs::create_dir_all(&config.base_dir)?;
    fs::create_dir_all(&config.rules_dir)?;
    if let Some(parent) = config.bans_file.parent() {
        fs::create_dir_all(parent)?;
    }
    if let Some(parent) = config.whitelist_file.parent() {
        fs::create_dir_all(parent)?;
    }

    if !config_path.exists() {
        persist::write_json_atomic(config_path, config)?;
        info!(path = %config_path.display(), "Wrote default config file");
    }
    if !config.bans_file.exists() {
        persist::write_json_atomic(&config.bans_file, &BTreeMap::<String, ()>::new())?;
    }
    if !config.whitelist_file.exists() {
        persist::write_json_atomic(&config.whitelist_file, &Vec::<String>::new())?;
    }
    if !config.banned_page_file.exists() {
        fs::write(&config.banned_page_file, DEFAULT_BANNED_PAGE)?;
    }

    for (name, rules) in default_rules() {
        let path = config.rules_dir.join(name);
        if !path.exists() {
            let list: Vec<&str> = rules;
            persist::write_json_atomic(&path, &list)?;
            info!(file = %path.display(), "Seeded default rules");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &Path) -> Config {
        let mut config = Config::default();
        config.base_dir = dir.to_path_buf();
        config.rules_dir = dir.join("rules");
        config.bans_file = dir.join("bans/bans.json");
        config.whitelist_file = dir.join("bans/whitelist.json");
        config.banned_page_file = dir.join("banned.html");
        config
    }

    #[test]
    fn test_seeds_full_layout() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());

        ensure_layout(&dir.path().join("config.json"), &config).unwrap();

        assert!(dir.path().join("config.json").exists());
        assert!(config.bans_file.exists());
        assert!(config.whitelist_file.exists());
        assert!(config.banned_page_file.exists());
        for (name, _) in default_rules() {
            assert!(config.rules_dir.join(name).exists(), "missing seed {name}");
        }

        // Seeded rule files parse as string arrays
        let raw = fs::read_to_string(config.rules_dir.join("ip_blocklist.json")).unwrap();
        let rules: Vec<String> = serde_json::from_str(&raw).unwrap();
        assert_eq!(rules, vec!["192.168.1.100", "10.0.0.2"]);
    }

    #[test]
    fn test_existing_files_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        fs::create_dir_all(&config.rules_dir).unwrap();
        fs::write(config.rules_dir.join("user_agents.json"), r#"["custom"]"#).unwrap();

        ensure_layout(&dir.path().join("config.json"), &config).unwrap();

        let raw = fs::read_to_string(config.rules_dir.join("user_agents.json")).unwrap();
        assert_eq!(raw, r#"["custom"]"#);
    }
}
