//! Bot and scanner detection over the user agent.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::json;

use crate::core::journal::clip;
use crate::models::Decision;

use super::{skipped_response, DetectionModule, ModuleInput};

lazy_static! {
    /// Known attack tooling and mass scanners.
    static ref MALICIOUS_BOTS: Vec<(&'static str, Regex)> = compile(&[
        r"sqlmap", r"nikto", r"nmap", r"masscan", r"nessus",
        r"acunetix", r"metasploit", r"burpsuite", r"w3af",
        r"dirbuster", r"gobuster", r"wfuzz", r"commix",
        r"havij", r"pangolin", r"jsql", r"sqlninja",
        r"grabber", r"paros", r"webscarab", r"vega",
        r"httrack", r"wget", r"curl.*bot", r"python-requests",
        r"zgrab", r"shodan", r"censys",
        r"nuclei", r"subfinder", r"amass", r"ffuf",
    ]);

    /// Wording that legitimate clients do not put in a user agent.
    static ref SUSPICIOUS_PATTERNS: Vec<(&'static str, Regex)> = compile(&[
        r"bot.*scan", r"exploit", r"hack", r"inject",
        r"attack", r"vulnerability", r"penetration",
    ]);

    /// Anchored signatures of bare HTTP libraries and probe defaults.
    static ref SCANNER_SIGNATURES: Vec<(&'static str, Regex)> = compile(&[
        r"^-$",
        r"^$",
        r"^mozilla/4\.0$",
        r"^java/",
        r"^libwww-perl",
        r"^python-",
        r"^go-http-client",
    ]);
}

fn compile(patterns: &[&'static str]) -> Vec<(&'static str, Regex)> {
    patterns
        .iter()
        .map(|p| (*p, Regex::new(p).expect("embedded pattern must compile")))
        .collect()
}

/// Blocks requests whose user agent is absent or matches scanner heuristics.
pub struct BotDetection;

impl DetectionModule for BotDetection {
    fn name(&self) -> &'static str {
        "BotDetection"
    }

    fn run(&self, input: &ModuleInput) -> Decision {
        if input.request.phase.is_response() {
            return skipped_response();
        }

        let user_agent = input.request.user_agent.to_lowercase();
        if user_agent.is_empty() {
            return Decision::block(
                "Missing User-Agent (possible bot)",
                json!({"matched_rule": "empty_user_agent"}),
            );
        }

        for (pattern, regex) in MALICIOUS_BOTS.iter() {
            if regex.is_match(&user_agent) {
                return Decision::block(
                    "Malicious bot/scanner detected",
                    json!({"matched_rule": pattern, "user_agent": clip(&user_agent, 100)}),
                );
            }
        }

        for (pattern, regex) in SUSPICIOUS_PATTERNS.iter() {
            if regex.is_match(&user_agent) {
                return Decision::block(
                    "Suspicious bot pattern detected",
                    json!({"matched_rule": pattern, "user_agent": clip(&user_agent, 100)}),
                );
            }
        }

        for (pattern, regex) in SCANNER_SIGNATURES.iter() {
            if regex.is_match(&user_agent) {
                return Decision::block(
                    "Scanner signature detected",
                    json!({"matched_rule": pattern, "user_agent": clip(&user_agent, 100)}),
                );
            }
        }

        Decision::allow(json!({"user_agent_check": "passed"}))
    }
}
