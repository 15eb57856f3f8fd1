//! Severity scoring for incoming alerts.
//!
//! A CVSS score wins when one is extractable; otherwise keyword lists
//! approximate one. A bare CVE id with no other signal still rates `low` -
//! someone assigned it a number for a reason.

use hexclaw_protocol::Severity;
use regex::Regex;
use std::sync::OnceLock;

const CRITICAL_KEYWORDS: &[&str] = &[
    "remote code execution",
    "rce",
    "zero-day",
    "0day",
    "critical",
    "unauthenticated",
    "log4shell",
    "log4j",
    "spring4shell",
    "proxylogon",
    "proxyshell",
    "printnightmare",
    "eternalblue",
    "bluekeep",
];

const HIGH_KEYWORDS: &[&str] = &[
    "authentication bypass",
    "privilege escalation",
    "sql injection",
    "sqli",
    "path traversal",
    "lfi",
    "rfi",
    "xxe",
    "deserialization",
    "heap overflow",
    "buffer overflow",
    "use-after-free",
];

const MEDIUM_KEYWORDS: &[&str] = &[
    "xss",
    "cross-site scripting",
    "csrf",
    "ssrf",
    "open redirect",
    "information disclosure",
    "sensitive data",
    "default credentials",
];

fn cvss_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"cvss[^\d]*(\d+(?:\.\d+)?)").unwrap())
}

fn cve_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"cve-\d{4}-\d+").unwrap())
}

/// Pull a CVSS score out of free text, if one is mentioned.
pub fn extract_cvss(text: &str) -> Option<f64> {
    cvss_regex()
        .captures(&text.to_lowercase())
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Derive a severity label from a CVSS score or keyword matching.
pub fn score_severity(title: &str, summary: &str, cvss: Option<f64>) -> Severity {
    if let Some(score) = cvss {
        return if score >= 9.0 {
            Severity::Critical
        } else if score >= 7.0 {
            Severity::High
        } else if score >= 4.0 {
            Severity::Medium
        } else if score > 0.0 {
            Severity::Low
        } else {
            Severity::Info
        };
    }

    let text = format!("{} {}", title, summary).to_lowercase();
    if CRITICAL_KEYWORDS.iter().any(|kw| text.contains(kw)) {
        return Severity::Critical;
    }
    if HIGH_KEYWORDS.iter().any(|kw| text.contains(kw)) {
        return Severity::High;
    }
    if MEDIUM_KEYWORDS.iter().any(|kw| text.contains(kw)) {
        return Severity::Medium;
    }
    if cve_regex().is_match(&text) {
        return Severity::Low;
    }
    Severity::Info
}
