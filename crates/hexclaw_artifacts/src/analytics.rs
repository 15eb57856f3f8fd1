//! Zero-inference analytics: prebuilt SQL for the questions operators
//! actually ask.
//!
//! The `data` chat command resolves a natural-language question here
//! first; only a miss falls through to the model (which the caller then
//! caches keyed on the question). Keyword matching is deliberately crude -
//! the point is that the common questions never cost a token.

/// Canonical pre-built SQL keyed by question keyword.
const PREBUILT_SQL: &[(&str, &str)] = &[
    (
        "how many critical vulns",
        "SELECT COUNT(*) AS critical_vulns FROM data WHERE severity = 'critical'",
    ),
    (
        "how many high vulns",
        "SELECT COUNT(*) AS high_vulns FROM data WHERE severity = 'high'",
    ),
    (
        "top 10 vulns",
        "SELECT severity, title, COUNT(*) AS n FROM data \
         GROUP BY severity, title ORDER BY n DESC LIMIT 10",
    ),
    (
        "vuln summary",
        "SELECT severity, COUNT(*) AS n FROM data GROUP BY severity ORDER BY n DESC",
    ),
    (
        "how many subdomains",
        "SELECT COUNT(DISTINCT subdomain) AS total_subdomains FROM data",
    ),
    (
        "open ports",
        "SELECT port, COUNT(*) AS n FROM data GROUP BY port ORDER BY n DESC LIMIT 20",
    ),
];

/// Which artifact glob a prebuilt query runs against.
pub fn glob_for_question(normalised: &str) -> &'static str {
    if normalised.contains("subdomain") {
        "*/subs.parquet"
    } else if normalised.contains("port") {
        "*/ports.parquet"
    } else {
        "*/vulns.parquet"
    }
}

/// Lower-case, strip punctuation for fuzzy matching against prebuilt SQL.
pub fn normalise_question(question: &str) -> String {
    question
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Exact keyword match against the prebuilt table. Zero tokens.
pub fn prebuilt_sql(question: &str) -> Option<&'static str> {
    let normalised = normalise_question(question);
    PREBUILT_SQL
        .iter()
        .find(|(keyword, _)| normalised.contains(keyword))
        .map(|(_, sql)| *sql)
}
