//! RSS/Atom feed fetching and normalisation into [`Alert`]s.

use crate::severity::{extract_cvss, score_severity};
use feed_rs::model::Feed;
use hexclaw_protocol::Alert;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Entries per feed per poll; feeds re-serve old items endlessly and the
/// dedup store handles the overlap.
const MAX_ENTRIES_PER_FEED: usize = 50;

const USER_AGENT: &str = "HexClaw/1.0";

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]+>").unwrap())
}

/// Digest of source:url:title.
pub fn fingerprint(source: &str, url: &str, title: &str) -> String {
    let digest = Sha256::digest(format!("{}:{}:{}", source, url, title).as_bytes());
    format!("{:x}", digest)[..16].to_string()
}

/// Fetch and parse a single feed. Failures log and return no alerts.
pub async fn fetch_feed(client: &reqwest::Client, url: &str) -> Vec<Alert> {
    let response = match client
        .get(url)
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .send()
        .await
    {
        Ok(response) => response,
        Err(err) => {
            warn!("Failed to fetch feed {}: {}", url, err);
            return Vec::new();
        }
    };

    let body = match response.bytes().await {
        Ok(body) => body,
        Err(err) => {
            warn!("Failed to read feed {}: {}", url, err);
            return Vec::new();
        }
    };

    let feed = match feed_rs::parser::parse(body.as_ref()) {
        Ok(feed) => feed,
        Err(err) => {
            warn!("Failed to parse feed {}: {}", url, err);
            return Vec::new();
        }
    };

    let alerts = feed_to_alerts(&feed, url);
    debug!("Feed {}: {} entries parsed", url, alerts.len());
    alerts
}

/// Normalise parsed feed entries into alerts.
pub fn feed_to_alerts(feed: &Feed, url: &str) -> Vec<Alert> {
    let source: String = feed
        .title
        .as_ref()
        .map(|t| t.content.clone())
        .unwrap_or_else(|| url.to_string())
        .chars()
        .take(50)
        .collect();

    let mut alerts = Vec::new();
    for entry in feed.entries.iter().take(MAX_ENTRIES_PER_FEED) {
        let title: String = match &entry.title {
            Some(title) if !title.content.trim().is_empty() => {
                title.content.trim().chars().take(500).collect()
            }
            _ => continue,
        };
        let link = entry
            .links
            .first()
            .map(|l| l.href.clone())
            .unwrap_or_default();
        let summary: String = entry
            .summary
            .as_ref()
            .map(|s| tag_regex().replace_all(&s.content, "").to_string())
            .unwrap_or_default()
            .chars()
            .take(800)
            .collect();
        let published = entry
            .published
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_default();

        let cvss = extract_cvss(&format!("{} {}", title, summary));
        let severity = score_severity(&title, &summary, cvss);

        alerts.push(Alert {
            fingerprint: fingerprint(&source, &link, &title),
            source: source.clone(),
            title,
            url: link,
            summary,
            severity,
            published,
        });
    }
    alerts
}
