//! Optional host-intel poller (Shodan Monitor API).
//!
//! Only active when an API key is configured. Triggered monitor matches
//! become alerts scored from the highest CVSS among their known CVEs.

use crate::feeds::fingerprint;
use crate::severity::score_severity;
use chrono::Utc;
use hexclaw_protocol::Alert;
use serde_json::Value;
use tracing::{debug, warn};

const API_BASE: &str = "https://api.shodan.io";

/// Matches reported per monitor per poll.
const MAX_MATCHES: usize = 20;

/// Fetch triggered host-intel alerts. Empty on any API error.
pub async fn poll_host_intel(client: &reqwest::Client, api_key: &str) -> Vec<Alert> {
    let response = match client
        .get(format!("{}/shodan/alert/info", API_BASE))
        .query(&[("key", api_key)])
        .send()
        .await
    {
        Ok(response) if response.status().is_success() => response,
        Ok(response) => {
            warn!("Host-intel alert info HTTP {}", response.status().as_u16());
            return Vec::new();
        }
        Err(err) => {
            warn!("Host-intel poll failed: {}", err);
            return Vec::new();
        }
    };

    let raw: Value = match response.json().await {
        Ok(raw) => raw,
        Err(err) => {
            warn!("Host-intel response parse failed: {}", err);
            return Vec::new();
        }
    };

    let monitors: Vec<Value> = match raw {
        Value::Array(list) => list,
        Value::Null => Vec::new(),
        single => vec![single],
    };

    let mut alerts = Vec::new();
    for monitor in &monitors {
        alerts.extend(monitor_to_alerts(monitor));
    }
    debug!("Host-intel: {} alerts fetched", alerts.len());
    alerts
}

/// Normalise one monitor definition's matches.
pub fn monitor_to_alerts(monitor: &Value) -> Vec<Alert> {
    let monitor_name = monitor
        .get("name")
        .or_else(|| monitor.get("id"))
        .and_then(Value::as_str)
        .unwrap_or("monitor");
    let matches = monitor
        .get("matches")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut alerts = Vec::new();
    for hit in matches.iter().take(MAX_MATCHES) {
        let ip = hit.get("ip_str").and_then(Value::as_str).unwrap_or("");
        let port = hit
            .get("port")
            .map(|p| p.to_string())
            .unwrap_or_default();
        let banner: String = hit
            .get("data")
            .and_then(Value::as_str)
            .unwrap_or("")
            .chars()
            .take(400)
            .collect();

        // Highest CVSS among the host's known CVEs wins
        let vulns = hit.get("vulns").and_then(Value::as_object);
        let max_cvss = vulns
            .map(|map| {
                map.values()
                    .filter_map(|cve| cve.get("cvss").and_then(Value::as_f64))
                    .fold(None::<f64>, |best, score| {
                        Some(best.map_or(score, |b| b.max(score)))
                    })
            })
            .unwrap_or(None);
        let severity = score_severity(&banner, "", max_cvss);

        let cve_list: Vec<&str> = vulns
            .map(|map| map.keys().take(3).map(String::as_str).collect())
            .unwrap_or_default();
        let title = if cve_list.is_empty() {
            format!("Host intel: {} - {}:{}", monitor_name, ip, port)
        } else {
            format!(
                "Host intel: {} - {}:{} ({})",
                monitor_name,
                ip,
                port,
                cve_list.join(", ")
            )
        };
        let url = format!("https://www.shodan.io/host/{}", ip);

        alerts.push(Alert {
            fingerprint: fingerprint("hostintel", &url, &title),
            source: "hostintel".to_string(),
            title,
            url,
            summary: banner,
            severity,
            published: Utc::now().format("%Y-%m-%d %H:%M UTC").to_string(),
        });
    }
    alerts
}

#[cfg(test)]
mod tests {
    use super::*;
    use hexclaw_protocol::Severity;
    use serde_json::json;

    #[test]
    fn test_monitor_matches_become_alerts() {
        let monitor = json!({
            "name": "perimeter",
            "matches": [
                {
                    "ip_str": "203.0.113.9",
                    "port": 443,
                    "data": "nginx/1.18.0",
                    "vulns": {
                        "CVE-2021-44228": {"cvss": 10.0},
                        "CVE-2020-11984": {"cvss": 5.5}
                    }
                },
                {"ip_str": "203.0.113.10", "port": 22, "data": "OpenSSH"}
            ]
        });

        let alerts = monitor_to_alerts(&monitor);
        assert_eq!(alerts.len(), 2);
        // Max CVSS 10.0 -> critical
        assert_eq!(alerts[0].severity, Severity::Critical);
        assert!(alerts[0].title.contains("CVE-2021-44228"));
        // No CVEs, quiet banner -> info
        assert_eq!(alerts[1].severity, Severity::Info);
    }

    #[test]
    fn test_empty_monitor() {
        assert!(monitor_to_alerts(&json!({"name": "x"})).is_empty());
    }
}
