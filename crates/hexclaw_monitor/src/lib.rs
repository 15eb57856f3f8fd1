//! Continuous threat intelligence monitor.
//!
//! Polls the configured RSS/CVE feeds on an interval, scores severity,
//! drops anything below the configured minimum, deduplicates by
//! fingerprint, and delivers the survivors to the operator channel.
//! Critical/high alerts get a one-sentence model summary through the free
//! tier - the cache keeps repeated advisories at zero tokens.
//!
//! Delivery never costs inference; only summarisation does, and only for
//! the two top buckets.

pub mod dedupe;
pub mod feeds;
pub mod hostintel;
pub mod severity;

pub use dedupe::DedupeStore;
pub use feeds::{feed_to_alerts, fetch_feed, fingerprint};
pub use hostintel::poll_host_intel;
pub use severity::{extract_cvss, score_severity};

use hexclaw_db::HexClawDb;
use hexclaw_inference::{AskOptions, Router};
use hexclaw_protocol::{Alert, ChatTransport, Severity, Tier};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Counters for one monitor lifetime.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MonitorStats {
    pub passes: u64,
    pub alerts_new: u64,
    pub alerts_sent: u64,
    pub alerts_skipped_severity: u64,
    pub alerts_skipped_dedup: u64,
}

/// What `process_alert` decided to do with one alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertDisposition {
    Sent,
    SkippedSeverity,
    SkippedDuplicate,
}

pub struct Monitor {
    transport: Arc<dyn ChatTransport>,
    router: Option<Arc<Router>>,
    db: Option<HexClawDb>,
    feeds: Vec<String>,
    interval: Duration,
    min_severity: Severity,
    dedupe: DedupeStore,
    dry_run: bool,
    host_intel_key: Option<String>,
    client: reqwest::Client,
    stopped: AtomicBool,
    stop_notify: Notify,
    stats: Mutex<MonitorStats>,
}

impl Monitor {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        router: Option<Arc<Router>>,
        db: Option<HexClawDb>,
        feeds: Vec<String>,
        interval: Duration,
        min_severity: Severity,
        dedupe: DedupeStore,
    ) -> Self {
        Self {
            transport,
            router,
            db,
            feeds,
            interval,
            min_severity,
            dedupe,
            dry_run: false,
            host_intel_key: None,
            client: reqwest::Client::new(),
            stopped: AtomicBool::new(false),
            stop_notify: Notify::new(),
            stats: Mutex::new(MonitorStats::default()),
        }
    }

    /// Log matches instead of delivering or persisting.
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    /// Enable the host-intel poller.
    pub fn with_host_intel(mut self, api_key: Option<String>) -> Self {
        self.host_intel_key = api_key;
        self
    }

    /// Poll feeds in a loop until stopped.
    pub async fn run(&self) {
        info!(
            "Monitor starting (interval={}s, min_severity={}, feeds={})",
            self.interval.as_secs(),
            self.min_severity,
            self.feeds.len()
        );
        while !self.stopped.load(Ordering::SeqCst) {
            self.run_once().await;
            tokio::select! {
                _ = self.stop_notify.notified() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        info!("Monitor stopped.");
    }

    /// Single poll pass: fetch all feeds, filter, dedupe, deliver.
    /// Returns the alerts that were sent.
    pub async fn run_once(&self) -> Vec<Alert> {
        self.stats.lock().unwrap().passes += 1;

        let fetches = self
            .feeds
            .iter()
            .map(|url| fetch_feed(&self.client, url));
        let (feed_batches, intel_alerts) = tokio::join!(
            futures::future::join_all(fetches),
            async {
                match &self.host_intel_key {
                    Some(key) => poll_host_intel(&self.client, key).await,
                    None => Vec::new(),
                }
            }
        );
        let all_alerts: Vec<Alert> = feed_batches
            .into_iter()
            .flatten()
            .chain(intel_alerts)
            .collect();

        let mut sent = Vec::new();
        for alert in all_alerts {
            if self.process_alert(&alert).await == AlertDisposition::Sent {
                sent.push(alert);
            }
        }

        let stats = self.stats();
        info!(
            "Monitor pass complete: {} sent, {} dedup-skipped, {} below-threshold",
            stats.alerts_sent, stats.alerts_skipped_dedup, stats.alerts_skipped_severity
        );
        sent
    }

    /// Signal the loop to stop after the current pass.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.stop_notify.notify_waiters();
    }

    pub fn stats(&self) -> MonitorStats {
        *self.stats.lock().unwrap()
    }

    /// Filter, deduplicate, and dispatch a single alert.
    pub async fn process_alert(&self, alert: &Alert) -> AlertDisposition {
        if !alert.severity.at_least(self.min_severity) {
            self.stats.lock().unwrap().alerts_skipped_severity += 1;
            return AlertDisposition::SkippedSeverity;
        }

        if self.dedupe.is_seen(&alert.fingerprint).await {
            self.stats.lock().unwrap().alerts_skipped_dedup += 1;
            return AlertDisposition::SkippedDuplicate;
        }
        self.dedupe.mark_seen(&alert.fingerprint).await;
        self.stats.lock().unwrap().alerts_new += 1;

        let summary = self.summarise(alert).await;

        if self.dry_run {
            info!("[dry run] Would send alert: [{}] {}", alert.severity, alert.title);
        } else {
            self.transport
                .send_text(&format_alert(alert, summary.as_deref()))
                .await;
            if let Some(db) = &self.db {
                db.record_alert(alert).await;
            }
        }

        self.stats.lock().unwrap().alerts_sent += 1;
        AlertDisposition::Sent
    }

    /// One-sentence model summary for critical/high alerts only. The cache
    /// in front of the router keeps repeats at zero tokens.
    async fn summarise(&self, alert: &Alert) -> Option<String> {
        if !matches!(alert.severity, Severity::Critical | Severity::High) {
            return None;
        }
        let router = self.router.as_ref()?;

        let summary_cap: String = alert.summary.chars().take(500).collect();
        let prompt = format!(
            "Summarise this security alert in ONE sentence for a penetration tester:\nTitle: {}\nDetails: {}",
            alert.title, summary_cap
        );
        let reply = router
            .ask(
                &prompt,
                Tier::Free,
                AskOptions {
                    system: Some(
                        "You are a concise security alert summariser. Respond with ONE sentence only."
                            .to_string(),
                    ),
                    ..AskOptions::default()
                },
            )
            .await;

        if reply.starts_with("[inference error") || reply.starts_with("[stub") {
            debug!("Alert summarisation unavailable");
            return None;
        }
        Some(reply.trim().to_string())
    }

    /// Fire a synthetic alert to verify the delivery pipeline end-to-end.
    pub async fn send_test_alert(&self) {
        let alert = Alert {
            source: "hexclaw_test".to_string(),
            title: "[TEST] HexClaw monitor integration check".to_string(),
            url: String::new(),
            summary: "Synthetic alert verifying the monitor delivery pipeline.".to_string(),
            severity: Severity::Info,
            published: String::new(),
            fingerprint: fingerprint("hexclaw_test", "", "test"),
        };
        warn!("Sending test alert");
        self.transport.send_text(&format_alert(&alert, None)).await;
    }
}

/// Operator-channel rendering of an alert.
pub fn format_alert(alert: &Alert, summary: Option<&str>) -> String {
    let mut lines = vec![
        format!("[{}] {}", alert.severity.as_str().to_uppercase(), alert.title),
        format!("Source: {}", alert.source),
    ];
    if !alert.published.is_empty() {
        lines.push(format!("Published: {}", alert.published));
    }
    if let Some(summary) = summary {
        lines.push(format!("\n{}", summary));
    }
    if !alert.url.is_empty() {
        lines.push(format!("\n{}", alert.url));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hexclaw_protocol::Button;
    use std::path::Path;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChatTransport for RecordingTransport {
        async fn send_text(&self, text: &str) {
            self.sent.lock().unwrap().push(text.to_string());
        }

        async fn send_file(&self, _path: &Path, _caption: Option<&str>) {}

        async fn send_with_buttons(&self, _prompt: &str, _buttons: &[Button]) {}
    }

    fn alert(title: &str, severity: Severity) -> Alert {
        Alert {
            source: "test".to_string(),
            title: title.to_string(),
            url: "https://example.com/a".to_string(),
            summary: String::new(),
            severity,
            published: String::new(),
            fingerprint: fingerprint("test", "https://example.com/a", title),
        }
    }

    fn monitor(transport: Arc<RecordingTransport>) -> Monitor {
        Monitor::new(
            transport,
            None,
            None,
            Vec::new(),
            Duration::from_secs(900),
            Severity::Medium,
            DedupeStore::new(None),
        )
    }

    #[tokio::test]
    async fn test_severity_gate() {
        let transport = Arc::new(RecordingTransport::default());
        let monitor = monitor(transport.clone());

        let disposition = monitor.process_alert(&alert("quiet", Severity::Low)).await;
        assert_eq!(disposition, AlertDisposition::SkippedSeverity);
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dedup_gate() {
        let transport = Arc::new(RecordingTransport::default());
        let monitor = monitor(transport.clone());
        let advisory = alert("big deal", Severity::High);

        assert_eq!(
            monitor.process_alert(&advisory).await,
            AlertDisposition::Sent
        );
        assert_eq!(
            monitor.process_alert(&advisory).await,
            AlertDisposition::SkippedDuplicate
        );
        assert_eq!(transport.sent.lock().unwrap().len(), 1);

        let stats = monitor.stats();
        assert_eq!(stats.alerts_sent, 1);
        assert_eq!(stats.alerts_skipped_dedup, 1);
    }

    #[tokio::test]
    async fn test_no_two_delivered_alerts_share_a_fingerprint() {
        let transport = Arc::new(RecordingTransport::default());
        let monitor = monitor(transport.clone());

        let alerts = vec![
            alert("advisory one", Severity::High),
            alert("advisory two", Severity::High),
            alert("advisory one", Severity::High),
        ];
        let mut delivered_fps = Vec::new();
        for a in &alerts {
            if monitor.process_alert(a).await == AlertDisposition::Sent {
                delivered_fps.push(a.fingerprint.clone());
            }
        }
        let mut unique = delivered_fps.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(delivered_fps.len(), unique.len());
    }

    #[tokio::test]
    async fn test_alert_formatting() {
        let text = format_alert(&alert("Big RCE", Severity::Critical), Some("patch now"));
        assert!(text.starts_with("[CRITICAL] Big RCE"));
        assert!(text.contains("patch now"));
        assert!(text.contains("https://example.com/a"));
    }
}
