//! Best-effort persistence of delivered monitor alerts.
//!
//! The monitor keeps running whether or not these writes succeed.

use crate::HexClawDb;
use hexclaw_protocol::Alert;
use sqlx::Row;
use tracing::debug;

impl HexClawDb {
    /// Record a delivered alert. Failures are logged and swallowed.
    pub async fn record_alert(&self, alert: &Alert) {
        let result = sqlx::query(
            r#"
            INSERT INTO alerts (source, title, url, severity, fingerprint)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&alert.source)
        .bind(truncate(&alert.title, 500))
        .bind(&alert.url)
        .bind(alert.severity.as_str())
        .bind(&alert.fingerprint)
        .execute(&self.pool)
        .await;

        if let Err(err) = result {
            debug!("Alert persist skipped: {}", err);
        }
    }

    /// Count of persisted alerts (used by the stats command and tests).
    pub async fn alert_count(&self) -> crate::Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM alerts")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n") as u64)
    }
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
