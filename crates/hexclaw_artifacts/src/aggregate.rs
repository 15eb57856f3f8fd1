//! Per-job aggregation over the conventional artifacts.
//!
//! `subs` / `ports` / `vulns` are the names the recon skills use; a job
//! without one of them simply contributes nothing to that section.

use crate::{ArtifactStore, Result};
use hexclaw_protocol::{Finding, Severity};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Structured summary of one job's artifacts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobAggregate {
    pub job_id: String,
    pub subdomains_found: u64,
    pub top_subdomains: Vec<String>,
    pub open_ports_found: u64,
    /// Sorted sample of open ports.
    pub open_ports: Vec<i64>,
    pub severity_counts: BTreeMap<Severity, u64>,
    pub total_vulns: u64,
    /// Top findings by severity rank (critical first).
    pub top_vulns: Vec<Finding>,
}

impl JobAggregate {
    pub fn crit_high_count(&self) -> u64 {
        self.severity_counts.get(&Severity::Critical).copied().unwrap_or(0)
            + self.severity_counts.get(&Severity::High).copied().unwrap_or(0)
    }

    pub fn has_port(&self, port: i64) -> bool {
        self.open_ports.contains(&port)
    }
}

impl ArtifactStore {
    /// Aggregate all artifacts for a single job.
    pub fn aggregate(&self, job_id: &str) -> Result<JobAggregate> {
        let mut agg = JobAggregate {
            job_id: job_id.to_string(),
            ..JobAggregate::default()
        };

        let subs = self.artifact_path(job_id, "subs");
        if subs.exists() {
            let rows = self.query(&subs, Some("SELECT COUNT(*) AS n FROM data"))?;
            agg.subdomains_found = first_u64(&rows, "n");
            let top = self.query(&subs, Some("SELECT subdomain FROM data LIMIT 10"))?;
            agg.top_subdomains = top
                .iter()
                .filter_map(|r| r.get("subdomain").and_then(Value::as_str))
                .map(str::to_string)
                .collect();
        }

        let ports = self.artifact_path(job_id, "ports");
        if ports.exists() {
            let rows = self.query(&ports, Some("SELECT COUNT(*) AS n FROM data"))?;
            agg.open_ports_found = first_u64(&rows, "n");
            let top = self.query(
                &ports,
                Some("SELECT port FROM data ORDER BY CAST(port AS INTEGER) LIMIT 20"),
            )?;
            agg.open_ports = top
                .iter()
                .filter_map(|r| r.get("port"))
                .filter_map(port_as_i64)
                .collect();
        }

        let vulns = self.artifact_path(job_id, "vulns");
        if vulns.exists() {
            let rows = self.query(
                &vulns,
                Some("SELECT severity, COUNT(*) AS n FROM data GROUP BY severity"),
            )?;
            for row in rows {
                let severity = row
                    .get("severity")
                    .and_then(Value::as_str)
                    .map(Severity::parse_lossy)
                    .unwrap_or_default();
                let count = row.get("n").and_then(Value::as_u64).unwrap_or(0);
                *agg.severity_counts.entry(severity).or_insert(0) += count;
                agg.total_vulns += count;
            }

            let top = self.query(
                &vulns,
                Some(
                    "SELECT tool, severity, title, detail FROM data ORDER BY \
                     CASE severity WHEN 'critical' THEN 1 WHEN 'high' THEN 2 \
                     WHEN 'medium' THEN 3 WHEN 'low' THEN 4 ELSE 5 END LIMIT 10",
                ),
            )?;
            agg.top_vulns = top
                .iter()
                .map(|row| Finding {
                    tool: str_field(row, "tool"),
                    severity: Severity::parse_lossy(&str_field(row, "severity")),
                    title: str_field(row, "title"),
                    detail: str_field(row, "detail"),
                })
                .collect();
        }

        Ok(agg)
    }
}

fn first_u64(rows: &[crate::Record], key: &str) -> u64 {
    rows.first()
        .and_then(|r| r.get(key))
        .and_then(Value::as_u64)
        .unwrap_or(0)
}

fn str_field(row: &crate::Record, key: &str) -> String {
    row.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Ports may have been written as integers or strings depending on the tool.
fn port_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Record, WriteMode};
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().unwrap().clone()
    }

    fn seed(store: &ArtifactStore, job_id: &str) {
        store
            .store_records(
                &store.artifact_path(job_id, "subs"),
                &(0..5)
                    .map(|i| record(json!({"subdomain": format!("sub{}.example.com", i)})))
                    .collect::<Vec<_>>(),
                WriteMode::Overwrite,
            )
            .unwrap();
        store
            .store_records(
                &store.artifact_path(job_id, "ports"),
                &[22, 80, 443, 8080, 3306]
                    .iter()
                    .map(|p| record(json!({"port": p})))
                    .collect::<Vec<_>>(),
                WriteMode::Overwrite,
            )
            .unwrap();
        store
            .store_records(
                &store.artifact_path(job_id, "vulns"),
                &[
                    record(json!({"tool": "nuclei", "severity": "critical", "title": "Log4Shell RCE", "detail": "CVE-2021-44228"})),
                    record(json!({"tool": "nuclei", "severity": "high", "title": "SQL Injection", "detail": "login form"})),
                    record(json!({"tool": "nuclei", "severity": "medium", "title": "Missing HSTS", "detail": "header not set"})),
                    record(json!({"tool": "nuclei", "severity": "low", "title": "Server Version", "detail": "nginx/1.18.0"})),
                    record(json!({"tool": "nuclei", "severity": "info", "title": "Open Port", "detail": "22/tcp"})),
                ],
                WriteMode::Overwrite,
            )
            .unwrap();
    }

    #[test]
    fn test_aggregate_seeded_job() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        seed(&store, "abc123");

        let agg = store.aggregate("abc123").unwrap();
        assert_eq!(agg.subdomains_found, 5);
        assert_eq!(agg.open_ports_found, 5);
        assert_eq!(agg.open_ports, vec![22, 80, 443, 3306, 8080]);
        assert_eq!(agg.total_vulns, 5);
        assert_eq!(agg.severity_counts.get(&Severity::Critical), Some(&1));
        assert_eq!(agg.crit_high_count(), 2);

        // Severity ordering: critical first
        assert_eq!(agg.top_vulns[0].severity, Severity::Critical);
        assert_eq!(agg.top_vulns[0].title, "Log4Shell RCE");
        let ranks: Vec<u8> = agg.top_vulns.iter().map(|f| f.severity.rank()).collect();
        let mut sorted = ranks.clone();
        sorted.sort();
        assert_eq!(ranks, sorted);
    }

    #[test]
    fn test_aggregate_missing_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        let agg = store.aggregate("nothing").unwrap();
        assert_eq!(agg.total_vulns, 0);
        assert_eq!(agg.subdomains_found, 0);
        assert!(agg.top_vulns.is_empty());
    }
}
