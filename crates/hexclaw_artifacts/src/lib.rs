//! Per-job columnar artifact store.
//!
//! Layout: `<data_root>/<job_id>/<artifact>.parquet`. The dispatcher writes
//! one file per step output; later steps, aggregation, and the analytics
//! bridge read them back with SQL. Writes stage to a temp file and rename,
//! so readers never observe a half-written artifact.

pub mod aggregate;
pub mod analytics;
pub mod error;
pub mod query;
pub mod records;
pub mod suggest;

pub use aggregate::JobAggregate;
pub use error::{ArtifactError, Result};
pub use records::Record;
pub use suggest::{suggest_next, Suggestion};

use arrow::array::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

/// How `store_records` treats an existing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Replace the file (default)
    #[default]
    Overwrite,
    /// Union-read the existing rows and rewrite with the new ones appended
    Append,
}

impl WriteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteMode::Overwrite => "overwrite",
            WriteMode::Append => "append",
        }
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for WriteMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "overwrite" => Ok(WriteMode::Overwrite),
            "append" => Ok(WriteMode::Append),
            _ => Err(format!("Invalid write mode: '{}'", s)),
        }
    }
}

/// A parquet file under the data root.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactInfo {
    pub path: String,
    pub size_bytes: u64,
}

/// Fleet-wide counters across all jobs' conventional artifacts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GlobalStats {
    pub total_vulns: u64,
    pub vulns_by_severity: BTreeMap<String, u64>,
    pub total_subdomains: u64,
    pub total_open_ports: u64,
}

/// Handle to the artifact data root.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    data_root: PathBuf,
}

impl ArtifactStore {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
        }
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    /// `<data_root>/<job_id>/<artifact>.parquet`
    pub fn artifact_path(&self, job_id: &str, artifact: &str) -> PathBuf {
        self.data_root
            .join(job_id)
            .join(format!("{}.parquet", artifact))
    }

    /// Write records to `path`. Columns are the union of keys across all
    /// records, missing values null. Returns the file's total row count
    /// after the write.
    pub fn store_records(
        &self,
        path: &Path,
        records: &[Record],
        mode: WriteMode,
    ) -> Result<u64> {
        if records.is_empty() {
            return Ok(if path.exists() {
                self.query(path, Some("SELECT COUNT(*) AS n FROM data"))?
                    .first()
                    .and_then(|r| r.get("n"))
                    .and_then(serde_json::Value::as_u64)
                    .unwrap_or(0)
            } else {
                0
            });
        }

        let mut all_rows: Vec<Record> = Vec::new();
        if mode == WriteMode::Append && path.exists() {
            all_rows = read_parquet_records(path)?;
        }
        all_rows.extend(records.iter().cloned());

        let batch = records::records_to_batch(&all_rows)?;
        write_parquet(path, &batch)?;

        debug!("Stored {} rows -> {}", all_rows.len(), path.display());
        Ok(all_rows.len() as u64)
    }

    /// Run SQL against one artifact, exposed as view `data`.
    /// A missing file returns no rows (and a warning), not an error.
    pub fn query(&self, path: &Path, sql: Option<&str>) -> Result<Vec<Record>> {
        if !path.exists() {
            warn!("Artifact not found (returning empty): {}", path.display());
            return Ok(Vec::new());
        }
        query::query_parquet(path, sql)
    }

    /// Run SQL against the union of artifacts matching a glob under the
    /// data root. Query failures (e.g. nothing matched) return no rows.
    pub fn query_glob(&self, glob: &str, sql: &str) -> Result<Vec<Record>> {
        let full_glob = self.data_root.join(glob).display().to_string();
        match query::query_parquet_glob(&full_glob, sql) {
            Ok(rows) => Ok(rows),
            Err(err) => {
                warn!("query_glob failed for '{}': {}", glob, err);
                Ok(Vec::new())
            }
        }
    }

    /// Union multiple artifacts into one. Returns total row count.
    pub fn merge(&self, paths: &[PathBuf], dest: &Path) -> Result<u64> {
        let mut all_rows = Vec::new();
        for path in paths {
            if path.exists() {
                all_rows.extend(read_parquet_records(path)?);
            }
        }
        if all_rows.is_empty() {
            return Ok(0);
        }
        let batch = records::records_to_batch(&all_rows)?;
        write_parquet(dest, &batch)?;
        debug!("Merged {} rows -> {}", all_rows.len(), dest.display());
        Ok(all_rows.len() as u64)
    }

    /// Fleet-wide counters across all jobs (used by /stats).
    pub fn global_stats(&self) -> GlobalStats {
        let mut stats = GlobalStats::default();

        if let Ok(rows) = self.query_glob(
            "*/vulns.parquet",
            "SELECT severity, COUNT(*) AS n FROM data GROUP BY severity",
        ) {
            for row in rows {
                let severity = row
                    .get("severity")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("info")
                    .to_string();
                let count = row.get("n").and_then(serde_json::Value::as_u64).unwrap_or(0);
                stats.total_vulns += count;
                stats.vulns_by_severity.insert(severity, count);
            }
        }

        if let Ok(rows) = self.query_glob(
            "*/subs.parquet",
            "SELECT COUNT(DISTINCT subdomain) AS n FROM data",
        ) {
            stats.total_subdomains = rows
                .first()
                .and_then(|r| r.get("n"))
                .and_then(serde_json::Value::as_u64)
                .unwrap_or(0);
        }

        if let Ok(rows) = self.query_glob("*/ports.parquet", "SELECT COUNT(*) AS n FROM data") {
            stats.total_open_ports = rows
                .first()
                .and_then(|r| r.get("n"))
                .and_then(serde_json::Value::as_u64)
                .unwrap_or(0);
        }

        stats
    }

    /// List parquet artifacts under the data root, optionally scoped to a
    /// single job.
    pub fn list_artifacts(&self, job_id: Option<&str>) -> Vec<ArtifactInfo> {
        let base = match job_id {
            Some(id) => self.data_root.join(id),
            None => self.data_root.clone(),
        };
        let mut found = Vec::new();
        collect_parquets(&base, &mut found);
        found.sort();

        found
            .into_iter()
            .map(|path| {
                let size_bytes = path.metadata().map(|m| m.len()).unwrap_or(0);
                let display = path
                    .strip_prefix(&self.data_root)
                    .unwrap_or(&path)
                    .display()
                    .to_string();
                ArtifactInfo {
                    path: display,
                    size_bytes,
                }
            })
            .collect()
    }
}

fn collect_parquets(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_parquets(&path, out);
        } else if path.extension().is_some_and(|ext| ext == "parquet") {
            out.push(path);
        }
    }
}

fn read_parquet_records(path: &Path) -> Result<Vec<Record>> {
    let file = File::open(path).map_err(|e| ArtifactError::io(path, e))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let mut records = Vec::new();
    for batch in reader {
        records.extend(records::batch_to_records(&batch?)?);
    }
    Ok(records)
}

fn write_parquet(path: &Path, batch: &RecordBatch) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ArtifactError::io(parent, e))?;
    }

    // Stage to a temp file for atomic rename
    let temp_path = path.with_extension("parquet.tmp");
    let file = File::create(&temp_path).map_err(|e| ArtifactError::io(&temp_path, e))?;

    let props = parquet::file::properties::WriterProperties::builder()
        .set_compression(parquet::basic::Compression::SNAPPY)
        .build();

    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(batch)?;
    writer.close()?;

    std::fs::rename(&temp_path, path).map_err(|e| ArtifactError::io(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> Record {
        value.as_object().unwrap().clone()
    }

    fn seeded_store() -> (ArtifactStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        let subs = store.artifact_path("abc123", "subs");
        store
            .store_records(
                &subs,
                &[
                    record(json!({"subdomain": "a.example.com"})),
                    record(json!({"subdomain": "b.example.com"})),
                ],
                WriteMode::Overwrite,
            )
            .unwrap();

        let ports = store.artifact_path("abc123", "ports");
        store
            .store_records(
                &ports,
                &[
                    record(json!({"port": 22})),
                    record(json!({"port": 80})),
                    record(json!({"port": 443})),
                ],
                WriteMode::Overwrite,
            )
            .unwrap();

        let vulns = store.artifact_path("abc123", "vulns");
        store
            .store_records(
                &vulns,
                &[record(json!({
                    "tool": "nuclei",
                    "severity": "high",
                    "title": "T1",
                    "detail": ""
                }))],
                WriteMode::Overwrite,
            )
            .unwrap();

        (store, dir)
    }

    #[test]
    fn test_store_and_select_all() {
        let (store, _dir) = seeded_store();
        let rows = store
            .query(&store.artifact_path("abc123", "subs"), None)
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("subdomain"), Some(&json!("a.example.com")));
    }

    #[test]
    fn test_query_with_sql() {
        let (store, _dir) = seeded_store();
        let rows = store
            .query(
                &store.artifact_path("abc123", "ports"),
                Some("SELECT COUNT(*) AS n FROM data WHERE port > 50"),
            )
            .unwrap();
        assert_eq!(rows[0].get("n"), Some(&json!(2)));
    }

    #[test]
    fn test_missing_artifact_returns_empty() {
        let (store, _dir) = seeded_store();
        let rows = store
            .query(&store.artifact_path("abc123", "nothing"), None)
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_append_mode_accumulates() {
        let (store, _dir) = seeded_store();
        let path = store.artifact_path("abc123", "subs");

        let total = store
            .store_records(
                &path,
                &[record(json!({"subdomain": "c.example.com", "source": "subfinder"}))],
                WriteMode::Append,
            )
            .unwrap();
        assert_eq!(total, 3);

        // Union of columns across old and new rows
        let rows = store.query(&path, None).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].get("source"), Some(&serde_json::Value::Null));
    }

    #[test]
    fn test_query_glob_unions_jobs() {
        let (store, _dir) = seeded_store();
        let other = store.artifact_path("def456", "vulns");
        store
            .store_records(
                &other,
                &[record(json!({
                    "tool": "nuclei",
                    "severity": "low",
                    "title": "T2",
                    "detail": ""
                }))],
                WriteMode::Overwrite,
            )
            .unwrap();

        let rows = store
            .query_glob("*/vulns.parquet", "SELECT COUNT(*) AS n FROM data")
            .unwrap();
        assert_eq!(rows[0].get("n"), Some(&json!(2)));
    }

    #[test]
    fn test_global_stats() {
        let (store, _dir) = seeded_store();
        let stats = store.global_stats();
        assert_eq!(stats.total_vulns, 1);
        assert_eq!(stats.vulns_by_severity.get("high"), Some(&1));
        assert_eq!(stats.total_subdomains, 2);
        assert_eq!(stats.total_open_ports, 3);
    }

    #[test]
    fn test_list_artifacts() {
        let (store, _dir) = seeded_store();
        let all = store.list_artifacts(None);
        assert_eq!(all.len(), 3);
        let scoped = store.list_artifacts(Some("abc123"));
        assert_eq!(scoped.len(), 3);
        assert!(scoped.iter().all(|a| a.size_bytes > 0));
    }
}
