//! Durable job queue.
//!
//! One row per job. FIFO by `created_at`. Status transitions are only
//! pending -> running -> {done | failed | cancelled}; `update_status`
//! stamps `started_at` on running and `finished_at` on any terminal state.
//!
//! On process startup `recover_running` re-marks rows left in `running`
//! from the previous lifetime back to `pending` so a crash mid-step loses
//! no work. The daemon runs this sweep before its first dispatch.

use crate::error::{DbError, Result};
use crate::HexClawDb;
use chrono::{DateTime, Utc};
use hexclaw_protocol::{Job, JobId, JobStatus};
use serde_json::Value;
use sqlx::Row;
use std::collections::BTreeMap;
use tracing::{info, warn};
use uuid::Uuid;

impl HexClawDb {
    /// Insert a new pending job. Returns the allocated job id.
    pub async fn enqueue(
        &self,
        skill_name: &str,
        params: &BTreeMap<String, Value>,
    ) -> Result<JobId> {
        let id = short_job_id();
        let target = params
            .get("target")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO jobs (id, skill_name, params, target, status, created_at)
            VALUES (?, ?, ?, ?, 'pending', ?)
            "#,
        )
        .bind(id.as_str())
        .bind(skill_name)
        .bind(serde_json::to_string(params)?)
        .bind(&target)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        info!("Enqueued job {}: skill={} target={}", id, skill_name, target);
        Ok(id)
    }

    /// All jobs awaiting dispatch, oldest first.
    pub async fn pending(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query(
            "SELECT * FROM jobs WHERE status = 'pending' ORDER BY created_at ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_job).collect()
    }

    /// Most recent jobs, newest first.
    pub async fn recent(&self, limit: i64) -> Result<Vec<Job>> {
        let rows = sqlx::query("SELECT * FROM jobs ORDER BY created_at DESC, id DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_job).collect()
    }

    /// Fetch a job by id.
    pub async fn get_job(&self, id: &JobId) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_job).transpose()
    }

    /// Write a status transition, stamping timestamps as appropriate.
    pub async fn update_status(
        &self,
        id: &JobId,
        status: JobStatus,
        result: Option<&Value>,
        error: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let result_json = result.map(|v| v.to_string());

        let rows = match status {
            JobStatus::Running => {
                sqlx::query("UPDATE jobs SET status = ?, started_at = ? WHERE id = ?")
                    .bind(status.as_str())
                    .bind(&now)
                    .bind(id.as_str())
                    .execute(&self.pool)
                    .await?
                    .rows_affected()
            }
            JobStatus::Done | JobStatus::Failed | JobStatus::Cancelled => {
                sqlx::query(
                    r#"
                    UPDATE jobs
                    SET status = ?, finished_at = ?, result = ?, error = ?
                    WHERE id = ?
                    "#,
                )
                .bind(status.as_str())
                .bind(&now)
                .bind(result_json)
                .bind(error)
                .bind(id.as_str())
                .execute(&self.pool)
                .await?
                .rows_affected()
            }
            JobStatus::Pending => {
                sqlx::query("UPDATE jobs SET status = 'pending' WHERE id = ?")
                    .bind(id.as_str())
                    .execute(&self.pool)
                    .await?
                    .rows_affected()
            }
        };

        if rows == 0 {
            return Err(DbError::JobNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Crash resume: rows left `running` by a previous lifetime go back to
    /// `pending`. Returns the number of recovered jobs.
    pub async fn recover_running(&self) -> Result<u64> {
        let recovered = sqlx::query(
            "UPDATE jobs SET status = 'pending', started_at = NULL WHERE status = 'running'",
        )
        .execute(&self.pool)
        .await?
        .rows_affected();

        if recovered > 0 {
            warn!(
                "Recovered {} job(s) left running by a previous lifetime",
                recovered
            );
        }
        Ok(recovered)
    }
}

/// 8 lowercase hex chars: the leading segment of a UUIDv4.
fn short_job_id() -> JobId {
    let raw = Uuid::new_v4().simple().to_string();
    JobId::new(&raw[..8])
}

fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> Result<Job> {
    let params_raw: String = row.get("params");
    let result_raw: Option<String> = row.get("result");
    let status_raw: String = row.get("status");

    Ok(Job {
        id: JobId::new(row.get::<String, _>("id")),
        skill_name: row.get("skill_name"),
        params: serde_json::from_str(&params_raw)?,
        target: row.get("target"),
        status: status_raw
            .parse()
            .map_err(|_| DbError::InvalidStatus(status_raw.clone()))?,
        created_at: parse_ts(row.get("created_at"))?,
        started_at: parse_opt_ts(row.get("started_at"))?,
        finished_at: parse_opt_ts(row.get("finished_at"))?,
        result: result_raw.map(|r| serde_json::from_str(&r)).transpose()?,
        error: row.get("error"),
    })
}

fn parse_ts(raw: String) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| DbError::Timestamp(raw))
}

fn parse_opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.map(parse_ts).transpose()
}
