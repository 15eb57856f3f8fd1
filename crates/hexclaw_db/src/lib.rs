//! SQLite state store for HexClaw.
//!
//! One database file, three concerns:
//!   - `jobs`       - the durable job queue (single writer per row: the
//!                    owning worker; readers run concurrently under WAL)
//!   - `token_log`  - append-only ledger of every model interaction
//!   - `alerts`     - best-effort record of delivered monitor alerts
//!
//! # Example
//!
//! ```rust,ignore
//! let db = HexClawDb::open(&path).await?;
//! let id = db.enqueue("recon_osint", &params).await?;
//! let jobs = db.pending().await?;
//! ```

pub mod alerts;
pub mod error;
pub mod ledger;
pub mod queue;
mod schema;

pub use error::{DbError, Result};
pub use ledger::{LedgerSummary, ModelUsage, UsageTotals};

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;

/// Handle to the HexClaw state store.
#[derive(Clone)]
pub struct HexClawDb {
    pub(crate) pool: SqlitePool,
}

impl HexClawDb {
    /// Open (and create if absent) the state store at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let url = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;
        let db = Self { pool };
        db.ensure_schema().await?;
        Ok(db)
    }

    /// In-memory store for tests. A single long-lived connection: an
    /// in-memory SQLite database dies with its connection.
    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let db = Self { pool };
        db.ensure_schema().await?;
        Ok(db)
    }
}
