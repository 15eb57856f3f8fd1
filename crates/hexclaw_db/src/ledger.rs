//! Append-only token ledger.
//!
//! One row per model interaction, cache hits included. Writes must never
//! fail the caller: errors are logged and swallowed. `summary` is pure SQL
//! over the ledger - the /stats command reads it without spending a token.

use crate::HexClawDb;
use serde::Serialize;
use sqlx::Row;
use tracing::{debug, info};

/// Cost per 1M tokens (input, output) in USD, keyed by model substring.
///
/// Consulted when the provider response carries no cost figure. Unknown
/// models estimate to zero - never fabricate cost.
const COST_PER_1M: &[(&str, f64, f64)] = &[
    ("google/gemini-pro-1.5", 3.50, 10.50),
    ("google/gemini-pro", 0.50, 1.50),
    ("mistralai/mistral-7b-instruct:free", 0.00, 0.00),
    ("mistralai/mistral-7b-instruct", 0.07, 0.07),
    ("meta-llama/llama-3-8b-instruct:free", 0.00, 0.00),
];

/// Estimate cost in USD from the static rate table.
pub fn estimate_cost(model: &str, tokens_in: u64, tokens_out: u64) -> f64 {
    for (key, rate_in, rate_out) in COST_PER_1M {
        if model.contains(key) {
            return (tokens_in as f64 * rate_in + tokens_out as f64 * rate_out) / 1_000_000.0;
        }
    }
    0.0
}

/// Per-(provider, model) usage aggregate.
#[derive(Debug, Clone, Serialize)]
pub struct ModelUsage {
    pub provider: String,
    pub model: String,
    pub calls: u64,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost_usd: f64,
    pub cache_hits: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageTotals {
    pub calls: u64,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost_usd: f64,
    pub cache_hits: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LedgerSummary {
    pub by_model: Vec<ModelUsage>,
    pub totals: UsageTotals,
}

impl HexClawDb {
    /// Append one ledger row. Infallible to the caller; failures are logged.
    pub async fn ledger_record(
        &self,
        provider: &str,
        model: &str,
        tokens_in: u64,
        tokens_out: u64,
        cost_usd: f64,
        cache_hit: bool,
    ) {
        let result = sqlx::query(
            r#"
            INSERT INTO token_log (provider, model, tokens_in, tokens_out, cost_usd, cache_hit)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(provider)
        .bind(model)
        .bind(tokens_in as i64)
        .bind(tokens_out as i64)
        .bind(cost_usd)
        .bind(cache_hit as i64)
        .execute(&self.pool)
        .await;

        if let Err(err) = result {
            debug!("Token ledger write failed: {}", err);
        }
    }

    /// Aggregate by (provider, model), most expensive first.
    pub async fn ledger_summary(&self) -> crate::Result<LedgerSummary> {
        let rows = sqlx::query(
            r#"
            SELECT
                provider, model,
                COUNT(*)        AS calls,
                SUM(tokens_in)  AS tok_in,
                SUM(tokens_out) AS tok_out,
                SUM(cost_usd)   AS cost,
                SUM(cache_hit)  AS cache_hits
            FROM token_log
            GROUP BY provider, model
            ORDER BY cost DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut by_model = Vec::with_capacity(rows.len());
        let mut totals = UsageTotals::default();

        for row in &rows {
            let usage = ModelUsage {
                provider: row.get("provider"),
                model: row.get("model"),
                calls: row.get::<i64, _>("calls") as u64,
                tokens_in: row.get::<Option<i64>, _>("tok_in").unwrap_or(0) as u64,
                tokens_out: row.get::<Option<i64>, _>("tok_out").unwrap_or(0) as u64,
                cost_usd: row.get::<Option<f64>, _>("cost").unwrap_or(0.0),
                cache_hits: row.get::<Option<i64>, _>("cache_hits").unwrap_or(0) as u64,
            };
            totals.calls += usage.calls;
            totals.tokens_in += usage.tokens_in;
            totals.tokens_out += usage.tokens_out;
            totals.cost_usd += usage.cost_usd;
            totals.cache_hits += usage.cache_hits;
            by_model.push(usage);
        }

        info!(
            "Ledger summary: {} calls, {} cache hits, ${:.4}",
            totals.calls, totals.cache_hits, totals.cost_usd
        );
        Ok(LedgerSummary { by_model, totals })
    }

    /// Every ledger row as (tokens_in, tokens_out, cost_usd, cache_hit).
    /// Used by invariant tests.
    pub async fn ledger_rows(&self) -> crate::Result<Vec<(u64, u64, f64, bool)>> {
        let rows = sqlx::query(
            "SELECT tokens_in, tokens_out, cost_usd, cache_hit FROM token_log ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| {
                (
                    row.get::<i64, _>("tokens_in") as u64,
                    row.get::<i64, _>("tokens_out") as u64,
                    row.get::<f64, _>("cost_usd"),
                    row.get::<i64, _>("cache_hit") != 0,
                )
            })
            .collect())
    }
}
