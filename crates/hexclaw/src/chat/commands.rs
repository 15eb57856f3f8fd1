//! Operator command parsing and dispatch.
//!
//! Verbs arrive as chat text (`recon example.com`, `/status`). Each maps
//! to a core entry point; `status`, `stats`, and the prebuilt branch of
//! `data` are zero-inference by construction.

use crate::chat::Notifier;
use crate::dispatcher::request_approval;
use crate::planner::Planner;
use hexclaw_artifacts::{analytics, ArtifactStore};
use hexclaw_cache::Cache;
use hexclaw_db::HexClawDb;
use hexclaw_gate::ApprovalGate;
use hexclaw_inference::{wrappers::strip_fences, AskOptions, Router};
use hexclaw_protocol::{ApprovalOutcome, JobStatus, Tier};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const HELP_TEXT: &str = "*HexClaw Commands*\n\n\
`recon <target>` - run the recon chain (subdomains -> ports -> vulns)\n\
`orchestrate <goal>` - plan a workflow from a goal (approve before run)\n\
`status` - recent jobs\n\
`stats` - inference usage + cache dashboard\n\
`data <question>` - analytics over collected artifacts\n\
`skills` - list named skills (use `@name` in a goal)\n\
`cancel <job_id>` - cancel a queued or running job\n\
`help` - this message";

const DATA_SCHEMA_CONTEXT: &str = "You have access to a DuckDB view `data` over parquet scan \
artifacts with columns (tool TEXT, severity TEXT, title TEXT, detail TEXT).\n\
Respond with ONE valid SQL query only. No prose, no Markdown fences.\n\
If the question cannot be answered with SQL, reply: UNSUPPORTED";

/// Parsed operator verb.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Recon(String),
    Orchestrate(String),
    Status,
    Stats,
    Data(String),
    Cancel(String),
    Skills,
    Help,
}

/// Parse chat text into a command. Leading `/` is optional; unknown verbs
/// return None and the handler answers with help.
pub fn parse_command(text: &str) -> Option<Command> {
    let trimmed = text.trim();
    let stripped = trimmed.strip_prefix('/').unwrap_or(trimmed);
    let mut words = stripped.split_whitespace();
    let verb = words.next()?.to_lowercase();
    let rest = words.collect::<Vec<_>>().join(" ");

    match verb.as_str() {
        "recon" => Some(Command::Recon(rest)),
        "orchestrate" => Some(Command::Orchestrate(rest)),
        "status" => Some(Command::Status),
        "stats" => Some(Command::Stats),
        "data" => Some(Command::Data(rest)),
        "cancel" => Some(Command::Cancel(rest)),
        "skills" => Some(Command::Skills),
        "help" | "start" => Some(Command::Help),
        _ => None,
    }
}

#[derive(Clone)]
pub struct CommandHandler {
    pub db: HexClawDb,
    pub gate: ApprovalGate,
    pub planner: Arc<Planner>,
    pub artifacts: Arc<ArtifactStore>,
    pub cache: Arc<Cache>,
    pub router: Arc<Router>,
    pub notifier: Notifier,
}

impl CommandHandler {
    /// Handle one inbound message; returns the reply text ("" for none).
    pub async fn handle(&self, text: &str) -> String {
        let Some(command) = parse_command(text) else {
            return HELP_TEXT.to_string();
        };

        match command {
            Command::Help => HELP_TEXT.to_string(),
            Command::Recon(target) => self.handle_recon(&target).await,
            Command::Orchestrate(goal) => self.handle_orchestrate(&goal).await,
            Command::Status => self.handle_status().await,
            Command::Stats => self.handle_stats().await,
            Command::Data(question) => self.handle_data(&question).await,
            Command::Cancel(job_id) => self.handle_cancel(&job_id),
            Command::Skills => self.handle_skills(),
        }
    }

    async fn handle_recon(&self, target: &str) -> String {
        if target.is_empty() {
            return "Usage: `recon <target>`".to_string();
        }
        let mut params = BTreeMap::new();
        params.insert("target".to_string(), json!(target));
        match self.db.enqueue("recon_osint", &params).await {
            Ok(job_id) => format!(
                "Job `{}` queued for *{}*. Use `status` to track progress.",
                job_id, target
            ),
            Err(err) => {
                warn!("Enqueue failed: {}", err);
                format!("Failed to enqueue: {}", err)
            }
        }
    }

    /// Plan the goal, then propose it behind an approval gate. The wait
    /// runs in its own task - the bot loop must stay free to deliver the
    /// button press that resolves it.
    async fn handle_orchestrate(&self, goal: &str) -> String {
        if goal.is_empty() {
            return "Usage: `orchestrate <goal>`".to_string();
        }

        let plan = self.planner.plan_goal(goal).await;
        let target = plan
            .params
            .get("target")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        let handler = self.clone();
        let goal = goal.to_string();
        tokio::spawn(async move {
            let approval_id = format!("plan_{}", chrono::Utc::now().timestamp_millis());
            let prompt = format!(
                "Proposed plan for goal:\n_{}_\n\nSkill: `{}`\nTarget: `{}`\n\nRun it?",
                goal, plan.skill_name, target
            );
            let outcome = request_approval(
                &handler.gate,
                &handler.notifier,
                &approval_id,
                None,
                &prompt,
                &[],
                Duration::from_secs(120),
            )
            .await;

            match outcome {
                ApprovalOutcome::Approve => {
                    match handler.db.enqueue(&plan.skill_name, &plan.params).await {
                        Ok(job_id) => {
                            handler
                                .notifier
                                .send(&format!("Plan approved. Job `{}` queued.", job_id))
                                .await;
                        }
                        Err(err) => {
                            handler
                                .notifier
                                .send(&format!("Failed to enqueue plan: {}", err))
                                .await;
                        }
                    }
                }
                ApprovalOutcome::Timeout => {
                    handler
                        .notifier
                        .send("Plan proposal expired without a response.")
                        .await;
                }
                _ => {
                    handler.notifier.send("Plan discarded.").await;
                }
            }
        });

        "Planning... check the proposal buttons above.".to_string()
    }

    async fn handle_status(&self) -> String {
        let jobs = match self.db.recent(20).await {
            Ok(jobs) => jobs,
            Err(err) => return format!("Error fetching status: {}", err),
        };
        if jobs.is_empty() {
            return "No jobs yet.".to_string();
        }

        let mut lines = vec!["*Jobs*".to_string()];
        for job in &jobs {
            let marker = match job.status {
                JobStatus::Pending => "…",
                JobStatus::Running => ">",
                JobStatus::Done => "ok",
                JobStatus::Failed => "x",
                JobStatus::Cancelled => "-",
            };
            let elapsed = job
                .elapsed_secs()
                .map(|s| format!(" ({}s)", s))
                .unwrap_or_default();
            lines.push(format!(
                "[{}] `{}` *{}* -> `{}` [{}]{}",
                marker, job.id, job.skill_name, job.target, job.status, elapsed
            ));
        }
        lines.join("\n")
    }

    /// Zero inference: pure SQL over the ledger plus in-process counters.
    async fn handle_stats(&self) -> String {
        let mut lines = vec!["*Inference Usage*".to_string()];
        match self.db.ledger_summary().await {
            Ok(summary) => {
                for usage in summary.by_model.iter().take(10) {
                    lines.push(format!(
                        "`{}` ({}): {} calls · {}/{} tokens · ${:.4} · {} cache hits",
                        usage.model,
                        usage.provider,
                        usage.calls,
                        usage.tokens_in,
                        usage.tokens_out,
                        usage.cost_usd,
                        usage.cache_hits
                    ));
                }
                lines.push(format!(
                    "*Totals*: {} calls · {}/{} tokens · ${:.4} · {} cache hits",
                    summary.totals.calls,
                    summary.totals.tokens_in,
                    summary.totals.tokens_out,
                    summary.totals.cost_usd,
                    summary.totals.cache_hits
                ));
            }
            Err(err) => lines.push(format!("ledger unavailable: {}", err)),
        }

        let cache = self.cache.stats();
        lines.push(format!(
            "*Cache*: {} exact + {} semantic hits, {} misses (rate {:.0}%)",
            cache.hits_exact,
            cache.hits_semantic,
            cache.misses,
            cache.hit_rate * 100.0
        ));

        let global = self.artifacts.global_stats();
        lines.push(format!(
            "*Data*: {} vulns · {} subdomains · {} open ports",
            global.total_vulns, global.total_subdomains, global.total_open_ports
        ));
        lines.join("\n")
    }

    /// Analytics question. Prebuilt SQL first (zero tokens), cached model
    /// SQL second, a live model call only on a complete miss.
    async fn handle_data(&self, question: &str) -> String {
        if question.is_empty() {
            return "Usage: `data <question>`".to_string();
        }

        if let Some(sql) = analytics::prebuilt_sql(question) {
            let glob = analytics::glob_for_question(&analytics::normalise_question(question));
            info!("data: prebuilt SQL for '{}'", question);
            return self.run_analytics_sql("prebuilt", sql, glob);
        }

        let cache_key = format!("t2s:sql:{}", question);
        let (source, sql) = match self.cache.check(&cache_key).await {
            Some(sql) => ("cache", sql),
            None => {
                let raw = self
                    .router
                    .ask(
                        &format!("Question: {}", question),
                        Tier::Low,
                        AskOptions {
                            system: Some(DATA_SCHEMA_CONTEXT.to_string()),
                            temperature: Some(0.1),
                            max_tokens: Some(256),
                            ..AskOptions::default()
                        },
                    )
                    .await;
                let sql = strip_fences(&raw).to_string();
                if sql.starts_with("[inference error") || sql.starts_with("[stub") {
                    return "Analytics model unavailable; try a prebuilt question like `data vuln summary`.".to_string();
                }
                self.cache.store(&cache_key, &sql).await;
                ("model", sql)
            }
        };

        if sql.trim() == "UNSUPPORTED" {
            return "That question cannot be answered from the collected data.".to_string();
        }
        self.run_analytics_sql(source, &sql, "*/vulns.parquet")
    }

    fn run_analytics_sql(&self, source: &str, sql: &str, glob: &str) -> String {
        match self.artifacts.query_glob(glob, sql) {
            Ok(rows) if rows.is_empty() => format!("({}) no rows.", source),
            Ok(rows) => {
                let mut lines = vec![format!("({}) {} row(s):", source, rows.len())];
                for row in rows.iter().take(10) {
                    lines.push(format!("  {}", Value::Object(row.clone())));
                }
                lines.join("\n")
            }
            Err(err) => format!("Query failed: {}", err),
        }
    }

    fn handle_cancel(&self, job_id: &str) -> String {
        if job_id.is_empty() {
            return "Usage: `cancel <job_id>`".to_string();
        }
        self.gate.request_cancel(job_id);
        format!("Job `{}` marked for cancellation.", job_id)
    }

    fn handle_skills(&self) -> String {
        let index = self.planner.load_index();
        if index.is_empty() {
            return "No named skills installed.".to_string();
        }
        let mut lines = vec![format!("*Named Skills* ({})", index.len())];
        for skill in index.iter().take(25) {
            let description: String = skill.description.chars().take(60).collect();
            lines.push(format!("`@{}` - {}", skill.name, description));
        }
        lines.join("\n")
    }
}
