//! Skill dispatcher: runs one job's step chain to a terminal state.
//!
//! Failure discipline:
//!   - a tool-server error or non-success result soft-fails the step -
//!     one warning notification, then the chain continues
//!   - an unknown tool is a no-op with a synthetic success and a recorded
//!     warning, so dry-composed skills stay chainable
//!   - a missing skill file terminally fails the job
//!   - nothing propagates out of `run_job`; an unexpected error becomes a
//!     `failed` transition with exactly one operator notification
//!
//! Cancellation is checked between steps and inside the approval gate;
//! in-flight tool calls run to their own timeout.

use crate::chat::Notifier;
use crate::planner::Planner;
use crate::tools::{self, ToolClient, ToolKind};
use anyhow::Result;
use hexclaw_artifacts::{suggest_next, ArtifactStore, Record, WriteMode};
use hexclaw_db::HexClawDb;
use hexclaw_gate::ApprovalGate;
use hexclaw_protocol::{
    defaults, load_skill, ApprovalOutcome, Button, Finding, Job, JobStatus, Step, StepAction,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Per-job working state threaded through the step chain.
#[derive(Debug, Default)]
pub struct JobContext {
    pub target: String,
    /// Artifact name -> path, for steps that consume prior outputs.
    pub artifacts: BTreeMap<String, PathBuf>,
    /// `<tool>_result` -> raw tool response.
    pub results: BTreeMap<String, Value>,
    /// Findings accumulated across all steps.
    pub findings: Vec<Finding>,
    /// Suggested next actions (filled by `suggest_next`).
    pub next_steps: Vec<String>,
    /// Step warnings recorded in the job's event stream.
    pub warnings: Vec<String>,
}

impl JobContext {
    fn for_job(job: &Job) -> Self {
        Self {
            target: job.target.clone(),
            ..Self::default()
        }
    }
}

/// Send an approval prompt and block until the operator resolves it, the
/// deadline passes, or the owning job is cancelled.
pub async fn request_approval(
    gate: &ApprovalGate,
    notifier: &Notifier,
    approval_id: &str,
    job_id: Option<&str>,
    prompt: &str,
    choices: &[String],
    timeout: Duration,
) -> ApprovalOutcome {
    let ticket = gate.register(approval_id, job_id);

    let buttons: Vec<Button> = if choices.is_empty() {
        vec![
            Button::new("Approve", format!("approve:{}", approval_id)),
            Button::new("Deny", format!("deny:{}", approval_id)),
        ]
    } else {
        choices
            .iter()
            .map(|choice| Button::new(choice, format!("choice:{}:{}", approval_id, choice)))
            .chain(std::iter::once(Button::new(
                "Cancel",
                format!("deny:{}", approval_id),
            )))
            .collect()
    };

    notifier.send_with_buttons(prompt, &buttons).await;
    ticket.wait(timeout).await
}

pub struct Dispatcher {
    db: HexClawDb,
    artifacts: Arc<ArtifactStore>,
    gate: ApprovalGate,
    notifier: Notifier,
    tools: Arc<dyn ToolClient>,
    planner: Arc<Planner>,
    skills_dir: PathBuf,
    chain_on_choice: bool,
}

enum StepFlow {
    Continue,
    Cancelled,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: HexClawDb,
        artifacts: Arc<ArtifactStore>,
        gate: ApprovalGate,
        notifier: Notifier,
        tools: Arc<dyn ToolClient>,
        planner: Arc<Planner>,
        skills_dir: PathBuf,
        chain_on_choice: bool,
    ) -> Self {
        Self {
            db,
            artifacts,
            gate,
            notifier,
            tools,
            planner,
            skills_dir,
            chain_on_choice,
        }
    }

    /// Worker entry point. Exceptions never cross this boundary: an
    /// unexpected error transitions the job to `failed` and notifies once.
    pub async fn run_job(&self, job: Job) {
        let job_id = job.id.clone();
        if let Err(err) = self.execute(&job).await {
            error!("Unhandled error in job {}: {:#}", job_id, err);
            let _ = self
                .db
                .update_status(&job_id, JobStatus::Failed, None, Some(&format!("{:#}", err)))
                .await;
            self.notifier
                .send(&format!("Job `{}` crashed: {:#}", job_id, err))
                .await;
        }
    }

    async fn execute(&self, job: &Job) -> Result<()> {
        info!(
            "Starting skill '{}' for target '{}' (job {})",
            job.skill_name, job.target, job.id
        );
        self.db
            .update_status(&job.id, JobStatus::Running, None, None)
            .await?;
        self.notifier
            .send(&format!(
                "Job `{}` started: `{}` on `{}`",
                job.id, job.skill_name, job.target
            ))
            .await;

        let skill = match load_skill(&self.skills_dir, &job.skill_name) {
            Ok(skill) => skill,
            Err(err) => {
                let message = err.to_string();
                self.db
                    .update_status(&job.id, JobStatus::Failed, None, Some(&message))
                    .await?;
                self.notifier
                    .send(&format!("Job `{}` failed: {}", job.id, message))
                    .await;
                return Ok(());
            }
        };

        let mut ctx = JobContext::for_job(job);
        let total = skill.steps.len();

        for (index, step) in skill.steps.iter().enumerate() {
            let step_no = index + 1;

            // Cancellation is checked at step boundaries only
            if self.gate.take_cancel(job.id.as_str()) {
                return self.finish_cancelled(job, step_no, total, &step.tool).await;
            }

            self.notifier
                .send(&format!(
                    "Job `{}` step {}/{}: `{}` on `{}`",
                    job.id, step_no, total, step.tool, job.target
                ))
                .await;

            let flow = self.run_step(job, step, step_no, total, &mut ctx).await?;
            if matches!(flow, StepFlow::Cancelled) {
                return self.finish_cancelled(job, step_no, total, &step.tool).await;
            }
        }

        // Terminal: done, with the findings as the result payload
        let result = json!({
            "findings": ctx.findings,
            "warnings": ctx.warnings,
        });
        self.db
            .update_status(&job.id, JobStatus::Done, Some(&result), None)
            .await?;
        self.notifier
            .send_report(job, &ctx.findings, &ctx.next_steps)
            .await;
        info!("Job {} complete. {} findings.", job.id, ctx.findings.len());
        Ok(())
    }

    async fn run_step(
        &self,
        job: &Job,
        step: &Step,
        step_no: usize,
        total: usize,
        ctx: &mut JobContext,
    ) -> Result<StepFlow> {
        let kind = step
            .action
            .map(ToolKind::Internal)
            .unwrap_or_else(|| tools::resolve(&step.tool));

        let result = match kind {
            ToolKind::Internal(StepAction::StoreFindings) => {
                self.store_findings(job, ctx).await;
                return Ok(StepFlow::Continue);
            }
            ToolKind::Internal(StepAction::SuggestNext) => {
                let outcome = self.suggest_next(job, step, ctx).await;
                if outcome == ApprovalOutcome::Cancel {
                    self.gate.take_cancel(job.id.as_str());
                    return Ok(StepFlow::Cancelled);
                }
                return Ok(StepFlow::Continue);
            }
            ToolKind::Unknown => {
                let warning = format!("unknown tool '{}' - step skipped", step.tool);
                warn!("Job {} step {}: {}", job.id, step_no, warning);
                ctx.warnings.push(warning);
                // Synthetic success keeps dry-composed chains going
                json!({
                    "success": true,
                    "tool": step.tool,
                    "internal": true,
                    "data": tools::build_payload(&step.tool, &ctx.target, &step.extra),
                })
            }
            ToolKind::External(endpoint) => {
                let payload = tools::build_payload(&step.tool, &ctx.target, &step.extra);
                match self.tools.call(&step.tool, endpoint, &payload).await {
                    Ok(result)
                        if result
                            .get("success")
                            .and_then(Value::as_bool)
                            .unwrap_or(false) =>
                    {
                        result
                    }
                    Ok(result) => {
                        let reason = result
                            .get("error")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown error")
                            .to_string();
                        self.soft_fail(job, step, step_no, total, &reason, ctx).await;
                        return Ok(StepFlow::Continue);
                    }
                    Err(err) => {
                        self.soft_fail(job, step, step_no, total, &err.to_string(), ctx)
                            .await;
                        return Ok(StepFlow::Continue);
                    }
                }
            }
        };

        if let Some(output) = &step.output {
            self.persist_output(job, step, output, &result, ctx);
        }

        ctx.findings
            .extend(tools::extract_findings(&step.tool, &result));
        ctx.results.insert(format!("{}_result", step.tool), result);
        Ok(StepFlow::Continue)
    }

    /// One warning notification per soft-failed step, then the chain
    /// continues - a nuclei hiccup must not abort a six-step recon.
    async fn soft_fail(
        &self,
        job: &Job,
        step: &Step,
        step_no: usize,
        total: usize,
        reason: &str,
        ctx: &mut JobContext,
    ) {
        warn!("Job {} step {} ({}) failed: {}", job.id, step_no, step.tool, reason);
        ctx.warnings
            .push(format!("step {} ({}): {}", step_no, step.tool, reason));
        self.notifier
            .send(&format!(
                "Job `{}` step {}/{}: `{}` failed - {} - continuing chain",
                job.id, step_no, total, step.tool, reason
            ))
            .await;
    }

    fn persist_output(
        &self,
        job: &Job,
        step: &Step,
        output: &str,
        result: &Value,
        ctx: &mut JobContext,
    ) {
        let records = tools::extract_records(&step.tool, result);
        if records.is_empty() {
            return;
        }
        let path = self.artifacts.artifact_path(job.id.as_str(), output);
        match self
            .artifacts
            .store_records(&path, &records, WriteMode::Overwrite)
        {
            Ok(rows) => {
                info!("Saved {} rows -> {}", rows, path.display());
                ctx.artifacts.insert(output.to_string(), path);
            }
            Err(err) => {
                let warning = format!("artifact '{}' write failed: {}", output, err);
                warn!("Job {}: {}", job.id, warning);
                ctx.warnings.push(warning);
            }
        }
    }

    async fn store_findings(&self, job: &Job, ctx: &mut JobContext) {
        if ctx.findings.is_empty() {
            self.notifier
                .send(&format!("Job `{}`: no findings to store yet.", job.id))
                .await;
            return;
        }

        let records: Vec<Record> = ctx
            .findings
            .iter()
            .filter_map(|finding| {
                serde_json::to_value(finding)
                    .ok()
                    .and_then(|v| v.as_object().cloned())
            })
            .collect();
        let path = self.artifacts.artifact_path(job.id.as_str(), "findings");
        match self
            .artifacts
            .store_records(&path, &records, WriteMode::Overwrite)
        {
            Ok(rows) => {
                ctx.artifacts.insert("findings".to_string(), path);
                self.notifier
                    .send(&format!("Job `{}`: stored {} finding(s).", job.id, rows))
                    .await;
            }
            Err(err) => {
                let warning = format!("findings artifact write failed: {}", err);
                warn!("Job {}: {}", job.id, warning);
                ctx.warnings.push(warning);
            }
        }
    }

    /// Rule-based next-step suggestions behind an approval gate. No model
    /// call is ever made here.
    async fn suggest_next(&self, job: &Job, step: &Step, ctx: &mut JobContext) -> ApprovalOutcome {
        let aggregate = match self.artifacts.aggregate(job.id.as_str()) {
            Ok(aggregate) => aggregate,
            Err(err) => {
                warn!("Job {}: aggregate failed: {}", job.id, err);
                ctx.warnings.push(format!("aggregate failed: {}", err));
                return ApprovalOutcome::Deny;
            }
        };

        let suggestions = suggest_next(&aggregate);
        ctx.next_steps = suggestions.iter().map(|s| s.action.clone()).collect();
        let choices: Vec<String> = ctx.next_steps.iter().take(4).cloned().collect();

        let mut prompt = format!(
            "Job `{}` - `{}`\nFindings so far: {} ({} critical/high)\n",
            job.id,
            job.target,
            ctx.findings.len(),
            aggregate.crit_high_count()
        );
        for finding in aggregate.top_vulns.iter().take(3) {
            prompt.push_str(&format!(
                "  [{}] {}\n",
                finding.severity.as_str().to_uppercase(),
                finding.title
            ));
        }
        prompt.push_str("Select next action:");

        let timeout_sec = step
            .extra
            .get("timeout_sec")
            .and_then(Value::as_u64)
            .unwrap_or(defaults::DEFAULT_APPROVAL_TIMEOUT_SEC);
        let approval_id = format!("suggest_{}", job.id);

        let outcome = request_approval(
            &self.gate,
            &self.notifier,
            &approval_id,
            Some(job.id.as_str()),
            &prompt,
            &choices,
            Duration::from_secs(timeout_sec),
        )
        .await;

        info!(
            "Job {} suggest_next outcome: {}",
            job.id,
            outcome.as_str()
        );
        match &outcome {
            ApprovalOutcome::Choice(choice) => {
                if self.chain_on_choice {
                    let goal = format!("{} on {}", choice, job.target);
                    let plan = self.planner.plan_goal(&goal).await;
                    match self.db.enqueue(&plan.skill_name, &plan.params).await {
                        Ok(follow_up) => {
                            self.notifier
                                .send(&format!(
                                    "Queued follow-up `{}` for *{}* (job `{}`)",
                                    choice, job.target, follow_up
                                ))
                                .await;
                        }
                        Err(err) => {
                            warn!("Follow-up enqueue failed: {}", err);
                            ctx.warnings.push(format!("follow-up enqueue failed: {}", err));
                        }
                    }
                } else {
                    self.notifier
                        .send(&format!("Operator selected `{}`; chaining disabled.", choice))
                        .await;
                }
            }
            ApprovalOutcome::Timeout => {
                self.notifier
                    .send(&format!(
                        "Job `{}`: no operator response - continuing without a follow-up.",
                        job.id
                    ))
                    .await;
            }
            ApprovalOutcome::Approve | ApprovalOutcome::Deny | ApprovalOutcome::Cancel => {}
        }
        outcome
    }

    async fn finish_cancelled(
        &self,
        job: &Job,
        step_no: usize,
        total: usize,
        tool: &str,
    ) -> Result<()> {
        self.db
            .update_status(&job.id, JobStatus::Cancelled, None, None)
            .await?;
        self.notifier
            .send(&format!(
                "Job `{}` cancelled at step {}/{} (`{}`).",
                job.id, step_no, total, tool
            ))
            .await;
        info!("Job {} cancelled", job.id);
        Ok(())
    }
}

/// Expose the skills directory bundled defaults: write the stock recon
/// skill when the directory is empty so a fresh install can run.
pub fn ensure_default_skills(skills_dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(skills_dir)?;
    let recon = skills_dir.join("recon_osint.yaml");
    if !recon.exists() {
        std::fs::write(
            &recon,
            r#"name: recon_osint
description: Passive recon chain (subdomains -> ports -> vulns -> next steps)
steps:
  - tool: amass
    output: subs
  - tool: rustscan
    output: ports
  - tool: nuclei
    output: vulns
  - tool: store_findings
    action: store_findings
  - tool: suggest_next
    action: suggest_next
    timeout_sec: 120
"#,
        )?;
    }
    Ok(())
}
