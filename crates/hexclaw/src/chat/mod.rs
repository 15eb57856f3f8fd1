//! Operator-facing messaging: the notifier wrapper and report rendering.

pub mod commands;
pub mod telegram;

use hexclaw_protocol::{Button, ChatTransport, Finding, Job, Severity};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Thin, clonable wrapper the dispatcher and monitor send through.
/// All sends are best-effort.
#[derive(Clone)]
pub struct Notifier {
    transport: Arc<dyn ChatTransport>,
}

impl Notifier {
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> Arc<dyn ChatTransport> {
        Arc::clone(&self.transport)
    }

    pub async fn send(&self, text: &str) {
        self.transport.send_text(text).await;
    }

    pub async fn send_with_buttons(&self, prompt: &str, buttons: &[Button]) {
        self.transport.send_with_buttons(prompt, buttons).await;
    }

    /// The single structured report a terminal job emits.
    pub async fn send_report(&self, job: &Job, findings: &[Finding], next_steps: &[String]) {
        self.send(&format_report(job, findings, next_steps)).await;
    }
}

/// Render the end-of-job report: severity histogram, top findings in
/// severity order, suggested next steps.
pub fn format_report(job: &Job, findings: &[Finding], next_steps: &[String]) -> String {
    let mut counts: BTreeMap<Severity, usize> = BTreeMap::new();
    for finding in findings {
        *counts.entry(finding.severity).or_insert(0) += 1;
    }
    let severity_line = if counts.is_empty() {
        "no findings".to_string()
    } else {
        Severity::ALL
            .iter()
            .filter_map(|sev| counts.get(sev).map(|n| format!("{} {}", n, sev)))
            .collect::<Vec<_>>()
            .join(" · ")
    };

    let mut lines = vec![
        format!("*HexClaw Report* - `{}`", job.target),
        format!("Skill: `{}` · Job: `{}`", job.skill_name, job.id),
        format!("Severity: {}", severity_line),
        format!("Total findings: {}", findings.len()),
    ];

    let mut ordered: Vec<&Finding> = findings.iter().collect();
    ordered.sort_by_key(|f| f.severity.rank());
    if !ordered.is_empty() {
        lines.push("\n*Top Findings*".to_string());
        for finding in ordered.iter().take(5) {
            lines.push(format!(
                "  [{}] {}",
                finding.severity.as_str().to_uppercase(),
                finding.title
            ));
        }
    }

    if !next_steps.is_empty() {
        lines.push("\n*Suggested Next Steps*".to_string());
        for step in next_steps.iter().take(3) {
            lines.push(format!("  -> {}", step));
        }
    }

    lines.join("\n")
}
