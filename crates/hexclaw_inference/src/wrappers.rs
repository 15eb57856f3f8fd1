//! Specialised prompts built on the router (semantic shortcuts for skills).
//!
//! Both wrappers parse the model's reply as JSON and fall back to something
//! harmless on any parse failure - the caller never sees an error.

use crate::{AskOptions, Router};
use hexclaw_protocol::{Finding, Tier};
use serde_json::Value;
use tracing::warn;

const VULN_PRIORITISE_SYSTEM: &str = "You are a senior penetration tester.\n\
Given a list of vulnerabilities, output a JSON array ranked by exploitability and impact.\n\
Each item: {\"rank\": 1, \"title\": \"...\", \"severity\": \"critical|high|medium|low\", \"reason\": \"...\"}\n\
Be concise. No prose outside the JSON array.";

const SUGGEST_NEXT_SYSTEM: &str = "You are an autonomous red-team agent.\n\
Given partial recon results, suggest the 3 most valuable next scanning steps.\n\
Output JSON: {\"next_steps\": [\"...\", \"...\", \"...\"]}\n\
Each step must be a specific tool name + target. No prose outside JSON.";

impl Router {
    /// Rank findings by exploitability and impact (tier = high).
    ///
    /// Returns the model's ranking as JSON values; on parse failure the
    /// input findings come back in their original order.
    pub async fn prioritise_vulns(&self, findings: &[Finding]) -> Vec<Value> {
        if findings.is_empty() {
            return Vec::new();
        }

        // Cap the list to avoid a token explosion on noisy scans
        let capped: Vec<&Finding> = findings.iter().take(30).collect();
        let prompt = serde_json::to_string_pretty(&capped).unwrap_or_default();

        let raw = self
            .ask(
                &prompt,
                Tier::High,
                AskOptions {
                    system: Some(VULN_PRIORITISE_SYSTEM.to_string()),
                    temperature: Some(0.1),
                    ..AskOptions::default()
                },
            )
            .await;

        match serde_json::from_str::<Vec<Value>>(strip_fences(&raw)) {
            Ok(ranked) => ranked,
            Err(_) => {
                warn!("prioritise_vulns: failed to parse model JSON response");
                findings
                    .iter()
                    .map(|f| serde_json::to_value(f).unwrap_or(Value::Null))
                    .collect()
            }
        }
    }

    /// Suggest next scanning steps from a findings summary (tier = low).
    /// Empty list on parse failure.
    pub async fn suggest_next_steps(&self, target: &str, findings_summary: &str) -> Vec<String> {
        let prompt = format!("Target: {}\n\nFindings summary:\n{}", target, findings_summary);

        let raw = self
            .ask(
                &prompt,
                Tier::Low,
                AskOptions {
                    system: Some(SUGGEST_NEXT_SYSTEM.to_string()),
                    ..AskOptions::default()
                },
            )
            .await;

        match serde_json::from_str::<Value>(strip_fences(&raw)) {
            Ok(value) => value
                .get("next_steps")
                .and_then(Value::as_array)
                .map(|steps| {
                    steps
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            Err(_) => {
                warn!("suggest_next_steps: failed to parse model JSON response");
                Vec::new()
            }
        }
    }
}

/// Strip markdown code fences the model may wrap JSON in.
pub fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}
