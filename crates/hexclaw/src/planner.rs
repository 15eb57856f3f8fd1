//! Goal planner: free-form operator goal -> (skill, params).
//!
//! Resolution order:
//!   1. explicit `@name` token -> named-skills index lookup
//!   2. model planning (when configured) - JSON `{skill, params}`, any
//!      parse failure falls through
//!   3. keyword rules with domain extraction
//!
//! The planner is total: it always returns a plan, even a degenerate one.

use hexclaw_inference::{AskOptions, Router};
use hexclaw_protocol::Tier;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

/// The pair the dispatcher consumes.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub skill_name: String,
    pub params: BTreeMap<String, Value>,
}

/// One entry of `skills_index.json` in the skills directory.
#[derive(Debug, Clone, Deserialize)]
pub struct NamedSkill {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Skill file, relative to the skills directory.
    #[serde(default)]
    pub path: String,
}

pub struct Planner {
    skills_dir: PathBuf,
    router: Option<Arc<Router>>,
    use_model: bool,
}

fn domain_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([a-z0-9]+(-[a-z0-9]+)*\.)+[a-z]{2,}").unwrap())
}

const PLANNER_SYSTEM: &str = "You are the HexClaw orchestrator.\n\
Available skills: [recon_osint, dev_ops, autonomous_coder, osint_mapping].\n\
Respond ONLY with a JSON object: {\"skill\": \"skill_name\", \"params\": {\"target\": \"extracted_target\"}}";

impl Planner {
    pub fn new(skills_dir: PathBuf, router: Option<Arc<Router>>, use_model: bool) -> Self {
        Self {
            skills_dir,
            router,
            use_model,
        }
    }

    /// Translate a goal into a plan. Never fails.
    pub async fn plan_goal(&self, goal: &str) -> Plan {
        info!("Planning for goal: {}", goal);

        if let Some(plan) = self.plan_named_skill(goal) {
            return plan;
        }

        if self.use_model {
            if let Some(router) = &self.router {
                if let Some(plan) = self.plan_with_model(router, goal).await {
                    return plan;
                }
            }
        }

        self.plan_with_rules(goal)
    }

    /// `@name` token -> named-skills index. The plan carries the referenced
    /// skill's content in params so the dispatcher (and the operator) can
    /// see exactly what was selected.
    fn plan_named_skill(&self, goal: &str) -> Option<Plan> {
        let token = goal
            .split_whitespace()
            .find(|word| word.starts_with('@') && word.len() > 1)?;
        let name = token.trim_start_matches('@');

        let entry = self
            .load_index()
            .into_iter()
            .find(|skill| skill.name.eq_ignore_ascii_case(name))?;

        let mut params = BTreeMap::new();
        params.insert("target".to_string(), json!(extract_target(goal)));
        params.insert("skill_name".to_string(), json!(entry.name.clone()));
        if !entry.path.is_empty() {
            let path = self.skills_dir.join(&entry.path);
            if let Ok(content) = std::fs::read_to_string(&path) {
                params.insert("skill_content".to_string(), json!(content));
            }
        }

        info!("Planner resolved named skill @{}", entry.name);
        Some(Plan {
            skill_name: entry.name,
            params,
        })
    }

    /// Best-scoring index entry for a goal by keyword overlap; used by the
    /// `skills` chat command to surface candidates.
    pub fn find_relevant(&self, goal: &str, threshold: u32) -> Option<NamedSkill> {
        let stop_words = [
            "a", "an", "the", "how", "to", "do", "i", "can", "you", "for", "with", "on", "in",
            "and", "or",
        ];
        let goal_lower = goal.to_lowercase();
        let keywords: Vec<&str> = goal_lower
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|word| !word.is_empty() && !stop_words.contains(word))
            .collect();

        let mut best: Option<(u32, NamedSkill)> = None;
        for skill in self.load_index() {
            let name = skill.name.to_lowercase();
            let description = skill.description.to_lowercase();
            let mut score = 0;
            for keyword in &keywords {
                if name.contains(keyword) {
                    score += 3;
                }
                if description.contains(keyword) {
                    score += 1;
                }
            }
            if best.as_ref().map(|(s, _)| score > *s).unwrap_or(true) {
                best = Some((score, skill));
            }
        }

        best.filter(|(score, _)| *score >= threshold)
            .map(|(_, skill)| skill)
    }

    pub fn load_index(&self) -> Vec<NamedSkill> {
        let index_path = self.skills_dir.join("skills_index.json");
        match std::fs::read_to_string(&index_path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(index) => index,
                Err(err) => {
                    warn!("Failed to parse {}: {}", index_path.display(), err);
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        }
    }

    async fn plan_with_model(&self, router: &Router, goal: &str) -> Option<Plan> {
        let prompt = format!("Goal: \"{}\"", goal);
        let raw = router
            .ask(
                &prompt,
                Tier::Low,
                AskOptions {
                    system: Some(PLANNER_SYSTEM.to_string()),
                    temperature: Some(0.1),
                    max_tokens: Some(256),
                    ..AskOptions::default()
                },
            )
            .await;

        let parsed: Value =
            serde_json::from_str(hexclaw_inference::wrappers::strip_fences(&raw)).ok()?;
        let skill_name = parsed.get("skill")?.as_str()?.to_string();
        if skill_name.is_empty() {
            return None;
        }
        let mut params: BTreeMap<String, Value> = parsed
            .get("params")
            .and_then(Value::as_object)
            .map(|map| map.clone().into_iter().collect())
            .unwrap_or_default();
        params
            .entry("target".to_string())
            .or_insert_with(|| json!(extract_target(goal)));

        debug!("Planner model selected skill {}", skill_name);
        Some(Plan { skill_name, params })
    }

    fn plan_with_rules(&self, goal: &str) -> Plan {
        let goal_lower = goal.to_lowercase();
        let target = extract_target(goal);

        let mut params = BTreeMap::new();
        params.insert("target".to_string(), json!(target));

        let skill_name = if contains_any(&goal_lower, &["scan", "recon", "vuln", "nuclei", "domain"])
        {
            "recon_osint"
        } else if contains_any(&goal_lower, &["git", "clone", "deploy", "lint", "test"]) {
            "dev_ops"
        } else if contains_any(&goal_lower, &["code", "script", "app", "build"]) {
            "autonomous_coder"
        } else if contains_any(&goal_lower, &["breach", "social", "darkweb", "email"]) {
            "osint_mapping"
        } else {
            params.insert("goal".to_string(), json!(goal));
            "agent_plan"
        };

        Plan {
            skill_name: skill_name.to_string(),
            params,
        }
    }
}

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|kw| text.contains(kw))
}

/// First domain-shaped token in the goal, or "unknown".
pub fn extract_target(goal: &str) -> String {
    domain_regex()
        .find(&goal.to_lowercase())
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planner() -> Planner {
        Planner::new(PathBuf::from("/nonexistent"), None, false)
    }

    #[tokio::test]
    async fn test_recon_keywords() {
        let plan = planner().plan_goal("scan example.com for vulns").await;
        assert_eq!(plan.skill_name, "recon_osint");
        assert_eq!(plan.params.get("target"), Some(&json!("example.com")));
    }

    #[tokio::test]
    async fn test_devops_keywords() {
        let plan = planner().plan_goal("clone and test the repo").await;
        assert_eq!(plan.skill_name, "dev_ops");
    }

    #[tokio::test]
    async fn test_osint_keywords() {
        let plan = planner().plan_goal("check breach data for acme.io").await;
        assert_eq!(plan.skill_name, "osint_mapping");
        assert_eq!(plan.params.get("target"), Some(&json!("acme.io")));
    }

    #[tokio::test]
    async fn test_default_plan_is_total() {
        for goal in ["do something clever", "x", "???"] {
            let plan = planner().plan_goal(goal).await;
            assert!(!plan.skill_name.is_empty());
        }
    }

    #[tokio::test]
    async fn test_no_domain_yields_unknown_target() {
        let plan = planner().plan_goal("recon the usual place").await;
        assert_eq!(plan.params.get("target"), Some(&json!("unknown")));
    }

    #[tokio::test]
    async fn test_named_skill_lookup() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("skills_index.json"),
            r#"[{"name": "web_audit", "description": "Deep web audit", "path": "web_audit.yaml"}]"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("web_audit.yaml"),
            "name: web_audit\nsteps: []\n",
        )
        .unwrap();

        let planner = Planner::new(dir.path().to_path_buf(), None, false);
        let plan = planner.plan_goal("run @web_audit on example.com").await;
        assert_eq!(plan.skill_name, "web_audit");
        assert_eq!(plan.params.get("target"), Some(&json!("example.com")));
        assert!(plan
            .params
            .get("skill_content")
            .and_then(Value::as_str)
            .unwrap()
            .contains("web_audit"));
    }

    #[tokio::test]
    async fn test_unknown_named_skill_falls_through() {
        let plan = planner().plan_goal("run @no_such_skill scan on a.com").await;
        // Index lookup missed; keyword rules still produce a plan
        assert_eq!(plan.skill_name, "recon_osint");
    }

    #[test]
    fn test_find_relevant_scoring() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("skills_index.json"),
            r#"[
                {"name": "web_audit", "description": "audit web applications"},
                {"name": "smb_sweep", "description": "enumerate smb shares"}
            ]"#,
        )
        .unwrap();
        let planner = Planner::new(dir.path().to_path_buf(), None, false);

        let hit = planner.find_relevant("audit the web app", 2).unwrap();
        assert_eq!(hit.name, "web_audit");
        assert!(planner.find_relevant("bake a cake", 2).is_none());
    }
}
