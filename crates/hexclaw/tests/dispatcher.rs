//! End-to-end dispatcher scenarios against a scripted tool server and a
//! recording chat transport.

use async_trait::async_trait;
use hexclaw::chat::Notifier;
use hexclaw::dispatcher::Dispatcher;
use hexclaw::planner::Planner;
use hexclaw::tools::{ToolClient, ToolError};
use hexclaw_artifacts::{suggest_next, ArtifactStore};
use hexclaw_db::HexClawDb;
use hexclaw_gate::ApprovalGate;
use hexclaw_protocol::{Button, ChatTransport, Job, JobStatus, Severity};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Test doubles
// ============================================================================

/// Tool server with canned per-tool responses.
struct ScriptedToolClient {
    responses: HashMap<String, Result<Value, u16>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedToolClient {
    fn new(responses: Vec<(&str, Result<Value, u16>)>) -> Arc<Self> {
        Arc::new(Self {
            responses: responses
                .into_iter()
                .map(|(tool, response)| (tool.to_string(), response))
                .collect(),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn call_count(&self, tool: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.as_str() == tool)
            .count()
    }
}

#[async_trait]
impl ToolClient for ScriptedToolClient {
    async fn call(&self, tool: &str, _endpoint: &str, _payload: &Value) -> Result<Value, ToolError> {
        self.calls.lock().unwrap().push(tool.to_string());
        match self.responses.get(tool) {
            Some(Ok(value)) => Ok(value.clone()),
            Some(Err(status)) => Err(ToolError::Http {
                status: *status,
                body: "boom".to_string(),
            }),
            None => Ok(json!({"success": true})),
        }
    }
}

/// Tool client that sleeps, for observing the worker concurrency bound.
struct SlowToolClient {
    current: AtomicUsize,
    max_seen: AtomicUsize,
}

#[async_trait]
impl ToolClient for SlowToolClient {
    async fn call(&self, _tool: &str, _endpoint: &str, _payload: &Value) -> Result<Value, ToolError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(150)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(json!({"success": true, "open_ports": [80]}))
    }
}

#[derive(Default)]
struct RecordingTransport {
    texts: Mutex<Vec<String>>,
    prompts: Mutex<Vec<(String, Vec<Button>)>>,
}

impl RecordingTransport {
    fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }

    fn count_containing(&self, needle: &str) -> usize {
        self.texts()
            .iter()
            .filter(|text| text.contains(needle))
            .count()
    }

    async fn wait_for_prompt(&self) -> (String, Vec<Button>) {
        for _ in 0..200 {
            if let Some(prompt) = self.prompts.lock().unwrap().first().cloned() {
                return prompt;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no approval prompt arrived");
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send_text(&self, text: &str) {
        self.texts.lock().unwrap().push(text.to_string());
    }

    async fn send_file(&self, _path: &Path, _caption: Option<&str>) {}

    async fn send_with_buttons(&self, prompt: &str, buttons: &[Button]) {
        self.prompts
            .lock()
            .unwrap()
            .push((prompt.to_string(), buttons.to_vec()));
    }
}

// ============================================================================
// Fixture
// ============================================================================

struct Fixture {
    db: HexClawDb,
    store: Arc<ArtifactStore>,
    gate: ApprovalGate,
    transport: Arc<RecordingTransport>,
    dispatcher: Arc<Dispatcher>,
    _dir: tempfile::TempDir,
}

const RECON_SKILL: &str = r#"
name: recon_osint
steps:
  - tool: amass
    output: subs
  - tool: rustscan
    output: ports
  - tool: nuclei
    output: vulns
"#;

const APPROVAL_SKILL_5S: &str = r#"
name: approval_chain
steps:
  - tool: rustscan
    output: ports
  - tool: suggest_next
    action: suggest_next
    timeout_sec: 5
"#;

const APPROVAL_SKILL_2S: &str = r#"
name: approval_quick
steps:
  - tool: rustscan
    output: ports
  - tool: suggest_next
    action: suggest_next
    timeout_sec: 2
"#;

async fn fixture(tools: Arc<dyn ToolClient>) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let skills_dir = dir.path().join("skills");
    std::fs::create_dir_all(&skills_dir).unwrap();
    std::fs::write(skills_dir.join("recon_osint.yaml"), RECON_SKILL).unwrap();
    std::fs::write(skills_dir.join("approval_chain.yaml"), APPROVAL_SKILL_5S).unwrap();
    std::fs::write(skills_dir.join("approval_quick.yaml"), APPROVAL_SKILL_2S).unwrap();

    let db = HexClawDb::open_memory().await.unwrap();
    let store = Arc::new(ArtifactStore::new(dir.path().join("data")));
    let gate = ApprovalGate::new();
    let transport = Arc::new(RecordingTransport::default());
    let notifier = Notifier::new(transport.clone());
    let planner = Arc::new(Planner::new(skills_dir.clone(), None, false));

    let dispatcher = Arc::new(Dispatcher::new(
        db.clone(),
        Arc::clone(&store),
        gate.clone(),
        notifier,
        tools,
        planner,
        skills_dir,
        true,
    ));

    Fixture {
        db,
        store,
        gate,
        transport,
        dispatcher,
        _dir: dir,
    }
}

async fn enqueue(fx: &Fixture, skill: &str, target: &str) -> Job {
    let mut params = BTreeMap::new();
    params.insert("target".to_string(), json!(target));
    let id = fx.db.enqueue(skill, &params).await.unwrap();
    fx.db.get_job(&id).await.unwrap().unwrap()
}

fn recon_responses() -> Vec<(&'static str, Result<Value, u16>)> {
    vec![
        (
            "amass",
            Ok(json!({"success": true, "subdomains": ["a.example.com", "b.example.com"]})),
        ),
        (
            "rustscan",
            Ok(json!({"success": true, "open_ports": [22, 80, 443]})),
        ),
        (
            "nuclei",
            Ok(json!({"success": true, "vulnerabilities": [{"severity": "high", "template": "T1"}]})),
        ),
    ]
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn recon_chain_produces_artifacts_and_report() {
    let tools = ScriptedToolClient::new(recon_responses());
    let fx = fixture(tools.clone()).await;
    let job = enqueue(&fx, "recon_osint", "example.com").await;
    let job_id = job.id.clone();

    fx.dispatcher.run_job(job).await;

    let done = fx.db.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Done);
    assert!(done.started_at.is_some() && done.finished_at.is_some());

    // Artifacts with the expected row counts
    for (artifact, rows) in [("subs", 2), ("ports", 3), ("vulns", 1)] {
        let path = fx.store.artifact_path(job_id.as_str(), artifact);
        assert!(path.exists(), "{} missing", artifact);
        assert_eq!(fx.store.query(&path, None).unwrap().len(), rows);
    }

    let aggregate = fx.store.aggregate(job_id.as_str()).unwrap();
    assert_eq!(aggregate.total_vulns, 1);
    assert_eq!(aggregate.severity_counts.get(&Severity::High), Some(&1));

    // Heuristic sees both the web ports and the high finding
    let suggestions = suggest_next(&aggregate);
    assert!(suggestions
        .iter()
        .any(|s| s.action == "nuclei --severity critical,high"));
    assert!(suggestions.iter().any(|s| s.action == "gobuster dir"));

    // Report lists the finding under HIGH, and exactly one report went out
    assert_eq!(fx.transport.count_containing("HexClaw Report"), 1);
    assert_eq!(fx.transport.count_containing("[HIGH] T1"), 1);
}

#[tokio::test]
async fn soft_failure_mid_chain_continues() {
    let mut responses = recon_responses();
    responses[1] = ("rustscan", Err(500));
    let tools = ScriptedToolClient::new(responses);
    let fx = fixture(tools.clone()).await;
    let job = enqueue(&fx, "recon_osint", "example.com").await;
    let job_id = job.id.clone();

    fx.dispatcher.run_job(job).await;

    // The chain completed despite the 500
    let done = fx.db.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Done);

    // ports artifact absent, the rest present
    assert!(!fx.store.artifact_path(job_id.as_str(), "ports").exists());
    assert!(fx.store.artifact_path(job_id.as_str(), "subs").exists());
    assert!(fx.store.artifact_path(job_id.as_str(), "vulns").exists());

    // Aggregate still works on what exists
    let aggregate = fx.store.aggregate(job_id.as_str()).unwrap();
    assert_eq!(aggregate.subdomains_found, 2);
    assert_eq!(aggregate.total_vulns, 1);
    assert!(!suggest_next(&aggregate).is_empty());

    // Exactly one warning, no retry storm
    assert_eq!(fx.transport.count_containing("failed"), 1);
    assert_eq!(tools.call_count("rustscan"), 1);
}

#[tokio::test]
async fn approval_choice_chains_a_follow_up() {
    let tools = ScriptedToolClient::new(recon_responses());
    let fx = fixture(tools).await;
    let job = enqueue(&fx, "approval_chain", "example.com").await;
    let job_id = job.id.clone();

    let transport = fx.transport.clone();
    let gate = fx.gate.clone();
    let presser = tokio::spawn(async move {
        let (_prompt, buttons) = transport.wait_for_prompt().await;
        let ssh = buttons
            .iter()
            .find(|b| b.label.contains("ssh_audit"))
            .expect("ssh_audit offered");
        let result = gate.handle_callback(&ssh.payload).unwrap();
        assert!(result.resolved);
    });

    fx.dispatcher.run_job(job).await;
    presser.await.unwrap();

    let done = fx.db.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Done);

    // The chosen action was recorded and a follow-up was enqueued
    assert_eq!(fx.transport.count_containing("Queued follow-up"), 1);
    let pending = fx.db.pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].target, "example.com");
}

#[tokio::test]
async fn approval_timeout_completes_job_and_ignores_late_press() {
    let tools = ScriptedToolClient::new(recon_responses());
    let fx = fixture(tools).await;
    let job = enqueue(&fx, "approval_quick", "example.com").await;
    let job_id = job.id.clone();

    let started = std::time::Instant::now();
    fx.dispatcher.run_job(job).await;
    assert!(started.elapsed() >= Duration::from_secs(2));

    let done = fx.db.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Done);
    assert_eq!(fx.transport.count_containing("no operator response"), 1);

    // A press after the timeout is a no-op
    let late = fx
        .gate
        .handle_callback(&format!("choice:suggest_{}:ssh_audit", job_id))
        .unwrap();
    assert!(!late.resolved);
    assert_eq!(fx.db.pending().await.unwrap().len(), 0);
}

#[tokio::test]
async fn cancel_during_approval_wait() {
    let tools = ScriptedToolClient::new(recon_responses());
    let fx = fixture(tools).await;
    let job = enqueue(&fx, "approval_chain", "example.com").await;
    let job_id = job.id.clone();

    let transport = fx.transport.clone();
    let gate = fx.gate.clone();
    let cancel_id = job_id.to_string();
    let canceller = tokio::spawn(async move {
        transport.wait_for_prompt().await;
        gate.request_cancel(&cancel_id);
    });

    fx.dispatcher.run_job(job).await;
    canceller.await.unwrap();

    let cancelled = fx.db.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert_eq!(fx.transport.count_containing("cancelled at step"), 1);
    // No follow-up, no leaked gate
    assert_eq!(fx.db.pending().await.unwrap().len(), 0);
    assert_eq!(fx.gate.pending_count(), 0);
}

#[tokio::test]
async fn cancel_between_steps() {
    let tools = ScriptedToolClient::new(recon_responses());
    let fx = fixture(tools).await;
    let job = enqueue(&fx, "recon_osint", "example.com").await;
    let job_id = job.id.clone();

    // Flag before the first step boundary check
    fx.gate.request_cancel(job_id.as_str());
    fx.dispatcher.run_job(job).await;

    let cancelled = fx.db.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    // The flag was consumed
    assert!(!fx.gate.is_cancelled(job_id.as_str()));
}

#[tokio::test]
async fn unknown_tool_is_a_warning_not_a_failure() {
    let dir_skill = r#"
name: oddball
steps:
  - tool: quantum_scanner
    output: quantum
  - tool: nuclei
    output: vulns
"#;
    let tools = ScriptedToolClient::new(recon_responses());
    let fx = fixture(tools).await;
    std::fs::write(
        fx._dir.path().join("skills").join("oddball.yaml"),
        dir_skill,
    )
    .unwrap();

    let job = enqueue(&fx, "oddball", "example.com").await;
    let job_id = job.id.clone();
    fx.dispatcher.run_job(job).await;

    let done = fx.db.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Done);
    // The synthetic result still produced an artifact and the chain went on
    assert!(fx.store.artifact_path(job_id.as_str(), "quantum").exists());
    assert!(fx.store.artifact_path(job_id.as_str(), "vulns").exists());
    let warnings = done.result.unwrap()["warnings"].as_array().unwrap().len();
    assert_eq!(warnings, 1);
}

#[tokio::test]
async fn missing_skill_fails_terminally() {
    let tools = ScriptedToolClient::new(Vec::new());
    let fx = fixture(tools).await;
    let job = enqueue(&fx, "no_such_skill", "example.com").await;
    let job_id = job.id.clone();

    fx.dispatcher.run_job(job).await;

    let failed = fx.db.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.error.unwrap().contains("not found"));
    assert_eq!(fx.transport.count_containing("failed"), 1);
}

// ============================================================================
// Daemon-level scenarios
// ============================================================================

#[tokio::test]
async fn daemon_once_drains_queue_within_concurrency_bound() {
    use hexclaw::daemon::Daemon;
    use hexclaw::shutdown::Shutdown;

    let slow = Arc::new(SlowToolClient {
        current: AtomicUsize::new(0),
        max_seen: AtomicUsize::new(0),
    });
    let fx = fixture(slow.clone()).await;

    for i in 0..5 {
        enqueue(&fx, "recon_osint", &format!("t{}.example.com", i)).await;
    }

    let daemon = Daemon::new(
        fx.db.clone(),
        Arc::clone(&fx.dispatcher),
        fx.gate.clone(),
        Notifier::new(fx.transport.clone()),
        Shutdown::new(),
        Duration::from_secs(1),
        2,
        true,
    );
    daemon.run().await.unwrap();

    // Every job reached a terminal state
    let recent = fx.db.recent(10).await.unwrap();
    assert_eq!(recent.len(), 5);
    assert!(recent.iter().all(|j| j.status == JobStatus::Done));

    // Never more than two tool calls in flight at once
    assert!(slow.max_seen.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn daemon_recovers_running_jobs_before_dispatch() {
    use hexclaw::daemon::Daemon;
    use hexclaw::shutdown::Shutdown;

    let tools = ScriptedToolClient::new(recon_responses());
    let fx = fixture(tools).await;

    // Simulate a job killed mid-step by a previous lifetime
    let job = enqueue(&fx, "recon_osint", "example.com").await;
    fx.db
        .update_status(&job.id, JobStatus::Running, None, None)
        .await
        .unwrap();

    let daemon = Daemon::new(
        fx.db.clone(),
        Arc::clone(&fx.dispatcher),
        fx.gate.clone(),
        Notifier::new(fx.transport.clone()),
        Shutdown::new(),
        Duration::from_secs(1),
        2,
        true,
    );
    daemon.run().await.unwrap();

    let done = fx.db.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Done);
}
