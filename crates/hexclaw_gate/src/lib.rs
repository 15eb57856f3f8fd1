//! Human-in-the-loop approval rendezvous.
//!
//! A producer (a workflow step) registers an approval id and blocks on the
//! returned ticket; the operator transport's callback handler resolves it
//! when a button is pressed. Exactly one outcome is ever written per id:
//! the pending entry is removed on resolution, timeout, cancellation, and
//! every other exit path, so late presses are no-ops.
//!
//! The per-job cancellation registry lives here too: cancelling a job sets
//! an idempotent flag checked at step boundaries and short-circuits any
//! approval gate that job is currently blocked on.

use hexclaw_protocol::ApprovalOutcome;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

struct PendingApproval {
    job_id: Option<String>,
    tx: oneshot::Sender<ApprovalOutcome>,
}

#[derive(Default)]
struct GateInner {
    pending: Mutex<HashMap<String, PendingApproval>>,
    cancelled: Mutex<HashSet<String>>,
}

/// Process-wide approval table + cancellation registry. Clone is cheap.
#[derive(Clone, Default)]
pub struct ApprovalGate {
    inner: Arc<GateInner>,
}

/// What `handle_callback` did with an operator button press.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackResult {
    pub approval_id: String,
    pub outcome: ApprovalOutcome,
    /// False when the press arrived after the gate was already gone.
    pub resolved: bool,
}

/// A registered approval a producer can block on. Dropping the ticket
/// releases the pending entry whichever way the wait ended.
pub struct ApprovalTicket {
    id: String,
    rx: oneshot::Receiver<ApprovalOutcome>,
    inner: Arc<GateInner>,
}

impl ApprovalTicket {
    /// Block until the operator resolves the gate or the deadline passes.
    pub async fn wait(mut self, timeout: Duration) -> ApprovalOutcome {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(outcome)) => outcome,
            // Sender dropped without a write: shutdown drain
            Ok(Err(_)) => ApprovalOutcome::Cancel,
            Err(_) => {
                warn!("Approval gate {} timed out after {:?}", self.id, timeout);
                ApprovalOutcome::Timeout
            }
        }
    }
}

impl Drop for ApprovalTicket {
    fn drop(&mut self) {
        self.inner.pending.lock().unwrap().remove(&self.id);
    }
}

impl ApprovalGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resolver under `id`. At most one resolver exists per id:
    /// a duplicate registration replaces the old one, which observes
    /// `Cancel`.
    pub fn register(&self, id: &str, job_id: Option<&str>) -> ApprovalTicket {
        let (tx, rx) = oneshot::channel();
        let entry = PendingApproval {
            job_id: job_id.map(str::to_string),
            tx,
        };
        let previous = self
            .inner
            .pending
            .lock()
            .unwrap()
            .insert(id.to_string(), entry);
        if previous.is_some() {
            warn!("Approval id {} re-registered; dropping earlier resolver", id);
        }
        ApprovalTicket {
            id: id.to_string(),
            rx,
            inner: Arc::clone(&self.inner),
        }
    }

    /// Write `outcome` to the resolver registered under `id`.
    /// Returns false (and does nothing) when no such gate is pending -
    /// late presses after timeout land here.
    pub fn resolve(&self, id: &str, outcome: ApprovalOutcome) -> bool {
        let entry = self.inner.pending.lock().unwrap().remove(id);
        match entry {
            Some(pending) => pending.tx.send(outcome).is_ok(),
            None => {
                debug!("Ignoring resolution for unknown approval id {}", id);
                false
            }
        }
    }

    /// Parse an operator callback payload (`action:id[:choice]`) and
    /// resolve the matching gate. Unknown payloads return None.
    pub fn handle_callback(&self, payload: &str) -> Option<CallbackResult> {
        let mut parts = payload.splitn(3, ':');
        let action = parts.next()?;
        let approval_id = parts.next()?.to_string();

        let outcome = match action {
            "approve" => ApprovalOutcome::Approve,
            "deny" => ApprovalOutcome::Deny,
            "choice" => ApprovalOutcome::Choice(parts.next()?.to_string()),
            _ => {
                warn!("Unknown callback payload: {}", payload);
                return None;
            }
        };

        let resolved = self.resolve(&approval_id, outcome.clone());
        Some(CallbackResult {
            approval_id,
            outcome,
            resolved,
        })
    }

    /// Flag `job_id` for cancellation and short-circuit any approval gate
    /// it is currently blocked on. Idempotent.
    pub fn request_cancel(&self, job_id: &str) {
        self.inner
            .cancelled
            .lock()
            .unwrap()
            .insert(job_id.to_string());

        let ids: Vec<String> = {
            let pending = self.inner.pending.lock().unwrap();
            pending
                .iter()
                .filter(|(_, entry)| entry.job_id.as_deref() == Some(job_id))
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in ids {
            self.resolve(&id, ApprovalOutcome::Cancel);
        }
    }

    /// Check whether `job_id` is flagged, without clearing the flag.
    pub fn is_cancelled(&self, job_id: &str) -> bool {
        self.inner.cancelled.lock().unwrap().contains(job_id)
    }

    /// Check-and-clear the cancellation flag for `job_id`.
    pub fn take_cancel(&self, job_id: &str) -> bool {
        self.inner.cancelled.lock().unwrap().remove(job_id)
    }

    /// Resolve every pending gate with `Cancel`. Called on shutdown so no
    /// resolver leaks across lifetimes.
    pub fn drain(&self) {
        let entries: Vec<PendingApproval> = {
            let mut pending = self.inner.pending.lock().unwrap();
            pending.drain().map(|(_, entry)| entry).collect()
        };
        for entry in entries {
            let _ = entry.tx.send(ApprovalOutcome::Cancel);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_approve_resolves_waiter() {
        let gate = ApprovalGate::new();
        let ticket = gate.register("ap1", None);

        let resolver = gate.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            resolver.handle_callback("approve:ap1");
        });

        let outcome = ticket.wait(Duration::from_secs(5)).await;
        assert_eq!(outcome, ApprovalOutcome::Approve);
        assert_eq!(gate.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_choice_payload() {
        let gate = ApprovalGate::new();
        let ticket = gate.register("ap2", None);

        let result = gate.handle_callback("choice:ap2:ssh_audit").unwrap();
        assert!(result.resolved);
        assert_eq!(result.outcome, ApprovalOutcome::Choice("ssh_audit".to_string()));

        let outcome = ticket.wait(Duration::from_secs(1)).await;
        assert_eq!(outcome, ApprovalOutcome::Choice("ssh_audit".to_string()));
    }

    #[tokio::test]
    async fn test_timeout_then_late_press_is_noop() {
        let gate = ApprovalGate::new();
        let ticket = gate.register("ap3", None);

        let outcome = ticket.wait(Duration::from_millis(50)).await;
        assert_eq!(outcome, ApprovalOutcome::Timeout);
        assert_eq!(gate.pending_count(), 0);

        let late = gate.handle_callback("approve:ap3").unwrap();
        assert!(!late.resolved);
    }

    #[tokio::test]
    async fn test_at_most_one_resolution() {
        let gate = ApprovalGate::new();
        let ticket = gate.register("ap4", None);

        assert!(gate.resolve("ap4", ApprovalOutcome::Approve));
        assert!(!gate.resolve("ap4", ApprovalOutcome::Deny));
        assert!(!gate.resolve("ap4", ApprovalOutcome::Deny));

        let outcome = ticket.wait(Duration::from_secs(1)).await;
        assert_eq!(outcome, ApprovalOutcome::Approve);
    }

    #[tokio::test]
    async fn test_cancel_short_circuits_job_gates() {
        let gate = ApprovalGate::new();
        let ticket = gate.register("suggest_j1", Some("j1"));
        let unrelated = gate.register("suggest_j2", Some("j2"));

        gate.request_cancel("j1");

        let outcome = ticket.wait(Duration::from_millis(100)).await;
        assert_eq!(outcome, ApprovalOutcome::Cancel);
        assert!(gate.is_cancelled("j1"));
        assert!(gate.take_cancel("j1"));
        assert!(!gate.is_cancelled("j1"));

        // Unrelated job is untouched
        assert_eq!(gate.pending_count(), 1);
        drop(unrelated);
        assert_eq!(gate.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_drain_resolves_everything_with_cancel() {
        let gate = ApprovalGate::new();
        let t1 = gate.register("a", None);
        let t2 = gate.register("b", None);

        gate.drain();

        assert_eq!(t1.wait(Duration::from_millis(100)).await, ApprovalOutcome::Cancel);
        assert_eq!(t2.wait(Duration::from_millis(100)).await, ApprovalOutcome::Cancel);
        assert_eq!(gate.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_payload() {
        let gate = ApprovalGate::new();
        assert!(gate.handle_callback("garbage").is_none());
        assert!(gate.handle_callback("explode:x").is_none());
        assert!(gate.handle_callback("choice:onlyid").is_none());
    }
}
