//! Daemon core: heartbeat loop, bounded worker pool, graceful shutdown.
//!
//! Every heartbeat the pending queue is drained: one worker task per job,
//! each gated by the concurrency semaphore. Per-job ordering is the
//! dispatcher's (steps are strictly serial); across jobs only "dispatch no
//! later than one heartbeat after enqueue" holds.
//!
//! Before the first drain the crash-resume sweep runs: jobs a previous
//! lifetime left `running` go back to `pending`.

use crate::chat::Notifier;
use crate::dispatcher::Dispatcher;
use crate::shutdown::Shutdown;
use anyhow::Result;
use hexclaw_db::HexClawDb;
use hexclaw_gate::ApprovalGate;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{error, info};

/// Workers get this long to finish their current step on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub struct Daemon {
    db: HexClawDb,
    dispatcher: Arc<Dispatcher>,
    gate: ApprovalGate,
    notifier: Notifier,
    shutdown: Shutdown,
    heartbeat: Duration,
    semaphore: Arc<Semaphore>,
    once: bool,
    /// Jobs spawned but not yet finished; guards against re-dispatching a
    /// still-pending job that is waiting on the semaphore.
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl Daemon {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: HexClawDb,
        dispatcher: Arc<Dispatcher>,
        gate: ApprovalGate,
        notifier: Notifier,
        shutdown: Shutdown,
        heartbeat: Duration,
        max_concurrent: usize,
        once: bool,
    ) -> Self {
        Self {
            db,
            dispatcher,
            gate,
            notifier,
            shutdown,
            heartbeat,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            once,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Main loop: crash-resume sweep, then drain -> sleep -> repeat.
    pub async fn run(&self) -> Result<()> {
        let recovered = self.db.recover_running().await?;
        if recovered > 0 {
            info!("Crash resume: {} job(s) returned to pending", recovered);
        }

        self.notifier
            .send("*HexClaw daemon online.* Use `recon <target>` to start scanning.")
            .await;

        loop {
            self.drain_pending().await?;

            if self.once {
                self.wait_for_workers().await;
                // suggest_next follow-ups may have landed meanwhile
                if self.db.pending().await?.is_empty() {
                    info!("--once: queue drained, exiting");
                    break;
                }
                continue;
            }

            tokio::select! {
                _ = self.shutdown.wait() => break,
                _ = tokio::time::sleep(self.heartbeat) => {}
            }
        }

        self.stop().await;
        Ok(())
    }

    /// Spawn one worker per pending job not already in flight.
    async fn drain_pending(&self) -> Result<()> {
        for job in self.db.pending().await? {
            let key = job.id.to_string();
            {
                let mut in_flight = self.in_flight.lock().unwrap();
                if !in_flight.insert(key.clone()) {
                    continue;
                }
            }

            let dispatcher = Arc::clone(&self.dispatcher);
            let semaphore = Arc::clone(&self.semaphore);
            let in_flight = Arc::clone(&self.in_flight);
            tokio::spawn(async move {
                // The semaphore is never closed; a worker that cannot
                // acquire simply exits and the job stays pending.
                if let Ok(_permit) = semaphore.acquire_owned().await {
                    dispatcher.run_job(job).await;
                } else {
                    error!("Worker semaphore closed; job {} stays pending", key);
                }
                in_flight.lock().unwrap().remove(&key);
            });
        }
        Ok(())
    }

    fn in_flight_count(&self) -> usize {
        self.in_flight.lock().unwrap().len()
    }

    async fn wait_for_workers(&self) {
        while self.in_flight_count() > 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    async fn stop(&self) {
        info!("Shutting down daemon...");
        self.shutdown.trigger();

        // No resolver leaks across shutdown: blocked gates observe Cancel
        self.gate.drain();

        // Let in-flight workers finish their current step
        let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
        while self.in_flight_count() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        if self.in_flight_count() > 0 {
            error!(
                "{} worker(s) still running at shutdown; queue is preserved",
                self.in_flight_count()
            );
        }

        self.notifier.send("*HexClaw daemon offline.*").await;
        info!("HexClaw daemon stopped.");
    }
}
