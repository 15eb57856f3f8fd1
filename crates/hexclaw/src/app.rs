//! Application wiring: one place that builds every collaborator and ties
//! their lifetimes to the daemon's start/stop.

use crate::chat::commands::CommandHandler;
use crate::chat::telegram::{TelegramBot, TelegramTransport};
use crate::chat::Notifier;
use crate::daemon::Daemon;
use crate::dispatcher::{ensure_default_skills, Dispatcher};
use crate::planner::Planner;
use crate::shutdown::Shutdown;
use crate::tools::{DryRunToolClient, HttpToolClient, ToolClient};
use anyhow::{bail, Context, Result};
use hexclaw_artifacts::ArtifactStore;
use hexclaw_cache::{open_kv, Cache, CacheConfig, NgramEmbedder};
use hexclaw_db::HexClawDb;
use hexclaw_gate::ApprovalGate;
use hexclaw_inference::Router;
use hexclaw_monitor::{DedupeStore, Monitor};
use hexclaw_protocol::{ChatTransport, HexClawConfig, NullTransport};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct App {
    pub config: HexClawConfig,
    pub db: HexClawDb,
    pub cache: Arc<Cache>,
    pub router: Arc<Router>,
    pub artifacts: Arc<ArtifactStore>,
    pub gate: ApprovalGate,
    pub planner: Arc<Planner>,
    pub transport: Arc<dyn ChatTransport>,
    pub notifier: Notifier,
    pub shutdown: Shutdown,
}

impl App {
    /// Build every collaborator from the configuration.
    pub async fn build(config: HexClawConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.home)
            .with_context(|| format!("Failed to create {}", config.home.display()))?;
        std::fs::create_dir_all(config.data_dir()).context("Failed to create data dir")?;
        ensure_default_skills(&config.skills_dir()).context("Failed to seed skills dir")?;

        let db = HexClawDb::open(&config.db_path())
            .await
            .context("Failed to open state store")?;

        let cache = Arc::new(Cache::new(
            CacheConfig {
                exact_ttl: Duration::from_secs(config.cache_exact_ttl_sec),
                semantic_ttl: Duration::from_secs(config.cache_semantic_ttl_sec),
                semantic_threshold: config.cache_semantic_threshold,
                semantic_max_entries: config.cache_semantic_max_entries,
            },
            open_kv(config.redis_url.as_deref()).await,
            Box::new(NgramEmbedder::default()),
        ));

        let router = Arc::new(Router::from_config(&config, Arc::clone(&cache), db.clone()));
        let artifacts = Arc::new(ArtifactStore::new(config.data_dir()));
        let gate = ApprovalGate::new();
        let planner = Arc::new(Planner::new(
            config.skills_dir(),
            Some(Arc::clone(&router)),
            config.planner_use_model,
        ));

        let transport: Arc<dyn ChatTransport> = match (&config.telegram_bot_token, config.telegram_chat_id) {
            (Some(token), Some(chat_id)) => Arc::new(TelegramTransport::new(token, chat_id)),
            _ => {
                warn!("Telegram not configured - notifications go to the log");
                Arc::new(NullTransport)
            }
        };
        let notifier = Notifier::new(Arc::clone(&transport));

        Ok(Self {
            config,
            db,
            cache,
            router,
            artifacts,
            gate,
            planner,
            transport,
            notifier,
            shutdown: Shutdown::new(),
        })
    }

    /// The long-running daemon: workers + bot + monitor + signal handling.
    pub async fn run_daemon(
        &self,
        once: bool,
        dry_run: bool,
        enqueue: Option<&str>,
    ) -> Result<()> {
        if let Some(spec) = enqueue {
            let Some((skill, target)) = spec.split_once(':') else {
                bail!("--enqueue format is SKILL:TARGET, e.g. recon_osint:example.com");
            };
            let mut params = BTreeMap::new();
            params.insert("target".to_string(), json!(target));
            let job_id = self.db.enqueue(skill, &params).await?;
            info!("Pre-seeded queue: job {} ({} on {})", job_id, skill, target);
        }

        let tools: Arc<dyn ToolClient> = if dry_run {
            Arc::new(DryRunToolClient)
        } else {
            Arc::new(HttpToolClient::new(
                &self.config.tool_server_url,
                Duration::from_secs(self.config.tool_timeout_sec),
            ))
        };

        let dispatcher = Arc::new(Dispatcher::new(
            self.db.clone(),
            Arc::clone(&self.artifacts),
            self.gate.clone(),
            self.notifier.clone(),
            tools,
            Arc::clone(&self.planner),
            self.config.skills_dir(),
            self.config.chain_on_choice,
        ));

        self.spawn_signal_listener();
        self.spawn_bot();
        let monitor = self.spawn_monitor().await;

        let daemon = Daemon::new(
            self.db.clone(),
            dispatcher,
            self.gate.clone(),
            self.notifier.clone(),
            self.shutdown.clone(),
            Duration::from_secs(self.config.heartbeat_sec),
            self.config.max_concurrent,
            once,
        );
        let result = daemon.run().await;

        self.shutdown.trigger();
        if let Some(monitor) = monitor {
            monitor.stop();
        }
        result
    }

    fn spawn_signal_listener(&self) {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            wait_for_terminate_signal().await;
            info!("Terminate signal received - shutting down");
            shutdown.trigger();
        });
    }

    fn spawn_bot(&self) {
        let (Some(token), Some(chat_id)) =
            (&self.config.telegram_bot_token, self.config.telegram_chat_id)
        else {
            return;
        };

        let transport = TelegramTransport::new(token, chat_id);
        let handler = CommandHandler {
            db: self.db.clone(),
            gate: self.gate.clone(),
            planner: Arc::clone(&self.planner),
            artifacts: Arc::clone(&self.artifacts),
            cache: Arc::clone(&self.cache),
            router: Arc::clone(&self.router),
            notifier: self.notifier.clone(),
        };
        let bot = TelegramBot::new(transport, self.gate.clone(), handler, chat_id);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            bot.run(shutdown).await;
        });
    }

    async fn spawn_monitor(&self) -> Option<Arc<Monitor>> {
        if self.config.rss_feeds.is_empty() {
            return None;
        }

        let dedupe_kv = match &self.config.redis_url {
            Some(url) => Some(open_kv(Some(url)).await),
            None => None,
        };
        let monitor = Arc::new(
            Monitor::new(
                Arc::clone(&self.transport),
                Some(Arc::clone(&self.router)),
                Some(self.db.clone()),
                self.config.rss_feeds.clone(),
                Duration::from_secs(self.config.monitor_interval_sec),
                self.config.alert_min_severity,
                DedupeStore::new(dedupe_kv),
            )
            .with_host_intel(self.config.shodan_api_key.clone()),
        );

        let runner = Arc::clone(&monitor);
        let stopper = Arc::clone(&monitor);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = runner.run() => {}
                _ = shutdown.wait() => stopper.stop(),
            }
        });
        Some(monitor)
    }
}

async fn wait_for_terminate_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
