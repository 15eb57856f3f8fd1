//! Thrifty model inference: provider tiering, rotation, and token logging.
//!
//! Rules enforced here:
//!   - cache before model - `ask` consults the two-tier cache first, and a
//!     hit is recorded in the ledger with zero tokens and zero cost
//!   - cheapest tier that satisfies the request - callers pick
//!     high / low / free; each tier carries its own rotation list
//!   - every call lands in the token ledger, hit or miss
//!
//! Rotation: if the preferred provider fails (rate limit, quota, network),
//! the next descriptor in the tier's list is tried, each with bounded
//! retries and exponential backoff. Total provider exhaustion returns a
//! synthesised error string rather than an error: callers are workflow
//! steps that should keep going.

pub mod provider;
pub mod wrappers;

pub use provider::{ChatProvider, ChatRequest, Completion, OpenAiChat, ProviderError};

use hexclaw_cache::Cache;
use hexclaw_db::ledger::estimate_cost;
use hexclaw_db::HexClawDb;
use hexclaw_protocol::{HexClawConfig, Tier};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Max completion tokens per request, per tier.
fn tier_max_tokens(tier: Tier) -> u32 {
    match tier {
        Tier::High => 4096,
        Tier::Low => 2048,
        Tier::Free => 1024,
    }
}

/// Retry discipline for a single provider before rotating to the next.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: usize,
    /// Exponential backoff base in seconds (wait = base^attempt).
    pub backoff_base: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: 1.5,
        }
    }
}

/// Optional knobs for [`Router::ask`].
#[derive(Debug, Clone, Default)]
pub struct AskOptions {
    pub system: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Force a live call. Use sparingly.
    pub skip_cache: bool,
}

/// Tiered provider router.
///
/// Holds no per-call state beyond the ledger and cache, both internally
/// synchronized - `ask` may be called from any number of workers at once.
pub struct Router {
    cache: Arc<Cache>,
    db: HexClawDb,
    high: Vec<Arc<dyn ChatProvider>>,
    low: Vec<Arc<dyn ChatProvider>>,
    free: Vec<Arc<dyn ChatProvider>>,
    pub retry: RetryPolicy,
}

impl Router {
    pub fn new(
        cache: Arc<Cache>,
        db: HexClawDb,
        high: Vec<Arc<dyn ChatProvider>>,
        low: Vec<Arc<dyn ChatProvider>>,
        free: Vec<Arc<dyn ChatProvider>>,
    ) -> Self {
        Self {
            cache,
            db,
            high,
            low,
            free,
            retry: RetryPolicy::default(),
        }
    }

    /// Build the router from configured descriptor rotation lists.
    pub fn from_config(config: &HexClawConfig, cache: Arc<Cache>, db: HexClawDb) -> Self {
        let build = |descriptors: &[String]| -> Vec<Arc<dyn ChatProvider>> {
            descriptors
                .iter()
                .map(|d| Arc::new(OpenAiChat::from_descriptor(d)) as Arc<dyn ChatProvider>)
                .collect()
        };
        Self::new(
            cache,
            db,
            build(&config.providers_high),
            build(&config.providers_low),
            build(&config.providers_free),
        )
    }

    fn rotation(&self, tier: Tier) -> &[Arc<dyn ChatProvider>] {
        match tier {
            Tier::High => &self.high,
            Tier::Low => &self.low,
            Tier::Free => &self.free,
        }
    }

    /// Ask the model. Returns the response text; on total provider failure
    /// returns a synthesised `[inference error: ...]` string instead of
    /// raising - the caller is a workflow step that should continue.
    pub async fn ask(&self, prompt: &str, tier: Tier, opts: AskOptions) -> String {
        let full_prompt = match &opts.system {
            Some(system) => format!("{}\n\n{}", system, prompt),
            None => prompt.to_string(),
        };

        // Tier 1/2 cache check: a hit costs zero tokens, and the ledger
        // row says so.
        if !opts.skip_cache {
            if let Some(cached) = self.cache.check(&full_prompt).await {
                self.db.ledger_record("cache", "cache", 0, 0, 0.0, true).await;
                return cached;
            }
        }

        let request = ChatRequest {
            system: opts.system.clone(),
            prompt: prompt.to_string(),
            temperature: opts.temperature.unwrap_or(0.2),
            max_tokens: opts.max_tokens.unwrap_or_else(|| tier_max_tokens(tier)),
        };

        let (provider, model, completion) = match self.ask_with_rotation(tier, &request).await {
            Ok(success) => success,
            Err(err) => {
                error!("Inference failed for tier '{}': {}", tier, err);
                return format!("[inference error: {}]", err);
            }
        };

        if !opts.skip_cache {
            self.cache.store(&full_prompt, &completion.text).await;
        }

        let cost = completion
            .cost_usd
            .unwrap_or_else(|| estimate_cost(&model, completion.tokens_in, completion.tokens_out));
        self.db
            .ledger_record(
                &provider,
                &model,
                completion.tokens_in,
                completion.tokens_out,
                cost,
                false,
            )
            .await;

        info!(
            "Inference: tier={} model={} in={} out={} cost=${:.6}",
            tier, model, completion.tokens_in, completion.tokens_out, cost
        );
        completion.text
    }

    /// Try each provider in the tier's rotation, each with bounded retries.
    async fn ask_with_rotation(
        &self,
        tier: Tier,
        request: &ChatRequest,
    ) -> Result<(String, String, Completion), ProviderError> {
        let rotation = self.rotation(tier);
        let mut last_err = ProviderError::Network(format!("tier '{}' has no providers", tier));

        for provider in rotation {
            for attempt in 0..self.retry.max_retries {
                debug!(
                    "Calling {} (tier={} attempt={})",
                    provider.model(),
                    tier,
                    attempt + 1
                );
                match provider.complete(request).await {
                    Ok(completion) => {
                        return Ok((
                            provider.provider().to_string(),
                            provider.model().to_string(),
                            completion,
                        ));
                    }
                    Err(err) => {
                        let wait = self.retry.backoff_base.powi(attempt as i32);
                        warn!(
                            "Provider {} attempt {} failed: {} - retrying in {:.1}s",
                            provider.model(),
                            attempt + 1,
                            err,
                            wait
                        );
                        last_err = err;
                        if wait > 0.0 {
                            tokio::time::sleep(Duration::from_secs_f64(wait)).await;
                        }
                    }
                }
            }
            warn!(
                "Provider {} exhausted retries - trying next provider",
                provider.model()
            );
        }

        Err(last_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hexclaw_cache::{Cache, CacheConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedProvider {
        reply: String,
        calls: AtomicUsize,
        fail_first: usize,
    }

    impl FixedProvider {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                calls: AtomicUsize::new(0),
                fail_first: 0,
            })
        }

        fn failing(fail_first: usize, reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                calls: AtomicUsize::new(0),
                fail_first,
            })
        }
    }

    #[async_trait]
    impl ChatProvider for FixedProvider {
        fn provider(&self) -> &str {
            "mock"
        }

        fn model(&self) -> &str {
            "mock/fixed"
        }

        async fn complete(&self, _request: &ChatRequest) -> Result<Completion, ProviderError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err(ProviderError::RateLimit("slow down".to_string()));
            }
            Ok(Completion {
                text: self.reply.clone(),
                tokens_in: 10,
                tokens_out: 4,
                cost_usd: Some(0.0001),
            })
        }
    }

    async fn test_router(providers: Vec<Arc<FixedProvider>>) -> (Router, HexClawDb) {
        let rotation: Vec<Arc<dyn ChatProvider>> = providers
            .into_iter()
            .map(|p| p as Arc<dyn ChatProvider>)
            .collect();
        let db = HexClawDb::open_memory().await.unwrap();
        let cache = Arc::new(Cache::in_process(CacheConfig::default()));
        let mut router = Router::new(
            cache,
            db.clone(),
            rotation.clone(),
            rotation.clone(),
            rotation,
        );
        router.retry.backoff_base = 0.0;
        (router, db)
    }

    #[tokio::test]
    async fn test_identical_reask_hits_cache_for_free() {
        let provider = FixedProvider::new("4");
        let (router, db) = test_router(vec![provider.clone()]).await;

        let first = router.ask("What is 2+2?", Tier::Low, AskOptions::default()).await;
        let second = router.ask("What is 2+2?", Tier::Low, AskOptions::default()).await;
        assert_eq!(first, second);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        let rows = db.ledger_rows().await.unwrap();
        assert_eq!(rows.len(), 2);
        let (tok_in, tok_out, cost, hit) = rows[1];
        assert!(hit);
        assert_eq!((tok_in, tok_out), (0, 0));
        assert_eq!(cost, 0.0);
    }

    #[tokio::test]
    async fn test_every_cache_hit_row_is_free() {
        let provider = FixedProvider::new("ok");
        let (router, db) = test_router(vec![provider]).await;

        for prompt in ["a", "b", "a", "b", "a"] {
            router.ask(prompt, Tier::Free, AskOptions::default()).await;
        }

        for (tok_in, tok_out, cost, hit) in db.ledger_rows().await.unwrap() {
            if hit {
                assert_eq!((tok_in, tok_out), (0, 0));
                assert_eq!(cost, 0.0);
            }
        }
    }

    /// Embedder that maps arithmetic phrasings onto one vector, so a
    /// near-match is an exact-similarity semantic hit.
    struct ArithmeticEmbedder;

    impl hexclaw_cache::Embedder for ArithmeticEmbedder {
        fn embed(&self, text: &str) -> Option<Vec<f32>> {
            if text.contains('2') {
                Some(vec![1.0, 0.0])
            } else {
                Some(vec![0.0, 1.0])
            }
        }

        fn dimension(&self) -> usize {
            2
        }

        fn name(&self) -> &'static str {
            "arithmetic"
        }
    }

    #[tokio::test]
    async fn test_near_match_promotes_to_exact_tier() {
        let provider = FixedProvider::new("4");
        let db = HexClawDb::open_memory().await.unwrap();
        let cache = Arc::new(Cache::new(
            CacheConfig::default(),
            Box::new(hexclaw_cache::MemoryKv::new()),
            Box::new(ArithmeticEmbedder),
        ));
        let rotation: Vec<Arc<dyn ChatProvider>> = vec![provider.clone()];
        let mut router = Router::new(
            Arc::clone(&cache),
            db.clone(),
            rotation.clone(),
            rotation.clone(),
            rotation,
        );
        router.retry.backoff_base = 0.0;

        let first = router.ask("What is 2+2?", Tier::Low, AskOptions::default()).await;
        let second = router
            .ask("What is 2 plus 2?", Tier::Low, AskOptions::default())
            .await;
        assert_eq!(first, second);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        // The semantic hit was recorded as free
        let rows = db.ledger_rows().await.unwrap();
        assert!(rows[1].3);
        assert_eq!((rows[1].0, rows[1].1, rows[1].2), (0, 0, 0.0));

        // Promotion: the near-match prompt now sits in the exact tier
        assert_eq!(cache.check("What is 2 plus 2?").await.as_deref(), Some("4"));
        assert_eq!(cache.stats().hits_exact, 1);
    }

    #[tokio::test]
    async fn test_rotation_on_provider_failure() {
        let broken = FixedProvider::failing(usize::MAX, "never");
        let healthy = FixedProvider::new("fallback answer");
        let (router, _db) =
            test_router(vec![broken.clone(), healthy.clone()]).await;

        let reply = router.ask("hello", Tier::Low, AskOptions::default()).await;
        assert_eq!(reply, "fallback answer");
        assert_eq!(broken.calls.load(Ordering::SeqCst), 3);
        assert_eq!(healthy.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_within_one_provider() {
        let flaky = FixedProvider::failing(2, "eventually");
        let (router, _db) = test_router(vec![flaky.clone()]).await;

        let reply = router.ask("hello", Tier::Low, AskOptions::default()).await;
        assert_eq!(reply, "eventually");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_total_failure_returns_error_string() {
        let broken = FixedProvider::failing(usize::MAX, "never");
        let (router, db) = test_router(vec![broken]).await;

        let reply = router.ask("hello", Tier::High, AskOptions::default()).await;
        assert!(reply.starts_with("[inference error:"));

        // A failed call writes no live ledger row and caches nothing
        assert!(db.ledger_rows().await.unwrap().is_empty());
        let again = router.ask("hello", Tier::High, AskOptions::default()).await;
        assert!(again.starts_with("[inference error:"));
    }

    #[tokio::test]
    async fn test_skip_cache_forces_live_call() {
        let provider = FixedProvider::new("live");
        let (router, _db) = test_router(vec![provider.clone()]).await;

        let opts = AskOptions {
            skip_cache: true,
            ..AskOptions::default()
        };
        router.ask("q", Tier::Low, opts.clone()).await;
        router.ask("q", Tier::Low, opts).await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }
}
