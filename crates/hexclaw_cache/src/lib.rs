//! Two-tier inference cache sitting in front of every model call.
//!
//! Tier 1 - exact match
//!   Key   : "exact:{sha256(prompt)}"
//!   Value : the raw response string
//!   TTL   : configurable, default 1 day
//!   Store : in-process map, or the shared Redis server when configured
//!
//! Tier 2 - semantic match
//!   Process-local index of prompt embeddings. On a tier-1 miss the query
//!   is embedded and compared (cosine) against every live entry; the best
//!   match above the threshold is returned AND written into tier 1 under
//!   the new prompt's hash, so identical re-asks never pay the scan again.
//!   Bounded: insertion-order FIFO eviction past the configured maximum.
//!
//! The invariant enforced upstream: a cache hit costs zero model tokens.
//! Always `check()` before asking the router to go live.
//!
//! The cache never raises. A missing or unreachable backing store degrades
//! to misses; the caller cannot tell the difference and does not need to.

pub mod embed;
pub mod kv;

pub use embed::{cosine, DisabledEmbedder, Embedder, NgramEmbedder};
pub use kv::{open_kv, Kv, MemoryKv, NoopKv, RedisKv};

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Tunables for both tiers.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub exact_ttl: Duration,
    pub semantic_ttl: Duration,
    /// Cosine similarity required for a semantic hit.
    pub semantic_threshold: f32,
    /// Semantic tier entry bound (FIFO eviction past this).
    pub semantic_max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            exact_ttl: Duration::from_secs(86_400),
            semantic_ttl: Duration::from_secs(604_800),
            semantic_threshold: 0.92,
            semantic_max_entries: 2_000,
        }
    }
}

struct SemanticEntry {
    vector: Vec<f32>,
    response: String,
    /// First 200 chars, kept for debugging only.
    #[allow(dead_code)]
    prompt: String,
    stored_at: Instant,
}

/// Runtime statistics snapshot (per-process, not persisted).
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits_exact: u64,
    pub hits_semantic: u64,
    pub misses: u64,
    pub total: u64,
    pub hit_rate: f64,
    pub embed_backend: &'static str,
    pub kv_backend: &'static str,
    pub kv_available: bool,
    pub semantic_entries: usize,
}

/// Two-tier inference cache.
pub struct Cache {
    kv: Box<dyn Kv>,
    embedder: Box<dyn Embedder>,
    config: CacheConfig,
    semantic: Mutex<VecDeque<SemanticEntry>>,
    hits_exact: AtomicU64,
    hits_semantic: AtomicU64,
    misses: AtomicU64,
}

impl Cache {
    pub fn new(config: CacheConfig, kv: Box<dyn Kv>, embedder: Box<dyn Embedder>) -> Self {
        Self {
            kv,
            embedder,
            config,
            semantic: Mutex::new(VecDeque::new()),
            hits_exact: AtomicU64::new(0),
            hits_semantic: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Fully in-process cache with the default embedder.
    pub fn in_process(config: CacheConfig) -> Self {
        Self::new(
            config,
            Box::new(MemoryKv::new()),
            Box::new(NgramEmbedder::default()),
        )
    }

    /// Check both tiers for `prompt`. Returns the cached response on hit.
    pub async fn check(&self, prompt: &str) -> Option<String> {
        if let Some(response) = self.kv.get(&exact_key(prompt)).await {
            self.hits_exact.fetch_add(1, Ordering::Relaxed);
            debug!("Cache HIT (exact): {:.60}...", prompt);
            return Some(response);
        }

        if let Some(response) = self.check_semantic(prompt) {
            self.hits_semantic.fetch_add(1, Ordering::Relaxed);
            debug!("Cache HIT (semantic): {:.60}...", prompt);
            // Promote so future identical re-asks hit tier 1
            self.store_exact(prompt, &response).await;
            return Some(response);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!("Cache MISS: {:.60}...", prompt);
        None
    }

    /// Store a (prompt, response) pair in both tiers.
    pub async fn store(&self, prompt: &str, response: &str) {
        self.store_exact(prompt, response).await;
        self.store_semantic(prompt, response);
    }

    pub fn stats(&self) -> CacheStats {
        let hits_exact = self.hits_exact.load(Ordering::Relaxed);
        let hits_semantic = self.hits_semantic.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits_exact + hits_semantic + misses;
        let hit_rate = if total == 0 {
            0.0
        } else {
            (hits_exact + hits_semantic) as f64 / total as f64
        };
        CacheStats {
            hits_exact,
            hits_semantic,
            misses,
            total,
            hit_rate,
            embed_backend: self.embedder.name(),
            kv_backend: self.kv.name(),
            kv_available: self.kv.available(),
            semantic_entries: self.semantic.lock().unwrap().len(),
        }
    }

    /// Delete all exact-tier keys. Returns count deleted.
    pub async fn flush_exact(&self) -> usize {
        self.kv.delete_prefix("exact:").await
    }

    /// Drop the semantic index. Returns count deleted.
    pub fn flush_semantic(&self) -> usize {
        let mut index = self.semantic.lock().unwrap();
        let count = index.len();
        index.clear();
        count
    }

    // ── Exact tier ──────────────────────────────────────────────────────

    async fn store_exact(&self, prompt: &str, response: &str) {
        self.kv
            .set_ex(&exact_key(prompt), response, self.config.exact_ttl)
            .await;
    }

    // ── Semantic tier ───────────────────────────────────────────────────

    fn check_semantic(&self, prompt: &str) -> Option<String> {
        let query = self.embedder.embed(prompt)?;

        let mut index = self.semantic.lock().unwrap();
        let ttl = self.config.semantic_ttl;
        index.retain(|entry| entry.stored_at.elapsed() < ttl);

        let mut best_sim = 0.0f32;
        let mut best: Option<&SemanticEntry> = None;
        for entry in index.iter() {
            let sim = cosine(&query, &entry.vector);
            if sim > best_sim {
                best_sim = sim;
                best = Some(entry);
            }
        }

        if best_sim >= self.config.semantic_threshold {
            let response = best.map(|entry| entry.response.clone());
            if response.is_some() {
                debug!(
                    "Semantic hit (sim={:.3}, threshold={:.3}): {:.50}...",
                    best_sim, self.config.semantic_threshold, prompt
                );
            }
            return response;
        }
        None
    }

    fn store_semantic(&self, prompt: &str, response: &str) {
        let Some(vector) = self.embedder.embed(prompt) else {
            return;
        };

        let mut index = self.semantic.lock().unwrap();
        while index.len() >= self.config.semantic_max_entries {
            index.pop_front();
        }
        index.push_back(SemanticEntry {
            vector,
            response: response.to_string(),
            prompt: prompt.chars().take(200).collect(),
            stored_at: Instant::now(),
        });
    }
}

fn exact_key(prompt: &str) -> String {
    let digest = Sha256::digest(prompt.as_bytes());
    format!("exact:{:x}", digest)
}
