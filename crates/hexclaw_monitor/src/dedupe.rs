//! Seen-fingerprint store.
//!
//! In-process set, mirrored into the shared KV (7-day TTL) when one is
//! configured so restarts do not re-deliver the same advisories.

use hexclaw_cache::Kv;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

const SEEN_TTL: Duration = Duration::from_secs(604_800);

pub struct DedupeStore {
    seen: Mutex<HashSet<String>>,
    kv: Option<Box<dyn Kv>>,
}

impl DedupeStore {
    pub fn new(kv: Option<Box<dyn Kv>>) -> Self {
        Self {
            seen: Mutex::new(HashSet::new()),
            kv,
        }
    }

    pub async fn is_seen(&self, fingerprint: &str) -> bool {
        if self.seen.lock().unwrap().contains(fingerprint) {
            return true;
        }
        if let Some(kv) = &self.kv {
            return kv.get(&seen_key(fingerprint)).await.is_some();
        }
        false
    }

    pub async fn mark_seen(&self, fingerprint: &str) {
        self.seen.lock().unwrap().insert(fingerprint.to_string());
        if let Some(kv) = &self.kv {
            kv.set_ex(&seen_key(fingerprint), "1", SEEN_TTL).await;
        }
    }
}

fn seen_key(fingerprint: &str) -> String {
    format!("monitor:seen:{}", fingerprint)
}
