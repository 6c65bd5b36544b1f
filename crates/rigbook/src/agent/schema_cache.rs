//! Time-bounded cache of the store's schema description.
//!
//! Shared across threads and turns as an `Arc<SchemaCache>`; the
//! orchestrator fills it on a miss during `SchemaPrefetch`.

use std::sync::RwLock;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug)]
pub struct SchemaCache {
    ttl: Duration,
    entry: RwLock<Option<(Instant, String)>>,
}

impl SchemaCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: RwLock::new(None),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The cached description, if it is younger than the TTL.
    pub fn get(&self) -> Option<String> {
        let entry = self.entry.read().unwrap_or_else(|e| e.into_inner());
        match entry.as_ref() {
            Some((stored, schema)) if stored.elapsed() < self.ttl => Some(schema.clone()),
            Some(_) => {
                debug!("Schema cache expired");
                None
            }
            None => None,
        }
    }

    pub fn put(&self, schema: String) {
        let mut entry = self.entry.write().unwrap_or_else(|e| e.into_inner());
        *entry = Some((Instant::now(), schema));
    }

    pub fn invalidate(&self) {
        let mut entry = self.entry.write().unwrap_or_else(|e| e.into_inner());
        *entry = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_then_invalidate() {
        let cache = SchemaCache::new(Duration::from_secs(3600));
        assert_eq!(cache.get(), None);
        cache.put("resources(id bigint)".into());
        assert_eq!(cache.get().as_deref(), Some("resources(id bigint)"));
        cache.invalidate();
        assert_eq!(cache.get(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = SchemaCache::new(Duration::from_secs(60));
        cache.put("s".into());
        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.get().is_some());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get().is_none());
    }
}
