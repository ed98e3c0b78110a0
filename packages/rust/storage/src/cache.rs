//! Fingerprint-keyed response cache.

use std::path::Path;

use repotutor_shared::Result;

use crate::Storage;

/// Cache database file name inside the cache directory.
pub const CACHE_DB_NAME: &str = "cache.db";

/// Append-only store of generated responses, shared by reference across workers.
///
/// A disabled cache always misses and silently drops writes.
pub struct ResponseCache {
    storage: Option<Storage>,
}

impl ResponseCache {
    /// Open (or create) the cache database inside `cache_dir`.
    pub async fn open(cache_dir: &Path) -> Result<Self> {
        let storage = Storage::open(&cache_dir.join(CACHE_DB_NAME)).await?;
        Ok(Self {
            storage: Some(storage),
        })
    }

    /// A cache that never hits and never stores.
    pub fn disabled() -> Self {
        Self { storage: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.storage.is_some()
    }

    /// Underlying database, when enabled.
    pub fn storage(&self) -> Option<&Storage> {
        self.storage.as_ref()
    }

    pub async fn get(&self, fingerprint: &str) -> Result<Option<String>> {
        match &self.storage {
            Some(storage) => storage.get_response(fingerprint).await,
            None => Ok(None),
        }
    }

    /// Store a response. Only call this after a fully successful generation.
    pub async fn put(&self, fingerprint: &str, model_id: &str, response: &str) -> Result<()> {
        match &self.storage {
            Some(storage) => storage.put_response(fingerprint, model_id, response).await,
            None => Ok(()),
        }
    }

    /// Remove all entries. Returns how many were removed.
    pub async fn clear(&self) -> Result<u64> {
        match &self.storage {
            Some(storage) => {
                let removed = storage.clear_responses().await?;
                tracing::info!(removed, "response cache cleared");
                Ok(removed)
            }
            None => Ok(0),
        }
    }

    pub async fn len(&self) -> Result<u64> {
        match &self.storage {
            Some(storage) => storage.count_responses().await,
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_cache_dir() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("rt-cache-{}", Uuid::now_v7()))
    }

    #[tokio::test]
    async fn disabled_cache_always_misses() {
        let cache = ResponseCache::disabled();
        cache.put("fp", "m", "hello").await.unwrap();
        assert!(cache.get("fp").await.unwrap().is_none());
        assert_eq!(cache.len().await.unwrap(), 0);
        assert!(!cache.is_enabled());
    }

    #[tokio::test]
    async fn enabled_cache_persists_across_reopen() {
        let dir = temp_cache_dir();
        {
            let cache = ResponseCache::open(&dir).await.unwrap();
            cache.put("fp", "m", "hello").await.unwrap();
        }
        let cache = ResponseCache::open(&dir).await.unwrap();
        assert_eq!(cache.get("fp").await.unwrap().as_deref(), Some("hello"));
        assert!(dir.join(CACHE_DB_NAME).exists());
    }

    #[tokio::test]
    async fn concurrent_distinct_writes() {
        let dir = temp_cache_dir();
        let cache = std::sync::Arc::new(ResponseCache::open(&dir).await.unwrap());

        let mut handles = Vec::new();
        for i in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .put(&format!("fp{i}"), "m", &format!("r{i}"))
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(cache.len().await.unwrap(), 8);
        assert_eq!(cache.get("fp3").await.unwrap().as_deref(), Some("r3"));
    }
}
