//! Best-effort entity cache over Redis.
//!
//! The cache store is never on an error path visible to end clients: a read
//! failure is a miss (the caller recomputes from the source of truth), a
//! write or invalidation failure is logged and the entry is left to expire
//! through its TTL. Constructed without a client, every operation degrades
//! the same way, which is the local-development mode.

use redis::{AsyncCommands, Client};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tokio::time::timeout;

use crate::cache::keys::CacheKeys;
use crate::config::Config;
use crate::{metrics, Result};

/// Entity cache with best-effort semantics and per-call TTLs.
#[derive(Clone)]
pub struct EntityCache {
    client: Option<Client>,
    keys: CacheKeys,
    op_timeout: Duration,
}

impl EntityCache {
    /// Create a new `EntityCache`.
    ///
    /// # Arguments
    /// * `client` - Optional Redis client. If None, the cache is disabled:
    ///   every read misses and every write is a no-op.
    /// * `keys` - Key builder, used to derive family labels for metrics.
    /// * `op_timeout` - Bound on any single cache operation.
    pub fn new(client: Option<Client>, keys: CacheKeys, op_timeout: Duration) -> Self {
        Self {
            client,
            keys,
            op_timeout,
        }
    }

    /// Build from configuration. An empty Redis URL disables the cache.
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = if config.redis.url.is_empty() {
            None
        } else {
            Some(Client::open(config.redis.url.as_str())?)
        };
        Ok(Self::new(
            client,
            CacheKeys::from_config(config),
            Duration::from_secs(config.redis.connect_timeout_seconds),
        ))
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    /// Read a cache entry. Any failure (connection, timeout, undecodable
    /// payload) is treated as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let family = self.keys.family_of(key);

        let Some(ref client) = self.client else {
            metrics::cache::CACHE_MISSES.with_label_values(&[family]).inc();
            return None;
        };

        let read = timeout(self.op_timeout, async {
            let mut conn = client.get_multiplexed_async_connection().await?;
            conn.get::<_, Option<String>>(key).await
        })
        .await;

        match read {
            Ok(Ok(Some(json))) => match serde_json::from_str::<T>(&json) {
                Ok(value) => {
                    metrics::cache::CACHE_HITS.with_label_values(&[family]).inc();
                    tracing::debug!(key = %key, "Cache hit");
                    Some(value)
                }
                Err(e) => {
                    metrics::cache::CACHE_MISSES.with_label_values(&[family]).inc();
                    tracing::warn!(key = %key, err = %e, "Discarding undecodable cache entry");
                    None
                }
            },
            Ok(Ok(None)) => {
                metrics::cache::CACHE_MISSES.with_label_values(&[family]).inc();
                tracing::debug!(key = %key, "Cache miss");
                None
            }
            Ok(Err(e)) => {
                metrics::cache::CACHE_MISSES.with_label_values(&[family]).inc();
                tracing::warn!(key = %key, err = %e, "Cache read failed, treating as miss");
                None
            }
            Err(_) => {
                metrics::cache::CACHE_MISSES.with_label_values(&[family]).inc();
                tracing::warn!(key = %key, "Cache read timed out, treating as miss");
                None
            }
        }
    }

    /// Write a cache entry with the given TTL (SETEX). Failures are logged
    /// and swallowed.
    pub async fn put<T: Serialize>(&self, key: &str, value: &T, ttl_seconds: u64) {
        let Some(ref client) = self.client else {
            return;
        };

        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(key = %key, err = %e, "Failed to serialize value for caching");
                return;
            }
        };

        let write = timeout(self.op_timeout, async {
            let mut conn = client.get_multiplexed_async_connection().await?;
            if ttl_seconds > 0 {
                let _: () = conn.set_ex(key, json, ttl_seconds).await?;
            } else {
                let _: () = conn.set(key, json).await?;
            }
            Ok::<(), redis::RedisError>(())
        })
        .await;

        match write {
            Ok(Ok(())) => {
                tracing::debug!(key = %key, ttl_seconds, "Cached entry");
            }
            Ok(Err(e)) => {
                tracing::warn!(key = %key, err = %e, "Cache write failed, read path falls back to source");
            }
            Err(_) => {
                tracing::warn!(key = %key, "Cache write timed out, read path falls back to source");
            }
        }
    }

    /// Delete the given keys in one round trip. Failures are logged and
    /// swallowed; the stale entries then expire through their TTL.
    pub async fn invalidate(&self, keys: &[String]) {
        if keys.is_empty() {
            return;
        }

        let Some(ref client) = self.client else {
            tracing::debug!(count = keys.len(), "Cache disabled, skipping invalidation");
            return;
        };

        let del = timeout(self.op_timeout, async {
            let mut conn = client.get_multiplexed_async_connection().await?;
            let _: () = conn.del(keys).await?;
            Ok::<(), redis::RedisError>(())
        })
        .await;

        match del {
            Ok(Ok(())) => {
                tracing::debug!(keys = ?keys, "Cache keys cleared");
            }
            Ok(Err(e)) => {
                tracing::warn!(keys = ?keys, err = %e, "Cache invalidation failed, entries expire via TTL");
            }
            Err(_) => {
                tracing::warn!(keys = ?keys, "Cache invalidation timed out, entries expire via TTL");
            }
        }
    }

    /// Read-through: return the cached value if present, otherwise compute
    /// it from the source of truth and repopulate with the family TTL.
    ///
    /// Only the compute step can fail; cache failures on either side of it
    /// degrade silently.
    pub async fn fetch_or_compute<T, F, Fut>(
        &self,
        key: &str,
        ttl_seconds: u64,
        compute: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        if let Some(cached) = self.get::<T>(key).await {
            return Ok(cached);
        }

        let value = compute().await?;
        self.put(key, &value, ttl_seconds).await;
        Ok(value)
    }
}

impl std::fmt::Debug for EntityCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityCache")
            .field("redis_enabled", &self.client.is_some())
            .field("op_timeout", &self.op_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProjectId, Task, TaskId};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn disabled_cache() -> EntityCache {
        EntityCache::new(None, CacheKeys::default(), Duration::from_secs(1))
    }

    fn test_task(id: &str) -> Task {
        Task {
            id: TaskId::from_string(id.to_string()),
            project_id: ProjectId::from_string("p1".to_string()),
            title: "Write docs".to_string(),
            description: None,
            priority: "low".to_string(),
            task_type: "task".to_string(),
            status: "open".to_string(),
            assigned_to: None,
            epic_id: None,
            sprint_id: None,
            start_date: None,
            end_date: None,
        }
    }

    #[tokio::test]
    async fn test_disabled_cache_reads_miss() {
        let cache = disabled_cache();
        assert!(!cache.is_enabled());
        let got: Option<Vec<Task>> = cache.get("project_tasks:p1").await;
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_disabled_cache_writes_and_invalidation_are_noops() {
        let cache = disabled_cache();
        cache.put("project_tasks:p1", &vec![test_task("t1")], 60).await;
        cache
            .invalidate(&["project_tasks:p1".to_string(), "sprint_tasks:s1".to_string()])
            .await;
        let got: Option<Vec<Task>> = cache.get("project_tasks:p1").await;
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_fetch_or_compute_always_computes_when_disabled() {
        let cache = disabled_cache();
        let calls = AtomicUsize::new(0);

        let first: Vec<Task> = cache
            .fetch_or_compute("project_tasks:p1", 60, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(vec![test_task("t1")])
            })
            .await
            .unwrap();
        let second: Vec<Task> = cache
            .fetch_or_compute("project_tasks:p1", 60, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(vec![test_task("t1")])
            })
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fetch_or_compute_propagates_compute_errors() {
        let cache = disabled_cache();
        let result: Result<Vec<Task>> = cache
            .fetch_or_compute("project_tasks:p1", 60, || async {
                Err(crate::Error::Upstream("task service unreachable".to_string()))
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    #[ignore = "Requires Redis server"]
    async fn test_setex_roundtrip_and_delete() {
        let client = Client::open("redis://localhost:6379").unwrap();
        let cache = EntityCache::new(
            Some(client),
            CacheKeys::new("taskio_test"),
            Duration::from_secs(5),
        );

        let key = format!("taskio_test:project_tasks:{}", crate::models::generate_id());
        let tasks = vec![test_task("t1"), test_task("t2")];

        cache.put(&key, &tasks, 60).await;
        let got: Option<Vec<Task>> = cache.get(&key).await;
        assert_eq!(got, Some(tasks));

        cache.invalidate(std::slice::from_ref(&key)).await;
        let got: Option<Vec<Task>> = cache.get(&key).await;
        assert!(got.is_none());

        // Clearing an already-clear key is a no-op, not an error.
        cache.invalidate(std::slice::from_ref(&key)).await;
        let got: Option<Vec<Task>> = cache.get(&key).await;
        assert!(got.is_none());
    }

    #[tokio::test]
    #[ignore = "Requires Redis server"]
    async fn test_entry_expires_after_ttl() {
        let client = Client::open("redis://localhost:6379").unwrap();
        let cache = EntityCache::new(
            Some(client),
            CacheKeys::new("taskio_test"),
            Duration::from_secs(5),
        );

        let key = format!("taskio_test:project:{}", crate::models::generate_id());
        cache.put(&key, &"payload".to_string(), 1).await;
        let got: Option<String> = cache.get(&key).await;
        assert_eq!(got.as_deref(), Some("payload"));

        tokio::time::sleep(Duration::from_millis(1200)).await;
        let got: Option<String> = cache.get(&key).await;
        assert!(got.is_none());
    }

    #[tokio::test]
    #[ignore = "Requires Redis server"]
    async fn test_fetch_or_compute_repopulates_after_invalidation() {
        let client = Client::open("redis://localhost:6379").unwrap();
        let cache = EntityCache::new(
            Some(client),
            CacheKeys::new("taskio_test"),
            Duration::from_secs(5),
        );

        let key = format!("taskio_test:project_sprints:{}", crate::models::generate_id());
        let calls = AtomicUsize::new(0);

        let compute = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok("fresh".to_string())
        };

        let v1: String = cache.fetch_or_compute(&key, 60, compute).await.unwrap();
        assert_eq!(v1, "fresh");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Served from cache, no recompute.
        let v2: String = cache
            .fetch_or_compute(&key, 60, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("fresh".to_string())
            })
            .await
            .unwrap();
        assert_eq!(v2, "fresh");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        cache.invalidate(std::slice::from_ref(&key)).await;

        let v3: String = cache
            .fetch_or_compute(&key, 60, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("fresh".to_string())
            })
            .await
            .unwrap();
        assert_eq!(v3, "fresh");
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        cache.invalidate(std::slice::from_ref(&key)).await;
    }
}
