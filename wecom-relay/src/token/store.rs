use crate::config::TokenCacheConfig;
use crate::token::{AccessToken, TOKEN_CACHE_KEY, TOKEN_CACHE_TTL};
use async_trait::async_trait;
use moka::Expiry;
use moka::sync::Cache;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("invalid redis address: {0}")]
    InvalidAddress(String),
}

/// Key-value backend holding the shared access token.
///
/// Every operation is atomic per key. `set_if_absent` leaves an existing value
/// untouched and reports whether it wrote.
#[async_trait]
pub trait TokenCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

const MEMORY_CAPACITY: u64 = 16;

#[derive(Clone)]
struct CachedValue {
    value: String,
    ttl: Duration,
}

struct PerEntryTtl;

impl Expiry<String, CachedValue> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedValue,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process cache, for single-instance deployments.
pub struct MemoryTokenCache {
    cache: Cache<String, CachedValue>,
}

impl MemoryTokenCache {
    pub fn new() -> Self {
        let cache = Cache::builder()
            .max_capacity(MEMORY_CAPACITY)
            .expire_after(PerEntryTtl)
            .build();

        MemoryTokenCache { cache }
    }
}

impl Default for MemoryTokenCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenCache for MemoryTokenCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.cache.get(key).map(|cached| cached.value))
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let entry = self.cache.entry(key.to_string()).or_insert(CachedValue {
            value: value.to_string(),
            ttl,
        });
        Ok(entry.is_fresh())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.cache.invalidate(key);
        Ok(())
    }
}

/// Redis-backed cache shared by every relay instance pointing at the same
/// server. Database 0, as deployed historically.
pub struct RedisTokenCache {
    connection: ConnectionManager,
}

impl RedisTokenCache {
    pub async fn connect(addr: &str, password: Option<&str>) -> Result<Self, CacheError> {
        let mut url = Url::parse(&format!("redis://{addr}/0"))
            .map_err(|e| CacheError::InvalidAddress(format!("{addr}: {e}")))?;
        if let Some(password) = password.filter(|p| !p.is_empty()) {
            url.set_password(Some(password))
                .map_err(|()| CacheError::InvalidAddress(addr.to_string()))?;
        }

        let client = redis::Client::open(url.as_str())?;
        let connection = ConnectionManager::new(client).await?;
        tracing::info!(addr, "connected to redis token cache");
        Ok(RedisTokenCache { connection })
    }
}

#[async_trait]
impl TokenCache for RedisTokenCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let mut conn = self.connection.clone();
        let written: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await?;
        Ok(written.is_some())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        let _removed: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(())
    }
}

/// Owner of the cache handle. With no backend configured every lookup misses
/// and writes are dropped. Backend errors are logged and never propagate.
#[derive(Clone, Default)]
pub struct TokenStore {
    cache: Option<Arc<dyn TokenCache>>,
}

impl TokenStore {
    pub fn disabled() -> Self {
        TokenStore { cache: None }
    }

    pub fn new(cache: Arc<dyn TokenCache>) -> Self {
        TokenStore { cache: Some(cache) }
    }

    pub async fn from_config(config: &TokenCacheConfig) -> Result<Self, CacheError> {
        let store = match config {
            TokenCacheConfig::Off => TokenStore::disabled(),
            TokenCacheConfig::Memory => TokenStore::new(Arc::new(MemoryTokenCache::new())),
            TokenCacheConfig::Redis { addr, .. } => {
                let cache = RedisTokenCache::connect(addr, config.redis_password()).await?;
                TokenStore::new(Arc::new(cache))
            }
        };
        Ok(store)
    }

    pub fn is_enabled(&self) -> bool {
        self.cache.is_some()
    }

    /// The cached token, if one is present and non-empty.
    pub async fn load(&self) -> Option<AccessToken> {
        let cache = self.cache.as_ref()?;
        match cache.get(TOKEN_CACHE_KEY).await {
            Ok(Some(token)) if !token.is_empty() => Some(AccessToken::new(token)),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "token cache read failed, treating as miss");
                None
            }
        }
    }

    pub async fn save(&self, token: &AccessToken) {
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        if token.is_empty() {
            return;
        }
        match cache
            .set_if_absent(TOKEN_CACHE_KEY, token.expose(), TOKEN_CACHE_TTL)
            .await
        {
            Ok(true) => {}
            Ok(false) => tracing::debug!("token cache already populated, keeping existing entry"),
            Err(e) => tracing::warn!(error = %e, "token cache write failed"),
        }
    }

    pub async fn evict(&self) {
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        if let Err(e) = cache.delete(TOKEN_CACHE_KEY).await {
            tracing::warn!(error = %e, "token cache eviction failed");
        }
    }
}
