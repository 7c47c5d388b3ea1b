//! Access-token lifecycle: caching, remote issuance and invalidation.

mod provider;
mod store;

pub use provider::{TokenError, TokenLease, TokenProvider};
pub use store::{CacheError, MemoryTokenCache, RedisTokenCache, TokenCache, TokenStore};

use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;

/// Lifetime of a cached token. The vendor issues tokens valid for 7200s; the
/// cache drops them a little earlier.
pub const TOKEN_CACHE_TTL: Duration = Duration::from_secs(7000);

/// Single cache slot shared by every relay instance using the same backend.
pub const TOKEN_CACHE_KEY: &str = "access_token";

/// Vendor access token. An empty token is never valid with the vendor but is
/// still sent, so the vendor's error code drives the retry.
#[derive(Clone)]
pub struct AccessToken(SecretString);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        AccessToken(SecretString::new(token.into()))
    }

    pub fn empty() -> Self {
        AccessToken::new(String::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().is_empty()
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            f.write_str("AccessToken(<empty>)")
        } else {
            f.write_str("AccessToken(<redacted>)")
        }
    }
}
