use crate::config::{Config, WecomConfig};
use crate::token::{CacheError, TokenCache};
use async_trait::async_trait;
use secrecy::SecretString;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

/// In-memory `TokenCache` that records every write and delete. Entries never
/// expire. With `failing` set every operation returns an error.
#[derive(Default)]
pub struct RecordingCache {
    entries: Mutex<HashMap<String, String>>,
    sets: Mutex<Vec<(String, String, Duration)>>,
    deletes: Mutex<Vec<String>>,
    failing: bool,
}

impl RecordingCache {
    pub fn failing() -> Self {
        RecordingCache {
            failing: true,
            ..RecordingCache::default()
        }
    }

    pub fn sets(&self) -> Vec<(String, String, Duration)> {
        self.sets.lock().unwrap().clone()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.deletes.lock().unwrap().clone()
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.failing {
            return Err(CacheError::InvalidAddress("unreachable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl TokenCache for RecordingCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.check()?;
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        self.check()?;
        self.sets
            .lock()
            .unwrap()
            .push((key.to_string(), value.to_string(), ttl));

        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.check()?;
        self.deletes.lock().unwrap().push(key.to_string());
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

/// Relay configuration pointing at a mock vendor server.
pub fn config_for(server_url: &str) -> Config {
    Config {
        wecom: WecomConfig {
            api_base: Url::parse(server_url).unwrap(),
            corp_id: "ww-corp".into(),
            secret: SecretString::new("corp-secret".into()),
            agent_id: "1000002".into(),
            to_user: "@all".into(),
            duplicate_check_interval: 600,
        },
        ..Config::default()
    }
}
