use crate::env::ReadEnv;
use crate::uploader::MAX_MEDIA_BYTES;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::env::VarError;
use thiserror::Error;
use url::Url;

const DEFAULT_API_BASE: &str = "https://qyapi.weixin.qq.com";
const DEFAULT_REDIS_ADDR: &str = "localhost:6379";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("environment variable {0} is not valid unicode")]
    InvalidEnv(&'static str),

    #[error("invalid value for {name}: {reason}")]
    InvalidEnvValue { name: &'static str, reason: String },
}

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Admin listener must not share the main listener address")]
    ListenerConflict,

    #[error("Redis token cache requires an address")]
    EmptyRedisAddress,

    #[error("max_body_bytes must be larger than the 2 MiB media limit")]
    BodyLimitTooSmall,
}

/// Relay configuration.
///
/// Built once at start-up, from a YAML section and then environment overrides,
/// and handed to the components that need it.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// Listener serving `/wecomchan`, `/callback` and `/`
    #[serde(default)]
    pub listener: Listener,
    /// Optional listener for the `/health` and `/ready` probes
    #[serde(default)]
    pub admin_listener: Option<Listener>,
    #[serde(default)]
    pub wecom: WecomConfig,
    #[serde(default)]
    pub callback: CallbackConfig,
    #[serde(default)]
    pub token_cache: TokenCacheConfig,
    /// When set, inbound requests must present this exact sendkey.
    #[serde(default)]
    pub sendkey: Option<SecretString>,
    /// Upper bound for inbound request bodies, attachments included
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listener: Listener::default(),
            admin_listener: None,
            wecom: WecomConfig::default(),
            callback: CallbackConfig::default(),
            token_cache: TokenCacheConfig::default(),
            sendkey: None,
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Config {
    /// Applies the environment variables the relay has always been configured
    /// with on top of whatever the file provided.
    pub fn apply_env<E: ReadEnv>(&mut self, env: &E) -> Result<(), ConfigError> {
        if let Some(sendkey) = lookup(env, "SENDKEY")? {
            self.sendkey = Some(SecretString::new(sendkey));
        }
        if let Some(corp_id) = lookup(env, "WECOM_CID")? {
            self.wecom.corp_id = corp_id;
        }
        if let Some(secret) = lookup(env, "WECOM_SECRET")? {
            self.wecom.secret = SecretString::new(secret);
        }
        if let Some(agent_id) = lookup(env, "WECOM_AID")? {
            self.wecom.agent_id = agent_id;
        }
        if let Some(to_user) = lookup(env, "WECOM_TOUID")? {
            self.wecom.to_user = to_user;
        }
        if let Some(token) = lookup(env, "WECOM_TOKEN")? {
            self.callback.token = SecretString::new(token);
        }
        if let Some(aes_key) = lookup(env, "WECOM_AES_KEY")? {
            self.callback.aes_key = SecretString::new(aes_key);
        }

        if let Some(stat) = lookup(env, "REDIS_STAT")? {
            match stat.to_ascii_uppercase().as_str() {
                "ON" => {
                    if !matches!(self.token_cache, TokenCacheConfig::Redis { .. }) {
                        self.token_cache = TokenCacheConfig::Redis {
                            addr: default_redis_addr(),
                            password: None,
                        };
                    }
                }
                "OFF" => self.token_cache = TokenCacheConfig::Off,
                other => {
                    return Err(ConfigError::InvalidEnvValue {
                        name: "REDIS_STAT",
                        reason: format!("expected ON or OFF, got {other:?}"),
                    });
                }
            }
        }

        if let TokenCacheConfig::Redis { addr, password } = &mut self.token_cache {
            if let Some(redis_addr) = lookup(env, "REDIS_ADDR")? {
                *addr = redis_addr;
            }
            if let Some(redis_password) = lookup(env, "REDIS_PASSWORD")? {
                *password = Some(SecretString::new(redis_password));
            }
        }

        Ok(())
    }

    /// Validates the relay configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;

        if let Some(admin) = &self.admin_listener {
            admin.validate()?;
            if admin.host == self.listener.host && admin.port == self.listener.port {
                return Err(ValidationError::ListenerConflict);
            }
        }

        if let TokenCacheConfig::Redis { addr, .. } = &self.token_cache
            && addr.trim().is_empty()
        {
            return Err(ValidationError::EmptyRedisAddress);
        }

        if self.max_body_bytes <= MAX_MEDIA_BYTES {
            return Err(ValidationError::BodyLimitTooSmall);
        }

        Ok(())
    }
}

fn lookup<E: ReadEnv>(env: &E, name: &'static str) -> Result<Option<String>, ConfigError> {
    match env.var(name) {
        Ok(value) => Ok(Some(value)),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => Err(ConfigError::InvalidEnv(name)),
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// Credentials and message defaults for the WeCom application.
#[derive(Clone, Debug, Deserialize)]
pub struct WecomConfig {
    /// Base URL of the vendor API; overridable for tests and egress proxies
    #[serde(default = "default_api_base")]
    pub api_base: Url,
    #[serde(default = "default_corp_id")]
    pub corp_id: String,
    #[serde(default = "default_secret")]
    pub secret: SecretString,
    #[serde(default = "default_agent_id")]
    pub agent_id: String,
    /// Recipient list, `|`-separated user ids or `@all`
    #[serde(default = "default_to_user")]
    pub to_user: String,
    #[serde(default = "default_duplicate_check_interval")]
    pub duplicate_check_interval: u32,
}

impl Default for WecomConfig {
    fn default() -> Self {
        WecomConfig {
            api_base: default_api_base(),
            corp_id: default_corp_id(),
            secret: default_secret(),
            agent_id: default_agent_id(),
            to_user: default_to_user(),
            duplicate_check_interval: default_duplicate_check_interval(),
        }
    }
}

/// Token and AES key used to verify the vendor's callback URL handshake.
#[derive(Clone, Debug, Deserialize)]
pub struct CallbackConfig {
    #[serde(default = "default_callback_token")]
    pub token: SecretString,
    #[serde(default = "default_aes_key")]
    pub aes_key: SecretString,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        CallbackConfig {
            token: default_callback_token(),
            aes_key: default_aes_key(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum TokenCacheConfig {
    /// Every request fetches a fresh access token
    #[default]
    Off,
    /// Cache held in this process only
    Memory,
    /// Shared Redis cache, so several relay instances reuse one token
    Redis {
        #[serde(default = "default_redis_addr")]
        addr: String,
        #[serde(default)]
        password: Option<SecretString>,
    },
}

impl TokenCacheConfig {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, TokenCacheConfig::Off)
    }

    pub fn redis_password(&self) -> Option<&str> {
        match self {
            TokenCacheConfig::Redis {
                password: Some(password),
                ..
            } => Some(password.expose_secret().as_str()),
            _ => None,
        }
    }
}

fn default_api_base() -> Url {
    Url::parse(DEFAULT_API_BASE).expect("default api base is a valid url")
}

fn default_corp_id() -> String {
    "set_a_corp_id".into()
}

fn default_secret() -> SecretString {
    SecretString::new("set_a_secret".into())
}

fn default_agent_id() -> String {
    "set_an_agent_id".into()
}

fn default_to_user() -> String {
    "@all".into()
}

fn default_duplicate_check_interval() -> u32 {
    600
}

fn default_callback_token() -> SecretString {
    SecretString::new("set_a_callback_token".into())
}

fn default_aes_key() -> SecretString {
    SecretString::new("set_a_callback_aes_key".into())
}

fn default_redis_addr() -> String {
    DEFAULT_REDIS_ADDR.into()
}

fn default_max_body_bytes() -> usize {
    32 << 20
}
