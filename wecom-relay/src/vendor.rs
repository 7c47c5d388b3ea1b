//! Wire types and endpoint templates of the WeCom server API.
//!
//! Every response body carries a numeric `errcode`. It is decoded leniently
//! into [`ErrCode`] so that an unexpected shape never aborts a call sequence;
//! the remaining fields are typed per endpoint and a mismatch surfaces as a
//! [`DecodeError`].

use crate::token::AccessToken;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use url::Url;

/// Vendor code meaning the access token expired or is otherwise invalid.
pub const TOKEN_EXPIRED: f64 = 42001.0;

const ERRCODE_TOLERANCE: f64 = 1e-3;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum ErrCode {
    Numeric(f64),
    /// Missing, or not a number.
    #[default]
    Unrecognized,
}

impl ErrCode {
    pub const OK: ErrCode = ErrCode::Numeric(0.0);

    pub fn from_value(value: &serde_json::Value) -> Self {
        match value.as_f64() {
            Some(code) => ErrCode::Numeric(code),
            None => ErrCode::Unrecognized,
        }
    }

    pub fn is_token_expired(&self) -> bool {
        match self {
            ErrCode::Numeric(code) => (code - TOKEN_EXPIRED).abs() < ERRCODE_TOLERANCE,
            ErrCode::Unrecognized => false,
        }
    }
}

impl<'de> Deserialize<'de> for ErrCode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(ErrCode::from_value(&value))
    }
}

impl std::fmt::Display for ErrCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrCode::Numeric(code) => write!(f, "{code}"),
            ErrCode::Unrecognized => f.write_str("unrecognized"),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("empty response body")]
    Empty,
    #[error("unexpected response shape: {0}")]
    Shape(#[from] serde_json::Error),
}

pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, DecodeError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(DecodeError::Empty);
    }
    Ok(serde_json::from_slice(body)?)
}

/// `GET /cgi-bin/gettoken`
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub errcode: ErrCode,
    #[serde(default)]
    pub errmsg: String,
    #[serde(default)]
    pub access_token: Option<String>,
}

/// `POST /cgi-bin/message/send`
#[derive(Debug, Deserialize)]
pub struct SendResponse {
    #[serde(default)]
    pub errcode: ErrCode,
    #[serde(default)]
    pub errmsg: String,
}

/// `POST /cgi-bin/media/upload`
#[derive(Debug, Deserialize)]
pub struct UploadResponse {
    #[serde(default)]
    pub errcode: ErrCode,
    #[serde(default)]
    pub errmsg: String,
    #[serde(default)]
    pub media_id: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Endpoints {
    base: Url,
}

impl Endpoints {
    pub fn new(base: Url) -> Self {
        Endpoints { base }
    }

    pub fn token(&self, corp_id: &str, secret: &str) -> Url {
        let mut url = self.path("cgi-bin/gettoken");
        url.query_pairs_mut()
            .append_pair("corpid", corp_id)
            .append_pair("corpsecret", secret);
        url
    }

    pub fn send(&self, token: &AccessToken) -> Url {
        let mut url = self.path("cgi-bin/message/send");
        url.query_pairs_mut()
            .append_pair("access_token", token.expose());
        url
    }

    pub fn upload(&self, token: &AccessToken, media_type: &str) -> Url {
        let mut url = self.path("cgi-bin/media/upload");
        url.query_pairs_mut()
            .append_pair("access_token", token.expose())
            .append_pair("type", media_type);
        url
    }

    // Keeps any path prefix of the base, e.g. when routed through an egress proxy.
    fn path(&self, endpoint: &str) -> Url {
        let mut url = self.base.clone();
        let prefix = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{prefix}/{endpoint}"));
        url.set_query(None);
        url
    }
}
