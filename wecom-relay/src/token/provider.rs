use crate::metrics_defs::{TOKEN_CACHE_HIT, TOKEN_CACHE_MISS, TOKEN_EXPIRED, TOKEN_REMOTE_FETCH};
use crate::token::{AccessToken, TokenStore};
use crate::vendor::{self, DecodeError, Endpoints, ErrCode, TokenResponse};
use secrecy::{ExposeSecret, SecretString};
use shared::counter;

#[derive(thiserror::Error, Debug)]
pub enum TokenError {
    #[error("token request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("token response could not be decoded: {0}")]
    Decode(#[from] DecodeError),
    #[error("token response carried no access_token (errcode {errcode}: {errmsg})")]
    Missing { errcode: ErrCode, errmsg: String },
}

/// Issues access tokens, from the store when it holds one and from the vendor
/// otherwise.
#[derive(Clone)]
pub struct TokenProvider {
    client: reqwest::Client,
    endpoints: Endpoints,
    corp_id: String,
    secret: SecretString,
    store: TokenStore,
}

impl TokenProvider {
    pub fn new(
        client: reqwest::Client,
        endpoints: Endpoints,
        corp_id: String,
        secret: SecretString,
        store: TokenStore,
    ) -> Self {
        TokenProvider {
            client,
            endpoints,
            corp_id,
            secret,
            store,
        }
    }

    /// Never fails. When the vendor cannot be reached the returned token is
    /// empty and the next vendor call reports the problem through its errcode.
    pub async fn obtain(&self) -> AccessToken {
        if self.store.is_enabled() {
            if let Some(token) = self.store.load().await {
                counter!(TOKEN_CACHE_HIT).increment(1);
                return token;
            }
            counter!(TOKEN_CACHE_MISS).increment(1);
        }

        match self.fetch_remote().await {
            Ok(token) => {
                self.store.save(&token).await;
                token
            }
            Err(e) => {
                tracing::error!(corp_id = %self.corp_id, error = %e, "failed to obtain access token");
                AccessToken::empty()
            }
        }
    }

    async fn fetch_remote(&self) -> Result<AccessToken, TokenError> {
        counter!(TOKEN_REMOTE_FETCH).increment(1);
        let url = self
            .endpoints
            .token(&self.corp_id, self.secret.expose_secret());
        let body = self.client.get(url).send().await?.bytes().await?;
        let response: TokenResponse = vendor::decode(&body)?;

        match response.access_token {
            Some(token) => Ok(AccessToken::new(token)),
            None => Err(TokenError::Missing {
                errcode: response.errcode,
                errmsg: response.errmsg,
            }),
        }
    }

    /// False when `errcode` reports an expired token, in which case the
    /// cached token has been evicted.
    pub async fn is_still_valid(&self, errcode: ErrCode) -> bool {
        if !errcode.is_token_expired() {
            return true;
        }
        counter!(TOKEN_EXPIRED).increment(1);
        tracing::info!("access token expired, evicting cached token");
        self.store.evict().await;
        false
    }

    pub fn lease(&self) -> TokenLease {
        TokenLease {
            provider: self.clone(),
            current: None,
        }
    }
}

/// Token held for the vendor calls of a single inbound request.
pub struct TokenLease {
    provider: TokenProvider,
    current: Option<AccessToken>,
}

impl TokenLease {
    pub async fn token(&mut self) -> AccessToken {
        if let Some(token) = &self.current {
            return token.clone();
        }
        let token = self.provider.obtain().await;
        self.current = Some(token.clone());
        token
    }

    /// Drops the held token when `errcode` reports it expired.
    pub async fn check(&mut self, errcode: ErrCode) -> bool {
        let valid = self.provider.is_still_valid(errcode).await;
        if !valid {
            self.current = None;
        }
        valid
    }
}
