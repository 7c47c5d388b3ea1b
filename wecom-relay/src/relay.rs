use crate::callback::{CallbackError, CallbackVerifier, VerifyParams};
use crate::config::{Config, WecomConfig};
use crate::dispatcher::{DispatchError, MessageDispatcher};
use crate::errors::RelayError;
use crate::message::{MsgType, OutboundMessage, Payload};
use crate::metrics_defs::REQUEST_DURATION;
use crate::token::{TokenProvider, TokenStore};
use crate::uploader::{Attachment, MediaUploader};
use crate::vendor::Endpoints;
use bytes::Bytes;
use secrecy::{ExposeSecret, SecretString};
use shared::histogram;
use std::sync::Arc;
use std::time::Instant;

/// Everything needed to turn one inbound message into vendor calls. Cheap to
/// clone; all clones share one HTTP client and one token store.
#[derive(Clone)]
pub struct Relay {
    inner: Arc<RelayInner>,
}

struct RelayInner {
    wecom: WecomConfig,
    sendkey: Option<SecretString>,
    provider: TokenProvider,
    uploader: MediaUploader,
    dispatcher: MessageDispatcher,
    callback: CallbackVerifier,
}

impl Relay {
    /// Connects the configured token cache, then builds the relay.
    pub async fn from_config(config: &Config) -> Result<Self, RelayError> {
        let store = TokenStore::from_config(&config.token_cache).await?;
        Relay::new(config, store)
    }

    pub fn new(config: &Config, store: TokenStore) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder().build()?;
        let endpoints = Endpoints::new(config.wecom.api_base.clone());

        let provider = TokenProvider::new(
            client.clone(),
            endpoints.clone(),
            config.wecom.corp_id.clone(),
            config.wecom.secret.clone(),
            store,
        );
        let callback = CallbackVerifier::new(
            config.callback.token.clone(),
            config.callback.aes_key.clone(),
            config.wecom.corp_id.clone(),
        );

        Ok(Relay {
            inner: Arc::new(RelayInner {
                wecom: config.wecom.clone(),
                sendkey: config.sendkey.clone(),
                provider,
                uploader: MediaUploader::new(client.clone(), endpoints.clone()),
                dispatcher: MessageDispatcher::new(client, endpoints),
                callback,
            }),
        })
    }

    /// Any sendkey is accepted unless one is configured.
    pub fn accepts_sendkey(&self, sendkey: &str) -> bool {
        match &self.inner.sendkey {
            Some(expected) => expected.expose_secret() == sendkey,
            None => true,
        }
    }

    /// Delivers one message and returns the vendor's raw send response.
    ///
    /// Image messages upload `attachment` first. A failed upload does not stop
    /// the send: the image goes out with an empty media id and the vendor
    /// reports the error.
    pub async fn relay(
        &self,
        msg: &str,
        msg_type: MsgType,
        attachment: Option<&Attachment>,
    ) -> Result<Bytes, DispatchError> {
        let start = Instant::now();
        let inner = &self.inner;
        let mut lease = inner.provider.lease();

        let payload = match msg_type {
            MsgType::Text => Payload::text(msg),
            MsgType::Markdown => Payload::markdown(msg),
            MsgType::Image => {
                let reference = inner
                    .uploader
                    .upload(&mut lease, attachment, msg_type)
                    .await;
                if reference.media_id.is_empty() {
                    tracing::warn!(
                        errcode = %reference.errcode,
                        "sending image message without a media id"
                    );
                }
                Payload::image(reference.media_id)
            }
        };

        let message = OutboundMessage::new(&inner.wecom, payload);
        let result = inner.dispatcher.send(&mut lease, &message).await;

        histogram!(REQUEST_DURATION, "msg_type" => msg_type.as_str())
            .record(start.elapsed().as_secs_f64());
        result
    }

    pub fn verify_callback(&self, params: &VerifyParams) -> Result<Vec<u8>, CallbackError> {
        self.inner.callback.verify_url(params)
    }
}
