use crate::message::OutboundMessage;
use crate::retry::{MAX_ATTEMPTS, with_token_retry};
use crate::token::{AccessToken, TokenLease};
use crate::vendor::{self, Endpoints, ErrCode, SendResponse};
use bytes::Bytes;

#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
    #[error("message send request failed: {0}")]
    Request(#[from] reqwest::Error),
}

#[derive(Clone)]
pub struct MessageDispatcher {
    client: reqwest::Client,
    endpoints: Endpoints,
}

impl MessageDispatcher {
    pub fn new(client: reqwest::Client, endpoints: Endpoints) -> Self {
        MessageDispatcher { client, endpoints }
    }

    /// Sends `message` and returns the vendor's raw response body, also when
    /// it reports an error or the token stayed expired across every attempt.
    pub async fn send(
        &self,
        lease: &mut TokenLease,
        message: &OutboundMessage,
    ) -> Result<Bytes, DispatchError> {
        let result = with_token_retry(lease, MAX_ATTEMPTS, |token| {
            self.send_once(token, message)
        })
        .await;

        if let Err(e) = &result {
            tracing::error!(
                msg_type = message.payload.msg_type().as_str(),
                error = %e,
                "failed to deliver message"
            );
        }
        result
    }

    async fn send_once(
        &self,
        token: AccessToken,
        message: &OutboundMessage,
    ) -> (Result<Bytes, DispatchError>, ErrCode) {
        let url = self.endpoints.send(&token);
        let body = match self.client.post(url).json(message).send().await {
            Ok(response) => response.bytes().await,
            Err(e) => Err(e),
        };
        let body = match body {
            Ok(body) => body,
            Err(e) => return (Err(e.into()), ErrCode::Unrecognized),
        };

        let errcode = match vendor::decode::<SendResponse>(&body) {
            Ok(response) => {
                if response.errcode != ErrCode::OK {
                    tracing::warn!(
                        errcode = %response.errcode,
                        errmsg = %response.errmsg,
                        "vendor rejected message"
                    );
                }
                response.errcode
            }
            Err(e) => {
                tracing::warn!(error = %e, "message send response could not be decoded");
                ErrCode::Unrecognized
            }
        };
        (Ok(body), errcode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WecomConfig;
    use crate::message::Payload;
    use crate::token::{TokenProvider, TokenStore};
    use mockito::Matcher;
    use secrecy::SecretString;
    use serde_json::json;
    use url::Url;

    fn setup(base: &str) -> (MessageDispatcher, TokenProvider) {
        let endpoints = Endpoints::new(Url::parse(base).unwrap());
        let client = reqwest::Client::new();
        let provider = TokenProvider::new(
            client.clone(),
            endpoints.clone(),
            "ww-corp".into(),
            SecretString::new("corp-secret".into()),
            TokenStore::disabled(),
        );
        (MessageDispatcher::new(client, endpoints), provider)
    }

    fn message(payload: Payload) -> OutboundMessage {
        let config = WecomConfig {
            agent_id: "1000002".into(),
            ..WecomConfig::default()
        };
        OutboundMessage::new(&config, payload)
    }

    #[tokio::test]
    async fn test_send_returns_raw_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/cgi-bin/gettoken")
            .match_query(Matcher::Any)
            .with_body(r#"{"access_token":"T"}"#)
            .create_async()
            .await;
        let send = server
            .mock("POST", "/cgi-bin/message/send")
            .match_query(Matcher::UrlEncoded("access_token".into(), "T".into()))
            .match_body(Matcher::Json(json!({
                "touser": "@all",
                "agentid": "1000002",
                "msgtype": "markdown",
                "duplicate_check_interval": 600,
                "markdown": {"content": "# hi"},
            })))
            .with_body(r#"{"errcode":0,"errmsg":"ok","msgid":"X"}"#)
            .expect(1)
            .create_async()
            .await;

        let (dispatcher, provider) = setup(&server.url());
        let mut lease = provider.lease();
        let body = dispatcher
            .send(&mut lease, &message(Payload::markdown("# hi")))
            .await
            .unwrap();

        assert_eq!(body.as_ref(), br#"{"errcode":0,"errmsg":"ok","msgid":"X"}"#);
        send.assert_async().await;
    }

    #[tokio::test]
    async fn test_permanent_error_passes_through() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/cgi-bin/gettoken")
            .match_query(Matcher::Any)
            .with_body(r#"{"access_token":"T"}"#)
            .create_async()
            .await;
        let send = server
            .mock("POST", "/cgi-bin/message/send")
            .match_query(Matcher::Any)
            .with_body(r#"{"errcode":81013,"errmsg":"user invalid"}"#)
            .expect(1)
            .create_async()
            .await;

        let (dispatcher, provider) = setup(&server.url());
        let mut lease = provider.lease();
        let body = dispatcher
            .send(&mut lease, &message(Payload::text("hi")))
            .await
            .unwrap();

        assert_eq!(body.as_ref(), br#"{"errcode":81013,"errmsg":"user invalid"}"#);
        send.assert_async().await;
    }

    #[tokio::test]
    async fn test_exhausted_retries_return_last_body() {
        let mut server = mockito::Server::new_async().await;
        let token = server
            .mock("GET", "/cgi-bin/gettoken")
            .match_query(Matcher::Any)
            .with_body(r#"{"access_token":"T"}"#)
            .expect(4)
            .create_async()
            .await;
        let send = server
            .mock("POST", "/cgi-bin/message/send")
            .match_query(Matcher::Any)
            .with_body(r#"{"errcode":42001,"errmsg":"access_token expired"}"#)
            .expect(4)
            .create_async()
            .await;

        let (dispatcher, provider) = setup(&server.url());
        let mut lease = provider.lease();
        let body = dispatcher
            .send(&mut lease, &message(Payload::text("hi")))
            .await
            .unwrap();

        assert_eq!(body.as_ref(), br#"{"errcode":42001,"errmsg":"access_token expired"}"#);
        token.assert_async().await;
        send.assert_async().await;
    }

    #[tokio::test]
    async fn test_transport_error() {
        // Nothing listens on the discard port
        let (dispatcher, provider) = setup("http://127.0.0.1:9");
        let mut lease = provider.lease();
        let result = dispatcher
            .send(&mut lease, &message(Payload::text("hi")))
            .await;
        assert!(matches!(result, Err(DispatchError::Request(_))));
    }
}
