use crate::message::MsgType;
use crate::metrics_defs::MEDIA_REJECTED;
use crate::retry::{MAX_ATTEMPTS, with_token_retry};
use crate::token::{AccessToken, TokenLease};
use crate::vendor::{self, Endpoints, ErrCode, UploadResponse};
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use shared::counter;

/// Largest attachment accepted for upload.
pub const MAX_MEDIA_BYTES: usize = 2 << 20;

/// Code reported for a missing or oversized attachment.
pub const INVALID_FILE: f64 = 400.0;

/// File received with an inbound request.
#[derive(Clone, Debug)]
pub struct Attachment {
    pub file_name: String,
    pub content: Bytes,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MediaReference {
    /// Empty when the upload did not produce an id.
    pub media_id: String,
    pub errcode: ErrCode,
}

impl MediaReference {
    fn failed(errcode: ErrCode) -> Self {
        MediaReference {
            media_id: String::new(),
            errcode,
        }
    }
}

#[derive(Clone)]
pub struct MediaUploader {
    client: reqwest::Client,
    endpoints: Endpoints,
}

impl MediaUploader {
    pub fn new(client: reqwest::Client, endpoints: Endpoints) -> Self {
        MediaUploader { client, endpoints }
    }

    /// Exchanges `attachment` for a vendor media id.
    pub async fn upload(
        &self,
        lease: &mut TokenLease,
        attachment: Option<&Attachment>,
        msg_type: MsgType,
    ) -> MediaReference {
        let Some(attachment) = attachment else {
            counter!(MEDIA_REJECTED, "reason" => "missing").increment(1);
            tracing::warn!("no media attached to the request");
            return MediaReference::failed(ErrCode::Numeric(INVALID_FILE));
        };
        if attachment.content.len() > MAX_MEDIA_BYTES {
            counter!(MEDIA_REJECTED, "reason" => "too_large").increment(1);
            tracing::warn!(
                file_name = %attachment.file_name,
                size = attachment.content.len(),
                "attachment exceeds the media size limit"
            );
            return MediaReference::failed(ErrCode::Numeric(INVALID_FILE));
        }

        with_token_retry(lease, MAX_ATTEMPTS, |token| {
            self.upload_once(token, attachment, msg_type)
        })
        .await
    }

    async fn upload_once(
        &self,
        token: AccessToken,
        attachment: &Attachment,
        msg_type: MsgType,
    ) -> (MediaReference, ErrCode) {
        let part = match Part::stream(attachment.content.clone())
            .file_name(attachment.file_name.clone())
            .mime_str("application/octet-stream")
        {
            Ok(part) => part,
            Err(e) => {
                tracing::error!(error = %e, "failed to build multipart body");
                return (
                    MediaReference::failed(ErrCode::Unrecognized),
                    ErrCode::Unrecognized,
                );
            }
        };
        let form = Form::new().part("media", part);
        let url = self.endpoints.upload(&token, msg_type.as_str());

        let body = match self.client.post(url).multipart(form).send().await {
            Ok(response) => response.bytes().await,
            Err(e) => Err(e),
        };
        let body = match body {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(error = %e, "media upload request failed");
                return (
                    MediaReference::failed(ErrCode::Unrecognized),
                    ErrCode::Unrecognized,
                );
            }
        };

        match vendor::decode::<UploadResponse>(&body) {
            Ok(response) => {
                let reference = MediaReference {
                    media_id: response.media_id.unwrap_or_default(),
                    errcode: response.errcode,
                };
                if reference.media_id.is_empty() {
                    tracing::warn!(
                        errcode = %response.errcode,
                        errmsg = %response.errmsg,
                        "media upload returned no media_id"
                    );
                }
                (reference, response.errcode)
            }
            Err(e) => {
                tracing::error!(error = %e, "media upload response could not be decoded");
                (
                    MediaReference::failed(ErrCode::Unrecognized),
                    ErrCode::Unrecognized,
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{TokenProvider, TokenStore};
    use mockito::Matcher;
    use secrecy::SecretString;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use url::Url;

    fn setup(server: &mockito::Server) -> (MediaUploader, TokenProvider) {
        let endpoints = Endpoints::new(Url::parse(&server.url()).unwrap());
        let client = reqwest::Client::new();
        let provider = TokenProvider::new(
            client.clone(),
            endpoints.clone(),
            "ww-corp".into(),
            SecretString::new("corp-secret".into()),
            TokenStore::disabled(),
        );
        (MediaUploader::new(client, endpoints), provider)
    }

    fn attachment(size: usize) -> Attachment {
        Attachment {
            file_name: "photo.png".into(),
            content: Bytes::from(vec![7u8; size]),
        }
    }

    #[tokio::test]
    async fn test_rejects_without_network() {
        let mut server = mockito::Server::new_async().await;
        let any = server
            .mock("GET", Matcher::Any)
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;
        let upload = server
            .mock("POST", Matcher::Any)
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;
        let (uploader, provider) = setup(&server);
        let mut lease = provider.lease();

        let missing = uploader.upload(&mut lease, None, MsgType::Image).await;
        assert_eq!(missing.media_id, "");
        assert_eq!(missing.errcode, ErrCode::Numeric(400.0));

        let too_large = attachment(MAX_MEDIA_BYTES + 1);
        let rejected = uploader
            .upload(&mut lease, Some(&too_large), MsgType::Image)
            .await;
        assert_eq!(rejected.media_id, "");
        assert_eq!(rejected.errcode, ErrCode::Numeric(400.0));

        any.assert_async().await;
        upload.assert_async().await;
    }

    #[tokio::test]
    async fn test_upload_success() {
        let mut server = mockito::Server::new_async().await;
        let token = server
            .mock("GET", "/cgi-bin/gettoken")
            .match_query(Matcher::Any)
            .with_body(r#"{"access_token":"T"}"#)
            .expect(1)
            .create_async()
            .await;
        let upload = server
            .mock("POST", "/cgi-bin/media/upload")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("access_token".into(), "T".into()),
                Matcher::UrlEncoded("type".into(), "image".into()),
            ]))
            .match_body(Matcher::Regex(
                r#"name="media"; filename="photo.png""#.into(),
            ))
            .with_body(r#"{"errcode":0,"errmsg":"ok","type":"image","media_id":"M1"}"#)
            .expect(1)
            .create_async()
            .await;

        let (uploader, provider) = setup(&server);
        let mut lease = provider.lease();
        // Exactly at the limit is accepted
        let file = attachment(MAX_MEDIA_BYTES);
        let reference = uploader.upload(&mut lease, Some(&file), MsgType::Image).await;

        assert_eq!(reference.media_id, "M1");
        assert_eq!(reference.errcode, ErrCode::OK);
        token.assert_async().await;
        upload.assert_async().await;
    }

    #[tokio::test]
    async fn test_upload_vendor_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/cgi-bin/gettoken")
            .match_query(Matcher::Any)
            .with_body(r#"{"access_token":"T"}"#)
            .create_async()
            .await;
        let upload = server
            .mock("POST", "/cgi-bin/media/upload")
            .match_query(Matcher::Any)
            .with_body(r#"{"errcode":40004,"errmsg":"invalid media type"}"#)
            .expect(1)
            .create_async()
            .await;

        let (uploader, provider) = setup(&server);
        let mut lease = provider.lease();
        let reference = uploader
            .upload(&mut lease, Some(&attachment(16)), MsgType::Image)
            .await;

        assert_eq!(reference.media_id, "");
        assert_eq!(reference.errcode, ErrCode::Numeric(40004.0));
        upload.assert_async().await;
    }

    #[tokio::test]
    async fn test_upload_retries_on_expiry() {
        let mut server = mockito::Server::new_async().await;
        let token = server
            .mock("GET", "/cgi-bin/gettoken")
            .match_query(Matcher::Any)
            .with_body(r#"{"access_token":"T"}"#)
            .expect(4)
            .create_async()
            .await;
        let upload = server
            .mock("POST", "/cgi-bin/media/upload")
            .match_query(Matcher::Any)
            .with_body(r#"{"errcode":42001,"errmsg":"access_token expired"}"#)
            .expect(4)
            .create_async()
            .await;

        let (uploader, provider) = setup(&server);
        let mut lease = provider.lease();
        let reference = uploader
            .upload(&mut lease, Some(&attachment(16)), MsgType::Image)
            .await;

        assert!(reference.errcode.is_token_expired());
        token.assert_async().await;
        upload.assert_async().await;
    }

    #[tokio::test]
    async fn test_upload_recovers_after_expiry() {
        let mut server = mockito::Server::new_async().await;
        let token = server
            .mock("GET", "/cgi-bin/gettoken")
            .match_query(Matcher::Any)
            .with_body(r#"{"access_token":"T"}"#)
            .expect(2)
            .create_async()
            .await;
        let calls = Arc::new(AtomicUsize::new(0));
        let upload_calls = calls.clone();
        let upload = server
            .mock("POST", "/cgi-bin/media/upload")
            .match_query(Matcher::UrlEncoded("access_token".into(), "T".into()))
            .with_body_from_request(move |_| {
                if upload_calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    br#"{"errcode":42001,"errmsg":"access_token expired"}"#.to_vec()
                } else {
                    br#"{"errcode":0,"errmsg":"ok","type":"image","media_id":"M2"}"#.to_vec()
                }
            })
            .expect(2)
            .create_async()
            .await;

        let (uploader, provider) = setup(&server);
        let mut lease = provider.lease();
        let reference = uploader
            .upload(&mut lease, Some(&attachment(16)), MsgType::Image)
            .await;

        assert_eq!(reference.media_id, "M2");
        assert_eq!(reference.errcode, ErrCode::OK);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        token.assert_async().await;
        upload.assert_async().await;
    }
}
