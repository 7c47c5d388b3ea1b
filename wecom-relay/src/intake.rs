use crate::callback::VerifyParams;
use crate::dispatcher::DispatchError;
use crate::message::MsgType;
use crate::metrics_defs::REQUESTS_REJECTED;
use crate::relay::Relay;
use crate::uploader::Attachment;
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, FromRequest, Multipart, RawQuery, Request, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::Bytes;
use serde_json::json;
use shared::counter;
use url::form_urlencoded;

const MEDIA_FIELD: &str = "media";

#[derive(thiserror::Error, Debug)]
pub enum IntakeError {
    #[error("sendkey is required")]
    MissingSendkey,
    #[error("sendkey is invalid")]
    InvalidSendkey,
    #[error("unsupported msg_type")]
    UnsupportedMsgType,
    #[error("invalid request body: {0}")]
    InvalidBody(String),
    #[error("request body too large")]
    BodyTooLarge,
    #[error("failed to reach the WeCom API")]
    Upstream(#[from] DispatchError),
}

impl IntakeError {
    fn status(&self) -> StatusCode {
        match self {
            IntakeError::MissingSendkey
            | IntakeError::UnsupportedMsgType
            | IntakeError::InvalidBody(_) => StatusCode::BAD_REQUEST,
            IntakeError::InvalidSendkey => StatusCode::FORBIDDEN,
            IntakeError::BodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            IntakeError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            IntakeError::MissingSendkey => "missing_sendkey",
            IntakeError::InvalidSendkey => "invalid_sendkey",
            IntakeError::UnsupportedMsgType => "unsupported_msg_type",
            IntakeError::InvalidBody(_) => "invalid_body",
            IntakeError::BodyTooLarge => "body_too_large",
            IntakeError::Upstream(_) => "upstream",
        }
    }
}

impl IntoResponse for IntakeError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_client_error() {
            counter!(REQUESTS_REJECTED, "reason" => self.reason()).increment(1);
        }

        // Clients have always received errcode 0 for a missing sendkey
        let errcode = match self {
            IntakeError::MissingSendkey => 0,
            _ => status.as_u16(),
        };
        let body = Json(json!({
            "errcode": errcode,
            "errmsg": self.to_string(),
        }));

        (status, body).into_response()
    }
}

/// Routes served on the main listener.
pub fn router(relay: Relay, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/wecomchan", get(wecomchan).post(wecomchan))
        .route("/callback", get(callback))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(relay)
}

async fn index() -> &'static str {
    "Wecomchan is running"
}

/// The three inbound fields. Each source fills only what earlier sources left
/// absent; empty strings count as absent.
#[derive(Debug, Default, PartialEq)]
struct MessageParams {
    msg: Option<String>,
    msg_type: Option<String>,
    sendkey: Option<String>,
}

impl MessageParams {
    fn or(self, fallback: MessageParams) -> MessageParams {
        MessageParams {
            msg: non_empty(self.msg).or(non_empty(fallback.msg)),
            msg_type: non_empty(self.msg_type).or(non_empty(fallback.msg_type)),
            sendkey: non_empty(self.sendkey).or(non_empty(fallback.sendkey)),
        }
    }

    /// Headers may only carry `sendkey` and `msg_type`.
    fn from_headers(headers: &HeaderMap) -> MessageParams {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        MessageParams {
            msg: None,
            msg_type: get("msg_type"),
            sendkey: get("sendkey"),
        }
    }

    /// Query strings and urlencoded bodies. A repeated key keeps its first
    /// non-empty value; unknown keys are ignored.
    fn from_urlencoded(input: &[u8]) -> MessageParams {
        let mut params = MessageParams::default();
        for (key, value) in form_urlencoded::parse(input) {
            let slot = match key.as_ref() {
                "msg" => &mut params.msg,
                "msg_type" => &mut params.msg_type,
                "sendkey" => &mut params.sendkey,
                _ => continue,
            };
            if slot.is_none() && !value.is_empty() {
                *slot = Some(value.into_owned());
            }
        }
        params
    }

    fn from_json(value: &serde_json::Value) -> MessageParams {
        let get = |name: &str| value.get(name).and_then(|v| v.as_str()).map(str::to_string);
        MessageParams {
            msg: get("msg"),
            msg_type: get("msg_type"),
            sendkey: get("sendkey"),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

async fn wecomchan(
    State(relay): State<Relay>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    request: Request,
) -> Result<Response, IntakeError> {
    let (body, attachment) = read_body(&headers, request).await?;
    let query = MessageParams::from_urlencoded(query.unwrap_or_default().as_bytes());
    let params = body
        .or(query)
        .or(MessageParams::from_headers(&headers));

    let Some(sendkey) = params.sendkey else {
        return Err(IntakeError::MissingSendkey);
    };
    if !relay.accepts_sendkey(&sendkey) {
        tracing::warn!("rejected request with an invalid sendkey");
        return Err(IntakeError::InvalidSendkey);
    }

    let msg_type = match params.msg_type.as_deref() {
        None => MsgType::default(),
        Some(raw) => raw.parse::<MsgType>().map_err(|e| {
            tracing::debug!(error = %e, "rejected request");
            IntakeError::UnsupportedMsgType
        })?,
    };

    let msg = params.msg.unwrap_or_default();
    tracing::debug!(msg_type = msg_type.as_str(), "relaying message");
    let body = relay.relay(&msg, msg_type, attachment.as_ref()).await?;

    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}

fn content_type(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::CONTENT_TYPE)?.to_str().ok()?;
    let essence = value.split(';').next()?.trim().to_ascii_lowercase();
    Some(essence)
}

fn body_error(status: StatusCode, text: String) -> IntakeError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        IntakeError::BodyTooLarge
    } else {
        IntakeError::InvalidBody(text)
    }
}

async fn read_body(
    headers: &HeaderMap,
    request: Request,
) -> Result<(MessageParams, Option<Attachment>), IntakeError> {
    match content_type(headers).as_deref() {
        Some("application/json") => {
            let bytes = Bytes::from_request(request, &())
                .await
                .map_err(|e| body_error(e.status(), e.body_text()))?;
            if bytes.iter().all(u8::is_ascii_whitespace) {
                return Ok((MessageParams::default(), None));
            }
            let value: serde_json::Value = serde_json::from_slice(&bytes)
                .map_err(|e| IntakeError::InvalidBody(e.to_string()))?;
            if !value.is_object() {
                return Err(IntakeError::InvalidBody("expected a JSON object".into()));
            }
            Ok((MessageParams::from_json(&value), None))
        }
        Some("multipart/form-data") => read_multipart(request).await,
        Some("application/x-www-form-urlencoded") => {
            let bytes = Bytes::from_request(request, &())
                .await
                .map_err(|e| body_error(e.status(), e.body_text()))?;
            Ok((MessageParams::from_urlencoded(&bytes), None))
        }
        _ => Ok((MessageParams::default(), None)),
    }
}

async fn read_multipart(
    request: Request,
) -> Result<(MessageParams, Option<Attachment>), IntakeError> {
    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| body_error(e.status(), e.body_text()))?;

    let mut params = MessageParams::default();
    let mut attachment = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| body_error(e.status(), e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            MEDIA_FIELD => {
                let file_name = field.file_name().unwrap_or(MEDIA_FIELD).to_string();
                let content = field
                    .bytes()
                    .await
                    .map_err(|e| body_error(e.status(), e.body_text()))?;
                attachment = Some(Attachment { file_name, content });
            }
            "msg" | "msg_type" | "sendkey" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| body_error(e.status(), e.body_text()))?;
                match name.as_str() {
                    "msg" => params.msg = Some(text),
                    "msg_type" => params.msg_type = Some(text),
                    _ => params.sendkey = Some(text),
                }
            }
            _ => {}
        }
    }

    Ok((params, attachment))
}

async fn callback(State(relay): State<Relay>, RawQuery(query): RawQuery) -> Response {
    let params = VerifyParams::from_query(query.as_deref().unwrap_or_default());
    match relay.verify_callback(&params) {
        Ok(echo) => (StatusCode::OK, echo).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "callback URL verification failed");
            (StatusCode::NOT_IMPLEMENTED, e.to_string()).into_response()
        }
    }
}
