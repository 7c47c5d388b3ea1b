use crate::config::WecomConfig;
use serde::Serialize;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MsgType {
    #[default]
    Text,
    Markdown,
    Image,
}

impl MsgType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            MsgType::Text => "text",
            MsgType::Markdown => "markdown",
            MsgType::Image => "image",
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
#[error("unsupported msg_type {0:?}")]
pub struct UnsupportedMsgType(pub String);

impl FromStr for MsgType {
    type Err = UnsupportedMsgType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MsgType::Text),
            "markdown" => Ok(MsgType::Markdown),
            "image" => Ok(MsgType::Image),
            other => Err(UnsupportedMsgType(other.to_string())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Content {
    pub content: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Media {
    pub media_id: String,
}

/// Exactly one payload per message; the variant name doubles as `msgtype`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "msgtype", rename_all = "lowercase")]
pub enum Payload {
    Text { text: Content },
    Markdown { markdown: Content },
    Image { image: Media },
}

impl Payload {
    pub fn text(content: impl Into<String>) -> Self {
        Payload::Text {
            text: Content {
                content: content.into(),
            },
        }
    }

    pub fn markdown(content: impl Into<String>) -> Self {
        Payload::Markdown {
            markdown: Content {
                content: content.into(),
            },
        }
    }

    pub fn image(media_id: impl Into<String>) -> Self {
        Payload::Image {
            image: Media {
                media_id: media_id.into(),
            },
        }
    }

    pub fn msg_type(&self) -> MsgType {
        match self {
            Payload::Text { .. } => MsgType::Text,
            Payload::Markdown { .. } => MsgType::Markdown,
            Payload::Image { .. } => MsgType::Image,
        }
    }
}

/// Body of `POST /cgi-bin/message/send`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OutboundMessage {
    pub touser: String,
    pub agentid: String,
    pub duplicate_check_interval: u32,
    #[serde(flatten)]
    pub payload: Payload,
}

impl OutboundMessage {
    pub fn new(config: &WecomConfig, payload: Payload) -> Self {
        OutboundMessage {
            touser: config.to_user.clone(),
            agentid: config.agent_id.clone(),
            duplicate_check_interval: config.duplicate_check_interval,
            payload,
        }
    }
}
