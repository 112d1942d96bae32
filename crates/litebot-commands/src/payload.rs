//! JSON messages exchanged with the in-game mod over the bridge channel.
//!
//! Inbound frames are `{"action": <kind>, "data": {...}}`; outbound frames are
//! `{"name": <kind>, "data": ...}`.

use crate::command::CommandNode;
use litebot_types::{Player, TextComponent};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid action '{0}'")]
    UnknownAction(String),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    action: String,
    #[serde(default)]
    data: Value,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Auth(AuthRequest),
    Command(CommandRequest),
    Event(EventRequest),
    Rpc(RpcRequest),
}

impl InboundMessage {
    pub fn parse(text: &str) -> Result<Self, PayloadError> {
        let envelope: Envelope = serde_json::from_str(text)?;
        let data = envelope.data;
        Ok(match envelope.action.as_str() {
            "auth" => InboundMessage::Auth(serde_json::from_value(data)?),
            "command" => InboundMessage::Command(serde_json::from_value(data)?),
            "event" => InboundMessage::Event(serde_json::from_value(data)?),
            "rpc" => InboundMessage::Rpc(serde_json::from_value(data)?),
            _ => return Err(PayloadError::UnknownAction(envelope.action)),
        })
    }
}

/// First frame of a bridge session, naming the server it speaks for.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AuthRequest {
    pub server: String,
    pub secret: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommandRequest {
    /// Command name, possibly already dotted (`ban.add`).
    pub name: String,
    /// Further dotted sub-path below `name`.
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub args: Map<String, Value>,
    #[serde(default)]
    pub player: Option<Player>,
}

impl CommandRequest {
    /// Full dotted path of the invoked command.
    pub fn full_name(&self) -> String {
        match self.sub.as_deref() {
            Some(sub) if !sub.is_empty() => format!("{}.{}", self.name, sub),
            _ => self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EventRequest {
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RpcRequest {
    pub name: String,
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub args: Value,
}

/// Chat text sent into the game.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub message: TextComponent,
    #[serde(rename = "opOnly", skip_serializing_if = "std::ops::Not::not")]
    pub op_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player: Option<Uuid>,
}

impl ChatMessage {
    pub fn broadcast(message: TextComponent) -> Self {
        Self {
            message,
            op_only: false,
            player: None,
        }
    }

    pub fn to_player(message: TextComponent, player: Uuid) -> Self {
        Self {
            player: Some(player),
            ..Self::broadcast(message)
        }
    }

    pub fn to_operators(message: TextComponent) -> Self {
        Self {
            op_only: true,
            ..Self::broadcast(message)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AfterInvoke {
    pub name: String,
    pub args: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcResponse {
    pub id: Option<u64>,
    pub result: Value,
}

/// A frame sent to the in-game mod.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "name", content = "data", rename_all = "snake_case")]
pub enum OutboundMessage {
    ServerCommandRegisters(Vec<CommandNode>),
    Message(ChatMessage),
    ServerCommandAfterInvoke(AfterInvoke),
    RpcResponse(RpcResponse),
}

impl OutboundMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
