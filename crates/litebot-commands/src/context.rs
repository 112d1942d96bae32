use crate::argument::ArgumentValue;
use crate::event::ServerEvent;
use crate::payload::{ChatMessage, OutboundMessage};
use futures_util::future::BoxFuture;
use litebot_types::{Player, TextComponent};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, PoisonError};

/// The server a handler runs against.
///
/// Implemented by the host so this crate never depends on how servers are
/// stored or connected.
pub trait ServerLink: Send + Sync {
    fn name(&self) -> &str;

    /// Queue a frame on the server's bridge. Returns false when no bridge
    /// session is attached and the frame was dropped.
    fn send(&self, message: OutboundMessage) -> bool;

    /// Run a console command over RCON and return its output.
    fn rcon<'a>(&'a self, command: &'a str) -> BoxFuture<'a, anyhow::Result<String>>;
}

/// State handed to a command handler.
#[derive(Clone)]
pub struct ServerCommandContext {
    server: Arc<dyn ServerLink>,
    command: String,
    player: Option<Player>,
    args: Vec<(String, Option<ArgumentValue>)>,
    after_invoke: Arc<Mutex<Map<String, Value>>>,
}

impl ServerCommandContext {
    pub fn new(
        server: Arc<dyn ServerLink>,
        command: impl Into<String>,
        player: Option<Player>,
        args: Vec<(String, Option<ArgumentValue>)>,
    ) -> Self {
        Self {
            server,
            command: command.into(),
            player,
            args,
            after_invoke: Arc::new(Mutex::new(Map::new())),
        }
    }

    pub fn server(&self) -> &Arc<dyn ServerLink> {
        &self.server
    }

    /// Full dotted path of the invoked command.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// The invoking player, absent when run from the console.
    pub fn player(&self) -> Option<&Player> {
        self.player.as_ref()
    }

    /// A decoded argument by name. `None` for unknown names and for optional
    /// arguments that were not supplied.
    pub fn arg(&self, name: &str) -> Option<&ArgumentValue> {
        self.args
            .iter()
            .find(|(arg, _)| arg == name)
            .and_then(|(_, value)| value.as_ref())
    }

    pub fn arg_at(&self, index: usize) -> Option<&ArgumentValue> {
        self.args.get(index).and_then(|(_, value)| value.as_ref())
    }

    /// Decoded arguments in declaration order.
    pub fn values(&self) -> impl Iterator<Item = (&str, Option<&ArgumentValue>)> {
        self.args
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_ref()))
    }

    /// Reply to the invoking player, or to everyone when there is none.
    pub fn send(&self, message: TextComponent) -> bool {
        let chat = match &self.player {
            Some(player) => ChatMessage::to_player(message, player.uuid),
            None => ChatMessage::broadcast(message),
        };
        self.server.send(OutboundMessage::Message(chat))
    }

    pub fn broadcast(&self, message: TextComponent) -> bool {
        self.server
            .send(OutboundMessage::Message(ChatMessage::broadcast(message)))
    }

    /// Record a value returned to the mod once the handler finishes.
    pub fn set_after_invoke(
        &self,
        key: impl Into<String>,
        value: impl Serialize,
    ) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(value)?;
        self.after_invoke
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value);
        Ok(())
    }

    pub(crate) fn take_after_invoke(&self) -> Map<String, Value> {
        std::mem::take(
            &mut *self
                .after_invoke
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }
}

impl std::fmt::Debug for ServerCommandContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerCommandContext")
            .field("server", &self.server.name())
            .field("command", &self.command)
            .field("player", &self.player)
            .field("args", &self.args)
            .finish()
    }
}

/// State handed to an event listener.
#[derive(Clone)]
pub struct EventContext {
    pub server: Arc<dyn ServerLink>,
    pub event: ServerEvent,
    pub args: Map<String, Value>,
}

impl EventContext {
    /// The player the event concerns, if the mod sent one.
    pub fn player(&self) -> Option<Player> {
        self.args
            .get("player")
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Chat text for `on_message`.
    pub fn message(&self) -> Option<&str> {
        self.args.get("message").and_then(Value::as_str)
    }
}

/// State handed to an RPC handler.
#[derive(Clone)]
pub struct RpcContext {
    pub server: Arc<dyn ServerLink>,
    pub name: String,
    pub id: Option<u64>,
    pub args: Value,
}

/// State handed to an argument's suggestion source.
#[derive(Clone)]
pub struct SuggestionContext {
    pub server: Arc<dyn ServerLink>,
    pub command: String,
    pub argument: String,
    /// Text typed so far for the argument.
    pub input: String,
    pub player: Option<Player>,
}
