use crate::argument::{ArgumentError, ArgumentValue};
use crate::command::{CommandTree, RegistrationError, ServerCommand};
use crate::context::{EventContext, RpcContext, ServerCommandContext, ServerLink, SuggestionContext};
use crate::event::{EventBus, EventHandler, ServerEvent};
use crate::payload::{
    AfterInvoke, ChatMessage, CommandRequest, EventRequest, InboundMessage, OutboundMessage,
    RpcRequest, RpcResponse,
};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use litebot_types::{Player, TextComponent};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Name of the built-in RPC answering in-game TAB completion.
pub const SUGGEST_RPC: &str = "suggest";

/// Operator-only notice sent back when the mod sends something unroutable.
pub const INVALID_ACTION: &str = "LiteBot: sent invalid action";

pub type RpcHandler =
    Arc<dyn Fn(RpcContext) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// What happened to an inbound command.
#[derive(Debug)]
pub enum CommandOutcome {
    /// The handler was spawned.
    Invoked(JoinHandle<()>),
    Unknown,
    /// The path names a command group with no handler of its own.
    NotInvokable,
    BadArgument(ArgumentError),
    CheckFailed,
}

/// Routes bridge traffic into registered commands, events and RPCs.
///
/// Shared by every server; handlers learn which server they run against
/// from their context.
#[derive(Default)]
pub struct Dispatcher {
    commands: RwLock<CommandTree>,
    events: RwLock<EventBus>,
    rpcs: RwLock<HashMap<String, RpcHandler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_command(&self, command: ServerCommand) -> Result<(), RegistrationError> {
        let name = command.name().to_string();
        write(&self.commands).register(command)?;
        debug!("Registered server command '{}'", name);
        Ok(())
    }

    /// Register `command` under the dotted `parent` path.
    pub fn register_sub_command(
        &self,
        parent: &str,
        command: ServerCommand,
    ) -> Result<(), RegistrationError> {
        let name = command.name().to_string();
        write(&self.commands).register_sub(parent, command)?;
        debug!("Registered server command '{}.{}'", parent, name);
        Ok(())
    }

    pub fn unregister_command(&self, name: &str) -> bool {
        write(&self.commands).unregister(name)
    }

    pub fn register_event<F, Fut>(&self, event: ServerEvent, owner: &str, handler: F) -> u64
    where
        F: Fn(EventContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler: EventHandler = Arc::new(move |ctx| handler(ctx).boxed());
        write(&self.events).register(event, owner, handler)
    }

    /// Register by wire name, rejecting names outside the event allow-list.
    pub fn register_event_named<F, Fut>(
        &self,
        name: &str,
        owner: &str,
        handler: F,
    ) -> Result<u64, RegistrationError>
    where
        F: Fn(EventContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let event: ServerEvent = name.parse()?;
        Ok(self.register_event(event, owner, handler))
    }

    /// Drop every listener registered by `owner`.
    pub fn unregister_owner(&self, owner: &str) -> usize {
        write(&self.events).unregister_owner(owner)
    }

    pub fn register_rpc<F, Fut>(&self, name: &str, handler: F) -> Result<(), RegistrationError>
    where
        F: Fn(RpcContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let mut rpcs = write(&self.rpcs);
        if name == SUGGEST_RPC || rpcs.contains_key(name) {
            return Err(RegistrationError::DuplicateRpc(name.to_string()));
        }
        rpcs.insert(name.to_string(), Arc::new(move |ctx| handler(ctx).boxed()));
        Ok(())
    }

    /// The full command tree as sent to a freshly attached mod.
    pub fn command_tree(&self) -> OutboundMessage {
        OutboundMessage::ServerCommandRegisters(read(&self.commands).nodes())
    }

    /// Decode and route one inbound bridge frame. Never fails: anything
    /// unroutable is reported back to the server's operators.
    pub async fn dispatch(&self, server: &Arc<dyn ServerLink>, text: &str) {
        let message = match InboundMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                report_invalid(server.as_ref(), &e.to_string());
                return;
            }
        };

        match message {
            InboundMessage::Command(request) => {
                self.dispatch_command(server, request);
            }
            InboundMessage::Event(request) => {
                let name = request.name.clone();
                if self.dispatch_event(server, request).is_none() {
                    report_invalid(server.as_ref(), &format!("unknown event '{}'", name));
                }
            }
            InboundMessage::Rpc(request) => {
                let id = request.id;
                let name = request.name.clone();
                let result = match self.dispatch_rpc(server, request).await {
                    Some(result) => result,
                    None => {
                        report_invalid(server.as_ref(), &format!("unknown rpc '{}'", name));
                        Value::Null
                    }
                };
                server.send(OutboundMessage::RpcResponse(RpcResponse { id, result }));
            }
            InboundMessage::Auth(_) => {
                report_invalid(server.as_ref(), "auth sent on an authenticated session");
            }
        }
    }

    /// Resolve, decode, check and spawn one command invocation.
    pub fn dispatch_command(
        &self,
        server: &Arc<dyn ServerLink>,
        request: CommandRequest,
    ) -> CommandOutcome {
        let path = request.full_name();
        let parts: Vec<&str> = path.split('.').collect();
        let command = match read(&self.commands).lookup(&parts) {
            Some(command) => command.clone(),
            None => {
                report_invalid(server.as_ref(), &format!("unknown command '{}'", path));
                return CommandOutcome::Unknown;
            }
        };
        let Some(handler) = command.command_handler().cloned() else {
            report_invalid(server.as_ref(), &format!("command '{}' has no handler", path));
            return CommandOutcome::NotInvokable;
        };

        let mut args: Vec<(String, Option<ArgumentValue>)> =
            Vec::with_capacity(command.arguments().len());
        for argument in command.arguments() {
            match argument.decode(request.args.get(&argument.name)) {
                Ok(value) => args.push((argument.name.clone(), value)),
                Err(e) => {
                    warn!("Bad argument for server command '{}': {}", path, e);
                    reject(server.as_ref(), request.player.as_ref(), &e.to_string());
                    return CommandOutcome::BadArgument(e);
                }
            }
        }

        let ctx = ServerCommandContext::new(server.clone(), path.clone(), request.player, args);
        if !command.passes_checks(&ctx) {
            debug!("Check failed for server command '{}'", path);
            reject(
                server.as_ref(),
                ctx.player(),
                "You do not have permission to use this command",
            );
            return CommandOutcome::CheckFailed;
        }

        let server = server.clone();
        CommandOutcome::Invoked(tokio::spawn(async move {
            let invoke = ctx.clone();
            let result = AssertUnwindSafe(async move { handler(invoke).await })
                .catch_unwind()
                .await;
            match result {
                Ok(Ok(())) => {
                    let args = ctx.take_after_invoke();
                    if !args.is_empty() {
                        server.send(OutboundMessage::ServerCommandAfterInvoke(AfterInvoke {
                            name: path,
                            args,
                        }));
                    }
                }
                Ok(Err(e)) => error!("Server command '{}' failed: {:#}", path, e),
                Err(_) => error!("Server command '{}' panicked", path),
            }
        }))
    }

    /// Fan an event out to every listener, each on its own task.
    ///
    /// Returns `None` for names outside the allow-list.
    pub fn dispatch_event(
        &self,
        server: &Arc<dyn ServerLink>,
        request: EventRequest,
    ) -> Option<Vec<JoinHandle<()>>> {
        let event = ServerEvent::from_name(&request.name)?;
        let listeners = read(&self.events).get_listeners(event).to_vec();

        let handles = listeners
            .into_iter()
            .map(|listener| {
                let ctx = EventContext {
                    server: server.clone(),
                    event,
                    args: request.args.clone(),
                };
                tokio::spawn(async move {
                    let handler = listener.handler;
                    let result = AssertUnwindSafe(async move { handler(ctx).await })
                        .catch_unwind()
                        .await;
                    match result {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => error!(
                            "Listener {} ({}) for {} failed: {:#}",
                            listener.listener_id, listener.owner, event, e
                        ),
                        Err(_) => error!(
                            "Listener {} ({}) for {} panicked",
                            listener.listener_id, listener.owner, event
                        ),
                    }
                })
            })
            .collect();
        Some(handles)
    }

    /// Run an RPC to completion. Returns `None` if no handler has that name;
    /// a failing handler yields `null`.
    pub async fn dispatch_rpc(
        &self,
        server: &Arc<dyn ServerLink>,
        request: RpcRequest,
    ) -> Option<Value> {
        if request.name == SUGGEST_RPC {
            let suggestions = self.suggest(server, &request.args).await;
            return Some(Value::from(suggestions));
        }

        let handler = read(&self.rpcs).get(&request.name).cloned()?;
        let name = request.name.clone();
        let ctx = RpcContext {
            server: server.clone(),
            name: request.name,
            id: request.id,
            args: request.args,
        };
        let result = AssertUnwindSafe(async move { handler(ctx).await })
            .catch_unwind()
            .await;
        Some(match result {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                error!("RPC '{}' failed: {:#}", name, e);
                Value::Null
            }
            Err(_) => {
                error!("RPC '{}' panicked", name);
                Value::Null
            }
        })
    }

    /// Answer a TAB-completion request. Any failure yields no suggestions.
    pub async fn suggest(&self, server: &Arc<dyn ServerLink>, args: &Value) -> Vec<String> {
        let command = args.get("command").and_then(Value::as_str).unwrap_or_default();
        let argument = args.get("argument").and_then(Value::as_str).unwrap_or_default();
        let input = args.get("input").and_then(Value::as_str).unwrap_or_default();
        let player: Option<Player> = args
            .get("player")
            .and_then(|p| serde_json::from_value(p.clone()).ok());

        let suggester = {
            let commands = read(&self.commands);
            let parts: Vec<&str> = command.split('.').collect();
            commands
                .lookup(&parts)
                .and_then(|cmd| cmd.arguments().iter().find(|arg| arg.name == argument))
                .and_then(|arg| arg.suggester().cloned())
        };
        let Some(suggester) = suggester else {
            debug!("No suggestions for {}:{}", command, argument);
            return Vec::new();
        };

        let ctx = SuggestionContext {
            server: server.clone(),
            command: command.to_string(),
            argument: argument.to_string(),
            input: input.to_string(),
            player,
        };
        match AssertUnwindSafe(async move { suggester(ctx).await })
            .catch_unwind()
            .await
        {
            Ok(Ok(suggestions)) => suggestions,
            Ok(Err(e)) => {
                debug!("Suggester for {}:{} failed: {:#}", command, argument, e);
                Vec::new()
            }
            Err(_) => {
                error!("Suggester for {}:{} panicked", command, argument);
                Vec::new()
            }
        }
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn report_invalid(server: &dyn ServerLink, detail: &str) {
    warn!("Invalid action from {}: {}", server.name(), detail);
    server.send(OutboundMessage::Message(ChatMessage::to_operators(
        TextComponent::colored(INVALID_ACTION, "red"),
    )));
}

fn reject(server: &dyn ServerLink, player: Option<&Player>, reason: &str) {
    let text = TextComponent::colored(reason, "red");
    let chat = match player {
        Some(player) => ChatMessage::to_player(text, player.uuid),
        None => ChatMessage::broadcast(text),
    };
    server.send(OutboundMessage::Message(chat));
}
