use crate::argument::{Argument, ArgumentType};
use crate::context::ServerCommandContext;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

pub type CommandHandler =
    Arc<dyn Fn(ServerCommandContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// A predicate evaluated before a command runs.
pub type Check = Arc<dyn Fn(&ServerCommandContext) -> bool + Send + Sync>;

/// Misconfiguration caught while registering commands, events or RPCs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("Command name must be non-empty and contain no '.' or spaces: '{0}'")]
    InvalidName(String),
    #[error("Duplicate command '{0}'")]
    Duplicate(String),
    #[error("Unknown parent command '{0}'")]
    UnknownParent(String),
    #[error("Command '{command}': required argument '{argument}' follows an optional one")]
    RequiredAfterOptional { command: String, argument: String },
    #[error("Command '{command}': duplicate argument '{argument}'")]
    DuplicateArgument { command: String, argument: String },
    #[error("Argument '{argument}' has unknown type '{tag}'")]
    UnknownArgumentType { argument: String, tag: String },
    #[error("Unknown event '{0}'")]
    UnknownEvent(String),
    #[error("Duplicate RPC handler '{0}'")]
    DuplicateRpc(String),
}

/// A command invokable from inside the game, optionally with sub-commands.
///
/// Built declaratively:
///
/// ```ignore
/// ServerCommand::new("ban")
///     .op_level(3)
///     .sub(
///         ServerCommand::new("add")
///             .argument(Argument::required("player", ArgumentType::Player))
///             .argument(Argument::optional("reason", ArgumentType::Message))
///             .handler(|ctx| async move { anyhow::Ok(()) }),
///     )
/// ```
#[derive(Clone)]
pub struct ServerCommand {
    name: String,
    description: Option<String>,
    op_level: u8,
    arguments: Vec<Argument>,
    checks: Vec<Check>,
    handler: Option<CommandHandler>,
    subs: Vec<ServerCommand>,
}

impl ServerCommand {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            op_level: 0,
            arguments: Vec::new(),
            checks: Vec::new(),
            handler: None,
            subs: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Minimum operator level of the invoking player.
    pub fn op_level(mut self, level: u8) -> Self {
        self.op_level = level;
        self
    }

    pub fn argument(mut self, argument: Argument) -> Self {
        self.arguments.push(argument);
        self
    }

    pub fn check<F>(mut self, check: F) -> Self
    where
        F: Fn(&ServerCommandContext) -> bool + Send + Sync + 'static,
    {
        self.checks.push(Arc::new(check));
        self
    }

    pub fn handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(ServerCommandContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.handler = Some(Arc::new(move |ctx| handler(ctx).boxed()));
        self
    }

    pub fn sub(mut self, command: ServerCommand) -> Self {
        self.subs.push(command);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn required_op_level(&self) -> u8 {
        self.op_level
    }

    pub fn arguments(&self) -> &[Argument] {
        &self.arguments
    }

    pub fn command_handler(&self) -> Option<&CommandHandler> {
        self.handler.as_ref()
    }

    pub fn subs(&self) -> &[ServerCommand] {
        &self.subs
    }

    pub fn find_sub(&self, name: &str) -> Option<&ServerCommand> {
        self.subs.iter().find(|sub| sub.name == name)
    }

    /// Whether the context passes the op level and every registered check.
    /// An invocation without a player has op level 0.
    pub fn passes_checks(&self, ctx: &ServerCommandContext) -> bool {
        let level = ctx.player().map_or(0, |p| p.op_level);
        level >= self.op_level && self.checks.iter().all(|check| check(ctx))
    }

    /// Serializable description sent to the in-game mod.
    pub fn node(&self) -> CommandNode {
        CommandNode {
            name: self.name.clone(),
            description: self.description.clone(),
            op_level: self.op_level,
            arguments: self
                .arguments
                .iter()
                .map(|arg| ArgumentNode {
                    name: arg.name.clone(),
                    kind: arg.kind,
                    optional: arg.optional,
                    suggests: arg.suggester().is_some(),
                })
                .collect(),
            subs: self.subs.iter().map(ServerCommand::node).collect(),
        }
    }

    fn validate(&self, path: &str) -> Result<(), RegistrationError> {
        if self.name.is_empty() || self.name.contains(&['.', ' '][..]) {
            return Err(RegistrationError::InvalidName(path.to_string()));
        }

        let mut seen_optional = false;
        for (i, arg) in self.arguments.iter().enumerate() {
            if self.arguments[..i].iter().any(|prev| prev.name == arg.name) {
                return Err(RegistrationError::DuplicateArgument {
                    command: path.to_string(),
                    argument: arg.name.clone(),
                });
            }
            if arg.optional {
                seen_optional = true;
            } else if seen_optional {
                return Err(RegistrationError::RequiredAfterOptional {
                    command: path.to_string(),
                    argument: arg.name.clone(),
                });
            }
        }

        for (i, sub) in self.subs.iter().enumerate() {
            let sub_path = format!("{}.{}", path, sub.name);
            if self.subs[..i].iter().any(|prev| prev.name == sub.name) {
                return Err(RegistrationError::Duplicate(sub_path));
            }
            sub.validate(&sub_path)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ServerCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerCommand")
            .field("name", &self.name)
            .field("op_level", &self.op_level)
            .field("arguments", &self.arguments)
            .field("checks", &self.checks.len())
            .field("has_handler", &self.handler.is_some())
            .field("subs", &self.subs)
            .finish()
    }
}

/// Wire form of one command in the `server_command_registers` payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandNode {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "opLevel")]
    pub op_level: u8,
    pub arguments: Vec<ArgumentNode>,
    pub subs: Vec<CommandNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArgumentNode {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ArgumentType,
    pub optional: bool,
    pub suggests: bool,
}

/// All registered root commands, in registration order.
#[derive(Debug, Default, Clone)]
pub struct CommandTree {
    roots: Vec<ServerCommand>,
}

impl CommandTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a root command, validating its whole subtree.
    pub fn register(&mut self, command: ServerCommand) -> Result<(), RegistrationError> {
        command.validate(&command.name)?;
        if self.roots.iter().any(|root| root.name == command.name) {
            return Err(RegistrationError::Duplicate(command.name));
        }
        self.roots.push(command);
        Ok(())
    }

    /// Attach a command under an existing dotted parent path.
    pub fn register_sub(
        &mut self,
        parent: &str,
        command: ServerCommand,
    ) -> Result<(), RegistrationError> {
        let path: Vec<&str> = parent.split('.').collect();
        let node = self
            .lookup_mut(&path)
            .ok_or_else(|| RegistrationError::UnknownParent(parent.to_string()))?;
        let full = format!("{}.{}", parent, command.name);
        command.validate(&full)?;
        if node.find_sub(&command.name).is_some() {
            return Err(RegistrationError::Duplicate(full));
        }
        node.subs.push(command);
        Ok(())
    }

    /// Remove a root command and its subtree.
    pub fn unregister(&mut self, name: &str) -> bool {
        let before = self.roots.len();
        self.roots.retain(|root| root.name != name);
        self.roots.len() != before
    }

    /// Resolve a path such as `["ban", "add"]`.
    pub fn lookup(&self, path: &[&str]) -> Option<&ServerCommand> {
        let (first, rest) = path.split_first()?;
        let mut node = self.roots.iter().find(|root| root.name == *first)?;
        for part in rest {
            node = node.find_sub(part)?;
        }
        Some(node)
    }

    fn lookup_mut(&mut self, path: &[&str]) -> Option<&mut ServerCommand> {
        let (first, rest) = path.split_first()?;
        let mut node = self.roots.iter_mut().find(|root| root.name == *first)?;
        for part in rest {
            node = node.subs.iter_mut().find(|sub| sub.name == *part)?;
        }
        Some(node)
    }

    pub fn nodes(&self) -> Vec<CommandNode> {
        self.roots.iter().map(ServerCommand::node).collect()
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}
