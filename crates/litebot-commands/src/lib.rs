pub mod argument;
pub mod command;
pub mod context;
pub mod dispatch;
pub mod event;
pub mod payload;

pub use argument::{Argument, ArgumentError, ArgumentType, ArgumentValue};
pub use command::{CommandNode, CommandTree, RegistrationError, ServerCommand};
pub use context::{EventContext, RpcContext, ServerCommandContext, ServerLink, SuggestionContext};
pub use dispatch::{CommandOutcome, Dispatcher};
pub use event::{EventBus, ServerEvent};
pub use payload::{ChatMessage, InboundMessage, OutboundMessage, PayloadError};
