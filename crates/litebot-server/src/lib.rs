//! Server registry and bridge for the LiteBot Minecraft integration.
//!
//! The Discord side looks servers up in a [`ServerRegistry`] and talks to
//! them over RCON, query, or the mod bridge.

pub mod bridge;
pub mod builtin;
pub mod config;
pub mod registry;
pub mod server;
pub mod status;

pub use bridge::Bridge;
pub use config::Config;
pub use registry::{RegistryError, ServerRegistry};
pub use server::MinecraftServer;
