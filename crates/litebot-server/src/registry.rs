use crate::config::ServerEntry;
use crate::server::MinecraftServer;
use litebot_commands::Dispatcher;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Server '{0}' not found")]
    ServerNotFound(String),
    #[error("No server bridged to channel {0}")]
    ChannelNotFound(u64),
    #[error("Duplicate server '{0}'")]
    DuplicateServer(String),
}

/// Every configured server, built once at startup.
pub struct ServerRegistry {
    servers: Vec<Arc<MinecraftServer>>,
    by_name: HashMap<String, usize>,
    by_channel: HashMap<u64, usize>,
}

impl ServerRegistry {
    pub fn new(entries: &[ServerEntry]) -> Result<Self, RegistryError> {
        let mut registry = Self {
            servers: Vec::with_capacity(entries.len()),
            by_name: HashMap::new(),
            by_channel: HashMap::new(),
        };
        for entry in entries {
            if registry.by_name.contains_key(&entry.name)
                || registry.by_channel.contains_key(&entry.bridge_channel_id)
            {
                return Err(RegistryError::DuplicateServer(entry.name.clone()));
            }
            let index = registry.servers.len();
            registry.by_name.insert(entry.name.clone(), index);
            registry.by_channel.insert(entry.bridge_channel_id, index);
            let server = MinecraftServer::new(entry);
            info!(
                "Registered server '{}' ({}, rcon port {}, query port {}, channel {}{})",
                server.name(),
                server.ip(),
                entry.rcon_port,
                entry.query_port,
                server.bridge_channel_id(),
                if server.is_operator() { ", operator" } else { "" }
            );
            registry.servers.push(Arc::new(server));
        }
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Result<Arc<MinecraftServer>, RegistryError> {
        self.by_name
            .get(name)
            .map(|&index| self.servers[index].clone())
            .ok_or_else(|| RegistryError::ServerNotFound(name.to_string()))
    }

    /// The server whose bridge channel is `channel_id`.
    pub fn get_by_channel(&self, channel_id: u64) -> Result<Arc<MinecraftServer>, RegistryError> {
        self.by_channel
            .get(&channel_id)
            .map(|&index| self.servers[index].clone())
            .ok_or(RegistryError::ChannelNotFound(channel_id))
    }

    pub fn servers(&self) -> impl Iterator<Item = &Arc<MinecraftServer>> {
        self.servers.iter()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Re-send the command tree to every connected server. Returns how many
    /// received it.
    pub fn sync_commands(&self, dispatcher: &Dispatcher) -> usize {
        self.servers
            .iter()
            .filter(|server| server.is_connected())
            .filter(|server| server.send_message(dispatcher.command_tree()))
            .count()
    }

    /// Close every open RCON session.
    pub async fn shutdown(&self) {
        for server in &self.servers {
            server.rcon_disconnect().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::tests::entry;
    use litebot_commands::{OutboundMessage, ServerCommand};
    use tokio::sync::mpsc;

    #[test]
    fn test_lookup() {
        let registry = ServerRegistry::new(&[entry("survival", 10), entry("creative", 20)]).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("creative").unwrap().bridge_channel_id(), 20);
        assert_eq!(registry.get_by_channel(10).unwrap().name(), "survival");
        assert_eq!(
            registry.get("skyblock").unwrap_err(),
            RegistryError::ServerNotFound("skyblock".into())
        );
        assert_eq!(
            registry.get_by_channel(30).unwrap_err(),
            RegistryError::ChannelNotFound(30)
        );
        assert!(Arc::ptr_eq(
            &registry.get("survival").unwrap(),
            &registry.get_by_channel(10).unwrap()
        ));
    }

    #[test]
    fn test_rejects_duplicates() {
        assert_eq!(
            ServerRegistry::new(&[entry("a", 1), entry("a", 2)]).err(),
            Some(RegistryError::DuplicateServer("a".into()))
        );
        assert!(ServerRegistry::new(&[entry("a", 1), entry("b", 1)]).is_err());
    }

    #[test]
    fn test_sync_commands_reaches_connected_servers() {
        let registry = ServerRegistry::new(&[entry("survival", 10), entry("creative", 20)]).unwrap();
        let dispatcher = Dispatcher::new();
        dispatcher
            .register_command(ServerCommand::new("tps").handler(|_ctx| async { anyhow::Ok(()) }))
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.get("survival").unwrap().attach(tx);
        assert_eq!(registry.sync_commands(&dispatcher), 1);

        match rx.try_recv().unwrap() {
            OutboundMessage::ServerCommandRegisters(nodes) => assert_eq!(nodes[0].name, "tps"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
