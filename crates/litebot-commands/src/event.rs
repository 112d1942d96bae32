use crate::command::RegistrationError;
use crate::context::EventContext;
use futures_util::future::BoxFuture;
use std::collections::HashMap;

pub type EventHandler =
    std::sync::Arc<dyn Fn(EventContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Events the in-game mod may raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerEvent {
    Message,
    PlayerJoin,
    PlayerLeave,
    PlayerDeath,
    Advancement,
    ServerStart,
    ServerStop,
}

impl ServerEvent {
    pub const ALL: [ServerEvent; 7] = [
        ServerEvent::Message,
        ServerEvent::PlayerJoin,
        ServerEvent::PlayerLeave,
        ServerEvent::PlayerDeath,
        ServerEvent::Advancement,
        ServerEvent::ServerStart,
        ServerEvent::ServerStop,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ServerEvent::Message => "on_message",
            ServerEvent::PlayerJoin => "on_player_join",
            ServerEvent::PlayerLeave => "on_player_leave",
            ServerEvent::PlayerDeath => "on_player_death",
            ServerEvent::Advancement => "on_advancement",
            ServerEvent::ServerStart => "on_server_start",
            ServerEvent::ServerStop => "on_server_stop",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|event| event.name() == name)
    }
}

impl std::str::FromStr for ServerEvent {
    type Err = RegistrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| RegistrationError::UnknownEvent(s.to_string()))
    }
}

impl std::fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A registered listener. `owner` names the module that registered it so
/// a module's listeners can be dropped together.
#[derive(Clone)]
pub struct ListenerEntry {
    pub owner: String,
    pub listener_id: u64,
    pub handler: EventHandler,
}

/// Maps each event to its listeners, in registration order.
pub struct EventBus {
    listeners: HashMap<ServerEvent, Vec<ListenerEntry>>,
    next_listener_id: u64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            listeners: HashMap::new(),
            next_listener_id: 1,
        }
    }

    /// Register a listener for an event. Returns the listener_id.
    pub fn register(&mut self, event: ServerEvent, owner: &str, handler: EventHandler) -> u64 {
        let listener_id = self.next_listener_id;
        self.next_listener_id += 1;

        self.listeners.entry(event).or_default().push(ListenerEntry {
            owner: owner.to_string(),
            listener_id,
            handler,
        });

        listener_id
    }

    pub fn unregister(&mut self, listener_id: u64) -> bool {
        let mut removed = false;
        for list in self.listeners.values_mut() {
            let before = list.len();
            list.retain(|entry| entry.listener_id != listener_id);
            removed |= list.len() != before;
        }
        removed
    }

    /// Drop every listener registered by `owner`, returning how many were removed.
    pub fn unregister_owner(&mut self, owner: &str) -> usize {
        let mut removed = 0;
        for list in self.listeners.values_mut() {
            let before = list.len();
            list.retain(|entry| entry.owner != owner);
            removed += before - list.len();
        }
        removed
    }

    pub fn get_listeners(&self, event: ServerEvent) -> &[ListenerEntry] {
        self.listeners
            .get(&event)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Get the number of events with at least one listener.
    pub fn event_count(&self) -> usize {
        self.listeners.values().filter(|v| !v.is_empty()).count()
    }

    /// Get total listener count across all events.
    pub fn listener_count(&self) -> usize {
        self.listeners.values().map(|v| v.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use std::sync::Arc;

    fn handler() -> EventHandler {
        Arc::new(|_ctx: EventContext| async { anyhow::Ok(()) }.boxed())
    }

    #[test]
    fn test_event_names() {
        for event in ServerEvent::ALL {
            assert_eq!(event.name().parse::<ServerEvent>().unwrap(), event);
        }
        assert_eq!(
            "on_explosion".parse::<ServerEvent>().unwrap_err(),
            RegistrationError::UnknownEvent("on_explosion".into())
        );
    }

    #[test]
    fn test_event_bus_registration() {
        let mut bus = EventBus::new();
        bus.register(ServerEvent::Message, "chat-bridge", handler());
        bus.register(ServerEvent::Message, "logger", handler());
        bus.register(ServerEvent::PlayerJoin, "logger", handler());

        let listeners = bus.get_listeners(ServerEvent::Message);
        assert_eq!(listeners.len(), 2);
        assert_eq!(listeners[0].owner, "chat-bridge");
        assert_eq!(listeners[1].owner, "logger");
        assert_eq!(bus.event_count(), 2);
        assert_eq!(bus.listener_count(), 3);
        assert!(bus.get_listeners(ServerEvent::ServerStop).is_empty());
    }

    #[test]
    fn test_listener_ids_are_unique() {
        let mut bus = EventBus::new();
        let id1 = bus.register(ServerEvent::Message, "mod1", handler());
        let id2 = bus.register(ServerEvent::Message, "mod2", handler());
        assert_ne!(id1, id2);
        assert!(bus.unregister(id1));
        assert!(!bus.unregister(id1));
        assert_eq!(bus.listener_count(), 1);
    }

    #[test]
    fn test_unregister_owner() {
        let mut bus = EventBus::new();
        bus.register(ServerEvent::Message, "logger", handler());
        bus.register(ServerEvent::PlayerDeath, "logger", handler());
        bus.register(ServerEvent::PlayerDeath, "stats", handler());
        assert_eq!(bus.unregister_owner("logger"), 2);
        assert_eq!(bus.listener_count(), 1);
        assert_eq!(bus.event_count(), 1);
    }
}
