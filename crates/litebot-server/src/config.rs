use litebot_protocol::TlsMode;
use serde::Deserialize;
use std::collections::HashSet;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "LITEBOT_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/litebot.toml";

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub servers: Vec<ServerEntry>,
}

/// Listeners the in-game mods connect to.
#[derive(Debug, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// WebSocket listener; `0` disables it.
    #[serde(default = "default_websocket_port")]
    pub websocket_port: u16,
    /// Newline-delimited JSON over TCP; off unless set.
    #[serde(default)]
    pub tcp_port: Option<u16>,
    /// Shared secret every mod must present in its auth frame.
    #[serde(default)]
    pub secret: String,
}

fn default_bind() -> String {
    "0.0.0.0".into()
}

fn default_websocket_port() -> u16 {
    8000
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            websocket_port: default_websocket_port(),
            tcp_port: None,
            secret: String::new(),
        }
    }
}

/// One `[[servers]]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerEntry {
    pub name: String,
    #[serde(default)]
    pub operator: bool,
    pub bridge_channel_id: u64,
    pub ip: IpAddr,
    #[serde(default = "default_query_port")]
    pub query_port: u16,
    #[serde(default = "default_rcon_port")]
    pub rcon_port: u16,
    pub rcon_password: String,
    #[serde(default)]
    pub rcon_tls: TlsMode,
    #[serde(default = "default_rcon_command_delay_ms")]
    pub rcon_command_delay_ms: u64,
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
}

fn default_query_port() -> u16 {
    25565
}

fn default_rcon_port() -> u16 {
    25575
}

fn default_rcon_command_delay_ms() -> u64 {
    3
}

fn default_query_timeout_secs() -> u64 {
    3
}

impl ServerEntry {
    pub fn rcon_command_delay(&self) -> Duration {
        Duration::from_millis(self.rcon_command_delay_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Self::parse(&contents)?
        } else {
            tracing::info!("No config file found at {}, using defaults", path.display());
            Self::default()
        };
        Ok(config)
    }

    /// Config path from `LITEBOT_CONFIG`, falling back to the default.
    pub fn path_from_env() -> std::path::PathBuf {
        std::env::var_os(CONFIG_ENV)
            .map(Into::into)
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.into())
    }

    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if !self.servers.is_empty() && self.bridge.secret.is_empty() {
            anyhow::bail!("[bridge] secret must be set when servers are configured");
        }
        let mut names = HashSet::new();
        let mut channels = HashSet::new();
        for server in &self.servers {
            if server.name.is_empty() {
                anyhow::bail!("Server name must not be empty");
            }
            if !names.insert(server.name.as_str()) {
                anyhow::bail!("Duplicate server name '{}'", server.name);
            }
            if !channels.insert(server.bridge_channel_id) {
                anyhow::bail!(
                    "Server '{}' reuses bridge channel {}",
                    server.name,
                    server.bridge_channel_id
                );
            }
        }
        Ok(())
    }
}
