use litebot_commands::Dispatcher;
use litebot_server::{builtin, Bridge, Config, ServerRegistry};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting LiteBot server bridge...");

    let config_path = Config::path_from_env();
    let config = Config::load(&config_path)?;
    info!(
        "Config loaded from {}: {} server(s), websocket_port={}, tcp_port={:?}",
        config_path.display(),
        config.servers.len(),
        config.bridge.websocket_port,
        config.bridge.tcp_port
    );

    let registry = Arc::new(ServerRegistry::new(&config.servers)?);
    if registry.is_empty() {
        warn!("No servers configured; every bridge session will be rejected");
    }
    let dispatcher = Arc::new(Dispatcher::new());
    builtin::register(&dispatcher, registry.clone())?;

    let bridge = Arc::new(Bridge::new(
        registry.clone(),
        dispatcher.clone(),
        config.bridge.secret.clone(),
    ));

    if config.bridge.websocket_port != 0 {
        let addr = format!("{}:{}", config.bridge.bind, config.bridge.websocket_port);
        let listener = TcpListener::bind(&addr).await?;
        info!("Bridge WebSocket listening on {}", addr);
        tokio::spawn(bridge.clone().listen_websocket(listener));
    }
    if let Some(port) = config.bridge.tcp_port {
        let addr = format!("{}:{}", config.bridge.bind, port);
        let listener = TcpListener::bind(&addr).await?;
        info!("Bridge TCP listening on {}", addr);
        tokio::spawn(bridge.clone().listen_tcp(listener));
    }

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");
    registry.shutdown().await;
    info!("Shut down cleanly");
    Ok(())
}
