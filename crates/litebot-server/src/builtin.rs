//! Commands and listeners every deployment gets.

use crate::registry::ServerRegistry;
use crate::status::{parse_mspt, tps_from_mspt, MSPT_COMMAND, TARGET_TPS};
use litebot_commands::{Dispatcher, RegistrationError, ServerCommand, ServerCommandContext, ServerEvent};
use litebot_types::TextComponent;
use std::sync::Arc;
use tracing::info;

const OWNER: &str = "builtin";

pub fn register(dispatcher: &Dispatcher, registry: Arc<ServerRegistry>) -> Result<(), RegistrationError> {
    dispatcher.register_command(
        ServerCommand::new("tps")
            .description("Show the server's ticks per second")
            .handler(tps),
    )?;

    dispatcher.register_command(
        ServerCommand::new("list")
            .description("List online players")
            .handler(move |ctx| list(registry.clone(), ctx)),
    )?;

    dispatcher.register_event(ServerEvent::Message, OWNER, |ctx| async move {
        let player = ctx.player().map(|p| p.name).unwrap_or_else(|| "?".into());
        if let Some(message) = ctx.message() {
            info!("[{}] <{}> {}", ctx.server.name(), player, message);
        }
        anyhow::Ok(())
    });
    Ok(())
}

async fn tps(ctx: ServerCommandContext) -> anyhow::Result<()> {
    let response = match ctx.server().rcon(MSPT_COMMAND).await {
        Ok(response) => response,
        Err(e) => {
            ctx.send(TextComponent::colored(e.to_string(), "red"));
            return Err(e);
        }
    };
    let Some(mspt) = parse_mspt(&response) else {
        ctx.send(TextComponent::colored("Could not read MSPT from the server", "red"));
        anyhow::bail!("unexpected MSPT reply: {:?}", response);
    };

    let tps = tps_from_mspt(mspt);
    let color = if tps >= TARGET_TPS {
        "green"
    } else if tps >= 15.0 {
        "yellow"
    } else {
        "red"
    };
    ctx.send(
        TextComponent::plain("TPS: ")
            .append(TextComponent::colored(format!("{:.1}", tps), color))
            .append(TextComponent::plain(format!(" MSPT: {:.1}", mspt))),
    );
    ctx.set_after_invoke("tps", tps)?;
    ctx.set_after_invoke("mspt", mspt)?;
    Ok(())
}

async fn list(registry: Arc<ServerRegistry>, ctx: ServerCommandContext) -> anyhow::Result<()> {
    let server = registry.get(ctx.server().name())?;
    let status = server.status().await;
    let text = if status.is_online() {
        let players = status.players();
        format!("{}/{}: {}", players.online, players.max, players.names.join(", "))
    } else {
        "offline".to_string()
    };
    ctx.send(TextComponent::plain(text));
    Ok(())
}
