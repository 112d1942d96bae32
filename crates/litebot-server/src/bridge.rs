//! Listeners the in-game mods connect to.
//!
//! A session starts with an auth frame naming its server, then becomes that
//! server's bridge: outbound frames go through a single writer task, inbound
//! frames are dispatched in arrival order.

use crate::registry::ServerRegistry;
use crate::server::MinecraftServer;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use litebot_commands::{Dispatcher, InboundMessage, OutboundMessage, ServerLink};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, error, info, warn};

/// How long a new connection may take to authenticate.
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest line accepted on the raw TCP transport.
pub const MAX_LINE_LEN: usize = 1 << 20;

pub struct Bridge {
    registry: Arc<ServerRegistry>,
    dispatcher: Arc<Dispatcher>,
    secret: String,
}

impl Bridge {
    pub fn new(
        registry: Arc<ServerRegistry>,
        dispatcher: Arc<Dispatcher>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            secret: secret.into(),
        }
    }

    /// Accept WebSocket sessions (one JSON document per text frame).
    pub async fn listen_websocket(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((socket, peer)) => {
                    debug!("Bridge WebSocket connection from {}", peer);
                    let bridge = self.clone();
                    tokio::spawn(async move {
                        match tokio_tungstenite::accept_async(socket).await {
                            Ok(ws) => {
                                let (sink, stream) = ws.split();
                                let stream = stream.filter_map(|frame| async move {
                                    match frame {
                                        Ok(Message::Text(text)) => Some(Ok(text)),
                                        Ok(_) => None,
                                        Err(e) => Some(Err(e)),
                                    }
                                });
                                let sink = sink.with(|text: String| async move {
                                    Ok::<_, tokio_tungstenite::tungstenite::Error>(Message::Text(
                                        text,
                                    ))
                                });
                                bridge.serve(stream, sink, peer.to_string()).await;
                            }
                            Err(e) => debug!("WebSocket handshake with {} failed: {}", peer, e),
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept bridge connection: {}", e);
                }
            }
        }
    }

    /// Accept raw TCP sessions (one JSON document per line).
    pub async fn listen_tcp(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((socket, peer)) => {
                    debug!("Bridge TCP connection from {}", peer);
                    let bridge = self.clone();
                    tokio::spawn(async move {
                        let (sink, stream) = framed_lines(socket).split();
                        bridge.serve(stream, sink, peer.to_string()).await;
                    });
                }
                Err(e) => {
                    error!("Failed to accept bridge connection: {}", e);
                }
            }
        }
    }

    async fn serve<St, Si, E1, E2>(&self, stream: St, sink: Si, peer: String)
    where
        St: Stream<Item = Result<String, E1>> + Send,
        Si: Sink<String, Error = E2> + Send + 'static,
        E1: Display + Send,
        E2: Display + Send + 'static,
    {
        let mut stream = std::pin::pin!(stream);

        let server = match tokio::time::timeout(AUTH_TIMEOUT, self.authenticate(&mut stream)).await {
            Ok(Ok(server)) => server,
            Ok(Err(reason)) => {
                warn!("Bridge auth from {} rejected: {}", peer, reason);
                return;
            }
            Err(_) => {
                warn!("Bridge auth from {} timed out", peer);
                return;
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let attachment = server.attach(tx);
        let generation = attachment.generation;
        let mut replaced = attachment.replaced;
        info!("{} bridge connected from {}", server.name(), peer);
        server.send_message(self.dispatcher.command_tree());

        let writer_name = server.name().to_string();
        tokio::spawn(write_frames(rx, sink, writer_name));

        let link: Arc<dyn ServerLink> = server.clone();
        loop {
            let frame = tokio::select! {
                biased;
                _ = &mut replaced => {
                    info!("{} bridge session from {} superseded", server.name(), peer);
                    break;
                }
                frame = stream.next() => frame,
            };
            match frame {
                Some(Ok(text)) => self.dispatcher.dispatch(&link, &text).await,
                Some(Err(e)) => {
                    debug!("{} bridge read error: {}", server.name(), e);
                    break;
                }
                None => break,
            }
        }

        if server.detach(generation) {
            info!("{} bridge disconnected", server.name());
        } else {
            debug!("{} stale bridge session {} closed", server.name(), generation);
        }
    }

    async fn authenticate<St, E>(&self, stream: &mut St) -> Result<Arc<MinecraftServer>, String>
    where
        St: Stream<Item = Result<String, E>> + Unpin,
        E: Display,
    {
        let frame = match stream.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => return Err(e.to_string()),
            None => return Err("closed before auth".into()),
        };
        match InboundMessage::parse(&frame) {
            Ok(InboundMessage::Auth(auth)) => {
                if self.secret.is_empty() || auth.secret != self.secret {
                    return Err(format!("bad secret for '{}'", auth.server));
                }
                self.registry.get(&auth.server).map_err(|e| e.to_string())
            }
            Ok(_) => Err("first frame was not auth".into()),
            Err(e) => Err(e.to_string()),
        }
    }
}

fn framed_lines(socket: TcpStream) -> Framed<TcpStream, LinesCodec> {
    Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN))
}

async fn write_frames<Si, E>(mut rx: mpsc::UnboundedReceiver<OutboundMessage>, sink: Si, name: String)
where
    Si: Sink<String, Error = E>,
    E: Display,
{
    let mut sink = std::pin::pin!(sink);
    while let Some(message) = rx.recv().await {
        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to encode bridge frame for {}: {}", name, e);
                continue;
            }
        };
        if let Err(e) = sink.send(text).await {
            debug!("{} bridge write error: {}", name, e);
            break;
        }
    }
    let _ = sink.close().await;
}
