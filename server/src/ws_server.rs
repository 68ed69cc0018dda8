use anyhow::{Context, Result};
use common::Payload;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tungstenite::Utf8Bytes;
use uuid::Uuid;

use crate::playback::PlaybackCommand;

/// Messages exchanged with a viewer client over the WebSocket transport.
///
/// The replay core only deals in `(name, payload)` frames; this enum is the
/// wire envelope the transport adapter speaks around them.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub enum ViewerMessage {
    // client → server
    Login {
        username: String,
        #[serde(default)]
        token: Option<String>,
    },
    Chat(String),
    Ping,
    StatusRequest,
    // server → client
    Pong,
    Status {
        motd: String,
        version: String,
        max_players: u32,
        online: u32,
    },
    Packet {
        name: String,
        payload: Payload,
    },
    Disconnect {
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct ViewerIdentity {
    pub username: String,
    pub uuid: Uuid,
}

/// Viewer authentication seam, for dependency injection. The server never
/// implements a real authentication backend; deployments that need one plug
/// it in here.
#[async_trait::async_trait]
pub trait ViewerAuthenticator: Send + Sync {
    async fn authenticate(&self, username: &str, token: Option<&str>) -> Result<ViewerIdentity>;
}

/// Offline mode: any username is accepted and assigned a fresh UUID.
pub struct OfflineAuthenticator;

#[async_trait::async_trait]
impl ViewerAuthenticator for OfflineAuthenticator {
    async fn authenticate(&self, username: &str, _token: Option<&str>) -> Result<ViewerIdentity> {
        Ok(ViewerIdentity {
            username: username.to_string(),
            uuid: Uuid::new_v4(),
        })
    }
}

/// Immutable configuration shared by every connection task.
pub struct ViewerServerContext {
    pub commands: mpsc::Sender<PlaybackCommand>,
    pub authenticator: Arc<dyn ViewerAuthenticator>,
    pub online_mode: bool,
    pub motd: String,
    pub version: String,
    pub max_players: u32,
}

// Connection state machine: a viewer must log in before anything else.
enum ConnectionState {
    AwaitingLogin,
    Joined { session_id: u32 },
}

/// Accept viewer connections until cancellation, then wait for every
/// connection task to finish.
///
/// A listener-level accept failure is fatal to the viewer server: every
/// connection is dropped and the error propagates to the caller. The
/// playback loop is untouched, so the server can still shut down cleanly.
pub async fn run_viewer_server(
    listener: TcpListener,
    context: Arc<ViewerServerContext>,
    cancellation_token: CancellationToken,
) -> Result<()> {
    let mut connection_handles: Vec<JoinHandle<Result<()>>> = Vec::new();
    // Connections hang off their own child token so a listener failure can
    // drop every viewer without cancelling the rest of the server.
    let connections_token = cancellation_token.child_token();

    let result = loop {
        tokio::select! {
            biased;
            _ = cancellation_token.cancelled() => {
                info!("viewer server shutdown received");
                break Ok(());
            }

            result = listener.accept() => {
                match result {
                    Ok((stream, peer_addr)) => {
                        info!("accepted viewer connection from {}", peer_addr);
                        let connection_token = connections_token.child_token();
                        let connection_context = context.clone();
                        let handle = tokio::spawn(handle_viewer_connection(
                            stream,
                            connection_context,
                            connection_token,
                        ));
                        connection_handles.push(handle);
                    }
                    Err(e) => {
                        error!("viewer listener failed: {}", e);
                        connections_token.cancel();
                        break Err(anyhow::Error::new(e).context("viewer listener failed"));
                    }
                }
            }
        }
    };

    info!(
        "waiting for {} viewer connections to shut down...",
        connection_handles.len()
    );
    for handle in connection_handles {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("viewer connection handler failed: {}", e),
            Err(e) => error!("viewer connection handler panicked: {}", e),
        }
    }
    info!("all viewer connections shut down");
    result
}

async fn handle_viewer_connection(
    stream: TcpStream,
    context: Arc<ViewerServerContext>,
    cancellation_token: CancellationToken,
) -> Result<()> {
    let peer_addr = stream.peer_addr()?;
    let mut ws_stream = tokio_tungstenite::accept_async(stream)
        .await
        .context("WebSocket handshake failed")?;

    // Outgoing frames are queued here; the playback loop writes into this
    // channel through the session's sink and never touches the socket.
    let (out_tx, mut out_rx) = mpsc::channel::<ViewerMessage>(256);
    let mut state = ConnectionState::AwaitingLogin;

    loop {
        tokio::select! {
            biased;

            _ = cancellation_token.cancelled() => {
                info!("notifying viewer {} of server shutdown", peer_addr);
                let notice = ViewerMessage::Disconnect { reason: "Server closing".to_string() };
                if let Ok(json) = serde_json::to_string(&notice) {
                    let _ = ws_stream.send(Message::Text(Utf8Bytes::from(json))).await;
                }
                break;
            }

            Some(outgoing) = out_rx.recv() => {
                let is_disconnect = matches!(outgoing, ViewerMessage::Disconnect { .. });
                let json = serde_json::to_string(&outgoing)?;
                if let Err(e) = ws_stream.send(Message::Text(Utf8Bytes::from(json))).await {
                    error!("failed to send frame to viewer {}: {}", peer_addr, e);
                    break;
                }
                if is_disconnect {
                    break;
                }
            }

            message = ws_stream.next() => {
                match message {
                    Some(Ok(msg)) => {
                        if msg.is_close() {
                            info!("viewer {} closed the connection", peer_addr);
                            break;
                        }
                        let text = match msg.to_text() {
                            Ok(text) => text,
                            Err(_) => continue,
                        };
                        let viewer_message: ViewerMessage = match serde_json::from_str(text) {
                            Ok(parsed) => parsed,
                            Err(e) => {
                                warn!("unparseable message from viewer {}: {}", peer_addr, e);
                                continue;
                            }
                        };

                        match handle_viewer_message(
                            viewer_message,
                            &mut state,
                            &context,
                            &out_tx,
                        ).await {
                            Ok(Flow::Continue) => {}
                            Ok(Flow::Close) => break,
                            Err(e) => {
                                warn!("viewer {} session error: {}", peer_addr, e);
                                let notice = ViewerMessage::Disconnect { reason: e.to_string() };
                                if let Ok(json) = serde_json::to_string(&notice) {
                                    let _ = ws_stream.send(Message::Text(Utf8Bytes::from(json))).await;
                                }
                                break;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        error!("error receiving from viewer {}: {}", peer_addr, e);
                        break;
                    }
                    None => {
                        info!("viewer {} stream ended", peer_addr);
                        break;
                    }
                }
            }
        }
    }

    let _ = ws_stream.close(None).await;

    if let ConnectionState::Joined { session_id } = state {
        let _ = context
            .commands
            .send(PlaybackCommand::RemoveViewer(session_id))
            .await;
    }
    Ok(())
}

enum Flow {
    Continue,
    Close,
}

async fn handle_viewer_message(
    message: ViewerMessage,
    state: &mut ConnectionState,
    context: &ViewerServerContext,
    out_tx: &mpsc::Sender<ViewerMessage>,
) -> Result<Flow> {
    match state {
        ConnectionState::AwaitingLogin => match message {
            ViewerMessage::Login { username, token } => {
                let identity = if context.online_mode {
                    context
                        .authenticator
                        .authenticate(&username, token.as_deref())
                        .await
                        .context("authentication failed")?
                } else {
                    ViewerIdentity {
                        username,
                        uuid: Uuid::new_v4(),
                    }
                };

                let (reply_tx, reply_rx) = oneshot::channel();
                context
                    .commands
                    .send(PlaybackCommand::AttachViewer {
                        username: identity.username,
                        uuid: identity.uuid,
                        sink: Box::new(crate::viewer::ChannelSink::new(out_tx.clone())),
                        reply: reply_tx,
                    })
                    .await
                    .map_err(|_| anyhow::anyhow!("playback loop is not running"))?;
                let session_id = reply_rx.await.context("playback loop dropped the session")?;
                *state = ConnectionState::Joined { session_id };
                Ok(Flow::Continue)
            }
            ViewerMessage::Ping => {
                let _ = out_tx.send(ViewerMessage::Pong).await;
                Ok(Flow::Continue)
            }
            ViewerMessage::StatusRequest => {
                let online = current_viewer_count(&context.commands).await;
                let _ = out_tx
                    .send(ViewerMessage::Status {
                        motd: context.motd.clone(),
                        version: context.version.clone(),
                        max_players: context.max_players,
                        online,
                    })
                    .await;
                Ok(Flow::Continue)
            }
            other => {
                warn!("message before login: {:?}", other);
                Ok(Flow::Continue)
            }
        },

        ConnectionState::Joined { session_id } => match message {
            ViewerMessage::Chat(text) => {
                context
                    .commands
                    .send(PlaybackCommand::ViewerChat {
                        session_id: *session_id,
                        message: text,
                    })
                    .await
                    .map_err(|_| anyhow::anyhow!("playback loop is not running"))?;
                Ok(Flow::Continue)
            }
            ViewerMessage::Ping => {
                let _ = out_tx.send(ViewerMessage::Pong).await;
                Ok(Flow::Continue)
            }
            ViewerMessage::StatusRequest => {
                let online = current_viewer_count(&context.commands).await;
                let _ = out_tx
                    .send(ViewerMessage::Status {
                        motd: context.motd.clone(),
                        version: context.version.clone(),
                        max_players: context.max_players,
                        online,
                    })
                    .await;
                Ok(Flow::Continue)
            }
            ViewerMessage::Disconnect { .. } => Ok(Flow::Close),
            other => {
                warn!("unexpected message after login: {:?}", other);
                Ok(Flow::Continue)
            }
        },
    }
}

async fn current_viewer_count(commands: &mpsc::Sender<PlaybackCommand>) -> u32 {
    let (reply_tx, reply_rx) = oneshot::channel();
    if commands
        .send(PlaybackCommand::Status(reply_tx))
        .await
        .is_err()
    {
        return 0;
    }
    match reply_rx.await {
        Ok(status) => status.viewer_count as u32,
        Err(_) => 0,
    }
}
