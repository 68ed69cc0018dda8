use anyhow::{anyhow, Context, Result};
use common::{ReplayMetadata, ReplayReader};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::events::{event_channel, EventSender, ReplayEvent};
use crate::playback::{run_playback_loop, PlaybackCommand, PlaybackEngine, PlaybackStatus};
use crate::ws_server::{run_viewer_server, ViewerAuthenticator, ViewerServerContext};

/// Configuration for a replay server instance.
pub struct ReplayServerConfig {
    /// Path to the replay container to serve.
    pub file: PathBuf,
    /// Listen address, e.g. "127.0.0.1".
    pub host: String,
    /// Listen port; 0 picks a free one.
    pub port: u16,
    /// Version label reported to viewers. Defaults to the recording's tag.
    pub version: Option<String>,
    /// When true, logins go through the configured authenticator.
    pub online_mode: bool,
    /// MOTD shown to viewers. Defaults to a generated banner.
    pub motd: Option<String>,
    pub max_players: u32,
    pub authenticator: Arc<dyn ViewerAuthenticator>,
}

/// A running replay server: one playback task plus one accept loop, torn
/// down together through a shared cancellation token.
pub struct ReplayServer {
    addr: SocketAddr,
    metadata: ReplayMetadata,
    packet_count: usize,
    commands: mpsc::Sender<PlaybackCommand>,
    events: EventSender,
    /// Receiver created before the startup events fire, so they are not
    /// lost to the broadcast channel before anyone can subscribe. Handed
    /// out by the first [`ReplayServer::subscribe`] call.
    initial_events: Mutex<Option<broadcast::Receiver<ReplayEvent>>>,
    cancellation_token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl ReplayServer {
    /// Load the replay, bind the listener and start serving viewers.
    pub async fn start(config: ReplayServerConfig) -> Result<Self> {
        let reader = ReplayReader::open(&config.file)?;
        let metadata = reader.metadata().clone();
        let packets = reader.read_all().context("replay contains corrupt records")?;
        let packet_count = packets.len();
        info!(
            packets = packet_count,
            duration_ms = metadata.duration_ms(),
            bot = %metadata.bot_username,
            "replay loaded"
        );

        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .with_context(|| format!("failed to bind {}:{}", config.host, config.port))?;
        let addr = listener.local_addr()?;

        let (events, initial_events) = event_channel();
        let _ = events.send(ReplayEvent::ReplayLoaded {
            metadata: metadata.clone(),
            packet_count,
        });

        let motd = config
            .motd
            .unwrap_or_else(|| format!("Replay Viewer\nDuration: {}", format_duration(metadata.duration_ms())));
        let version = config
            .version
            .unwrap_or_else(|| metadata.version_tag.clone());

        let cancellation_token = CancellationToken::new();
        let (command_tx, command_rx) = mpsc::channel(64);
        let mut handles = Vec::new();

        let engine = PlaybackEngine::new(packets, metadata.clone(), config.max_players, events.clone());
        let playback_token = cancellation_token.clone();
        handles.push(tokio::spawn(run_playback_loop(
            engine,
            command_rx,
            playback_token,
        )));

        let context = Arc::new(ViewerServerContext {
            commands: command_tx.clone(),
            authenticator: config.authenticator,
            online_mode: config.online_mode,
            motd,
            version,
            max_players: config.max_players,
        });
        let accept_token = cancellation_token.clone();
        let accept_events = events.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = run_viewer_server(listener, context, accept_token).await {
                error!("viewer server error: {}", e);
                let _ = accept_events.send(ReplayEvent::ServerError {
                    message: e.to_string(),
                });
            }
        }));

        info!(%addr, "replay server listening");
        let _ = events.send(ReplayEvent::Listening { addr });

        Ok(Self {
            addr,
            metadata,
            packet_count,
            commands: command_tx,
            events,
            initial_events: Mutex::new(Some(initial_events)),
            cancellation_token,
            handles,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn metadata(&self) -> &ReplayMetadata {
        &self.metadata
    }

    pub fn packet_count(&self) -> usize {
        self.packet_count
    }

    /// Subscribe to server events. The first subscriber also receives the
    /// startup events (`ReplayLoaded`, `Listening`) that fired before it
    /// could attach; later subscribers start from the live stream.
    pub fn subscribe(&self) -> broadcast::Receiver<ReplayEvent> {
        if let Some(receiver) = self.initial_events.lock().unwrap().take() {
            return receiver;
        }
        self.events.subscribe()
    }

    pub async fn start_playback(&self) -> Result<()> {
        self.send(PlaybackCommand::Start).await
    }

    pub async fn pause_playback(&self) -> Result<()> {
        self.send(PlaybackCommand::Pause).await
    }

    pub async fn set_playback_speed(&self, speed: f32) -> Result<()> {
        self.send(PlaybackCommand::SetSpeed(speed)).await
    }

    pub async fn seek_to_time(&self, time_ms: u64) -> Result<()> {
        self.send(PlaybackCommand::Seek(time_ms)).await
    }

    pub async fn send_chat(&self, session_id: u32, message: &str) -> Result<()> {
        self.send(PlaybackCommand::SendChat {
            session_id,
            message: message.to_string(),
        })
        .await
    }

    pub async fn broadcast_chat(&self, message: &str) -> Result<()> {
        self.send(PlaybackCommand::BroadcastChat(message.to_string()))
            .await
    }

    pub async fn send_action_bar(&self, session_id: u32, message: &str) -> Result<()> {
        self.send(PlaybackCommand::SendActionBar {
            session_id,
            message: message.to_string(),
        })
        .await
    }

    pub async fn broadcast_action_bar(&self, message: &str) -> Result<()> {
        self.send(PlaybackCommand::BroadcastActionBar(message.to_string()))
            .await
    }

    pub async fn status(&self) -> Result<PlaybackStatus> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(PlaybackCommand::Status(reply_tx)).await?;
        reply_rx
            .await
            .map_err(|_| anyhow!("playback loop dropped the status request"))
    }

    async fn send(&self, command: PlaybackCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| anyhow!("playback loop is not running"))
    }

    /// Graceful shutdown: every viewer is disconnected with a reason, then
    /// both tasks are joined.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("shutting down replay server");
        self.cancellation_token.cancel();
        while let Some(handle) = self.handles.pop() {
            match tokio::time::timeout(Duration::from_secs(5), handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("task panicked during shutdown: {:?}", e),
                Err(_) => error!("task shutdown timed out"),
            }
        }
        info!("replay server shut down");
        Ok(())
    }
}

/// "m:ss" / "h:mm:ss" rendering for MOTD banners and logs.
pub fn format_duration(ms: u64) -> String {
    let total_seconds = ms / 1000;
    let seconds = total_seconds % 60;
    let minutes = (total_seconds / 60) % 60;
    let hours = total_seconds / 3600;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

/// Pick a free TCP port for tests.
pub fn get_available_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}
