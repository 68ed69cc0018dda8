use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use server::events::ReplayEvent;
use server::replay_server::{format_duration, ReplayServer, ReplayServerConfig};
use server::ws_server::OfflineAuthenticator;

#[derive(Parser, Debug)]
#[command(
    name = "replay-server",
    about = "Serve a recorded packet replay to connecting viewers"
)]
struct Args {
    /// Path to the replay file to serve
    replay: PathBuf,

    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(long, default_value_t = 25565)]
    port: u16,

    /// MOTD shown to viewers (defaults to a generated banner)
    #[arg(long)]
    motd: Option<String>,

    #[arg(long, default_value_t = 20)]
    max_players: u32,

    /// Version label reported to viewers (defaults to the recording's)
    #[arg(long)]
    version: Option<String>,

    /// Require viewer authentication
    #[arg(long, default_value_t = false)]
    online_mode: bool,

    /// Begin playback immediately instead of waiting for a start command
    #[arg(long, default_value_t = false)]
    autoplay: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let args = Args::parse();

    let server = ReplayServer::start(ReplayServerConfig {
        file: args.replay,
        host: args.host,
        port: args.port,
        version: args.version,
        online_mode: args.online_mode,
        motd: args.motd,
        max_players: args.max_players,
        authenticator: Arc::new(OfflineAuthenticator),
    })
    .await?;

    info!(
        "serving {} packets recorded by {} ({} long) on {}",
        server.packet_count(),
        server.metadata().bot_username,
        format_duration(server.metadata().duration_ms()),
        server.addr()
    );

    if args.autoplay {
        server.start_playback().await?;
    }

    let mut events = server.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received");
                break;
            }
            event = events.recv() => match event {
                Ok(ReplayEvent::PlaybackEnded) => info!("playback finished"),
                Ok(ReplayEvent::ViewerJoined { username, .. }) => info!("{} joined", username),
                Ok(ReplayEvent::ViewerLeft { username, .. }) => info!("{} left", username),
                Ok(ReplayEvent::ViewerChat { username, message, .. }) => {
                    info!("<{}> {}", username, message);
                }
                Ok(ReplayEvent::EmitError { context, message }) => {
                    warn!("emit error [{}]: {}", context, message);
                }
                Ok(ReplayEvent::ServerError { message }) => {
                    error!("server error: {}", message);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("event subscriber lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    server.shutdown().await
}
