use common::ReplayMetadata;
use std::net::SocketAddr;
use tokio::sync::broadcast;

/// Everything observable about a running replay server. Subscribers run on
/// their own tasks; the playback loop never blocks on them.
#[derive(Debug, Clone)]
pub enum ReplayEvent {
    ReplayLoaded {
        metadata: ReplayMetadata,
        packet_count: usize,
    },
    Listening {
        addr: SocketAddr,
    },
    ViewerJoined {
        session_id: u32,
        username: String,
    },
    ViewerLeft {
        session_id: u32,
        username: String,
    },
    ViewerChat {
        session_id: u32,
        username: String,
        message: String,
    },
    PlaybackStarted,
    PlaybackPaused,
    PlaybackSeek {
        from_ms: u64,
        to_ms: u64,
    },
    PlaybackSpeed {
        old: f32,
        new: f32,
    },
    PlaybackProgress {
        cursor: usize,
        total: usize,
        time_ms: u64,
    },
    PlaybackEnded,
    /// A single sink write failed. Tagged `sync:<name>` during a viewer
    /// resync and `packet_replay:<name>` during live emission.
    EmitError {
        context: String,
        message: String,
    },
    ServerError {
        message: String,
    },
}

pub type EventSender = broadcast::Sender<ReplayEvent>;

pub fn event_channel() -> (EventSender, broadcast::Receiver<ReplayEvent>) {
    broadcast::channel(256)
}
