mod feed;
mod listener;

pub use feed::{RecorderArtifact, RecorderConfig, ReplayFeed, SaveMode};
pub use listener::run_recorder;

use common::Payload;

/// What the upstream packet source yields while a bot session runs: raw
/// server-to-client packets, plus a one-shot spawn signal carrying the bot's
/// initial position.
#[derive(Debug)]
pub enum SourceEvent {
    Packet { name: String, payload: Payload },
    BotSpawned { position: (i32, i32, i32) },
}
