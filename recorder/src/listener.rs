use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::feed::{RecorderArtifact, ReplayFeed};
use crate::SourceEvent;

/// Drain a packet source into the feed until the source closes or shutdown
/// is requested, then close the container.
///
/// A write failure is fatal to the recording and propagates; the half-written
/// file is left behind for inspection.
pub async fn run_recorder(
    mut feed: ReplayFeed,
    mut source: mpsc::Receiver<SourceEvent>,
    cancellation_token: CancellationToken,
) -> Result<RecorderArtifact> {
    loop {
        tokio::select! {
            biased;
            _ = cancellation_token.cancelled() => {
                info!("recorder shutdown received");
                break;
            }

            event = source.recv() => {
                match event {
                    Some(event) => {
                        feed.handle(event).context("failed to record packet")?;
                    }
                    None => {
                        info!("packet source closed");
                        break;
                    }
                }
            }
        }
    }
    feed.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{RecorderConfig, SaveMode};
    use common::{PacketKind, Payload, ReplayReader};

    #[tokio::test]
    async fn drains_the_source_until_it_closes() {
        let feed = ReplayFeed::new(RecorderConfig {
            save_mode: SaveMode::Memory,
            bot_username: "bot".into(),
            version_tag: "1.8.9".into(),
            debug: false,
        })
        .unwrap();

        let (tx, rx) = mpsc::channel(16);
        let token = CancellationToken::new();
        let recorder = tokio::spawn(run_recorder(feed, rx, token));

        tx.send(SourceEvent::BotSpawned { position: (1, 2, 3) })
            .await
            .unwrap();
        tx.send(SourceEvent::Packet {
            name: "chat".into(),
            payload: Payload::map([("msg", Payload::from("hi"))]),
        })
        .await
        .unwrap();
        drop(tx);

        let artifact = recorder.await.unwrap().unwrap();
        let bytes = artifact.into_bytes().unwrap();
        let reader = ReplayReader::from_bytes(bytes).unwrap();
        let records = reader.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kind, PacketKind::NamedEntitySpawn);
        assert_eq!(records[1].kind, PacketKind::Chat);
        assert_eq!(reader.metadata().spawn_position, (1, 2, 3));
    }

    #[tokio::test]
    async fn cancellation_finishes_the_recording() {
        let feed = ReplayFeed::new(RecorderConfig {
            save_mode: SaveMode::Memory,
            bot_username: "bot".into(),
            version_tag: "1.8.9".into(),
            debug: false,
        })
        .unwrap();

        let (tx, rx) = mpsc::channel(16);
        let token = CancellationToken::new();
        let recorder = tokio::spawn(run_recorder(feed, rx, token.clone()));

        tx.send(SourceEvent::Packet {
            name: "chat".into(),
            payload: Payload::map([("msg", Payload::from("hi"))]),
        })
        .await
        .unwrap();

        // give the loop a turn to drain before cancelling
        tokio::task::yield_now().await;
        token.cancel();

        let artifact = recorder.await.unwrap().unwrap();
        let reader = ReplayReader::from_bytes(artifact.into_bytes().unwrap()).unwrap();
        assert_eq!(reader.read_all().unwrap().len(), 1);
    }
}
