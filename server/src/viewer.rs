use anyhow::{anyhow, Result};
use common::Payload;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::ws_server::ViewerMessage;

/// Chat box slot in the client HUD.
pub const CHAT_POSITION: i64 = 0;
/// Above-hotbar slot in the client HUD.
pub const ACTION_BAR_POSITION: i64 = 2;

/// A packet-writing handle to one connected viewer.
///
/// Writes are best-effort and must never block the playback loop; a slow or
/// gone viewer loses packets rather than stalling everyone else.
pub trait PacketSink: Send {
    fn write(&self, name: &str, payload: Payload) -> Result<()>;
    fn disconnect(&self, reason: &str);
}

/// Production sink: queues frames onto the connection task's outgoing
/// channel.
pub struct ChannelSink {
    tx: mpsc::Sender<ViewerMessage>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<ViewerMessage>) -> Self {
        Self { tx }
    }
}

impl PacketSink for ChannelSink {
    fn write(&self, name: &str, payload: Payload) -> Result<()> {
        self.tx
            .try_send(ViewerMessage::Packet {
                name: name.to_string(),
                payload,
            })
            .map_err(|_| anyhow!("viewer channel is full or closed"))
    }

    fn disconnect(&self, reason: &str) {
        let _ = self.tx.try_send(ViewerMessage::Disconnect {
            reason: reason.to_string(),
        });
    }
}

pub struct ViewerSession {
    pub id: u32,
    pub username: String,
    pub uuid: Uuid,
    pub sink: Box<dyn PacketSink>,
}

/// Connected viewers, keyed by session id.
///
/// Owned by the playback task; every mutation runs serially on that task, so
/// no locking is needed.
#[derive(Default)]
pub struct ViewerRegistry {
    sessions: HashMap<u32, ViewerSession>,
    next_id: u32,
}

impl ViewerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, username: String, uuid: Uuid, sink: Box<dyn PacketSink>) -> u32 {
        self.next_id += 1;
        let id = self.next_id;
        self.sessions.insert(
            id,
            ViewerSession {
                id,
                username,
                uuid,
                sink,
            },
        );
        id
    }

    pub fn remove(&mut self, id: u32) -> Option<ViewerSession> {
        self.sessions.remove(&id)
    }

    pub fn get(&self, id: u32) -> Option<&ViewerSession> {
        self.sessions.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ViewerSession> {
        self.sessions.values()
    }

    pub fn drain(&mut self) -> Vec<ViewerSession> {
        self.sessions.drain().map(|(_, session)| session).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Send a chat-box message to one viewer.
pub fn send_chat(session: &ViewerSession, message: &str) {
    send_text(session, message, CHAT_POSITION);
}

/// Send an above-hotbar message to one viewer.
pub fn send_action_bar(session: &ViewerSession, message: &str) {
    send_text(session, message, ACTION_BAR_POSITION);
}

fn send_text(session: &ViewerSession, message: &str, position: i64) {
    let payload = Payload::map([
        (
            "message",
            Payload::Str(serde_json::json!({ "text": message }).to_string()),
        ),
        ("position", Payload::Int(position)),
    ]);
    if let Err(err) = session.sink.write("chat", payload) {
        warn!(
            session_id = session.id,
            error = %err,
            "failed to deliver chat message"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct TestSink {
        frames: Arc<Mutex<Vec<(String, Payload)>>>,
    }

    impl PacketSink for TestSink {
        fn write(&self, name: &str, payload: Payload) -> Result<()> {
            self.frames.lock().unwrap().push((name.to_string(), payload));
            Ok(())
        }

        fn disconnect(&self, _reason: &str) {}
    }

    #[test]
    fn registry_assigns_unique_ids() {
        let mut registry = ViewerRegistry::new();
        let a = registry.insert("a".into(), Uuid::new_v4(), Box::new(TestSink::default()));
        let b = registry.insert("b".into(), Uuid::new_v4(), Box::new(TestSink::default()));
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);

        let removed = registry.remove(a).unwrap();
        assert_eq!(removed.username, "a");
        assert!(registry.get(a).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn chat_frames_carry_position_and_json_body() {
        let sink = TestSink::default();
        let mut registry = ViewerRegistry::new();
        let id = registry.insert("a".into(), Uuid::new_v4(), Box::new(sink.clone()));
        let session = registry.get(id).unwrap();

        send_chat(session, "hello");
        send_action_bar(session, "now playing");

        let frames = sink.frames.lock().unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].0, "chat");
        assert_eq!(
            frames[0].1.get("position").and_then(Payload::as_i64),
            Some(CHAT_POSITION)
        );
        assert_eq!(
            frames[0].1.get("message").and_then(Payload::as_str),
            Some(r#"{"text":"hello"}"#)
        );
        assert_eq!(
            frames[1].1.get("position").and_then(Payload::as_i64),
            Some(ACTION_BAR_POSITION)
        );
    }
}
