#![allow(dead_code)]

use anyhow::{anyhow, Result};
use common::{PacketKind, PacketRecord, Payload, ReplayMetadata};
use server::viewer::PacketSink;
use std::sync::{Arc, Mutex};

/// Sink that records every frame it is handed, for asserting emission order.
#[derive(Clone, Default)]
pub struct RecordingSink {
    frames: Arc<Mutex<Vec<(String, Payload)>>>,
    disconnects: Arc<Mutex<Vec<String>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<(String, Payload)> {
        self.frames.lock().unwrap().clone()
    }

    pub fn frame_names(&self) -> Vec<String> {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn disconnect_reasons(&self) -> Vec<String> {
        self.disconnects.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.frames.lock().unwrap().clear();
    }
}

impl PacketSink for RecordingSink {
    fn write(&self, name: &str, payload: Payload) -> Result<()> {
        self.frames
            .lock()
            .unwrap()
            .push((name.to_string(), payload));
        Ok(())
    }

    fn disconnect(&self, reason: &str) {
        self.disconnects.lock().unwrap().push(reason.to_string());
    }
}

/// Sink whose writes always fail, for error-path tests.
#[derive(Clone, Default)]
pub struct FailingSink;

impl PacketSink for FailingSink {
    fn write(&self, _name: &str, _payload: Payload) -> Result<()> {
        Err(anyhow!("connection reset"))
    }

    fn disconnect(&self, _reason: &str) {}
}

pub fn test_metadata(duration_ms: i64) -> ReplayMetadata {
    ReplayMetadata {
        spawn_position: (0, 64, 0),
        start_time_ms: 1_000,
        end_time_ms: 1_000 + duration_ms,
        bot_username: "bot".into(),
        version_tag: "1.8.9".into(),
    }
}

pub fn chat(ts: u64, text: &str) -> PacketRecord {
    PacketRecord::new(
        ts,
        PacketKind::Chat,
        Payload::map([("msg", Payload::from(text))]),
    )
}

pub fn map_chunk(ts: u64, x: i64, z: i64) -> PacketRecord {
    PacketRecord::new(
        ts,
        PacketKind::MapChunk,
        Payload::map([("x", Payload::Int(x)), ("z", Payload::Int(z))]),
    )
}

pub fn player_info(ts: u64) -> PacketRecord {
    PacketRecord::new(
        ts,
        PacketKind::PlayerInfo,
        Payload::map([("action", Payload::Int(0))]),
    )
}

pub fn spawn(ts: u64, kind: PacketKind, entity_id: i64) -> PacketRecord {
    PacketRecord::new(
        ts,
        kind,
        Payload::map([("entityId", Payload::Int(entity_id))]),
    )
}

pub fn destroy(ts: u64, entity_ids: &[i64]) -> PacketRecord {
    PacketRecord::new(
        ts,
        PacketKind::EntityDestroy,
        Payload::map([(
            "entityIds",
            Payload::List(entity_ids.iter().map(|id| Payload::Int(*id)).collect()),
        )]),
    )
}
