use serde::{Deserialize, Serialize};

use crate::payload::Payload;

/// The fixed set of packet types stored in a v1 container, with their
/// on-disk ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketKind {
    MapChunk,
    MapChunkBulk,
    BlockChange,
    MultiBlockChange,
    NamedEntitySpawn,
    SpawnEntityLiving,
    SpawnEntity,
    EntityVelocity,
    EntityTeleport,
    EntityMoveLook,
    RelEntityMove,
    EntityLook,
    EntityHeadRotation,
    EntityDestroy,
    Chat,
    PlayerInfo,
    UpdateSign,
    Explosion,
    EntityEquipment,
    PlayerAbilities,
    EntityMetadata,
}

impl PacketKind {
    pub const ALL: [PacketKind; 21] = [
        PacketKind::MapChunk,
        PacketKind::MapChunkBulk,
        PacketKind::BlockChange,
        PacketKind::MultiBlockChange,
        PacketKind::NamedEntitySpawn,
        PacketKind::SpawnEntityLiving,
        PacketKind::SpawnEntity,
        PacketKind::EntityVelocity,
        PacketKind::EntityTeleport,
        PacketKind::EntityMoveLook,
        PacketKind::RelEntityMove,
        PacketKind::EntityLook,
        PacketKind::EntityHeadRotation,
        PacketKind::EntityDestroy,
        PacketKind::Chat,
        PacketKind::PlayerInfo,
        PacketKind::UpdateSign,
        PacketKind::Explosion,
        PacketKind::EntityEquipment,
        PacketKind::PlayerAbilities,
        PacketKind::EntityMetadata,
    ];

    /// One-byte id written in each record frame.
    pub fn id(self) -> u8 {
        match self {
            PacketKind::MapChunk => 1,
            PacketKind::MapChunkBulk => 2,
            PacketKind::BlockChange => 3,
            PacketKind::MultiBlockChange => 4,
            PacketKind::NamedEntitySpawn => 5,
            PacketKind::SpawnEntityLiving => 6,
            PacketKind::SpawnEntity => 7,
            PacketKind::EntityVelocity => 8,
            PacketKind::EntityTeleport => 9,
            PacketKind::EntityMoveLook => 10,
            PacketKind::RelEntityMove => 11,
            PacketKind::EntityLook => 12,
            PacketKind::EntityHeadRotation => 13,
            PacketKind::EntityDestroy => 14,
            PacketKind::Chat => 15,
            PacketKind::PlayerInfo => 16,
            PacketKind::UpdateSign => 17,
            PacketKind::Explosion => 18,
            PacketKind::EntityEquipment => 19,
            PacketKind::PlayerAbilities => 20,
            PacketKind::EntityMetadata => 21,
        }
    }

    pub fn from_id(id: u8) -> Option<PacketKind> {
        PacketKind::ALL.iter().copied().find(|kind| kind.id() == id)
    }

    /// Protocol-level packet name, as emitted by the packet source.
    pub fn name(self) -> &'static str {
        match self {
            PacketKind::MapChunk => "map_chunk",
            PacketKind::MapChunkBulk => "map_chunk_bulk",
            PacketKind::BlockChange => "block_change",
            PacketKind::MultiBlockChange => "multi_block_change",
            PacketKind::NamedEntitySpawn => "named_entity_spawn",
            PacketKind::SpawnEntityLiving => "spawn_entity_living",
            PacketKind::SpawnEntity => "spawn_entity",
            PacketKind::EntityVelocity => "entity_velocity",
            PacketKind::EntityTeleport => "entity_teleport",
            PacketKind::EntityMoveLook => "entity_move_look",
            PacketKind::RelEntityMove => "rel_entity_move",
            PacketKind::EntityLook => "entity_look",
            PacketKind::EntityHeadRotation => "entity_head_rotation",
            PacketKind::EntityDestroy => "entity_destroy",
            PacketKind::Chat => "chat",
            PacketKind::PlayerInfo => "player_info",
            PacketKind::UpdateSign => "update_sign",
            PacketKind::Explosion => "explosion",
            PacketKind::EntityEquipment => "entity_equipment",
            PacketKind::PlayerAbilities => "player_abilities",
            PacketKind::EntityMetadata => "entity_metadata",
        }
    }

    pub fn from_name(name: &str) -> Option<PacketKind> {
        PacketKind::ALL.iter().copied().find(|kind| kind.name() == name)
    }
}

/// A single `(timestamp, kind, payload)` triple as stored in the container.
///
/// Timestamps are milliseconds from recording start and non-decreasing
/// across a record stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketRecord {
    pub timestamp_ms: u64,
    pub kind: PacketKind,
    pub payload: Payload,
}

impl PacketRecord {
    pub fn new(timestamp_ms: u64, kind: PacketKind, payload: Payload) -> Self {
        Self {
            timestamp_ms,
            kind,
            payload,
        }
    }
}
