use common::{PacketKind, PacketRecord, Payload};
use std::collections::{HashMap, HashSet, VecDeque};

/// Number of recent packets retained for post-join continuity.
pub const RECENT_RING_CAPACITY: usize = 1000;

/// The minimum world state needed to bring a late-joining viewer up to the
/// current point of the replay: live chunks, live entities, the player-list
/// log, and a bounded ring of recent packets.
///
/// The projection depends only on the prefix of records applied to it, so a
/// seek rebuilds it from scratch. Two deliberate approximations: the
/// `player_info` log accumulates rather than resolving to a roster, and
/// chunk unloads are not modeled (a stale chunk is merely over-sent).
#[derive(Debug, Default)]
pub struct WorldProjection {
    chunks: HashMap<(i64, i64), PacketRecord>,
    bulk_chunks: Vec<PacketRecord>,
    entity_ids: HashSet<i64>,
    player_info_log: Vec<PacketRecord>,
    named_spawns: Vec<PacketRecord>,
    living_spawns: Vec<PacketRecord>,
    object_spawns: Vec<PacketRecord>,
    recent: VecDeque<PacketRecord>,
}

impl WorldProjection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, record: &PacketRecord) {
        match record.kind {
            PacketKind::MapChunk => {
                let x = record.payload.get("x").and_then(Payload::as_i64);
                let z = record.payload.get("z").and_then(Payload::as_i64);
                if let (Some(x), Some(z)) = (x, z) {
                    self.chunks.insert((x, z), record.clone());
                }
            }
            PacketKind::MapChunkBulk => self.bulk_chunks.push(record.clone()),
            PacketKind::NamedEntitySpawn => {
                self.track_entity(record);
                self.named_spawns.push(record.clone());
            }
            PacketKind::SpawnEntityLiving => {
                self.track_entity(record);
                self.living_spawns.push(record.clone());
            }
            PacketKind::SpawnEntity => {
                self.track_entity(record);
                self.object_spawns.push(record.clone());
            }
            PacketKind::EntityDestroy => {
                if let Some(ids) = record.payload.get("entityIds").and_then(Payload::as_list) {
                    for id in ids {
                        if let Some(id) = id.as_i64() {
                            self.entity_ids.remove(&id);
                        }
                    }
                }
            }
            PacketKind::PlayerInfo => self.player_info_log.push(record.clone()),
            _ => {}
        }

        self.recent.push_back(record.clone());
        if self.recent.len() > RECENT_RING_CAPACITY {
            self.recent.pop_front();
        }
    }

    fn track_entity(&mut self, record: &PacketRecord) {
        if let Some(id) = record.payload.get("entityId").and_then(Payload::as_i64) {
            self.entity_ids.insert(id);
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn chunks(&self) -> impl Iterator<Item = &PacketRecord> {
        self.chunks.values()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn bulk_chunks(&self) -> &[PacketRecord] {
        &self.bulk_chunks
    }

    pub fn entity_ids(&self) -> &HashSet<i64> {
        &self.entity_ids
    }

    pub fn player_info_log(&self) -> &[PacketRecord] {
        &self.player_info_log
    }

    /// Every live spawn record, grouped by kind: players, then living
    /// entities, then objects.
    pub fn spawn_log(&self) -> impl Iterator<Item = &PacketRecord> {
        self.named_spawns
            .iter()
            .chain(self.living_spawns.iter())
            .chain(self.object_spawns.iter())
    }

    pub fn recent(&self) -> impl Iterator<Item = &PacketRecord> {
        self.recent.iter()
    }

    pub fn recent_len(&self) -> usize {
        self.recent.len()
    }
}
