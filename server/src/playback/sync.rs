use common::Payload;

use crate::events::{EventSender, ReplayEvent};
use crate::playback::projection::WorldProjection;
use crate::viewer::ViewerSession;

const SPECTATOR_GAME_MODE: i64 = 3;
const DIMENSION_OVERWORLD: i64 = 0;
const DIMENSION_NETHER: i64 = -1;

/// Initial frames for a freshly accepted viewer: a login frame reusing the
/// session id as a placeholder entity id, then the spawn point and a
/// position at it.
pub fn handshake(
    session: &ViewerSession,
    max_players: u32,
    spawn: (i32, i32, i32),
    events: &EventSender,
) {
    sync_write(session, events, "login", login_payload(session.id, max_players));
    sync_write(session, events, "spawn_position", spawn_position_payload(spawn));
    sync_write(session, events, "position", position_payload(spawn));
}

/// Bring one viewer's world in line with the projection.
///
/// With `clear_entities` (after a seek) the client first gets a
/// dimension-switch pair, which the target protocol version answers by
/// discarding all loaded chunks and entities without dropping the
/// connection, followed by fresh spawn frames. The recent ring is only
/// replayed on a fresh join; after a seek those packets are already part of
/// the rebuilt state.
pub fn resync_viewer(
    session: &ViewerSession,
    projection: &WorldProjection,
    spawn: (i32, i32, i32),
    clear_entities: bool,
    events: &EventSender,
) {
    if clear_entities {
        sync_write(session, events, "respawn", respawn_payload(DIMENSION_NETHER));
        sync_write(session, events, "respawn", respawn_payload(DIMENSION_OVERWORLD));
        sync_write(session, events, "spawn_position", spawn_position_payload(spawn));
        sync_write(session, events, "position", position_payload(spawn));
    }

    for record in projection.chunks() {
        sync_write(session, events, record.kind.name(), record.payload.clone());
    }
    for record in projection.bulk_chunks() {
        sync_write(session, events, record.kind.name(), record.payload.clone());
    }
    for record in projection.player_info_log() {
        sync_write(session, events, record.kind.name(), record.payload.clone());
    }
    for record in projection.spawn_log() {
        sync_write(session, events, record.kind.name(), record.payload.clone());
    }

    if !clear_entities {
        for record in projection.recent() {
            let name = record.kind.name();
            if let Err(err) = session.sink.write(name, record.payload.clone()) {
                let _ = events.send(ReplayEvent::EmitError {
                    context: format!("packet_replay:{}", name),
                    message: err.to_string(),
                });
            }
        }
    }
}

fn sync_write(session: &ViewerSession, events: &EventSender, name: &str, payload: Payload) {
    if let Err(err) = session.sink.write(name, payload) {
        let _ = events.send(ReplayEvent::EmitError {
            context: format!("sync:{}", name),
            message: err.to_string(),
        });
    }
}

fn login_payload(entity_id: u32, max_players: u32) -> Payload {
    Payload::map([
        ("entityId", Payload::Int(entity_id as i64)),
        ("gameMode", Payload::Int(SPECTATOR_GAME_MODE)),
        ("dimension", Payload::Int(DIMENSION_OVERWORLD)),
        ("maxPlayers", Payload::Int(max_players as i64)),
    ])
}

fn spawn_position_payload(spawn: (i32, i32, i32)) -> Payload {
    Payload::map([
        ("x", Payload::Int(spawn.0 as i64)),
        ("y", Payload::Int(spawn.1 as i64)),
        ("z", Payload::Int(spawn.2 as i64)),
    ])
}

fn position_payload(spawn: (i32, i32, i32)) -> Payload {
    Payload::map([
        ("x", Payload::Float(spawn.0 as f64)),
        ("y", Payload::Float(spawn.1 as f64)),
        ("z", Payload::Float(spawn.2 as f64)),
        ("yaw", Payload::Float(0.0)),
        ("pitch", Payload::Float(0.0)),
        ("flags", Payload::Int(0)),
    ])
}

fn respawn_payload(dimension: i64) -> Payload {
    Payload::map([
        ("dimension", Payload::Int(dimension)),
        ("gameMode", Payload::Int(SPECTATOR_GAME_MODE)),
    ])
}
