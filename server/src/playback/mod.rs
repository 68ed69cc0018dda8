pub mod clock;
pub mod projection;
pub mod sync;

use common::{PacketRecord, ReplayMetadata};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::events::{EventSender, ReplayEvent};
use crate::viewer::{self, PacketSink, ViewerRegistry};
use clock::PlaybackClock;
use projection::WorldProjection;

/// Cadence of the pacing loop.
pub const TICK_INTERVAL: Duration = Duration::from_millis(20);

/// A progress event fires every this many consumed packets.
const PROGRESS_PACKET_INTERVAL: usize = 100;

/// Control surface of the playback task. All state mutation goes through
/// this channel so the engine only ever runs on one task.
pub enum PlaybackCommand {
    Start,
    Pause,
    SetSpeed(f32),
    Seek(u64),
    AttachViewer {
        username: String,
        uuid: Uuid,
        sink: Box<dyn PacketSink>,
        reply: oneshot::Sender<u32>,
    },
    RemoveViewer(u32),
    ViewerChat {
        session_id: u32,
        message: String,
    },
    SendChat {
        session_id: u32,
        message: String,
    },
    BroadcastChat(String),
    SendActionBar {
        session_id: u32,
        message: String,
    },
    BroadcastActionBar(String),
    Status(oneshot::Sender<PlaybackStatus>),
}

#[derive(Debug, Clone)]
pub struct PlaybackStatus {
    pub playing: bool,
    pub current_time_ms: u64,
    pub duration_ms: u64,
    pub cursor: usize,
    pub packet_count: usize,
    pub speed: f32,
    pub viewer_count: usize,
}

/// Owns the loaded packet log, the pacing clock, the world projection and
/// the connected viewers.
///
/// The packet log is read-only after load. The projection is rebuilt on
/// seek, never shared; every entry point below is called serially from the
/// playback task.
pub struct PlaybackEngine {
    packets: Vec<PacketRecord>,
    metadata: ReplayMetadata,
    clock: PlaybackClock,
    cursor: usize,
    ended: bool,
    projection: WorldProjection,
    viewers: ViewerRegistry,
    events: EventSender,
    max_players: u32,
}

impl PlaybackEngine {
    pub fn new(
        packets: Vec<PacketRecord>,
        metadata: ReplayMetadata,
        max_players: u32,
        events: EventSender,
    ) -> Self {
        Self {
            packets,
            metadata,
            clock: PlaybackClock::new(),
            cursor: 0,
            ended: false,
            projection: WorldProjection::new(),
            viewers: ViewerRegistry::new(),
            events,
            max_players,
        }
    }

    pub fn start_playback(&mut self) {
        if self.clock.is_playing() {
            return;
        }
        self.clock.start();
        info!(time_ms = self.clock.current_time_ms(), "playback started");
        self.emit(ReplayEvent::PlaybackStarted);
    }

    pub fn pause_playback(&mut self) {
        if !self.clock.is_playing() {
            return;
        }
        self.clock.pause();
        info!(time_ms = self.clock.current_time_ms(), "playback paused");
        self.emit(ReplayEvent::PlaybackPaused);
    }

    pub fn set_playback_speed(&mut self, speed: f32) {
        let (old, new) = self.clock.set_speed(speed);
        info!(old, new, "playback speed changed");
        self.emit(ReplayEvent::PlaybackSpeed { old, new });
    }

    /// Jump to a point in the recording, rebuilding the projection from the
    /// start of the log and resynchronizing every connected viewer. The
    /// playing/paused polarity is preserved.
    pub fn seek_to_time(&mut self, time_ms: u64) {
        let was_playing = self.clock.is_playing();
        self.clock.pause();
        let from_ms = self.clock.current_time_ms();
        let target = time_ms.min(self.metadata.duration_ms());

        self.projection.clear();
        self.cursor = 0;
        while self.cursor < self.packets.len()
            && self.packets[self.cursor].timestamp_ms <= target
        {
            self.projection.apply(&self.packets[self.cursor]);
            self.cursor += 1;
        }

        self.clock.set_time_ms(target);
        self.ended = false;

        for session in self.viewers.iter() {
            sync::resync_viewer(
                session,
                &self.projection,
                self.metadata.spawn_position,
                true,
                &self.events,
            );
        }

        info!(from_ms, to_ms = target, cursor = self.cursor, "seek complete");
        self.emit(ReplayEvent::PlaybackSeek {
            from_ms,
            to_ms: target,
        });

        if was_playing {
            self.clock.start();
        }
    }

    /// One pacing-loop iteration: emit every record that is due at the
    /// current virtual time, updating the projection as the cursor advances.
    pub fn tick(&mut self) {
        if !self.clock.is_playing() {
            return;
        }
        let now_ms = self.clock.current_time_ms();
        while self.cursor < self.packets.len()
            && self.packets[self.cursor].timestamp_ms <= now_ms
        {
            self.emit_record(self.cursor);
            self.projection.apply(&self.packets[self.cursor]);
            self.cursor += 1;

            if self.cursor % PROGRESS_PACKET_INTERVAL == 0 {
                self.emit(ReplayEvent::PlaybackProgress {
                    cursor: self.cursor,
                    total: self.packets.len(),
                    time_ms: now_ms,
                });
            }
        }

        if self.cursor >= self.packets.len() && !self.ended {
            self.clock.pause();
            self.ended = true;
            info!("playback reached the end of the recording");
            self.emit(ReplayEvent::PlaybackEnded);
        }
    }

    fn emit_record(&self, index: usize) {
        let record = &self.packets[index];
        let name = record.kind.name();
        for session in self.viewers.iter() {
            if let Err(err) = session.sink.write(name, record.payload.clone()) {
                self.emit(ReplayEvent::EmitError {
                    context: format!("packet_replay:{}", name),
                    message: err.to_string(),
                });
            }
        }
    }

    /// Register a new viewer, run the protocol handshake and, when playback
    /// is already under way, bring them up to the present.
    pub fn attach_viewer(
        &mut self,
        username: String,
        uuid: Uuid,
        sink: Box<dyn PacketSink>,
    ) -> u32 {
        let id = self.viewers.insert(username.clone(), uuid, sink);
        if let Some(session) = self.viewers.get(id) {
            sync::handshake(
                session,
                self.max_players,
                self.metadata.spawn_position,
                &self.events,
            );
            if self.clock.is_playing() {
                sync::resync_viewer(
                    session,
                    &self.projection,
                    self.metadata.spawn_position,
                    false,
                    &self.events,
                );
            }
        }
        info!(session_id = id, username = %username, "viewer joined");
        self.emit(ReplayEvent::ViewerJoined {
            session_id: id,
            username,
        });
        id
    }

    pub fn remove_viewer(&mut self, id: u32) {
        if let Some(session) = self.viewers.remove(id) {
            info!(session_id = id, username = %session.username, "viewer left");
            self.emit(ReplayEvent::ViewerLeft {
                session_id: id,
                username: session.username,
            });
        }
    }

    fn viewer_chat(&mut self, session_id: u32, message: String) {
        let Some(username) = self.viewers.get(session_id).map(|s| s.username.clone()) else {
            warn!(session_id, "chat from unknown viewer session");
            return;
        };
        self.broadcast_chat(&format!("<{}> {}", username, message));
        self.emit(ReplayEvent::ViewerChat {
            session_id,
            username,
            message,
        });
    }

    pub fn send_chat(&self, session_id: u32, message: &str) {
        if let Some(session) = self.viewers.get(session_id) {
            viewer::send_chat(session, message);
        }
    }

    pub fn broadcast_chat(&self, message: &str) {
        for session in self.viewers.iter() {
            viewer::send_chat(session, message);
        }
    }

    pub fn send_action_bar(&self, session_id: u32, message: &str) {
        if let Some(session) = self.viewers.get(session_id) {
            viewer::send_action_bar(session, message);
        }
    }

    pub fn broadcast_action_bar(&self, message: &str) {
        for session in self.viewers.iter() {
            viewer::send_action_bar(session, message);
        }
    }

    /// Drop every session, telling each client why.
    pub fn disconnect_all(&mut self, reason: &str) {
        for session in self.viewers.drain() {
            session.sink.disconnect(reason);
            self.emit(ReplayEvent::ViewerLeft {
                session_id: session.id,
                username: session.username,
            });
        }
    }

    pub fn status(&self) -> PlaybackStatus {
        PlaybackStatus {
            playing: self.clock.is_playing(),
            current_time_ms: self.clock.current_time_ms(),
            duration_ms: self.metadata.duration_ms(),
            cursor: self.cursor,
            packet_count: self.packets.len(),
            speed: self.clock.speed(),
            viewer_count: self.viewers.len(),
        }
    }

    pub fn projection(&self) -> &WorldProjection {
        &self.projection
    }

    pub fn handle_command(&mut self, command: PlaybackCommand) {
        match command {
            PlaybackCommand::Start => self.start_playback(),
            PlaybackCommand::Pause => self.pause_playback(),
            PlaybackCommand::SetSpeed(speed) => self.set_playback_speed(speed),
            PlaybackCommand::Seek(time_ms) => self.seek_to_time(time_ms),
            PlaybackCommand::AttachViewer {
                username,
                uuid,
                sink,
                reply,
            } => {
                let id = self.attach_viewer(username, uuid, sink);
                let _ = reply.send(id);
            }
            PlaybackCommand::RemoveViewer(id) => self.remove_viewer(id),
            PlaybackCommand::ViewerChat {
                session_id,
                message,
            } => self.viewer_chat(session_id, message),
            PlaybackCommand::SendChat {
                session_id,
                message,
            } => self.send_chat(session_id, &message),
            PlaybackCommand::BroadcastChat(message) => self.broadcast_chat(&message),
            PlaybackCommand::SendActionBar {
                session_id,
                message,
            } => self.send_action_bar(session_id, &message),
            PlaybackCommand::BroadcastActionBar(message) => self.broadcast_action_bar(&message),
            PlaybackCommand::Status(reply) => {
                let _ = reply.send(self.status());
            }
        }
    }

    fn emit(&self, event: ReplayEvent) {
        let _ = self.events.send(event);
    }
}

/// Drive the engine until shutdown. Commands and ticks are interleaved on
/// one task, which is what makes the lock-free engine sound.
pub async fn run_playback_loop(
    mut engine: PlaybackEngine,
    mut commands: mpsc::Receiver<PlaybackCommand>,
    cancellation_token: CancellationToken,
) {
    let mut interval = tokio::time::interval(TICK_INTERVAL);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancellation_token.cancelled() => {
                info!("playback loop shutdown received");
                engine.disconnect_all("Server closing");
                break;
            }

            Some(command) = commands.recv() => {
                engine.handle_command(command);
            }

            _ = interval.tick() => {
                engine.tick();
            }
        }
    }
    debug!("playback loop exited");
}
