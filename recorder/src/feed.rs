use anyhow::{Context, Result};
use chrono::Utc;
use common::{
    FileSink, MemorySink, PacketKind, PacketRecord, Payload, ReplayMetadata, ReplayWriter,
    StreamSink,
};
use std::fmt;
use std::path::PathBuf;
use tokio::time::Instant;
use tracing::{debug, info};

/// Where the recording goes.
pub enum SaveMode {
    /// Write incrementally to a file.
    File(PathBuf),
    /// Collect the container in memory.
    Memory,
    /// Collect in memory and hand every chunk to a callback as it is
    /// produced.
    Stream(Box<dyn FnMut(&[u8]) + Send>),
}

impl fmt::Debug for SaveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaveMode::File(path) => f.debug_tuple("File").field(path).finish(),
            SaveMode::Memory => f.write_str("Memory"),
            SaveMode::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

#[derive(Debug)]
pub struct RecorderConfig {
    pub save_mode: SaveMode,
    pub bot_username: String,
    /// Game version the session runs against, stored in the metadata.
    pub version_tag: String,
    /// Log every dropped packet name.
    pub debug: bool,
}

/// The finished recording, per save mode.
#[derive(Debug)]
pub enum RecorderArtifact {
    File(PathBuf),
    Memory(Vec<u8>),
    Stream(Vec<u8>),
}

impl RecorderArtifact {
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            RecorderArtifact::File(_) => None,
            RecorderArtifact::Memory(bytes) | RecorderArtifact::Stream(bytes) => Some(bytes),
        }
    }
}

enum FeedWriter {
    File(ReplayWriter<FileSink>),
    Memory(ReplayWriter<MemorySink>),
    Stream(ReplayWriter<StreamSink>),
}

impl FeedWriter {
    fn write_header(&mut self) -> Result<()> {
        match self {
            FeedWriter::File(writer) => writer.write_header(),
            FeedWriter::Memory(writer) => writer.write_header(),
            FeedWriter::Stream(writer) => writer.write_header(),
        }
    }

    fn write_packet(&mut self, record: &PacketRecord) -> Result<()> {
        match self {
            FeedWriter::File(writer) => writer.write_packet(record),
            FeedWriter::Memory(writer) => writer.write_packet(record),
            FeedWriter::Stream(writer) => writer.write_packet(record),
        }
    }
}

/// Turns a packet source's events into container records.
///
/// Packets outside the recorded id table are dropped at this seam; admitted
/// packets are stamped with milliseconds since the feed was created. The
/// bot itself never appears in its own packet stream, so the first spawn
/// signal synthesizes a `named_entity_spawn` for it — the recorded
/// viewpoint actor has to be visible in playback.
pub struct ReplayFeed {
    writer: FeedWriter,
    output_path: Option<PathBuf>,
    recording_start: Instant,
    start_time_ms: i64,
    spawn_position: Option<(i32, i32, i32)>,
    bot_username: String,
    version_tag: String,
    debug: bool,
    packets_recorded: u64,
}

impl ReplayFeed {
    pub fn new(config: RecorderConfig) -> Result<Self> {
        let (writer, output_path) = match config.save_mode {
            SaveMode::File(path) => {
                let writer = ReplayWriter::create(&path)
                    .with_context(|| format!("failed to open recording output {:?}", path))?;
                (FeedWriter::File(writer), Some(path))
            }
            SaveMode::Memory => (FeedWriter::Memory(ReplayWriter::in_memory()), None),
            SaveMode::Stream(on_chunk) => {
                (FeedWriter::Stream(ReplayWriter::streaming(on_chunk)), None)
            }
        };

        let mut feed = Self {
            writer,
            output_path,
            recording_start: Instant::now(),
            start_time_ms: Utc::now().timestamp_millis(),
            spawn_position: None,
            bot_username: config.bot_username,
            version_tag: config.version_tag,
            debug: config.debug,
            packets_recorded: 0,
        };
        feed.writer.write_header()?;
        info!(bot = %feed.bot_username, "recording started");
        Ok(feed)
    }

    pub fn handle(&mut self, event: crate::SourceEvent) -> Result<()> {
        match event {
            crate::SourceEvent::Packet { name, payload } => self.record_packet(&name, payload),
            crate::SourceEvent::BotSpawned { position } => self.on_bot_spawned(position),
        }
    }

    fn record_packet(&mut self, name: &str, payload: Payload) -> Result<()> {
        let Some(kind) = PacketKind::from_name(name) else {
            if self.debug {
                debug!(name, "dropping packet type outside the recorded set");
            }
            return Ok(());
        };
        let record = PacketRecord::new(self.elapsed_ms(), kind, payload);
        self.writer
            .write_packet(&record)
            .with_context(|| format!("failed to record {} packet", name))?;
        self.packets_recorded += 1;
        Ok(())
    }

    fn on_bot_spawned(&mut self, position: (i32, i32, i32)) -> Result<()> {
        if self.spawn_position.is_some() {
            debug!("ignoring repeated spawn signal");
            return Ok(());
        }
        self.spawn_position = Some(position);
        info!(?position, "bot spawned");

        let payload = Payload::map([
            ("entityId", Payload::Int(0)),
            ("playerName", Payload::Str(self.bot_username.clone())),
            ("x", Payload::Int(position.0 as i64)),
            ("y", Payload::Int(position.1 as i64)),
            ("z", Payload::Int(position.2 as i64)),
        ]);
        self.record_packet("named_entity_spawn", payload)
    }

    fn elapsed_ms(&self) -> u64 {
        self.recording_start.elapsed().as_millis() as u64
    }

    pub fn packets_recorded(&self) -> u64 {
        self.packets_recorded
    }

    /// Close the container and return the finished recording.
    pub fn finish(self) -> Result<RecorderArtifact> {
        let metadata = ReplayMetadata {
            spawn_position: self.spawn_position.unwrap_or((0, 0, 0)),
            start_time_ms: self.start_time_ms,
            end_time_ms: Utc::now().timestamp_millis(),
            bot_username: self.bot_username,
            version_tag: self.version_tag,
        };
        info!(
            packets = self.packets_recorded,
            duration_ms = metadata.duration_ms(),
            "recording finished"
        );
        match self.writer {
            FeedWriter::File(writer) => {
                writer.finish(&metadata)?;
                let path = self
                    .output_path
                    .expect("file mode always has an output path");
                Ok(RecorderArtifact::File(path))
            }
            FeedWriter::Memory(writer) => {
                Ok(RecorderArtifact::Memory(writer.finish(&metadata)?.into_bytes()))
            }
            FeedWriter::Stream(writer) => {
                Ok(RecorderArtifact::Stream(writer.finish(&metadata)?.into_bytes()))
            }
        }
    }
}
