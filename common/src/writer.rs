use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::codec::encode_payload;
use crate::metadata::ReplayMetadata;
use crate::packet::PacketRecord;
use crate::varint::encode_varint;
use crate::{FORMAT_VERSION, REPLAY_MAGIC};

/// Destination for container bytes.
///
/// The writer hands every sink the same chunk sequence, so all variants
/// produce byte-identical output for identical input.
pub trait ChunkSink {
    fn write_chunk(&mut self, chunk: &[u8]) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
}

/// Incremental buffered writes to a file on disk.
pub struct FileSink {
    out: BufWriter<File>,
}

impl FileSink {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("failed to create replay file {:?}", path))?;
        Ok(Self {
            out: BufWriter::new(file),
        })
    }
}

impl ChunkSink for FileSink {
    fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.out
            .write_all(chunk)
            .context("failed to write replay chunk to file")
    }

    fn flush(&mut self) -> Result<()> {
        self.out.flush().context("failed to flush replay file")
    }
}

/// Collects the container in memory.
#[derive(Default)]
pub struct MemorySink {
    bytes: Vec<u8>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl ChunkSink for MemorySink {
    fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.bytes.extend_from_slice(chunk);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Collects the container in memory and additionally hands every chunk to a
/// callback as it is produced.
pub struct StreamSink {
    bytes: Vec<u8>,
    on_chunk: Box<dyn FnMut(&[u8]) + Send>,
}

impl StreamSink {
    pub fn new(on_chunk: Box<dyn FnMut(&[u8]) + Send>) -> Self {
        Self {
            bytes: Vec::new(),
            on_chunk,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl ChunkSink for StreamSink {
    fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        (self.on_chunk)(chunk);
        self.bytes.extend_from_slice(chunk);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Appends packet records to a container: magic + version header, framed
/// records with delta-encoded timestamps, and a trailing metadata block
/// addressed by the final four length bytes.
pub struct ReplayWriter<S: ChunkSink> {
    sink: S,
    last_timestamp_ms: u64,
    header_written: bool,
    packets_written: u64,
}

impl ReplayWriter<FileSink> {
    pub fn create(path: &Path) -> Result<Self> {
        Ok(Self::new(FileSink::create(path)?))
    }
}

impl ReplayWriter<MemorySink> {
    pub fn in_memory() -> Self {
        Self::new(MemorySink::new())
    }
}

impl ReplayWriter<StreamSink> {
    pub fn streaming(on_chunk: Box<dyn FnMut(&[u8]) + Send>) -> Self {
        Self::new(StreamSink::new(on_chunk))
    }
}

impl<S: ChunkSink> ReplayWriter<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            last_timestamp_ms: 0,
            header_written: false,
            packets_written: 0,
        }
    }

    /// Emit magic and version. Must be called exactly once, before any
    /// packet.
    pub fn write_header(&mut self) -> Result<()> {
        if self.header_written {
            bail!("container header already written");
        }
        self.header_written = true;
        let mut header = Vec::with_capacity(REPLAY_MAGIC.len() + 1);
        header.extend_from_slice(REPLAY_MAGIC);
        header.push(FORMAT_VERSION);
        self.sink.write_chunk(&header)
    }

    /// Append one record. Timestamps must be non-decreasing; a packet older
    /// than its predecessor is a programming error upstream.
    pub fn write_packet(&mut self, record: &PacketRecord) -> Result<()> {
        if !self.header_written {
            bail!("write_header must be called before writing packets");
        }
        let Some(delta) = record.timestamp_ms.checked_sub(self.last_timestamp_ms) else {
            bail!(
                "packet timestamp {}ms precedes previous packet at {}ms",
                record.timestamp_ms,
                self.last_timestamp_ms
            );
        };
        let data = encode_payload(&record.payload)?;
        if data.len() > u32::MAX as usize {
            bail!("encoded payload of {} bytes exceeds frame limit", data.len());
        }
        self.last_timestamp_ms = record.timestamp_ms;

        let mut frame = Vec::with_capacity(data.len() + 10);
        encode_varint(delta, &mut frame);
        frame.push(record.kind.id());
        frame.extend_from_slice(&(data.len() as u32).to_le_bytes());
        frame.extend_from_slice(&data);
        self.sink.write_chunk(&frame)?;
        self.packets_written += 1;
        Ok(())
    }

    pub fn packets_written(&self) -> u64 {
        self.packets_written
    }

    /// Write the metadata block and its length suffix, flush, and return
    /// the sink.
    pub fn finish(mut self, metadata: &ReplayMetadata) -> Result<S> {
        if !self.header_written {
            bail!("cannot finish a container that has no header");
        }
        let blob = encode_payload(&metadata.to_payload())?;
        let mut tail = Vec::with_capacity(blob.len() + 4);
        tail.extend_from_slice(&blob);
        tail.extend_from_slice(&(blob.len() as u32).to_le_bytes());
        self.sink.write_chunk(&tail)?;
        self.sink.flush()?;
        Ok(self.sink)
    }
}
