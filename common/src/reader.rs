use anyhow::{ensure, Context, Result};
use std::fs;
use std::path::Path;

use crate::codec::decode_payload;
use crate::metadata::ReplayMetadata;
use crate::packet::{PacketKind, PacketRecord};
use crate::varint::decode_varint;
use crate::{FORMAT_VERSION, REPLAY_MAGIC};

/// Parses a replay container.
///
/// The whole file is loaded into memory on open and the descriptor released
/// immediately; record iteration is a pure in-memory walk between the header
/// and the trailing metadata block.
pub struct ReplayReader {
    data: Vec<u8>,
    records_start: usize,
    records_end: usize,
    metadata: ReplayMetadata,
}

impl ReplayReader {
    pub fn open(path: &Path) -> Result<Self> {
        let data =
            fs::read(path).with_context(|| format!("failed to read replay file {:?}", path))?;
        Self::from_bytes(data).with_context(|| format!("invalid replay file {:?}", path))
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let header_len = REPLAY_MAGIC.len() + 1;
        ensure!(
            data.len() >= header_len + 4,
            "file too short to be a replay container ({} bytes)",
            data.len()
        );
        ensure!(
            &data[..REPLAY_MAGIC.len()] == REPLAY_MAGIC,
            "bad magic: not a replay container"
        );
        let version = data[REPLAY_MAGIC.len()];
        ensure!(
            version == FORMAT_VERSION,
            "unsupported container version {}",
            version
        );

        let metadata_len =
            u32::from_le_bytes(data[data.len() - 4..].try_into().expect("4-byte suffix")) as usize;
        let records_end = data
            .len()
            .checked_sub(4 + metadata_len)
            .filter(|end| *end >= header_len)
            .context("metadata length exceeds file size")?;
        let metadata_payload = decode_payload(&data[records_end..data.len() - 4])
            .context("failed to decode replay metadata")?;
        let metadata = ReplayMetadata::from_payload(&metadata_payload)?;

        Ok(Self {
            data,
            records_start: header_len,
            records_end,
            metadata,
        })
    }

    pub fn metadata(&self) -> &ReplayMetadata {
        &self.metadata
    }

    /// Walk the packet stream in order, reconstructing absolute timestamps
    /// from the stored deltas.
    pub fn records(&self) -> RecordIter<'_> {
        RecordIter {
            data: &self.data[self.records_start..self.records_end],
            timestamp_ms: 0,
        }
    }

    pub fn read_all(&self) -> Result<Vec<PacketRecord>> {
        self.records().collect()
    }
}

pub struct RecordIter<'a> {
    data: &'a [u8],
    timestamp_ms: u64,
}

impl<'a> RecordIter<'a> {
    fn read_record(&mut self) -> Result<PacketRecord> {
        let (delta, varint_len) = decode_varint(self.data).context("truncated timestamp delta")?;
        let rest = &self.data[varint_len..];
        ensure!(rest.len() >= 5, "truncated record header");
        let id = rest[0];
        let kind =
            PacketKind::from_id(id).with_context(|| format!("unknown packet id {}", id))?;
        let data_len = u32::from_le_bytes(rest[1..5].try_into().expect("4-byte length")) as usize;
        let body = rest.get(5..5 + data_len).context("truncated record body")?;
        let payload = decode_payload(body)?;
        self.timestamp_ms += delta;
        self.data = &rest[5 + data_len..];
        Ok(PacketRecord {
            timestamp_ms: self.timestamp_ms,
            kind,
            payload,
        })
    }
}

impl<'a> Iterator for RecordIter<'a> {
    type Item = Result<PacketRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }
        match self.read_record() {
            Ok(record) => Some(Ok(record)),
            Err(err) => {
                // A corrupt record poisons the rest of the stream.
                self.data = &[];
                Some(Err(err))
            }
        }
    }
}
