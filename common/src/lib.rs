mod codec;
mod metadata;
mod normalize;
mod packet;
mod payload;
mod reader;
mod varint;
mod writer;

pub use codec::{decode_payload, encode_payload};
pub use metadata::ReplayMetadata;
pub use normalize::{denormalize, normalize};
pub use packet::{PacketKind, PacketRecord};
pub use payload::Payload;
pub use reader::{RecordIter, ReplayReader};
pub use varint::{decode_varint, encode_varint};
pub use writer::{ChunkSink, FileSink, MemorySink, ReplayWriter, StreamSink};

/// Eight-byte identifier at offset 0 of every replay container.
pub const REPLAY_MAGIC: &[u8; 8] = b"MCREPLAY";

/// Container format version emitted and accepted by this crate.
pub const FORMAT_VERSION: u8 = 0x01;
