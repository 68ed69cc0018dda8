use anyhow::{bail, Context, Result};

use crate::normalize::{denormalize, normalize};
use crate::payload::Payload;

/// Encode a payload tree to the container's binary form.
///
/// The tree is normalized first so the underlying encoder never sees a raw
/// byte blob. The encoder itself is an implementation detail of this module;
/// the container framing only depends on the length prefix.
pub fn encode_payload(payload: &Payload) -> Result<Vec<u8>> {
    let normalized = normalize(payload);
    bincode::serde::encode_to_vec(&normalized, bincode::config::standard())
        .context("failed to encode packet payload")
}

/// Decode a payload tree previously produced by [`encode_payload`].
pub fn decode_payload(bytes: &[u8]) -> Result<Payload> {
    let (decoded, consumed): (Payload, usize) =
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .context("failed to decode packet payload")?;
    if consumed != bytes.len() {
        bail!("payload has {} trailing bytes", bytes.len() - consumed);
    }
    denormalize(decoded)
}
