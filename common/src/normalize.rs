use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::collections::HashMap;

use crate::payload::Payload;

const BLOB_TYPE_KEY: &str = "__type";
const BLOB_DATA_KEY: &str = "__data";
const BLOB_TYPE_TAG: &str = "Buffer";

/// Rewrite a payload so the binary encoder only ever sees scalars,
/// lists and string-keyed maps.
///
/// Byte blobs become a two-field envelope map
/// `{ "__type": "Buffer", "__data": <base64> }`, recursively through
/// containers. This is the compatibility bridge for encoders that do not
/// distinguish blobs from strings natively.
pub fn normalize(payload: &Payload) -> Payload {
    match payload {
        Payload::Bytes(data) => {
            let mut envelope = HashMap::with_capacity(2);
            envelope.insert(
                BLOB_TYPE_KEY.to_string(),
                Payload::Str(BLOB_TYPE_TAG.to_string()),
            );
            envelope.insert(BLOB_DATA_KEY.to_string(), Payload::Str(STANDARD.encode(data)));
            Payload::Map(envelope)
        }
        Payload::List(items) => Payload::List(items.iter().map(normalize).collect()),
        Payload::Map(fields) => Payload::Map(
            fields
                .iter()
                .map(|(key, value)| (key.clone(), normalize(value)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Reverse [`normalize`]: any map with exactly the blob-envelope shape is
/// materialized back into a byte blob.
pub fn denormalize(payload: Payload) -> Result<Payload> {
    match payload {
        Payload::Map(fields) => {
            if let Some(encoded) = blob_envelope(&fields) {
                let data = STANDARD
                    .decode(encoded)
                    .context("invalid base64 in byte-blob envelope")?;
                return Ok(Payload::Bytes(data));
            }
            let mut out = HashMap::with_capacity(fields.len());
            for (key, value) in fields {
                out.insert(key, denormalize(value)?);
            }
            Ok(Payload::Map(out))
        }
        Payload::List(items) => Ok(Payload::List(
            items.into_iter().map(denormalize).collect::<Result<_>>()?,
        )),
        other => Ok(other),
    }
}

fn blob_envelope(fields: &HashMap<String, Payload>) -> Option<&str> {
    if fields.len() != 2 {
        return None;
    }
    match (fields.get(BLOB_TYPE_KEY), fields.get(BLOB_DATA_KEY)) {
        (Some(Payload::Str(tag)), Some(Payload::Str(data))) if tag == BLOB_TYPE_TAG => Some(data),
        _ => None,
    }
}
