use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::payload::Payload;

/// Trailing metadata block of a replay container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayMetadata {
    /// Block coordinates of the recorded bot's spawn point.
    pub spawn_position: (i32, i32, i32),
    /// Epoch milliseconds when recording started.
    pub start_time_ms: i64,
    /// Epoch milliseconds when recording ended.
    pub end_time_ms: i64,
    pub bot_username: String,
    /// Game version the session was recorded against, e.g. "1.8.9".
    pub version_tag: String,
}

impl ReplayMetadata {
    pub fn duration_ms(&self) -> u64 {
        (self.end_time_ms - self.start_time_ms).max(0) as u64
    }

    /// Payload-map form used on disk (v1 key names are fixed).
    pub fn to_payload(&self) -> Payload {
        Payload::map([
            (
                "spawnPosition",
                Payload::List(vec![
                    Payload::Int(self.spawn_position.0 as i64),
                    Payload::Int(self.spawn_position.1 as i64),
                    Payload::Int(self.spawn_position.2 as i64),
                ]),
            ),
            ("startTime", Payload::Int(self.start_time_ms)),
            ("endTime", Payload::Int(self.end_time_ms)),
            ("botUsername", Payload::Str(self.bot_username.clone())),
            ("versionTag", Payload::Str(self.version_tag.clone())),
        ])
    }

    pub fn from_payload(payload: &Payload) -> Result<Self> {
        let spawn = payload
            .get("spawnPosition")
            .and_then(Payload::as_list)
            .context("metadata missing spawnPosition")?;
        if spawn.len() != 3 {
            bail!("spawnPosition must have exactly three components");
        }
        let coord = |index: usize| -> Result<i32> {
            Ok(spawn[index]
                .as_i64()
                .context("spawnPosition components must be integers")? as i32)
        };
        let start_time_ms = payload
            .get("startTime")
            .and_then(Payload::as_i64)
            .context("metadata missing startTime")?;
        let end_time_ms = payload
            .get("endTime")
            .and_then(Payload::as_i64)
            .context("metadata missing endTime")?;
        if end_time_ms < start_time_ms {
            bail!("metadata endTime precedes startTime");
        }
        Ok(Self {
            spawn_position: (coord(0)?, coord(1)?, coord(2)?),
            start_time_ms,
            end_time_ms,
            bot_username: payload
                .get("botUsername")
                .and_then(Payload::as_str)
                .context("metadata missing botUsername")?
                .to_string(),
            version_tag: payload
                .get("versionTag")
                .and_then(Payload::as_str)
                .context("metadata missing versionTag")?
                .to_string(),
        })
    }
}
