//! Decoded records from the console's event stream.
//!
//! Only the commands the orchestrator reacts to are decoded; everything else
//! is passed through as [`CommandRecord::Other`].

use serde::{Deserialize, Serialize};

/// Command byte of the payload size table that opens every game.
pub const MESSAGE_SIZES: u8 = 0x35;
pub const GAME_START: u8 = 0x36;
pub const PRE_FRAME_UPDATE: u8 = 0x37;
pub const POST_FRAME_UPDATE: u8 = 0x38;
pub const GAME_END: u8 = 0x39;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum CommandRecord {
    MessageSizes,
    GameStart,
    PostFrameUpdate { frame: Option<i32> },
    GameEnd { end_method: Option<u8> },
    Other { code: u8 },
}

impl CommandRecord {
    /// Decode a complete command (command byte followed by its payload).
    pub fn decode(raw: &[u8]) -> Option<Self> {
        let (&code, payload) = raw.split_first()?;
        let record = match code {
            MESSAGE_SIZES => CommandRecord::MessageSizes,
            GAME_START => CommandRecord::GameStart,
            POST_FRAME_UPDATE => CommandRecord::PostFrameUpdate {
                frame: payload
                    .get(..4)
                    .map(|b| i32::from_be_bytes([b[0], b[1], b[2], b[3]])),
            },
            GAME_END => CommandRecord::GameEnd {
                end_method: payload.first().copied(),
            },
            code => CommandRecord::Other { code },
        };
        Some(record)
    }
}
