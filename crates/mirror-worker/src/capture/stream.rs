//! Splits the console's raw byte stream into whole commands.
//!
//! Every game opens with a message-size table (`0x35`). Its first payload
//! byte is the table's own length, followed by `(command, size u16 BE)`
//! triples giving the payload length of every other command. Until a table
//! has been seen the decoder cannot frame anything, so earlier bytes are
//! dropped.

use mirror_core::command::MESSAGE_SIZES;
use mirror_core::CommandRecord;
use std::collections::HashMap;
use tracing::{debug, warn};

/// One framed command: the decoded record plus its exact bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedCommand {
    pub record: CommandRecord,
    pub raw: Vec<u8>,
}

/// Incremental decoder. Partial commands are held until the rest arrives.
#[derive(Debug, Default)]
pub struct CommandDecoder {
    buffer: Vec<u8>,
    /// Payload sizes by command byte, from the latest size table.
    sizes: Option<HashMap<u8, usize>>,
}

impl CommandDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return every command it completes, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<DecodedCommand> {
        self.buffer.extend_from_slice(chunk);
        let mut out = Vec::new();
        let mut pos = 0;

        loop {
            if self.sizes.is_none() {
                match self.buffer[pos..].iter().position(|&b| b == MESSAGE_SIZES) {
                    Some(offset) => {
                        if offset > 0 {
                            debug!(skipped = offset, "discarding bytes before size table");
                        }
                        pos += offset;
                    }
                    None => {
                        pos = self.buffer.len();
                        break;
                    }
                }
            }

            let Some(&code) = self.buffer.get(pos) else {
                break;
            };

            let len = if code == MESSAGE_SIZES {
                match self.buffer.get(pos + 1) {
                    Some(&table_len) => 1 + table_len as usize,
                    None => break,
                }
            } else {
                match self.sizes.as_ref().and_then(|s| s.get(&code)) {
                    Some(&size) => 1 + size,
                    None => {
                        warn!(code, "unknown command, waiting for next size table");
                        self.sizes = None;
                        pos += 1;
                        continue;
                    }
                }
            };

            if self.buffer.len() - pos < len {
                break;
            }

            let raw = self.buffer[pos..pos + len].to_vec();
            pos += len;

            if code == MESSAGE_SIZES {
                self.sizes = Some(parse_size_table(&raw));
            }
            if let Some(record) = CommandRecord::decode(&raw) {
                out.push(DecodedCommand { record, raw });
            }
        }

        self.buffer.drain(..pos);
        out
    }
}

fn parse_size_table(raw: &[u8]) -> HashMap<u8, usize> {
    raw.get(2..)
        .unwrap_or_default()
        .chunks_exact(3)
        .map(|t| (t[0], u16::from_be_bytes([t[1], t[2]]) as usize))
        .collect()
}
