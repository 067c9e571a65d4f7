//! Capture files: command-stream decoding and the background file writer.

pub mod stream;
pub mod writer;

pub use stream::{CommandDecoder, DecodedCommand};
pub use writer::{CaptureFileWriter, CaptureMetadata};
