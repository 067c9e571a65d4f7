//! Outward event streams: log, error, file-ready and status-change.
//!
//! The channels are unbounded. Nothing here applies backpressure; the host is
//! expected to drain all four streams promptly.

use mirror_core::{FileReady, MirrorError, StatusChange, StatusUpdate};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Receiving ends of the four event streams, handed to the host.
#[derive(Debug)]
pub struct EventStreams {
    pub log: mpsc::UnboundedReceiver<String>,
    pub errors: mpsc::UnboundedReceiver<MirrorError>,
    pub file_ready: mpsc::UnboundedReceiver<FileReady>,
    pub status: mpsc::UnboundedReceiver<StatusChange>,
}

/// Sending ends, owned by the orchestrator.
#[derive(Debug, Clone)]
pub(crate) struct EventEmitter {
    log_tx: mpsc::UnboundedSender<String>,
    error_tx: mpsc::UnboundedSender<MirrorError>,
    file_tx: mpsc::UnboundedSender<FileReady>,
    status_tx: mpsc::UnboundedSender<StatusChange>,
}

pub(crate) fn channel() -> (EventEmitter, EventStreams) {
    let (log_tx, log) = mpsc::unbounded_channel();
    let (error_tx, errors) = mpsc::unbounded_channel();
    let (file_tx, file_ready) = mpsc::unbounded_channel();
    let (status_tx, status) = mpsc::unbounded_channel();
    (
        EventEmitter {
            log_tx,
            error_tx,
            file_tx,
            status_tx,
        },
        EventStreams {
            log,
            errors,
            file_ready,
            status,
        },
    )
}

// A closed receiver means the host stopped listening; events are dropped.
impl EventEmitter {
    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        debug!(%message, "mirror log");
        let _ = self.log_tx.send(message);
    }

    pub fn error(&self, error: MirrorError) {
        warn!(error = %error, "mirror error");
        let _ = self.error_tx.send(error);
    }

    pub fn file_ready(&self, ready: FileReady) {
        debug!(session_id = %ready.session_id, path = %ready.file_path, "file ready for playback");
        let _ = self.file_tx.send(ready);
    }

    pub fn status(&self, address: &str, info: StatusUpdate) {
        let _ = self.status_tx.send(StatusChange {
            address: address.to_string(),
            info,
        });
    }
}
