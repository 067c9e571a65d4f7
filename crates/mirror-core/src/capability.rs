//! Capability traits for the collaborators a mirror session drives.
//!
//! Each capability reports back through an [`EventSink`] handed to it at
//! construction. Implementations must never call back synchronously into
//! the orchestrator; they only emit events.

use crate::command::CommandRecord;
use crate::error::{MirrorError, MirrorResult};
use crate::types::{ConnectionStatus, SceneSwitchSettings};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// An owned, boxed future that can be spawned onto the worker runtime.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Callback through which a capability publishes its events.
pub struct EventSink<T> {
    emit: Arc<dyn Fn(T) + Send + Sync>,
}

impl<T> EventSink<T> {
    pub fn new(emit: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self {
            emit: Arc::new(emit),
        }
    }

    pub fn emit(&self, event: T) {
        (self.emit)(event)
    }
}

impl<T> Clone for EventSink<T> {
    fn clone(&self) -> Self {
        Self {
            emit: Arc::clone(&self.emit),
        }
    }
}

impl<T> fmt::Debug for EventSink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EventSink")
    }
}

/// Events emitted by a console transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The connection was established.
    Connected,
    /// The console identified itself.
    Handshake { nickname: String },
    StatusChanged(ConnectionStatus),
    /// A chunk of the raw stream, in arrival order.
    Data(Vec<u8>),
    Error(MirrorError),
}

/// Connection to one console.
pub trait ConsoleTransport: Send {
    /// Start connecting. Progress and failures are reported as events.
    fn connect(&mut self, address: &str, port: u16);

    /// The transport's own view of its status.
    fn status(&self) -> ConnectionStatus;

    fn disconnect(&mut self) -> MirrorResult<()>;
}

/// Events emitted by a capture-file writer.
#[derive(Debug, Clone)]
pub enum WriterEvent {
    NewFile(PathBuf),
    FileComplete,
    Command(CommandRecord),
    Error(MirrorError),
}

/// Persists the raw stream as capture files.
pub trait CaptureWriter: Send {
    /// Queue bytes for writing. Never waits on disk.
    fn write(&mut self, data: &[u8]);

    /// Console nickname recorded alongside each capture file.
    fn update_nickname(&mut self, nickname: &str);

    /// Full path of the file currently open, if any.
    fn current_file_name(&self) -> Option<PathBuf>;

    /// Stop accepting data and finish the open file. The future resolves
    /// once everything queued is on disk; later writes are dropped.
    fn close(&mut self) -> BoxFuture<'static, ()>;
}

/// Log and error output of the relay and scene-switch collaborators.
#[derive(Debug, Clone)]
pub enum CollaboratorEvent {
    Log(String),
    Error(MirrorError),
}

/// Forwards the raw stream to remote spectators.
pub trait Relay: Send {
    fn write(&mut self, data: &[u8]);

    /// Drop everything buffered for late-joining spectators.
    fn clear_buffer(&mut self) -> BoxFuture<'static, MirrorResult<()>>;

    fn stop_relay(&mut self) -> MirrorResult<()>;
}

/// Which scene a switch should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwitchTarget {
    /// The live game source.
    Live,
    /// The between-games scene.
    Idle,
}

/// Broadcast scene automation driven by in-game events.
pub trait SceneSwitch: Send {
    /// Connect to the production software. Idempotent.
    fn connect(&mut self) -> BoxFuture<'static, MirrorResult<()>>;

    /// Switch to `target`, optionally after `delay`.
    fn trigger_switch(&mut self, target: SwitchTarget, delay: Option<Duration>);

    fn disconnect(&mut self) -> MirrorResult<()>;
}

/// Builds capability instances for new sessions.
///
/// Called on the worker's runtime, so implementations may spawn tasks.
pub trait CapabilityFactory: Send + Sync {
    fn console_transport(
        &self,
        events: EventSink<TransportEvent>,
    ) -> MirrorResult<Box<dyn ConsoleTransport>>;

    fn capture_writer(
        &self,
        folder: &Path,
        nickname: &str,
        events: EventSink<WriterEvent>,
    ) -> MirrorResult<Box<dyn CaptureWriter>>;

    fn relay(
        &self,
        session_id: &str,
        events: EventSink<CollaboratorEvent>,
    ) -> MirrorResult<Box<dyn Relay>>;

    fn scene_switch(
        &self,
        settings: &SceneSwitchSettings,
        events: EventSink<CollaboratorEvent>,
    ) -> MirrorResult<Box<dyn SceneSwitch>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn sink_clones_share_one_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let sink = EventSink::new(move |n: u32| seen_clone.lock().unwrap().push(n));
        let other = sink.clone();

        sink.emit(1);
        other.emit(2);

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }
}
