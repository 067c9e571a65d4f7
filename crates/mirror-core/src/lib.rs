//! mirror-core: shared types for console mirroring.
//!
//! Provides the session configuration, status and playback records, decoded
//! stream commands, the error taxonomy, and the capability traits through
//! which a mirror session drives its console transport, capture writer,
//! spectator relay and scene-switch integration.

pub mod capability;
pub mod command;
pub mod error;
pub mod types;

use std::time::Duration;

// Re-export commonly used items at crate root.
pub use capability::{
    BoxFuture, CapabilityFactory, CaptureWriter, CollaboratorEvent, ConsoleTransport, EventSink,
    Relay, SceneSwitch, SwitchTarget, TransportEvent, WriterEvent,
};
pub use command::CommandRecord;
pub use error::{MirrorError, MirrorResult};
pub use types::{
    ConnectionStatus, FileReady, SceneSwitchSettings, SessionConfig, StatusChange, StatusUpdate,
};

/// Port consoles listen on when the session config does not override it.
pub const DEFAULT_CONSOLE_PORT: u16 = 51441;

/// Post-frame updates at or after this frame mean the game is about to be
/// visible (the tail of the loading screen).
pub const LIVE_FRAME_THRESHOLD: i32 = -60;

/// Game-end method reported when a game was aborted without a result.
pub const NO_CONTEST_END_METHOD: u8 = 7;

/// Delay before switching away from a finished game, long enough for the
/// end-of-game animation to settle.
pub const GAME_END_SWITCH_DELAY: Duration = Duration::from_millis(700);

/// First port used by spectator relays.
pub const DEFAULT_RELAY_BASE_PORT: u16 = 666;

pub const DEFAULT_OBS_PORT: u16 = 4455;

/// Nickname recorded until the console's handshake arrives.
pub const UNKNOWN_NICKNAME: &str = "unknown";
