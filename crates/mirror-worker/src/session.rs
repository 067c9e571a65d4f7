//! The live state of one mirrored console.

use crate::events::EventEmitter;
use mirror_core::{
    BoxFuture, CaptureWriter, ConnectionStatus, ConsoleTransport, MirrorResult, Relay,
    SceneSwitch, SessionConfig,
};
use serde::Serialize;
use std::time::Instant;
use tracing::warn;

/// A mirror session. Owns exactly one handle of each enabled capability.
pub(crate) struct Session {
    pub config: SessionConfig,
    /// Distinguishes this session from earlier ones at the same address.
    pub generation: u64,
    pub connection: Box<dyn ConsoleTransport>,
    pub writer: Box<dyn CaptureWriter>,
    /// Present iff the relay was enabled at creation.
    pub relay: Option<Box<dyn Relay>>,
    /// Present iff scene-switch settings were given at creation.
    pub scene_switch: Option<Box<dyn SceneSwitch>>,
    /// New capture files are handed to playback while set.
    pub mirroring: bool,
    /// Base name of the file being written, `None` while idle.
    pub current_file: Option<String>,
    /// Set on the transport's first successful connect; handshake, status
    /// and data events are ignored before that.
    pub transport_live: bool,
    pub nickname: Option<String>,
    pub status: ConnectionStatus,
    pub created_at: Instant,
}

/// Snapshot of a session returned by `list_sessions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub address: String,
    pub id: String,
    pub nickname: Option<String>,
    pub status: ConnectionStatus,
    pub file_name: Option<String>,
    pub mirroring: bool,
    pub relay: bool,
    pub scene_switch: bool,
    pub uptime_secs: u64,
}

impl Session {
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            address: self.config.address.clone(),
            id: self.config.id.clone(),
            nickname: self.nickname.clone(),
            status: self.status,
            file_name: self.current_file.clone(),
            mirroring: self.mirroring,
            relay: self.relay.is_some(),
            scene_switch: self.scene_switch.is_some(),
            uptime_secs: self.created_at.elapsed().as_secs(),
        }
    }

    /// Release every handle. Failures are logged, never propagated.
    ///
    /// Returns the capture writer's close, which finishes the open file and
    /// must be driven to completion before the runtime stops.
    pub fn release(mut self, emitter: &EventEmitter) -> BoxFuture<'static, ()> {
        let address = self.config.address.clone();
        report_release(emitter, &address, "console transport", self.connection.disconnect());
        if let Some(switch) = self.scene_switch.as_mut() {
            report_release(emitter, &address, "scene switch", switch.disconnect());
        }
        if let Some(relay) = self.relay.as_mut() {
            report_release(emitter, &address, "relay", relay.stop_relay());
        }
        self.writer.close()
    }
}

pub(crate) fn report_release(
    emitter: &EventEmitter,
    address: &str,
    what: &str,
    result: MirrorResult<()>,
) {
    if let Err(e) = result {
        warn!(address, component = what, error = %e, "teardown failed");
        emitter.log(format!("Failed to release {what} for {address}: {e}"));
    }
}
