//! The production capability factory.

use crate::capture::CaptureFileWriter;
use crate::console::TcpConsoleTransport;
use crate::obs::ObsSceneSwitch;
use crate::relay::SpectatorRelay;
use mirror_core::{
    CapabilityFactory, CaptureWriter, CollaboratorEvent, ConsoleTransport, EventSink,
    MirrorError, MirrorResult, Relay, SceneSwitch, SceneSwitchSettings, TransportEvent,
    WriterEvent, DEFAULT_RELAY_BASE_PORT,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

/// Builds TCP console transports, capture-file writers, TCP spectator relays
/// and OBS scene switches.
#[derive(Debug, Clone)]
pub struct DefaultFactory {
    /// Address relays listen on.
    pub relay_bind: IpAddr,
    /// A session's relay listens on this port plus its numeric session id.
    pub relay_base_port: u16,
}

impl Default for DefaultFactory {
    fn default() -> Self {
        Self {
            relay_bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            relay_base_port: DEFAULT_RELAY_BASE_PORT,
        }
    }
}

impl DefaultFactory {
    pub fn relay_port(&self, session_id: &str) -> MirrorResult<u16> {
        let offset: u16 = session_id.trim().parse().map_err(|_| {
            MirrorError::Config(format!(
                "relay needs a numeric session id, got {session_id:?}"
            ))
        })?;
        self.relay_base_port.checked_add(offset).ok_or_else(|| {
            MirrorError::Config(format!(
                "relay port {} + {offset} is out of range",
                self.relay_base_port
            ))
        })
    }
}

impl CapabilityFactory for DefaultFactory {
    fn console_transport(
        &self,
        events: EventSink<TransportEvent>,
    ) -> MirrorResult<Box<dyn ConsoleTransport>> {
        Ok(Box::new(TcpConsoleTransport::new(events)))
    }

    fn capture_writer(
        &self,
        folder: &Path,
        nickname: &str,
        events: EventSink<WriterEvent>,
    ) -> MirrorResult<Box<dyn CaptureWriter>> {
        Ok(Box::new(CaptureFileWriter::new(folder, nickname, events)))
    }

    fn relay(
        &self,
        session_id: &str,
        events: EventSink<CollaboratorEvent>,
    ) -> MirrorResult<Box<dyn Relay>> {
        let addr = SocketAddr::new(self.relay_bind, self.relay_port(session_id)?);
        Ok(Box::new(SpectatorRelay::bind(addr, session_id, events)?))
    }

    fn scene_switch(
        &self,
        settings: &SceneSwitchSettings,
        events: EventSink<CollaboratorEvent>,
    ) -> MirrorResult<Box<dyn SceneSwitch>> {
        Ok(Box::new(ObsSceneSwitch::new(settings.clone(), events)))
    }
}
