//! Recording fakes for every capability, used by the orchestrator tests.
//!
//! Each fake writes what it was asked to do into a probe shared with the
//! test, and the test drives events through the sink captured at
//! construction.

use mirror_core::{
    BoxFuture, CapabilityFactory, CaptureWriter, CollaboratorEvent, ConnectionStatus,
    ConsoleTransport, EventSink, MirrorError, MirrorResult, Relay, SceneSwitch,
    SceneSwitchSettings, SwitchTarget, TransportEvent, WriterEvent,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct TransportProbe {
    pub connects: Vec<(String, u16)>,
    pub disconnects: usize,
    pub status: ConnectionStatus,
}

#[derive(Debug, Default)]
pub struct WriterProbe {
    pub folder: PathBuf,
    pub nickname: String,
    pub chunks: Vec<Vec<u8>>,
    pub current: Option<PathBuf>,
    pub closed: bool,
    pub dropped: bool,
}

#[derive(Debug, Default)]
pub struct RelayProbe {
    pub session_id: String,
    pub chunks: Vec<Vec<u8>>,
    pub clears: usize,
    /// Chunks written before each clear.
    pub cleared_after: Vec<usize>,
    pub stopped: bool,
}

#[derive(Debug, Default)]
pub struct SwitchProbe {
    pub connects: usize,
    pub triggers: Vec<(SwitchTarget, Option<Duration>)>,
    pub disconnects: usize,
}

type Probe<P> = Arc<Mutex<P>>;

#[derive(Default)]
struct Created {
    transports: Vec<(Probe<TransportProbe>, EventSink<TransportEvent>)>,
    writers: Vec<(Probe<WriterProbe>, EventSink<WriterEvent>)>,
    relays: Vec<(Probe<RelayProbe>, EventSink<CollaboratorEvent>)>,
    switches: Vec<(Probe<SwitchProbe>, EventSink<CollaboratorEvent>)>,
}

/// Factory handing out fakes and remembering every one it built.
#[derive(Default)]
pub struct FakeFactory {
    created: Mutex<Created>,
    /// Make relay construction fail.
    fail_relay: bool,
    /// Make every relay's `clear_buffer` resolve to an error.
    fail_relay_clear: bool,
    /// Make every scene switch's `connect` resolve to an error.
    fail_switch_connect: bool,
}

impl FakeFactory {
    pub fn with_failing_relay() -> Self {
        Self {
            fail_relay: true,
            ..Default::default()
        }
    }

    pub fn with_failing_relay_clear() -> Self {
        Self {
            fail_relay_clear: true,
            ..Default::default()
        }
    }

    pub fn with_failing_switch_connect() -> Self {
        Self {
            fail_switch_connect: true,
            ..Default::default()
        }
    }

    pub fn transport(&self, i: usize) -> (Probe<TransportProbe>, EventSink<TransportEvent>) {
        self.created.lock().unwrap().transports[i].clone()
    }

    pub fn writer(&self, i: usize) -> (Probe<WriterProbe>, EventSink<WriterEvent>) {
        self.created.lock().unwrap().writers[i].clone()
    }

    pub fn relay_at(&self, i: usize) -> (Probe<RelayProbe>, EventSink<CollaboratorEvent>) {
        self.created.lock().unwrap().relays[i].clone()
    }

    pub fn switch(&self, i: usize) -> (Probe<SwitchProbe>, EventSink<CollaboratorEvent>) {
        self.created.lock().unwrap().switches[i].clone()
    }

    pub fn counts(&self) -> (usize, usize, usize, usize) {
        let c = self.created.lock().unwrap();
        (
            c.transports.len(),
            c.writers.len(),
            c.relays.len(),
            c.switches.len(),
        )
    }
}

impl CapabilityFactory for FakeFactory {
    fn console_transport(
        &self,
        events: EventSink<TransportEvent>,
    ) -> MirrorResult<Box<dyn ConsoleTransport>> {
        let probe = Probe::default();
        self.created
            .lock()
            .unwrap()
            .transports
            .push((probe.clone(), events));
        Ok(Box::new(FakeTransport { probe }))
    }

    fn capture_writer(
        &self,
        folder: &Path,
        nickname: &str,
        events: EventSink<WriterEvent>,
    ) -> MirrorResult<Box<dyn CaptureWriter>> {
        let probe = Arc::new(Mutex::new(WriterProbe {
            folder: folder.to_path_buf(),
            nickname: nickname.to_string(),
            ..Default::default()
        }));
        self.created
            .lock()
            .unwrap()
            .writers
            .push((probe.clone(), events));
        Ok(Box::new(FakeWriter { probe }))
    }

    fn relay(
        &self,
        session_id: &str,
        events: EventSink<CollaboratorEvent>,
    ) -> MirrorResult<Box<dyn Relay>> {
        if self.fail_relay {
            return Err(MirrorError::Config(format!(
                "relay port unavailable for session {session_id}"
            )));
        }
        let probe = Arc::new(Mutex::new(RelayProbe {
            session_id: session_id.to_string(),
            ..Default::default()
        }));
        self.created
            .lock()
            .unwrap()
            .relays
            .push((probe.clone(), events));
        Ok(Box::new(FakeRelay {
            probe,
            fail_clear: self.fail_relay_clear,
        }))
    }

    fn scene_switch(
        &self,
        _settings: &SceneSwitchSettings,
        events: EventSink<CollaboratorEvent>,
    ) -> MirrorResult<Box<dyn SceneSwitch>> {
        let probe = Probe::default();
        self.created
            .lock()
            .unwrap()
            .switches
            .push((probe.clone(), events));
        Ok(Box::new(FakeSwitch {
            probe,
            fail_connect: self.fail_switch_connect,
        }))
    }
}

struct FakeTransport {
    probe: Probe<TransportProbe>,
}

impl ConsoleTransport for FakeTransport {
    fn connect(&mut self, address: &str, port: u16) {
        let mut p = self.probe.lock().unwrap();
        p.connects.push((address.to_string(), port));
        p.status = ConnectionStatus::Connecting;
    }

    fn status(&self) -> ConnectionStatus {
        self.probe.lock().unwrap().status
    }

    fn disconnect(&mut self) -> MirrorResult<()> {
        let mut p = self.probe.lock().unwrap();
        p.disconnects += 1;
        p.status = ConnectionStatus::Disconnected;
        Ok(())
    }
}

struct FakeWriter {
    probe: Probe<WriterProbe>,
}

impl CaptureWriter for FakeWriter {
    fn write(&mut self, data: &[u8]) {
        self.probe.lock().unwrap().chunks.push(data.to_vec());
    }

    fn update_nickname(&mut self, nickname: &str) {
        self.probe.lock().unwrap().nickname = nickname.to_string();
    }

    fn current_file_name(&self) -> Option<PathBuf> {
        self.probe.lock().unwrap().current.clone()
    }

    fn close(&mut self) -> BoxFuture<'static, ()> {
        self.probe.lock().unwrap().closed = true;
        Box::pin(async {})
    }
}

impl Drop for FakeWriter {
    fn drop(&mut self) {
        if let Ok(mut p) = self.probe.lock() {
            p.dropped = true;
        }
    }
}

struct FakeRelay {
    probe: Probe<RelayProbe>,
    fail_clear: bool,
}

impl Relay for FakeRelay {
    fn write(&mut self, data: &[u8]) {
        self.probe.lock().unwrap().chunks.push(data.to_vec());
    }

    fn clear_buffer(&mut self) -> BoxFuture<'static, MirrorResult<()>> {
        let mut p = self.probe.lock().unwrap();
        p.clears += 1;
        let written = p.chunks.len();
        p.cleared_after.push(written);
        let fail = self.fail_clear;
        Box::pin(async move {
            if fail {
                Err(MirrorError::collaborator("relay", "backlog already released"))
            } else {
                Ok(())
            }
        })
    }

    fn stop_relay(&mut self) -> MirrorResult<()> {
        self.probe.lock().unwrap().stopped = true;
        Ok(())
    }
}

struct FakeSwitch {
    probe: Probe<SwitchProbe>,
    fail_connect: bool,
}

impl SceneSwitch for FakeSwitch {
    fn connect(&mut self) -> BoxFuture<'static, MirrorResult<()>> {
        self.probe.lock().unwrap().connects += 1;
        let fail = self.fail_connect;
        Box::pin(async move {
            if fail {
                Err(MirrorError::collaborator("scene switch", "connection refused"))
            } else {
                Ok(())
            }
        })
    }

    fn trigger_switch(&mut self, target: SwitchTarget, delay: Option<Duration>) {
        self.probe.lock().unwrap().triggers.push((target, delay));
    }

    fn disconnect(&mut self) -> MirrorResult<()> {
        self.probe.lock().unwrap().disconnects += 1;
        Ok(())
    }
}
