//! Mirror session orchestrator.
//!
//! Owns every session, keyed by console address, and is the only code that
//! touches them. Control requests and capability events arrive as messages
//! on one task; nothing in here awaits, so a slow disk or network step in one
//! session never stalls another. Steps that must wait run as spawned tasks
//! that post their outcome back as another message.

use crate::events::EventEmitter;
use crate::session::{report_release, Session, SessionInfo};
use mirror_core::{
    CapabilityFactory, CollaboratorEvent, CommandRecord, ConnectionStatus, EventSink, FileReady,
    MirrorError, MirrorResult, SessionConfig, StatusUpdate, SwitchTarget, TransportEvent,
    WriterEvent, DEFAULT_CONSOLE_PORT, GAME_END_SWITCH_DELAY, LIVE_FRAME_THRESHOLD,
    NO_CONTEST_END_METHOD, UNKNOWN_NICKNAME,
};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// How long shutdown waits for released capture writers to reach disk.
const WRITER_CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Requests from the host, each answered once the step has run.
pub(crate) enum Control {
    Connect {
        config: SessionConfig,
        reply: oneshot::Sender<MirrorResult<()>>,
    },
    Disconnect {
        address: String,
        reply: oneshot::Sender<()>,
    },
    StartMirroring {
        address: String,
        reply: oneshot::Sender<()>,
    },
    ConsoleClosed {
        session_id: String,
        reply: oneshot::Sender<()>,
    },
    ListSessions {
        reply: oneshot::Sender<Vec<SessionInfo>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Messages produced inside the worker: capability events and the
/// completions of spawned steps.
pub(crate) enum Internal {
    Session(SessionSignal),
    FolderReady {
        config: SessionConfig,
        result: std::io::Result<()>,
        reply: oneshot::Sender<MirrorResult<()>>,
    },
    SwitchReady {
        address: String,
        generation: u64,
        result: MirrorResult<()>,
        reply: oneshot::Sender<()>,
    },
}

/// A capability event tagged with the session that produced it.
pub(crate) struct SessionSignal {
    address: String,
    generation: u64,
    event: SessionEvent,
}

enum SessionEvent {
    Transport(TransportEvent),
    Writer(WriterEvent),
    Relay(CollaboratorEvent),
    Switch(CollaboratorEvent),
}

pub(crate) struct Orchestrator {
    sessions: HashMap<String, Session>,
    /// Addresses whose connect is waiting on folder creation.
    pending: HashSet<String>,
    factory: Arc<dyn CapabilityFactory>,
    emitter: EventEmitter,
    internal_tx: mpsc::UnboundedSender<Internal>,
    /// Capture writers of released sessions that are still finishing files.
    closing: JoinSet<()>,
    next_generation: u64,
}

impl Orchestrator {
    pub fn new(
        factory: Arc<dyn CapabilityFactory>,
        emitter: EventEmitter,
        internal_tx: mpsc::UnboundedSender<Internal>,
    ) -> Self {
        Self {
            sessions: HashMap::new(),
            pending: HashSet::new(),
            factory,
            emitter,
            internal_tx,
            closing: JoinSet::new(),
            next_generation: 1,
        }
    }

    /// Process messages until shutdown or until every control handle is gone.
    ///
    /// Internal messages are drained first so that capability events already
    /// queued are handled before a control request issued after them.
    pub async fn run(
        mut self,
        mut control_rx: mpsc::UnboundedReceiver<Control>,
        mut internal_rx: mpsc::UnboundedReceiver<Internal>,
    ) {
        info!("mirror orchestrator started");
        let stopped_by = loop {
            tokio::select! {
                biased;
                Some(message) = internal_rx.recv() => self.handle_internal(message),
                Some(_) = self.closing.join_next() => {}
                control = control_rx.recv() => match control {
                    Some(control) => {
                        if let Some(reply) = self.handle_control(control) {
                            break Some(reply);
                        }
                    }
                    None => {
                        debug!("all mirror handles dropped");
                        self.shutdown();
                        break None;
                    }
                },
            }
        };

        // Open capture files are only complete once their writers finish,
        // and the runtime goes away as soon as this returns.
        let pending = self.closing.len();
        let drained = tokio::time::timeout(WRITER_CLOSE_TIMEOUT, async {
            while self.closing.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(pending, "capture writers did not finish before shutdown");
        }

        info!("mirror orchestrator stopped");
        if let Some(reply) = stopped_by {
            let _ = reply.send(());
        }
    }

    /// Returns the reply to send once the worker has fully stopped, if the
    /// request was a shutdown.
    fn handle_control(&mut self, control: Control) -> Option<oneshot::Sender<()>> {
        match control {
            Control::Connect { config, reply } => self.connect(config, reply),
            Control::Disconnect { address, reply } => {
                self.disconnect(&address);
                let _ = reply.send(());
            }
            Control::StartMirroring { address, reply } => self.start_mirroring(&address, reply),
            Control::ConsoleClosed { session_id, reply } => {
                self.console_closed(&session_id);
                let _ = reply.send(());
            }
            Control::ListSessions { reply } => {
                let _ = reply.send(self.sessions.values().map(Session::info).collect());
            }
            Control::Shutdown { reply } => {
                self.shutdown();
                return Some(reply);
            }
        }
        None
    }

    fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::Session(signal) => self.handle_signal(signal),
            Internal::FolderReady {
                config,
                result,
                reply,
            } => {
                let _ = reply.send(self.finish_connect(config, result));
            }
            Internal::SwitchReady {
                address,
                generation,
                result,
                reply,
            } => {
                if let Err(e) = result {
                    self.emitter.error(e);
                }
                if self.is_current(&address, generation) {
                    self.play_current_file(&address);
                }
                let _ = reply.send(());
            }
        }
    }

    // ----- control operations -----

    fn connect(&mut self, config: SessionConfig, reply: oneshot::Sender<MirrorResult<()>>) {
        if self.sessions.contains_key(&config.address) || self.pending.contains(&config.address) {
            self.emitter
                .log(format!("Already connected to console @ {}", config.address));
            let _ = reply.send(Ok(()));
            return;
        }

        self.emitter.log("Setting up mirror");
        self.pending.insert(config.address.clone());

        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = tokio::fs::create_dir_all(&config.folder).await;
            let _ = internal_tx.send(Internal::FolderReady {
                config,
                result,
                reply,
            });
        });
    }

    fn finish_connect(
        &mut self,
        config: SessionConfig,
        folder: std::io::Result<()>,
    ) -> MirrorResult<()> {
        self.pending.remove(&config.address);

        if let Err(e) = folder {
            let err = MirrorError::Directory {
                path: config.folder.clone(),
                reason: e.to_string(),
            };
            self.emitter.error(err.clone());
            return Err(err);
        }

        let generation = self.next_generation;
        self.next_generation += 1;

        match self.build_session(config, generation) {
            Ok(session) => {
                info!(
                    address = %session.config.address,
                    session_id = %session.config.id,
                    generation,
                    "mirror session created"
                );
                self.sessions
                    .insert(session.config.address.clone(), session);
                Ok(())
            }
            Err(e) => {
                self.emitter.error(e.clone());
                Err(e)
            }
        }
    }

    /// Construct and wire every handle for a new session. All handles are
    /// built before the console connection is started, so a construction
    /// failure leaves nothing running.
    fn build_session(&self, config: SessionConfig, generation: u64) -> MirrorResult<Session> {
        let address = config.address.as_str();

        let writer = self.factory.capture_writer(
            &config.folder,
            UNKNOWN_NICKNAME,
            self.sink(address, generation, SessionEvent::Writer),
        )?;

        let scene_switch = match &config.scene_switch {
            Some(settings) => Some(self.factory.scene_switch(
                settings,
                self.sink(address, generation, SessionEvent::Switch),
            )?),
            None => None,
        };

        let mut connection = self
            .factory
            .console_transport(self.sink(address, generation, SessionEvent::Transport))?;

        let relay = if config.relay_enabled {
            self.emitter.log("Starting relay");
            Some(
                self.factory
                    .relay(&config.id, self.sink(address, generation, SessionEvent::Relay))?,
            )
        } else {
            None
        };

        let port = config.port.unwrap_or(DEFAULT_CONSOLE_PORT);
        self.emitter.log(format!("Dialing console {address} on port {port}"));
        connection.connect(address, port);

        Ok(Session {
            config,
            generation,
            connection,
            writer,
            relay,
            scene_switch,
            mirroring: false,
            current_file: None,
            transport_live: false,
            nickname: None,
            status: ConnectionStatus::Connecting,
            created_at: Instant::now(),
        })
    }

    fn disconnect(&mut self, address: &str) {
        self.emitter.log("Disconnect requested");
        let Some(session) = self.sessions.remove(address) else {
            self.emitter.error(MirrorError::NoSession {
                action: "Error disconnecting",
                key: address.to_string(),
            });
            return;
        };

        self.closing.spawn(session.release(&self.emitter));
        info!(address, "mirror session removed");

        // Transports do not reliably report a final status, so send one.
        self.emitter.status(address, StatusUpdate::disconnected());
    }

    fn start_mirroring(&mut self, address: &str, reply: oneshot::Sender<()>) {
        self.emitter.log("Mirroring starting");
        let Some(session) = self.sessions.get_mut(address) else {
            self.emitter.error(MirrorError::NoSession {
                action: "Could not start mirroring",
                key: address.to_string(),
            });
            let _ = reply.send(());
            return;
        };

        session.mirroring = true;

        if let Some(switch) = session.scene_switch.as_mut() {
            self.emitter.log("Connecting to OBS");
            let connecting = switch.connect();
            let internal_tx = self.internal_tx.clone();
            let address = address.to_string();
            let generation = session.generation;
            tokio::spawn(async move {
                let result = connecting.await;
                let _ = internal_tx.send(Internal::SwitchReady {
                    address,
                    generation,
                    result,
                    reply,
                });
            });
            return;
        }

        self.play_current_file(address);
        let _ = reply.send(());
    }

    fn console_closed(&mut self, session_id: &str) {
        // The notification may concern a viewer this worker never started.
        let Some(session) = self
            .sessions
            .values_mut()
            .find(|s| s.config.id == session_id)
        else {
            debug!(session_id, "console closed for unknown session");
            return;
        };

        session.mirroring = false;
        let address = session.config.address.clone();
        if let Some(switch) = session.scene_switch.as_mut() {
            let result = switch.disconnect();
            report_release(&self.emitter, &address, "scene switch", result);
        }
        info!(address = %address, session_id, "mirroring stopped");
    }

    fn shutdown(&mut self) {
        let addresses: Vec<String> = self.sessions.keys().cloned().collect();
        for address in addresses {
            self.disconnect(&address);
        }
    }

    // ----- capability events -----

    fn handle_signal(&mut self, signal: SessionSignal) {
        if !self.is_current(&signal.address, signal.generation) {
            debug!(address = %signal.address, generation = signal.generation, "dropping event from released session");
            return;
        }

        match signal.event {
            SessionEvent::Transport(event) => self.on_transport(&signal.address, event),
            SessionEvent::Writer(event) => self.on_writer(&signal.address, event),
            SessionEvent::Relay(event) | SessionEvent::Switch(event) => match event {
                CollaboratorEvent::Log(message) => self.emitter.log(message),
                CollaboratorEvent::Error(e) => self.emitter.error(e),
            },
        }
    }

    fn on_transport(&mut self, address: &str, event: TransportEvent) {
        let Some(session) = self.sessions.get_mut(address) else {
            return;
        };

        match event {
            TransportEvent::Error(e) => {
                self.emitter.error(e);
                // A transport that errors but stays up is left alone.
                if session.connection.status() == ConnectionStatus::Disconnected {
                    self.disconnect(address);
                }
            }
            TransportEvent::Connected => {
                if !session.transport_live {
                    session.transport_live = true;
                    self.emitter.log("Connecting to console");
                }
            }
            _ if !session.transport_live => {
                debug!(address, "ignoring transport event before connect");
            }
            TransportEvent::Handshake { nickname } => {
                self.emitter.log("Got handshake from console");
                self.emitter.log(format!("Console nickname: {nickname}"));
                session.writer.update_nickname(&nickname);
                session.nickname = Some(nickname.clone());
                self.emitter.status(address, StatusUpdate::nickname(nickname));
            }
            TransportEvent::StatusChanged(status) => {
                self.emitter
                    .log(format!("{address} status changed: {status}"));
                session.status = status;
                self.emitter.status(address, StatusUpdate::status(status));
            }
            TransportEvent::Data(data) => {
                session.writer.write(&data);
                if let Some(relay) = session.relay.as_mut() {
                    relay.write(&data);
                }
            }
        }
    }

    fn on_writer(&mut self, address: &str, event: WriterEvent) {
        match event {
            WriterEvent::NewFile(path) => {
                let name = base_name(&path);
                let Some(session) = self.sessions.get_mut(address) else {
                    return;
                };
                session.current_file = Some(name.clone());
                if session.mirroring {
                    self.emitter.file_ready(FileReady {
                        session_id: session.config.id.clone(),
                        file_path: path.display().to_string(),
                        real_time: session.config.real_time,
                    });
                }
                self.emitter
                    .status(address, StatusUpdate::file_name(Some(name)));
            }
            WriterEvent::FileComplete => {
                if let Some(session) = self.sessions.get_mut(address) {
                    session.current_file = None;
                }
                self.emitter.status(address, StatusUpdate::file_name(None));
            }
            WriterEvent::Command(record) => self.on_command(address, record),
            WriterEvent::Error(e) => self.emitter.error(e),
        }
    }

    fn on_command(&mut self, address: &str, record: CommandRecord) {
        let Some(session) = self.sessions.get_mut(address) else {
            return;
        };
        if session.scene_switch.is_none() && session.relay.is_none() {
            return;
        }

        match record {
            CommandRecord::PostFrameUpdate { frame: Some(frame) }
                if frame >= LIVE_FRAME_THRESHOLD =>
            {
                if let Some(switch) = session.scene_switch.as_mut() {
                    switch.trigger_switch(SwitchTarget::Live, None);
                }
            }
            CommandRecord::GameEnd { end_method } => {
                if end_method != Some(NO_CONTEST_END_METHOD) {
                    if let Some(switch) = session.scene_switch.as_mut() {
                        switch.trigger_switch(SwitchTarget::Idle, Some(GAME_END_SWITCH_DELAY));
                    }
                }
                // One game's backlog per relay buffer. The record arrives
                // after the writer has decoded it, so chunks that reached the
                // relay in the meantime are cleared along with the game.
                if let Some(relay) = session.relay.as_mut() {
                    let clearing = relay.clear_buffer();
                    let internal_tx = self.internal_tx.clone();
                    let address = address.to_string();
                    let generation = session.generation;
                    tokio::spawn(async move {
                        if let Err(e) = clearing.await {
                            let _ = internal_tx.send(Internal::Session(SessionSignal {
                                address,
                                generation,
                                event: SessionEvent::Relay(CollaboratorEvent::Error(e)),
                            }));
                        }
                    });
                }
            }
            _ => {}
        }
    }

    // ----- helpers -----

    fn play_current_file(&mut self, address: &str) {
        let Some(session) = self.sessions.get(address) else {
            return;
        };
        let file_path = session
            .writer
            .current_file_name()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        self.emitter.file_ready(FileReady {
            session_id: session.config.id.clone(),
            file_path,
            real_time: session.config.real_time,
        });
    }

    fn is_current(&self, address: &str, generation: u64) -> bool {
        self.sessions
            .get(address)
            .is_some_and(|s| s.generation == generation)
    }

    fn sink<T: Send + 'static>(
        &self,
        address: &str,
        generation: u64,
        wrap: fn(T) -> SessionEvent,
    ) -> EventSink<T> {
        let internal_tx = self.internal_tx.clone();
        let address = address.to_string();
        EventSink::new(move |event| {
            let _ = internal_tx.send(Internal::Session(SessionSignal {
                address: address.clone(),
                generation,
                event: wrap(event),
            }));
        })
    }
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
