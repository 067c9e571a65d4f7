//! TCP spectator relay.
//!
//! Re-serves one console's raw stream to any number of spectators. The relay
//! keeps every byte since the last buffer clear, so a spectator joining
//! mid-game first receives that backlog and then follows the live stream.

use mirror_core::{BoxFuture, CollaboratorEvent, EventSink, MirrorError, MirrorResult, Relay};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Live chunks a slow spectator may fall behind before it is dropped.
const LIVE_CAPACITY: usize = 1024;

struct Backlog {
    bytes: Vec<u8>,
    live: broadcast::Sender<Arc<[u8]>>,
}

pub struct SpectatorRelay {
    session_id: String,
    local_addr: SocketAddr,
    backlog: Arc<Mutex<Backlog>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl SpectatorRelay {
    /// Bind the relay listener and start accepting spectators.
    ///
    /// Must be called inside a tokio runtime.
    pub fn bind(
        addr: SocketAddr,
        session_id: &str,
        events: EventSink<CollaboratorEvent>,
    ) -> MirrorResult<Self> {
        let std_listener = std::net::TcpListener::bind(addr).map_err(|e| {
            MirrorError::collaborator("relay", format!("cannot listen on {addr}: {e}"))
        })?;
        std_listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(std_listener)?;
        let local_addr = listener.local_addr()?;

        let (live, _) = broadcast::channel(LIVE_CAPACITY);
        let backlog = Arc::new(Mutex::new(Backlog {
            bytes: Vec::new(),
            live,
        }));
        let (shutdown_tx, _) = broadcast::channel(1);

        info!(session_id, addr = %local_addr, "spectator relay listening");
        events.emit(CollaboratorEvent::Log(format!(
            "Relay for {session_id} listening on {local_addr}"
        )));

        let acceptor = Acceptor {
            session_id: session_id.to_string(),
            backlog: Arc::clone(&backlog),
            shutdown_tx: shutdown_tx.clone(),
            events,
        };
        tokio::spawn(acceptor.run(listener));

        Ok(Self {
            session_id: session_id.to_string(),
            local_addr,
            backlog,
            shutdown_tx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn backlog(&self) -> MutexGuard<'_, Backlog> {
        self.backlog.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Relay for SpectatorRelay {
    fn write(&mut self, data: &[u8]) {
        let mut backlog = self.backlog();
        backlog.bytes.extend_from_slice(data);
        // No receivers just means no spectators yet.
        let _ = backlog.live.send(Arc::from(data));
    }

    fn clear_buffer(&mut self) -> BoxFuture<'static, MirrorResult<()>> {
        let dropped = {
            let mut backlog = self.backlog();
            let len = backlog.bytes.len();
            backlog.bytes = Vec::new();
            len
        };
        debug!(session_id = %self.session_id, dropped, "relay backlog cleared");
        Box::pin(async { Ok(()) })
    }

    fn stop_relay(&mut self) -> MirrorResult<()> {
        let _ = self.shutdown_tx.send(());
        info!(session_id = %self.session_id, "spectator relay stopped");
        Ok(())
    }
}

impl Drop for SpectatorRelay {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

struct Acceptor {
    session_id: String,
    backlog: Arc<Mutex<Backlog>>,
    shutdown_tx: broadcast::Sender<()>,
    events: EventSink<CollaboratorEvent>,
}

impl Acceptor {
    async fn run(self, listener: TcpListener) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!(session_id = %self.session_id, "relay accept loop stopped");
                    break;
                }
                result = listener.accept() => match result {
                    Ok((stream, peer)) => self.admit(stream, peer),
                    Err(e) => {
                        warn!(session_id = %self.session_id, error = %e, "relay accept failed");
                        self.events.emit(CollaboratorEvent::Error(MirrorError::collaborator(
                            "relay",
                            format!("accept failed: {e}"),
                        )));
                    }
                },
            }
        }
    }

    fn admit(&self, stream: TcpStream, peer: SocketAddr) {
        // Snapshot and subscribe under one lock so no chunk is missed or sent twice.
        let (snapshot, live_rx) = {
            let backlog = self.backlog.lock().unwrap_or_else(PoisonError::into_inner);
            (backlog.bytes.clone(), backlog.live.subscribe())
        };

        info!(session_id = %self.session_id, %peer, backlog = snapshot.len(), "spectator joined");
        self.events.emit(CollaboratorEvent::Log(format!(
            "Spectator {peer} joined relay {}",
            self.session_id
        )));

        let spectator = Spectator {
            session_id: self.session_id.clone(),
            peer,
            events: self.events.clone(),
        };
        tokio::spawn(spectator.run(stream, snapshot, live_rx, self.shutdown_tx.subscribe()));
    }
}

struct Spectator {
    session_id: String,
    peer: SocketAddr,
    events: EventSink<CollaboratorEvent>,
}

impl Spectator {
    async fn run(
        self,
        mut stream: TcpStream,
        snapshot: Vec<u8>,
        mut live_rx: broadcast::Receiver<Arc<[u8]>>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let result = forward(&mut stream, &snapshot, &mut live_rx, &mut shutdown_rx).await;
        let _ = stream.shutdown().await;
        match result {
            Ok(()) => {
                info!(session_id = %self.session_id, peer = %self.peer, "spectator left");
                self.events.emit(CollaboratorEvent::Log(format!(
                    "Spectator {} left relay {}",
                    self.peer, self.session_id
                )));
            }
            Err(e) => {
                warn!(session_id = %self.session_id, peer = %self.peer, error = %e, "spectator dropped");
                self.events.emit(CollaboratorEvent::Error(MirrorError::collaborator(
                    "relay",
                    format!("spectator {} dropped: {e}", self.peer),
                )));
            }
        }
    }
}

async fn forward(
    stream: &mut TcpStream,
    snapshot: &[u8],
    live_rx: &mut broadcast::Receiver<Arc<[u8]>>,
    shutdown_rx: &mut broadcast::Receiver<()>,
) -> std::io::Result<()> {
    stream.write_all(snapshot).await?;
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => return Ok(()),
            chunk = live_rx.recv() => match chunk {
                Ok(chunk) => stream.write_all(&chunk).await?,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    return Err(std::io::Error::other(format!(
                        "fell {missed} chunks behind the live stream"
                    )));
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            },
        }
    }
}
