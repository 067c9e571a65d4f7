//! Isolation boundary between the host and the orchestrator.
//!
//! The orchestrator runs on its own OS thread with a single-threaded tokio
//! runtime, so capture and relay I/O never competes with the host's own
//! executor. The host talks to it through a cloneable [`MirrorHandle`] and
//! listens on the four [`EventStreams`].

use crate::events::{self, EventStreams};
use crate::orchestrator::{Control, Orchestrator};
use crate::session::SessionInfo;
use mirror_core::{CapabilityFactory, MirrorError, MirrorResult, SessionConfig};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

/// Entry point for starting the mirror worker.
pub struct MirrorWorker;

impl MirrorWorker {
    /// Start the worker thread.
    ///
    /// The thread exits after [`MirrorHandle::shutdown`] or once every handle
    /// has been dropped; either way all sessions are disconnected first.
    pub fn spawn(
        factory: Arc<dyn CapabilityFactory>,
    ) -> MirrorResult<(MirrorHandle, EventStreams)> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .thread_name("mirror-worker")
            .build()?;

        let (emitter, streams) = events::channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        std::thread::Builder::new()
            .name("mirror-worker".into())
            .spawn(move || {
                runtime.block_on(async move {
                    let orchestrator = Orchestrator::new(factory, emitter, internal_tx);
                    orchestrator.run(control_rx, internal_rx).await;
                });
                info!("mirror worker thread exiting");
            })?;

        Ok((MirrorHandle { control_tx }, streams))
    }
}

/// Control surface of a running worker.
///
/// Each call resolves once the orchestrator has run the step. That means the
/// request was accepted, not that the console connected or a file was
/// written; outcomes arrive on the event streams.
#[derive(Debug, Clone)]
pub struct MirrorHandle {
    control_tx: mpsc::UnboundedSender<Control>,
}

impl MirrorHandle {
    /// Open a session for `config.address`. A second connect for an address
    /// already present is logged and ignored.
    ///
    /// Fails only if the capture folder cannot be created or a capability
    /// cannot be constructed.
    pub async fn connect(&self, config: SessionConfig) -> MirrorResult<()> {
        self.request(|reply| Control::Connect { config, reply })
            .await?
    }

    /// Tear down and remove the session for `address`.
    pub async fn disconnect(&self, address: &str) -> MirrorResult<()> {
        let address = address.to_string();
        self.request(|reply| Control::Disconnect { address, reply })
            .await
    }

    /// Hand the current and all future capture files of `address` to playback.
    pub async fn start_mirroring(&self, address: &str) -> MirrorResult<()> {
        let address = address.to_string();
        self.request(|reply| Control::StartMirroring { address, reply })
            .await
    }

    /// The playback viewer for `session_id` was closed; stop mirroring it.
    pub async fn console_closed(&self, session_id: &str) -> MirrorResult<()> {
        let session_id = session_id.to_string();
        self.request(|reply| Control::ConsoleClosed { session_id, reply })
            .await
    }

    pub async fn list_sessions(&self) -> MirrorResult<Vec<SessionInfo>> {
        self.request(|reply| Control::ListSessions { reply }).await
    }

    /// Disconnect every session and stop the worker. Resolves after open
    /// capture files have been closed and their sidecars written.
    pub async fn shutdown(&self) -> MirrorResult<()> {
        self.request(|reply| Control::Shutdown { reply }).await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Control,
    ) -> MirrorResult<T> {
        let (reply, response) = oneshot::channel();
        self.control_tx
            .send(build(reply))
            .map_err(|_| MirrorError::WorkerGone)?;
        response.await.map_err(|_| MirrorError::WorkerGone)
    }
}
