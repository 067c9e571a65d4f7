//! mirror-worker: the mirror session orchestrator and its adapters.
//!
//! Runs one session per console address on an isolated worker thread. Each
//! session streams its console's bytes into capture files, optionally relays
//! them to spectators, and optionally drives an OBS scene switch from the
//! decoded game events.
//!
//! # Quick Start
//!
//! ```no_run
//! use mirror_worker::{DefaultFactory, MirrorWorker};
//! use mirror_core::SessionConfig;
//! use std::sync::Arc;
//!
//! # async fn example() -> mirror_core::MirrorResult<()> {
//! let factory = Arc::new(DefaultFactory::default());
//! let (handle, mut streams) = MirrorWorker::spawn(factory)?;
//!
//! handle
//!     .connect(SessionConfig {
//!         id: "1".into(),
//!         address: "192.168.1.20".into(),
//!         folder: "/tmp/captures".into(),
//!         port: None,
//!         relay_enabled: false,
//!         real_time: false,
//!         scene_switch: None,
//!     })
//!     .await?;
//!
//! while let Some(status) = streams.status.recv().await {
//!     println!("{}: {:?}", status.address, status.info);
//! }
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod console;
mod events;
pub mod factory;
pub mod obs;
mod orchestrator;
pub mod relay;
mod session;
mod worker;

#[cfg(test)]
mod fakes;

pub use capture::CaptureFileWriter;
pub use console::TcpConsoleTransport;
pub use events::EventStreams;
pub use factory::DefaultFactory;
pub use obs::ObsSceneSwitch;
pub use relay::SpectatorRelay;
pub use session::SessionInfo;
pub use worker::{MirrorHandle, MirrorWorker};
