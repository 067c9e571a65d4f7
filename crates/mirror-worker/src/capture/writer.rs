//! Capture-file writer.
//!
//! Bytes are handed to a background task over a channel so the caller never
//! waits on disk. The task frames the stream into commands, starts a new
//! `Game_<timestamp>.slp` on every size table, and closes it after the game
//! end command, leaving a JSON sidecar with the game's metadata next to it.

use super::stream::{CommandDecoder, DecodedCommand};
use chrono::{DateTime, Local};
use mirror_core::{
    BoxFuture, CaptureWriter, CommandRecord, EventSink, MirrorError, MirrorResult, WriterEvent,
};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Metadata written next to each finished capture file as `<file>.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureMetadata {
    pub console_nickname: String,
    /// RFC 3339 local time the file was opened.
    pub start_time: String,
    pub last_frame: Option<i32>,
    /// `None` when the stream stopped before the game ended.
    pub end_method: Option<u8>,
    pub bytes: u64,
}

/// State shared between the handle and its background task.
#[derive(Debug)]
struct Shared {
    current: Option<PathBuf>,
    nickname: String,
}

/// Writes one console's stream into capture files.
///
/// Dropping the writer stops the background task, which finishes any open
/// file first as long as the runtime keeps running. Use
/// [`CaptureWriter::close`] to wait for that.
pub struct CaptureFileWriter {
    data_tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    task: Option<JoinHandle<()>>,
    shared: Arc<Mutex<Shared>>,
}

impl CaptureFileWriter {
    /// Must be called inside a tokio runtime.
    pub fn new(folder: &Path, nickname: &str, events: EventSink<WriterEvent>) -> Self {
        let shared = Arc::new(Mutex::new(Shared {
            current: None,
            nickname: nickname.to_string(),
        }));
        let (data_tx, data_rx) = mpsc::unbounded_channel();

        let task = CaptureTask {
            folder: folder.to_path_buf(),
            shared: Arc::clone(&shared),
            events,
            decoder: CommandDecoder::new(),
            open: None,
        };
        let task = tokio::spawn(task.run(data_rx));

        Self {
            data_tx: Some(data_tx),
            task: Some(task),
            shared,
        }
    }

    fn shared(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CaptureWriter for CaptureFileWriter {
    fn write(&mut self, data: &[u8]) {
        // Only fails once the task has exited, when there is nothing to write to.
        if let Some(data_tx) = &self.data_tx {
            let _ = data_tx.send(data.to_vec());
        }
    }

    fn update_nickname(&mut self, nickname: &str) {
        self.shared().nickname = nickname.to_string();
    }

    fn current_file_name(&self) -> Option<PathBuf> {
        self.shared().current.clone()
    }

    fn close(&mut self) -> BoxFuture<'static, ()> {
        // Dropping the sender lets the task drain its queue and exit.
        self.data_tx = None;
        let task = self.task.take();
        Box::pin(async move {
            if let Some(task) = task {
                if let Err(e) = task.await {
                    warn!(error = %e, "capture writer task failed");
                }
            }
        })
    }
}

struct OpenCapture {
    path: PathBuf,
    out: BufWriter<File>,
    started_at: DateTime<Local>,
    last_frame: Option<i32>,
    bytes: u64,
}

struct CaptureTask {
    folder: PathBuf,
    shared: Arc<Mutex<Shared>>,
    events: EventSink<WriterEvent>,
    decoder: CommandDecoder,
    open: Option<OpenCapture>,
}

impl CaptureTask {
    async fn run(mut self, mut data_rx: mpsc::UnboundedReceiver<Vec<u8>>) {
        while let Some(chunk) = data_rx.recv().await {
            for command in self.decoder.push(&chunk) {
                if let Err(e) = self.handle(command).await {
                    self.report(e);
                }
            }
        }

        if let Err(e) = self.finish(None).await {
            self.report(e);
        }
        debug!(folder = %self.folder.display(), "capture writer stopped");
    }

    async fn handle(&mut self, command: DecodedCommand) -> std::io::Result<()> {
        let DecodedCommand { record, raw } = command;

        if record == CommandRecord::MessageSizes {
            self.finish(None).await?;
            self.start().await?;
        }

        if let Some(open) = self.open.as_mut() {
            open.out.write_all(&raw).await?;
            open.bytes += raw.len() as u64;
            if let CommandRecord::PostFrameUpdate { frame: Some(frame) } = record {
                open.last_frame = Some(frame);
            }
        }

        self.events.emit(WriterEvent::Command(record));

        if let CommandRecord::GameEnd { end_method } = record {
            self.finish(end_method).await?;
        }
        Ok(())
    }

    async fn start(&mut self) -> std::io::Result<()> {
        let started_at = Local::now();
        let (path, file) = create_unique(&self.folder, &started_at).await?;
        info!(path = %path.display(), "capture file opened");

        self.lock().current = Some(path.clone());
        self.open = Some(OpenCapture {
            path: path.clone(),
            out: BufWriter::new(file),
            started_at,
            last_frame: None,
            bytes: 0,
        });
        self.events.emit(WriterEvent::NewFile(path));
        Ok(())
    }

    /// Close the open file, if any, and write its sidecar.
    async fn finish(&mut self, end_method: Option<u8>) -> std::io::Result<()> {
        let Some(mut open) = self.open.take() else {
            return Ok(());
        };
        self.lock().current = None;

        let flushed = open.out.flush().await;
        let metadata = CaptureMetadata {
            console_nickname: self.lock().nickname.clone(),
            start_time: open.started_at.to_rfc3339(),
            last_frame: open.last_frame,
            end_method,
            bytes: open.bytes,
        };
        let sidecar = write_sidecar(&open.path, &metadata).await;

        info!(path = %open.path.display(), bytes = open.bytes, ?end_method, "capture file closed");
        self.events.emit(WriterEvent::FileComplete);
        flushed.and(sidecar)
    }

    fn report(&self, e: std::io::Error) {
        self.events.emit(WriterEvent::Error(MirrorError::collaborator(
            "capture writer",
            e.to_string(),
        )));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Create `Game_<timestamp>.slp`, adding a counter if a file from the same
/// second already exists.
async fn create_unique(folder: &Path, at: &DateTime<Local>) -> std::io::Result<(PathBuf, File)> {
    let stem = format!("Game_{}", at.format("%Y%m%dT%H%M%S"));
    let mut attempt = 0u32;
    loop {
        let name = if attempt == 0 {
            format!("{stem}.slp")
        } else {
            format!("{stem}_{attempt}.slp")
        };
        let path = folder.join(name);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e),
        }
    }
}

/// Path of the sidecar for `capture`: the capture path with `.json` appended.
pub fn sidecar_path(capture: &Path) -> PathBuf {
    let mut name = capture.as_os_str().to_owned();
    name.push(".json");
    PathBuf::from(name)
}

async fn write_sidecar(capture: &Path, metadata: &CaptureMetadata) -> std::io::Result<()> {
    let json = serde_json::to_vec_pretty(metadata)?;
    tokio::fs::write(sidecar_path(capture), json).await
}

/// Read the sidecar written for `capture`.
pub async fn load_metadata(capture: &Path) -> MirrorResult<CaptureMetadata> {
    let content = tokio::fs::read(sidecar_path(capture)).await?;
    serde_json::from_slice(&content).map_err(|e| MirrorError::Other(e.to_string()))
}
