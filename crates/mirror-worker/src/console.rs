//! Plain TCP console transport.
//!
//! Dials the console, then streams every read chunk out as a
//! [`TransportEvent::Data`] event in arrival order. The read loop runs in a
//! spawned task and is cancelled through a oneshot on disconnect.

use mirror_core::{
    ConnectionStatus, ConsoleTransport, EventSink, MirrorError, MirrorResult, TransportEvent,
};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

const READ_BUFFER: usize = 8192;

/// One connection attempt per instance. It never redials: after the console
/// closes the stream the transport stays disconnected, and reconnecting is up
/// to the host (disconnect the session, then connect it again).
pub struct TcpConsoleTransport {
    events: EventSink<TransportEvent>,
    status: Arc<Mutex<ConnectionStatus>>,
    cancel: Option<oneshot::Sender<()>>,
}

impl TcpConsoleTransport {
    pub fn new(events: EventSink<TransportEvent>) -> Self {
        Self {
            events,
            status: Arc::new(Mutex::new(ConnectionStatus::Disconnected)),
            cancel: None,
        }
    }
}

impl ConsoleTransport for TcpConsoleTransport {
    fn connect(&mut self, address: &str, port: u16) {
        if self.cancel.is_some() {
            debug!(address, port, "console connect already started");
            return;
        }

        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.cancel = Some(cancel_tx);
        set_status(&self.status, ConnectionStatus::Connecting);

        let reader = ConsoleReader {
            address: address.to_string(),
            port,
            events: self.events.clone(),
            status: Arc::clone(&self.status),
        };
        tokio::spawn(reader.run(cancel_rx));
    }

    fn status(&self) -> ConnectionStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn disconnect(&mut self) -> MirrorResult<()> {
        if let Some(cancel) = self.cancel.take() {
            // The task may already have ended on its own.
            let _ = cancel.send(());
        }
        set_status(&self.status, ConnectionStatus::Disconnected);
        Ok(())
    }
}

fn set_status(status: &Mutex<ConnectionStatus>, value: ConnectionStatus) {
    *status.lock().unwrap_or_else(PoisonError::into_inner) = value;
}

struct ConsoleReader {
    address: String,
    port: u16,
    events: EventSink<TransportEvent>,
    status: Arc<Mutex<ConnectionStatus>>,
}

impl ConsoleReader {
    async fn run(self, mut cancel_rx: oneshot::Receiver<()>) {
        let connecting = TcpStream::connect((self.address.as_str(), self.port));
        let stream = tokio::select! {
            _ = &mut cancel_rx => {
                debug!(address = %self.address, "console connect cancelled");
                return;
            }
            result = connecting => result,
        };

        let mut stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                warn!(address = %self.address, port = self.port, error = %e, "console connect failed");
                self.fail(format!("cannot reach {}:{}: {e}", self.address, self.port));
                return;
            }
        };
        let _ = stream.set_nodelay(true);

        info!(address = %self.address, port = self.port, "console connected");
        set_status(&self.status, ConnectionStatus::Connected);
        self.events.emit(TransportEvent::Connected);
        self.events
            .emit(TransportEvent::StatusChanged(ConnectionStatus::Connected));

        let mut buf = vec![0u8; READ_BUFFER];
        loop {
            tokio::select! {
                _ = &mut cancel_rx => {
                    debug!(address = %self.address, "console read cancelled");
                    return;
                }
                result = stream.read(&mut buf) => match result {
                    Ok(0) => {
                        info!(address = %self.address, "console closed the connection");
                        set_status(&self.status, ConnectionStatus::Disconnected);
                        self.events
                            .emit(TransportEvent::StatusChanged(ConnectionStatus::Disconnected));
                        return;
                    }
                    Ok(n) => self.events.emit(TransportEvent::Data(buf[..n].to_vec())),
                    Err(e) => {
                        warn!(address = %self.address, error = %e, "console read error");
                        self.events
                            .emit(TransportEvent::StatusChanged(ConnectionStatus::Disconnected));
                        self.fail(format!("read from {} failed: {e}", self.address));
                        return;
                    }
                },
            }
        }
    }

    /// Status flips before the error goes out, so a listener checking the
    /// status on the error sees it disconnected.
    fn fail(&self, message: String) {
        set_status(&self.status, ConnectionStatus::Disconnected);
        self.events
            .emit(TransportEvent::Error(MirrorError::Transport(message)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    fn transport() -> (TcpConsoleTransport, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(move |event| {
            let _ = tx.send(event);
        });
        (TcpConsoleTransport::new(sink), rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("transport event timed out")
            .expect("transport dropped")
    }

    #[tokio::test]
    async fn streams_data_then_reports_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"\x35\x01").await.unwrap();
            socket.write_all(b"rest").await.unwrap();
        });

        let (mut console, mut events) = transport();
        console.connect("127.0.0.1", port);

        assert!(matches!(next(&mut events).await, TransportEvent::Connected));
        assert!(matches!(
            next(&mut events).await,
            TransportEvent::StatusChanged(ConnectionStatus::Connected)
        ));

        let mut received = Vec::new();
        loop {
            match next(&mut events).await {
                TransportEvent::Data(chunk) => received.extend(chunk),
                TransportEvent::StatusChanged(ConnectionStatus::Disconnected) => break,
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(received, b"\x35\x01rest");
        assert_eq!(console.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn closed_stream_is_not_redialed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
            // A second dial would be accepted here.
            let _ = listener.accept().await;
        });

        let (mut console, mut events) = transport();
        console.connect("127.0.0.1", port);
        loop {
            if let TransportEvent::StatusChanged(ConnectionStatus::Disconnected) =
                next(&mut events).await
            {
                break;
            }
        }

        console.connect("127.0.0.1", port);
        let redial = tokio::time::timeout(Duration::from_millis(200), events.recv()).await;
        assert!(redial.is_err(), "unexpected event {redial:?}");
        assert_eq!(console.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn unreachable_console_reports_error_after_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (mut console, mut events) = transport();
        console.connect("127.0.0.1", port);
        assert_eq!(console.status(), ConnectionStatus::Connecting);

        match next(&mut events).await {
            TransportEvent::Error(MirrorError::Transport(message)) => {
                assert!(message.contains("cannot reach"), "{message}")
            }
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(console.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn disconnect_stops_reading() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let _ = release_rx.await;
            let _ = socket.write_all(b"late").await;
        });

        let (mut console, mut events) = transport();
        console.connect("127.0.0.1", port);
        assert!(matches!(next(&mut events).await, TransportEvent::Connected));
        next(&mut events).await;

        console.disconnect().unwrap();
        assert_eq!(console.status(), ConnectionStatus::Disconnected);
        let _ = release_tx.send(());

        let late = tokio::time::timeout(Duration::from_millis(200), events.recv()).await;
        assert!(!matches!(late, Ok(Some(TransportEvent::Data(_)))));
    }
}
