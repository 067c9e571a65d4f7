//! OBS scene switching over obs-websocket v5.
//!
//! `connect` performs the Hello/Identify handshake and hands the socket to a
//! link task that sends queued requests and watches for responses and close.
//! Triggers choose between the configured live and idle scenes. A trigger
//! for the scene already showing is ignored, and a delayed trigger is
//! dropped if any later trigger arrives before it fires.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use mirror_core::{
    BoxFuture, CollaboratorEvent, EventSink, MirrorError, MirrorResult, SceneSwitch,
    SceneSwitchSettings, SwitchTarget,
};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const OP_HELLO: u64 = 0;
const OP_IDENTIFY: u64 = 1;
const OP_IDENTIFIED: u64 = 2;
const OP_REQUEST: u64 = 6;
const OP_REQUEST_RESPONSE: u64 = 7;
const RPC_VERSION: u64 = 1;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ObsSceneSwitch {
    inner: Arc<Inner>,
}

struct Inner {
    settings: SceneSwitchSettings,
    events: EventSink<CollaboratorEvent>,
    state: Mutex<LinkState>,
}

#[derive(Default)]
struct LinkState {
    /// Outgoing messages for the live link; `None` while disconnected.
    outbox: Option<mpsc::UnboundedSender<Message>>,
    /// Identifies the live link so a stale link task cannot clear a newer one.
    link_id: u64,
    /// Scene last requested on this link.
    showing: Option<SwitchTarget>,
    /// Bumped on every trigger; a delayed trigger fires only if unchanged.
    trigger_generation: u64,
    next_request_id: u64,
}

impl ObsSceneSwitch {
    pub fn new(settings: SceneSwitchSettings, events: EventSink<CollaboratorEvent>) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                events,
                state: Mutex::new(LinkState::default()),
            }),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state().outbox.is_some()
    }
}

impl SceneSwitch for ObsSceneSwitch {
    fn connect(&mut self) -> BoxFuture<'static, MirrorResult<()>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            if inner.state().outbox.is_some() {
                return Ok(());
            }
            let url = format!("ws://{}:{}", inner.settings.host, inner.settings.port);
            let ws = tokio::time::timeout(HANDSHAKE_TIMEOUT, open(&url, &inner.settings))
                .await
                .map_err(|_| obs_error(format!("handshake with {url} timed out")))??;
            inner.attach(ws, &url);
            Ok(())
        })
    }

    fn trigger_switch(&mut self, target: SwitchTarget, delay: Option<Duration>) {
        let generation = {
            let mut state = self.inner.state();
            if state.outbox.is_none() {
                debug!(?target, "scene switch not connected, trigger dropped");
                return;
            }
            state.trigger_generation += 1;
            state.trigger_generation
        };

        match delay {
            None => self.inner.show(target, generation),
            Some(delay) => {
                let inner = Arc::clone(&self.inner);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    inner.show(target, generation);
                });
            }
        }
    }

    fn disconnect(&mut self) -> MirrorResult<()> {
        let mut state = self.inner.state();
        if state.outbox.take().is_some() {
            info!(host = %self.inner.settings.host, "disconnecting from OBS");
            self.inner
                .events
                .emit(CollaboratorEvent::Log("Disconnected from OBS".into()));
        }
        state.showing = None;
        state.trigger_generation += 1;
        Ok(())
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install a freshly identified socket as the live link, unless another
    /// connect won the race.
    fn attach(self: &Arc<Self>, ws: WsStream, url: &str) {
        let (outbox, outbox_rx) = mpsc::unbounded_channel();
        let link_id = {
            let mut state = self.state();
            if state.outbox.is_some() {
                debug!(url, "OBS already connected, dropping duplicate link");
                return;
            }
            state.outbox = Some(outbox);
            state.showing = None;
            state.link_id += 1;
            state.link_id
        };

        info!(url, "connected to OBS");
        self.events
            .emit(CollaboratorEvent::Log(format!("Connected to OBS at {url}")));

        let (sink, stream) = ws.split();
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let reason = run_link(sink, stream, outbox_rx, &inner.events).await;
            inner.detach(link_id, reason);
        });
    }

    fn detach(&self, link_id: u64, reason: Option<String>) {
        {
            let mut state = self.state();
            if state.link_id != link_id || state.outbox.is_none() {
                return;
            }
            state.outbox = None;
            state.showing = None;
        }
        match reason {
            Some(reason) => {
                warn!(%reason, "OBS link lost");
                self.events
                    .emit(CollaboratorEvent::Error(obs_error(format!("connection lost: {reason}"))));
            }
            None => {
                info!("OBS closed the connection");
                self.events
                    .emit(CollaboratorEvent::Log("OBS closed the connection".into()));
            }
        }
    }

    fn show(&self, target: SwitchTarget, generation: u64) {
        let mut state = self.state();
        if state.trigger_generation != generation {
            debug!(?target, "scene switch superseded");
            return;
        }
        if state.showing == Some(target) {
            return;
        }
        let Some(outbox) = state.outbox.clone() else {
            return;
        };

        let scene = match target {
            SwitchTarget::Live => &self.settings.live_scene,
            SwitchTarget::Idle => &self.settings.idle_scene,
        };
        state.next_request_id += 1;
        let request = scene_request(scene, state.next_request_id);
        if outbox.send(Message::Text(request.to_string())).is_ok() {
            state.showing = Some(target);
            debug!(scene = %scene, "scene switch requested");
        }
    }
}

/// Dial OBS and complete the Hello/Identify exchange.
async fn open(url: &str, settings: &SceneSwitchSettings) -> MirrorResult<WsStream> {
    let (mut ws, _response) = connect_async(url)
        .await
        .map_err(|e| obs_error(format!("cannot connect to {url}: {e}")))?;

    let hello = expect_op(&mut ws, OP_HELLO).await?;
    let mut identify = json!({ "rpcVersion": RPC_VERSION, "eventSubscriptions": 0 });
    if let Some(auth) = hello.get("authentication") {
        let password = settings
            .password
            .as_deref()
            .ok_or_else(|| obs_error("OBS requires a password but none is configured"))?;
        let challenge = auth.get("challenge").and_then(Value::as_str).unwrap_or_default();
        let salt = auth.get("salt").and_then(Value::as_str).unwrap_or_default();
        identify["authentication"] = Value::String(auth_response(password, salt, challenge));
    }

    ws.send(Message::Text(
        json!({ "op": OP_IDENTIFY, "d": identify }).to_string(),
    ))
    .await
    .map_err(|e| obs_error(format!("identify failed: {e}")))?;

    expect_op(&mut ws, OP_IDENTIFIED).await?;
    Ok(ws)
}

/// Read until the next text frame and require it to carry `op`.
async fn expect_op(ws: &mut WsStream, op: u64) -> MirrorResult<Value> {
    loop {
        let message = ws
            .next()
            .await
            .ok_or_else(|| obs_error("OBS closed the connection during handshake"))?
            .map_err(|e| obs_error(format!("handshake read failed: {e}")))?;

        match message {
            Message::Text(text) => {
                let frame: Value = serde_json::from_str(&text)
                    .map_err(|e| obs_error(format!("malformed OBS message: {e}")))?;
                let got = frame.get("op").and_then(Value::as_u64);
                if got != Some(op) {
                    return Err(obs_error(format!(
                        "expected op {op} during handshake, got {got:?}"
                    )));
                }
                return Ok(frame.get("d").cloned().unwrap_or(Value::Null));
            }
            Message::Close(frame) => {
                let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                return Err(obs_error(format!("OBS refused the connection: {reason}")));
            }
            _ => continue,
        }
    }
}

/// Pump the outbox into the socket and watch responses until either side
/// closes. Returns the failure reason, or `None` on a clean close.
async fn run_link(
    mut sink: SplitSink<WsStream, Message>,
    mut stream: SplitStream<WsStream>,
    mut outbox_rx: mpsc::UnboundedReceiver<Message>,
    events: &EventSink<CollaboratorEvent>,
) -> Option<String> {
    loop {
        tokio::select! {
            outgoing = outbox_rx.recv() => match outgoing {
                Some(message) => {
                    if let Err(e) = sink.send(message).await {
                        return Some(e.to_string());
                    }
                }
                None => {
                    // Disconnected locally.
                    let _ = sink.close().await;
                    return None;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => report_failed_request(&text, events),
                Some(Ok(Message::Close(_))) | None => return None,
                Some(Ok(_)) => {}
                Some(Err(e)) => return Some(e.to_string()),
            },
        }
    }
}

fn report_failed_request(text: &str, events: &EventSink<CollaboratorEvent>) {
    let Ok(frame) = serde_json::from_str::<Value>(text) else {
        return;
    };
    if frame.get("op").and_then(Value::as_u64) != Some(OP_REQUEST_RESPONSE) {
        return;
    }
    let status = &frame["d"]["requestStatus"];
    if status["result"].as_bool() == Some(false) {
        let comment = status["comment"].as_str().unwrap_or("no reason given");
        events.emit(CollaboratorEvent::Error(obs_error(format!(
            "scene switch rejected: {comment}"
        ))));
    }
}

/// obs-websocket v5 authentication string:
/// `base64(sha256(base64(sha256(password + salt)) + challenge))`.
pub fn auth_response(password: &str, salt: &str, challenge: &str) -> String {
    let secret = BASE64.encode(Sha256::digest(format!("{password}{salt}").as_bytes()));
    BASE64.encode(Sha256::digest(format!("{secret}{challenge}").as_bytes()))
}

fn scene_request(scene: &str, request_id: u64) -> Value {
    json!({
        "op": OP_REQUEST,
        "d": {
            "requestType": "SetCurrentProgramScene",
            "requestId": request_id.to_string(),
            "requestData": { "sceneName": scene },
        }
    })
}

fn obs_error(message: impl Into<String>) -> MirrorError {
    MirrorError::collaborator("obs", message)
}
