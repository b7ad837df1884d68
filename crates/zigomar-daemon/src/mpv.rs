/// mpv as the native playback element.
///
/// ```text
///   MpvElement ── ensure_connected() ──► MpvDriver::spawn_and_connect()
///        │                                   ├── writer_task ← MpvRequest via mpsc → socket
///        │                                   └── reader_task → replies (request_id) → oneshot
///        │                                                   → events → translator task
///        └── translator task: MpvEvent ──► ElementEvent { generation, kind } ──► EventSink
/// ```
///
/// The process is started lazily on the first load and killed on `release`.
///
/// Platform notes:
/// - Unix:    Unix domain socket
/// - Windows: named pipe `\\.\pipe\<name>`
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zigomar_proto::candidates::HLS_MIME;
use zigomar_proto::platform;

use crate::playback::{ElementEvent, ElementEventKind, EventSink, MediaElement};

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

const IPC_TIMEOUT: Duration = Duration::from_secs(5);

pub const OBS_CORE_IDLE: u64 = 1;
pub const OBS_PAUSE: u64 = 2;

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct MpvRequest {
    req_id: u64,
    /// Serialised JSON line, newline included.
    payload: String,
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// Unsolicited mpv message (no `request_id`).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    pub fn as_property_change(&self) -> Option<(u64, &Value)> {
        if self.event_name()? != "property-change" {
            return None;
        }
        let id = self.raw.get("id")?.as_u64()?;
        Some((id, self.raw.get("data").unwrap_or(&Value::Null)))
    }

    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }
}

/// Cloneable handle to the writer task.
#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<MpvRequest>,
}

impl MpvHandle {
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let mut payload = serde_json::to_string(&json!({ "command": command, "request_id": req_id }))?;
        payload.push('\n');

        let (reply, reply_rx) = oneshot::channel();
        self.tx
            .send(MpvRequest {
                req_id,
                payload,
                reply,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(IPC_TIMEOUT, reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    pub async fn set_property(&self, name: &str, value: Value) -> anyhow::Result<()> {
        self.send(json!(["set_property", name, value])).await?;
        Ok(())
    }

    /// mpv pushes a `property-change` whenever one of these moves.  Must be
    /// repeated on every fresh connection.
    pub async fn observe_properties(&self) {
        for (id, name) in [(OBS_CORE_IDLE, "core-idle"), (OBS_PAUSE, "pause")] {
            match self.send(json!(["observe_property", id, name])).await {
                Ok(_) => debug!("mpv: observing {}", name),
                Err(e) => warn!("mpv: observe_property {} failed: {}", name, e),
            }
        }
    }
}

/// Owns the mpv child process.
pub struct MpvDriver {
    socket_name: String,
    process: Option<tokio::process::Child>,
}

impl MpvDriver {
    pub fn new() -> Self {
        Self {
            socket_name: platform::mpv_socket_name(),
            process: None,
        }
    }

    pub fn process_alive(&mut self) -> bool {
        match self.process {
            Some(ref mut child) => child.try_wait().ok().flatten().is_none(),
            None => false,
        }
    }

    pub async fn kill(&mut self) {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }
    }

    /// Start a fresh mpv (killing any previous one) and connect to its IPC.
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
        volume: f64,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;

        #[cfg(unix)]
        let _ = tokio::fs::remove_file(&self.socket_name).await;

        let binary = platform::find_mpv_binary().ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;
        info!("mpv: spawning {}", binary.display());
        let child = tokio::process::Command::new(binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg("--quiet")
            .arg(platform::mpv_socket_arg())
            .arg(format!("--volume={}", (volume * 100.0).clamp(0.0, 100.0).round() as i64))
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        self.process = Some(child);

        let handle = self.connect(event_tx).await?;
        info!("mpv: connected to IPC");
        Ok(handle)
    }

    #[cfg(unix)]
    async fn connect(&self, event_tx: mpsc::Sender<MpvEvent>) -> anyhow::Result<MpvHandle> {
        let socket_path = std::path::PathBuf::from(&self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if socket_path.exists() {
                // Give mpv a moment to start accepting
                tokio::time::sleep(Duration::from_millis(200)).await;
                let stream = tokio::net::UnixStream::connect(&socket_path).await?;
                return Ok(start_io_tasks(stream, event_tx));
            }
        }
        anyhow::bail!("mpv IPC socket did not appear")
    }

    #[cfg(windows)]
    async fn connect(&self, event_tx: mpsc::Sender<MpvEvent>) -> anyhow::Result<MpvHandle> {
        use tokio::net::windows::named_pipe::ClientOptions;

        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if let Ok(client) = ClientOptions::new().open(&pipe_path) {
                return Ok(start_io_tasks(client, event_tx));
            }
        }
        anyhow::bail!("mpv named pipe did not appear")
    }
}

/// Split any duplex IPC stream into the reader and writer tasks.
fn start_io_tasks<S>(stream: S, event_tx: mpsc::Sender<MpvEvent>) -> MpvHandle
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<MpvRequest>(64);

    tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(BufReader::new(read_half), pending, event_tx));

    MpvHandle { tx: cmd_tx }
}

async fn fail_all(pending: &Pending, why: &str) {
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(anyhow::anyhow!("{}", why)));
    }
}

async fn reader_task<R>(mut reader: BufReader<R>, pending: Pending, event_tx: mpsc::Sender<MpvEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                fail_all(&pending, "mpv IPC connection closed").await;
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                let Some(req_id) = val.get("request_id").and_then(Value::as_u64) else {
                    let _ = event_tx.send(MpvEvent { raw: val }).await;
                    continue;
                };
                let Some(tx) = pending.lock().await.remove(&req_id) else {
                    debug!("mpv reader: response for unknown req={}", req_id);
                    continue;
                };
                let result = match val["error"].as_str() {
                    Some("success") => Ok(val),
                    other => Err(anyhow::anyhow!("mpv error: {}", other.unwrap_or("unknown error"))),
                };
                let _ = tx.send(result);
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                fail_all(&pending, "mpv IPC read error").await;
                break;
            }
        }
    }
}

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<MpvRequest>, pending: Pending)
where
    W: AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register before writing so the reader can always match the reply
        pending.lock().await.insert(req.req_id, req.reply);
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

/// Turns mpv observations into media-element lifecycle events.
#[derive(Debug, Default)]
struct Observed {
    core_idle: Option<bool>,
    paused: bool,
}

impl Observed {
    fn translate(&mut self, evt: &MpvEvent) -> Vec<ElementEventKind> {
        if let Some((id, data)) = evt.as_property_change() {
            return match id {
                OBS_CORE_IDLE => {
                    let idle = data.as_bool();
                    let was = std::mem::replace(&mut self.core_idle, idle);
                    if idle == Some(false) && was != Some(false) {
                        if self.paused {
                            vec![ElementEventKind::CanPlay]
                        } else {
                            vec![ElementEventKind::CanPlay, ElementEventKind::Play]
                        }
                    } else {
                        Vec::new()
                    }
                }
                OBS_PAUSE => {
                    let paused = data.as_bool().unwrap_or(false);
                    if paused == self.paused {
                        return Vec::new();
                    }
                    self.paused = paused;
                    if paused {
                        vec![ElementEventKind::Pause]
                    } else if self.core_idle == Some(false) {
                        vec![ElementEventKind::Play]
                    } else {
                        Vec::new()
                    }
                }
                _ => Vec::new(),
            };
        }

        match evt.event_name() {
            Some("start-file") => {
                self.core_idle = Some(true);
                vec![ElementEventKind::LoadStart]
            }
            Some("end-file") => {
                self.core_idle = Some(true);
                let reason = evt.raw.get("reason").and_then(Value::as_str).unwrap_or("unknown");
                match reason {
                    "eof" => vec![ElementEventKind::Ended],
                    "error" | "network" => {
                        let detail = evt
                            .raw
                            .get("file_error")
                            .and_then(Value::as_str)
                            .unwrap_or(reason);
                        vec![ElementEventKind::Error(detail.to_string())]
                    }
                    _ => Vec::new(),
                }
            }
            _ => Vec::new(),
        }
    }
}

async fn translate_events(mut rx: mpsc::Receiver<MpvEvent>, generation: Arc<AtomicU64>, sink: EventSink) {
    let mut observed = Observed::default();
    while let Some(evt) = rx.recv().await {
        let gen = generation.load(Ordering::SeqCst);
        for kind in observed.translate(&evt) {
            debug!("mpv: {:?} (gen {})", kind, gen);
            if sink.send(ElementEvent::new(gen, kind)).await.is_err() {
                return;
            }
        }
    }
}

struct Connection {
    driver: MpvDriver,
    handle: Option<MpvHandle>,
    translator: Option<JoinHandle<()>>,
    volume: f64,
    muted: bool,
}

pub struct MpvElement {
    conn: Mutex<Connection>,
    generation: Arc<AtomicU64>,
    events: EventSink,
}

impl MpvElement {
    pub fn new(events: EventSink) -> Self {
        Self {
            conn: Mutex::new(Connection {
                driver: MpvDriver::new(),
                handle: None,
                translator: None,
                volume: 1.0,
                muted: false,
            }),
            generation: Arc::new(AtomicU64::new(0)),
            events,
        }
    }

    /// Live handle, spawning mpv if it is not running.
    async fn connected(&self) -> anyhow::Result<MpvHandle> {
        let mut conn = self.conn.lock().await;
        if let Some(handle) = conn.handle.clone() {
            if conn.driver.process_alive() {
                return Ok(handle);
            }
            warn!("mpv: process died, respawning");
        }
        if let Some(old) = conn.translator.take() {
            old.abort();
        }

        let (mpv_tx, mpv_rx) = mpsc::channel::<MpvEvent>(256);
        let volume = conn.volume;
        let handle = conn.driver.spawn_and_connect(mpv_tx, volume).await?;
        handle.observe_properties().await;
        if conn.muted {
            handle.set_property("mute", json!(true)).await?;
        }
        conn.translator = Some(tokio::spawn(translate_events(
            mpv_rx,
            Arc::clone(&self.generation),
            self.events.clone(),
        )));
        conn.handle = Some(handle.clone());
        Ok(handle)
    }

    /// Handle only if mpv is already up.
    async fn existing(&self) -> Option<MpvHandle> {
        self.conn.lock().await.handle.clone()
    }
}

#[async_trait]
impl MediaElement for MpvElement {
    fn can_play_type(&self, mime: &str) -> bool {
        mime == HLS_MIME || mime == "application/x-mpegurl" || mime.starts_with("audio/")
    }

    async fn load(&self, url: &str, generation: u64) -> anyhow::Result<()> {
        let handle = self.connected().await?;
        self.generation.store(generation, Ordering::SeqCst);
        info!("mpv: loadfile {} (gen {})", url, generation);
        handle.send(json!(["loadfile", url, "replace"])).await?;
        Ok(())
    }

    async fn play(&self) -> anyhow::Result<()> {
        let handle = self.connected().await?;
        handle.set_property("pause", json!(false)).await
    }

    async fn pause(&self) -> anyhow::Result<()> {
        match self.existing().await {
            Some(handle) => handle.set_property("pause", json!(true)).await,
            None => Ok(()),
        }
    }

    async fn set_volume(&self, volume: f64) -> anyhow::Result<()> {
        let handle = {
            let mut conn = self.conn.lock().await;
            conn.volume = volume.clamp(0.0, 1.0);
            conn.handle.clone()
        };
        match handle {
            Some(handle) => handle.set_property("volume", json!(volume.clamp(0.0, 1.0) * 100.0)).await,
            None => Ok(()),
        }
    }

    async fn set_muted(&self, muted: bool) -> anyhow::Result<()> {
        let handle = {
            let mut conn = self.conn.lock().await;
            conn.muted = muted;
            conn.handle.clone()
        };
        match handle {
            Some(handle) => handle.set_property("mute", json!(muted)).await,
            None => Ok(()),
        }
    }

    async fn release(&self) {
        let mut conn = self.conn.lock().await;
        if let Some(handle) = conn.handle.take() {
            let _ = handle.send(json!(["stop"])).await;
        }
        if let Some(translator) = conn.translator.take() {
            translator.abort();
        }
        conn.driver.kill().await;
        info!("mpv: released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn property(id: u64, data: Value) -> MpvEvent {
        MpvEvent {
            raw: json!({"event": "property-change", "id": id, "data": data}),
        }
    }

    fn named(raw: Value) -> MpvEvent {
        MpvEvent { raw }
    }

    #[test]
    fn test_event_accessors() {
        let evt = property(OBS_PAUSE, json!(true));
        assert_eq!(evt.as_property_change(), Some((OBS_PAUSE, &json!(true))));
        let evt = named(json!({"event": "start-file"}));
        assert_eq!(evt.event_name(), Some("start-file"));
        assert!(evt.as_property_change().is_none());
    }

    #[test]
    fn test_translate_load_to_playing() {
        let mut obs = Observed::default();
        assert!(obs.translate(&property(OBS_CORE_IDLE, json!(true))).is_empty());
        assert_eq!(
            obs.translate(&named(json!({"event": "start-file"}))),
            vec![ElementEventKind::LoadStart]
        );
        assert_eq!(
            obs.translate(&property(OBS_CORE_IDLE, json!(false))),
            vec![ElementEventKind::CanPlay, ElementEventKind::Play]
        );
        // Repeated core-idle=false is not a new start
        assert!(obs.translate(&property(OBS_CORE_IDLE, json!(false))).is_empty());
    }

    #[test]
    fn test_translate_pause_and_resume() {
        let mut obs = Observed::default();
        obs.translate(&property(OBS_CORE_IDLE, json!(false)));
        assert_eq!(
            obs.translate(&property(OBS_PAUSE, json!(true))),
            vec![ElementEventKind::Pause]
        );
        assert_eq!(
            obs.translate(&property(OBS_PAUSE, json!(false))),
            vec![ElementEventKind::Play]
        );
    }

    #[test]
    fn test_translate_end_file_reasons() {
        let mut obs = Observed::default();
        assert_eq!(
            obs.translate(&named(json!({"event": "end-file", "reason": "eof"}))),
            vec![ElementEventKind::Ended]
        );
        assert_eq!(
            obs.translate(&named(
                json!({"event": "end-file", "reason": "error", "file_error": "loading failed"})
            )),
            vec![ElementEventKind::Error("loading failed".into())]
        );
        assert_eq!(
            obs.translate(&named(json!({"event": "end-file", "reason": "network"}))),
            vec![ElementEventKind::Error("network".into())]
        );
        assert!(obs
            .translate(&named(json!({"event": "end-file", "reason": "stop"})))
            .is_empty());
    }

    #[test]
    fn test_can_play_type() {
        let (tx, _rx) = mpsc::channel(1);
        let element = MpvElement::new(tx);
        assert!(element.can_play_type(HLS_MIME));
        assert!(element.can_play_type("audio/mpeg"));
        assert!(!element.can_play_type("video/webm"));
    }

    #[tokio::test]
    async fn test_ipc_matches_replies_and_forwards_events() {
        let (ours, theirs) = tokio::io::duplex(4096);
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let handle = start_io_tasks(ours, event_tx);

        // Fake mpv: push an event, then answer every request in kind.
        tokio::spawn(async move {
            let (read_half, mut write_half) = tokio::io::split(theirs);
            write_half
                .write_all(b"{\"event\":\"start-file\"}\n")
                .await
                .unwrap();
            let mut lines = BufReader::new(read_half).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let req: Value = serde_json::from_str(&line).unwrap();
                let id = req["request_id"].as_u64().unwrap();
                let reply = if req["command"][0] == "bogus" {
                    json!({"request_id": id, "error": "invalid parameter"})
                } else {
                    json!({"request_id": id, "error": "success", "data": 42})
                };
                let mut out = reply.to_string();
                out.push('\n');
                write_half.write_all(out.as_bytes()).await.unwrap();
            }
        });

        let resp = handle.send(json!(["get_property", "volume"])).await.unwrap();
        assert_eq!(resp["data"], 42);
        assert!(handle.send(json!(["bogus"])).await.is_err());

        let evt = event_rx.recv().await.unwrap();
        assert_eq!(evt.event_name(), Some("start-file"));
    }

    #[tokio::test]
    async fn test_translator_stamps_current_generation() {
        let (mpv_tx, mpv_rx) = mpsc::channel(8);
        let (sink, mut rx) = mpsc::channel(8);
        let generation = Arc::new(AtomicU64::new(4));
        tokio::spawn(translate_events(mpv_rx, generation.clone(), sink));

        mpv_tx.send(named(json!({"event": "start-file"}))).await.unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            ElementEvent::new(4, ElementEventKind::LoadStart)
        );

        generation.store(5, Ordering::SeqCst);
        mpv_tx
            .send(named(json!({"event": "end-file", "reason": "eof"})))
            .await
            .unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            ElementEvent::new(5, ElementEventKind::Ended)
        );
    }
}
