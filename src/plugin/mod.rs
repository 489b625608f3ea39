//! Running as a plugin of the game server.
//!
//! The host talks to us over stdin/stdout with JSONL-framed JSON-RPC. Requests
//! it makes of us are answered inline; heartbeats and chat commands run as
//! their own tasks so the read loop keeps feeding watcher resolutions and RPC
//! responses while a capture is in flight.

pub mod protocol;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::commands::{Caller, COMMAND_NAME};
use crate::config::Config;
use crate::files;
use crate::host::{Heartbeat, Host, HostError, SaveSummary};
use crate::service::Autosaver;
use protocol::{
    Incoming, JsonlReader, JsonlWriter, RpcError, RpcId, RpcMessage, TransportError,
    INVALID_PARAMS, METHOD_NOT_FOUND,
};

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

type Responder = oneshot::Sender<Result<Value, RpcError>>;

/// The host on the other end of the plugin pipes.
pub struct StdioHost {
    root: PathBuf,
    outgoing: Mutex<Option<mpsc::UnboundedSender<RpcMessage>>>,
    pending: Mutex<HashMap<RpcId, Responder>>,
    next_id: AtomicI64,
    request_timeout: Duration,
}

impl StdioHost {
    pub fn new(root: PathBuf, outgoing: mpsc::UnboundedSender<RpcMessage>) -> Self {
        StdioHost {
            root,
            outgoing: Mutex::new(Some(outgoing)),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            request_timeout: REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn send(&self, message: RpcMessage) -> Result<(), HostError> {
        let outgoing = self.outgoing.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = outgoing.as_ref().ok_or(HostError::Closed)?;
        tx.send(message).map_err(|_| HostError::Closed)
    }

    fn notify(&self, method: &str, params: Value) -> Result<(), HostError> {
        self.send(RpcMessage::notification(method, params))
    }

    /// Send a request and wait for the matching response.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, HostError> {
        let id = RpcId::Num(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.pending().insert(id.clone(), tx);

        if let Err(e) = self.send(RpcMessage::request(id.clone(), method, params)) {
            self.pending().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(e))) => Err(HostError::Rpc(e.message)),
            Ok(Err(_)) => Err(HostError::Closed),
            Err(_) => {
                self.pending().remove(&id);
                Err(HostError::Timeout(self.request_timeout))
            }
        }
    }

    /// Hand a response to whoever is waiting for it. False if nobody was.
    pub fn complete(&self, id: &RpcId, result: Result<Value, RpcError>) -> bool {
        match self.pending().remove(id) {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }

    /// Stop sending. Outstanding requests fail with [`HostError::Closed`].
    pub fn close(&self) {
        self.outgoing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.pending().clear();
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<RpcId, Responder>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Host for StdioHost {
    fn trigger_capture(&self, temp_name: &str) -> Result<(), HostError> {
        self.notify("saveBricks", json!({ "name": temp_name }))
    }

    fn trigger_load(&self, relative: &Path) -> Result<(), HostError> {
        self.notify("loadBricks", json!({ "name": relative.to_string_lossy() }))
    }

    fn list_existing_saves(&self) -> Result<Vec<PathBuf>, HostError> {
        Ok(files::list_saves(&self.root)?)
    }

    async fn read_save_data(&self, relative: &Path) -> Result<SaveSummary, HostError> {
        let value = self.request("readSaveData", json!({ "path": relative.to_string_lossy() })).await?;
        Ok(serde_json::from_value(value)?)
    }

    fn broadcast(&self, message: &str) {
        if let Err(e) = self.notify("broadcast", json!({ "message": message })) {
            warn!(error = %e, "could not broadcast");
        }
    }

    fn whisper(&self, target: &str, message: &str) {
        if let Err(e) = self.notify("whisper", json!({ "target": target, "message": message })) {
            warn!(error = %e, target, "could not whisper");
        }
    }

    fn emit_plugin(&self, plugin: &str, event: &str, args: Value) -> Result<(), HostError> {
        self.notify(
            "emitPlugin",
            json!({ "plugin": plugin, "event": event, "args": args }),
        )
    }
}

#[derive(Debug, Deserialize)]
struct PluginEventParams {
    event: String,
    from: String,
}

#[derive(Debug, Deserialize)]
struct CommandParams {
    caller: Caller,
    #[serde(default)]
    args: Vec<String>,
}

/// Run as a plugin on stdin/stdout until the host says stop or hangs up.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let (tx, rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_loop(JsonlWriter::new(tokio::io::stdout()), rx));

    let host = Arc::new(StdioHost::new(config.save_root.clone(), tx));
    let autosaver = Arc::new(
        Autosaver::new(config, host.clone()).context("failed to start the autosaver")?,
    );
    let _watch = autosaver
        .start_watching()
        .context("failed to watch the save folder")?;

    let mut reader = JsonlReader::new(BufReader::new(tokio::io::stdin()));
    let served = serve(&mut reader, &autosaver, &host).await;

    autosaver.stop();
    host.close();
    if let Err(e) = writer.await {
        warn!(error = %e, "writer task ended abnormally");
    }

    served.context("plugin connection failed")?;
    info!("autosaver stopped");
    Ok(())
}

async fn write_loop<W: AsyncWrite + Unpin>(
    mut writer: JsonlWriter<W>,
    mut rx: mpsc::UnboundedReceiver<RpcMessage>,
) {
    while let Some(message) = rx.recv().await {
        if let Err(e) = writer.write_message(&message).await {
            error!(error = %e, "failed to write to host");
            break;
        }
    }
}

/// Dispatch host messages until `stop` or EOF.
pub async fn serve<R: AsyncBufRead + Unpin>(
    reader: &mut JsonlReader<R>,
    autosaver: &Arc<Autosaver>,
    host: &Arc<StdioHost>,
) -> Result<(), TransportError> {
    loop {
        let message = match reader.read_message().await {
            Ok(Some(message)) => message,
            Ok(None) => {
                info!("host closed the connection");
                return Ok(());
            }
            Err(e) if e.is_recoverable() => {
                warn!(error = %e, "ignoring malformed message");
                continue;
            }
            Err(e) => return Err(e),
        };

        match message.classify() {
            Incoming::Response { id, result } => {
                if !host.complete(&id, result) {
                    debug!(?id, "response for a request nobody is waiting on");
                }
            }
            Incoming::Request { id, method, params } => {
                let stop = method == "stop";
                let result = answer(autosaver, &method, params);
                if let Err(e) = host.send(RpcMessage::response(id, result)) {
                    warn!(error = %e, method = %method, "could not answer host");
                }
                if stop {
                    info!("host asked us to stop");
                    return Ok(());
                }
            }
            Incoming::Notification { method, params } => on_notification(autosaver, &method, params),
            Incoming::Invalid => warn!("ignoring message with neither method nor id"),
        }
    }
}

fn answer(autosaver: &Autosaver, method: &str, params: Value) -> Result<Value, RpcError> {
    match method {
        "init" => Ok(json!({ "registeredCommands": [COMMAND_NAME] })),
        "pluginEvent" => {
            let params: PluginEventParams = serde_json::from_value(params)
                .map_err(|e| RpcError::new(INVALID_PARAMS, e.to_string()))?;
            autosaver.plugin_event(&params.event, &params.from);
            Ok(Value::Null)
        }
        "stop" => Ok(Value::Null),
        other => Err(RpcError::new(METHOD_NOT_FOUND, format!("unknown method {other}"))),
    }
}

fn on_notification(autosaver: &Arc<Autosaver>, method: &str, params: Value) {
    match method {
        "heartbeat" => match serde_json::from_value::<Heartbeat>(params) {
            Ok(heartbeat) => {
                let autosaver = autosaver.clone();
                tokio::spawn(async move {
                    autosaver.on_heartbeat(heartbeat).await;
                });
            }
            Err(e) => warn!(error = %e, "bad heartbeat"),
        },
        "start" => {
            let autosaver = autosaver.clone();
            tokio::spawn(async move { autosaver.on_start().await });
        }
        "command" => match serde_json::from_value::<CommandParams>(params) {
            Ok(CommandParams { caller, args }) => {
                let autosaver = autosaver.clone();
                tokio::spawn(async move {
                    let replies = autosaver.handle_command(&caller, &args).await;
                    autosaver.deliver(&caller, &replies);
                });
            }
            Err(e) => warn!(error = %e, "bad command"),
        },
        other => debug!(method = other, "ignoring notification"),
    }
}
