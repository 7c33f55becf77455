//! Session provider backed by an external automation process.
//!
//! The sidecar owns the actual chat client (a headless browser or protocol
//! library) and speaks the JSON-lines protocol in [`crate::protocol`] over
//! its stdin/stdout. One process is spawned per session instance.

use std::{
    collections::HashMap,
    path::Path,
    process::Stdio,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    relay_config::ProviderConfig,
    tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        process::{Child, ChildStdin, ChildStdout, Command},
        sync::{Mutex, oneshot},
        task::JoinHandle,
    },
    tracing::{debug, info, trace, warn},
};

use crate::{
    error::ProviderError,
    protocol::{EngineCommand, EngineEvent, LookupData},
    provider::{DisconnectReason, EventSink, ProviderSession, SentMessage, SessionEvent, SessionProvider},
};

/// Environment variable carrying the artifact directory to the sidecar.
pub const SESSION_DIR_ENV: &str = "RELAY_SESSION_DIR";

/// How long the sidecar gets to exit after `shutdown` before it is killed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

type Reply = Result<Option<serde_json::Value>, String>;
type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Reply>>>>;

pub struct SidecarProvider {
    config: ProviderConfig,
}

impl SidecarProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionProvider for SidecarProvider {
    fn name(&self) -> &'static str {
        "sidecar"
    }

    async fn start(
        &self,
        data_dir: &Path,
        events: EventSink,
    ) -> Result<Arc<dyn ProviderSession>, ProviderError> {
        tokio::fs::create_dir_all(data_dir).await.map_err(|e| {
            ProviderError::Start(format!("cannot create {}: {e}", data_dir.display()))
        })?;

        let command = &self.config.command;
        let mut child = Command::new(command)
            .args(&self.config.args)
            .envs(&self.config.env)
            .env(SESSION_DIR_ENV, data_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProviderError::Start(format!("failed to spawn {command}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ProviderError::Start("failed to capture sidecar stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProviderError::Start("failed to capture sidecar stdout".into()))?;

        info!(
            pid = child.id(),
            command = %command,
            generation = events.generation(),
            "sidecar started"
        );

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closing = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_events(
            stdout,
            events,
            Arc::clone(&pending),
            Arc::clone(&closing),
        ));

        Ok(Arc::new(SidecarSession {
            child: Mutex::new(child),
            stdin: Mutex::new(Some(stdin)),
            pending,
            next_id: AtomicU64::new(1),
            closing,
            reader: Mutex::new(Some(reader)),
            request_timeout: Duration::from_secs(self.config.request_timeout_secs),
        }))
    }
}

async fn read_events(
    stdout: ChildStdout,
    events: EventSink,
    pending: PendingMap,
    closing: Arc<AtomicBool>,
) {
    let mut reader = BufReader::new(stdout);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                trace!(raw = %trimmed, "sidecar -> gateway");

                let event = match serde_json::from_str::<EngineEvent>(trimmed) {
                    Ok(event) => event,
                    Err(e) => {
                        debug!(error = %e, raw = %trimmed, "ignoring non-protocol sidecar output");
                        continue;
                    },
                };

                if let EngineEvent::Result {
                    id,
                    ok,
                    data,
                    error,
                } = event
                {
                    let reply = if ok {
                        Ok(data)
                    } else {
                        Err(error.unwrap_or_else(|| "sidecar request failed".into()))
                    };
                    match pending.lock().await.remove(&id) {
                        Some(tx) => {
                            let _ = tx.send(reply);
                        },
                        None => warn!(id, "sidecar answered an unknown request"),
                    }
                } else if let Some(event) = event.into_session_event() {
                    events.emit(event);
                }
            },
            Err(e) => {
                warn!(error = %e, "error reading sidecar stdout");
                break;
            },
        }
    }

    // Dropping the senders fails every in-flight request.
    pending.lock().await.clear();
    if !closing.load(Ordering::SeqCst) {
        warn!(generation = events.generation(), "sidecar exited unexpectedly");
        events.emit(SessionEvent::Disconnected(DisconnectReason::Other(
            "sidecar exited".into(),
        )));
    }
}

struct SidecarSession {
    child: Mutex<Child>,
    stdin: Mutex<Option<ChildStdin>>,
    pending: PendingMap,
    next_id: AtomicU64,
    closing: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
    request_timeout: Duration,
}

impl SidecarSession {
    async fn write(&self, command: &EngineCommand) -> Result<(), ProviderError> {
        let mut payload =
            serde_json::to_string(command).map_err(|e| ProviderError::Engine(e.to_string()))?;
        payload.push('\n');

        let mut stdin = self.stdin.lock().await;
        let Some(stdin) = stdin.as_mut() else {
            return Err(ProviderError::ChannelClosed);
        };
        stdin
            .write_all(payload.as_bytes())
            .await
            .map_err(|_| ProviderError::ChannelClosed)?;
        stdin.flush().await.map_err(|_| ProviderError::ChannelClosed)
    }

    async fn request(
        &self,
        build: impl FnOnce(u64) -> EngineCommand,
    ) -> Result<Option<serde_json::Value>, ProviderError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if let Err(e) = self.write(&build(id)).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(Ok(data))) => Ok(data),
            Ok(Ok(Err(detail))) => Err(ProviderError::Engine(detail)),
            Ok(Err(_)) => Err(ProviderError::ChannelClosed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(ProviderError::Timeout(self.request_timeout))
            },
        }
    }
}

#[async_trait]
impl ProviderSession for SidecarSession {
    async fn send_text(&self, chat_id: &str, body: &str) -> Result<SentMessage, ProviderError> {
        let data = self
            .request(|id| EngineCommand::Send {
                id,
                chat_id: chat_id.to_string(),
                body: body.to_string(),
            })
            .await?;

        Ok(data
            .and_then(|data| serde_json::from_value::<SentMessage>(data).ok())
            .unwrap_or_else(|| SentMessage {
                chat_id: chat_id.to_string(),
                message_id: None,
            }))
    }

    async fn lookup(&self, digits: &str) -> Result<Option<String>, ProviderError> {
        let data = self
            .request(|id| EngineCommand::Check {
                id,
                phone: digits.to_string(),
            })
            .await?;

        Ok(data
            .and_then(|data| serde_json::from_value::<LookupData>(data).ok())
            .and_then(|lookup| lookup.chat_id))
    }

    async fn destroy(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }

        let _ = self.write(&EngineCommand::Shutdown).await;
        self.stdin.lock().await.take();

        let mut child = self.child.lock().await;
        match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
            Ok(Ok(status)) => debug!(%status, "sidecar exited"),
            _ => {
                warn!("sidecar did not exit in time, killing it");
                let _ = child.kill().await;
            },
        }
        if let Some(reader) = self.reader.lock().await.take() {
            reader.abort();
        }
    }
}
