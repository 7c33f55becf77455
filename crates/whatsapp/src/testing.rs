//! Scriptable provider and removal doubles for tests of this crate and of
//! crates built on top of it (enable the `test-support` feature).

use std::{
    collections::{HashSet, VecDeque},
    io,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
};

use {async_trait::async_trait, tokio::sync::mpsc};

use crate::{
    error::ProviderError,
    phone::CHAT_ID_SUFFIX,
    provider::{EventSink, ProviderSession, SentMessage, SessionEvent, SessionProvider},
    store::RemovalStrategy,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Decrement a failure budget, returning whether this call should fail.
fn consume(budget: &AtomicU32) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// A session that [`ScriptedProvider`] launched.
pub struct Launch {
    pub sink: EventSink,
    pub session: ScriptedSession,
    pub data_dir: PathBuf,
}

/// Provider whose sessions are driven by the test through [`Launch`].
pub struct ScriptedProvider {
    auto_ready: bool,
    failing_starts: AtomicU32,
    starts: AtomicU32,
    launches: mpsc::UnboundedSender<Launch>,
}

impl ScriptedProvider {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Launch>) {
        Self::build(false)
    }

    /// Sessions report `Ready` as soon as they are launched.
    pub fn auto_ready() -> (Arc<Self>, mpsc::UnboundedReceiver<Launch>) {
        Self::build(true)
    }

    fn build(auto_ready: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<Launch>) {
        let (launches, rx) = mpsc::unbounded_channel();
        let provider = Arc::new(Self {
            auto_ready,
            failing_starts: AtomicU32::new(0),
            starts: AtomicU32::new(0),
            launches,
        });
        (provider, rx)
    }

    /// Make the next `n` starts fail. `u32::MAX` fails them all; `0` clears.
    pub fn fail_next_starts(&self, n: u32) {
        self.failing_starts.store(n, Ordering::SeqCst);
    }

    pub fn start_count(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn start(
        &self,
        data_dir: &Path,
        events: EventSink,
    ) -> Result<Arc<dyn ProviderSession>, ProviderError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if consume(&self.failing_starts) {
            return Err(ProviderError::Start("scripted launch failure".into()));
        }

        let session = ScriptedSession::default();
        if self.auto_ready {
            events.emit(SessionEvent::Ready);
        }
        let _ = self.launches.send(Launch {
            sink: events,
            session: session.clone(),
            data_dir: data_dir.to_path_buf(),
        });
        Ok(Arc::new(session))
    }
}

type SendHook = Box<dyn Fn(u32) + Send + Sync>;

#[derive(Default)]
struct ScriptedInner {
    sends: Mutex<VecDeque<Result<SentMessage, ProviderError>>>,
    lookups: Mutex<VecDeque<Result<Option<String>, ProviderError>>>,
    sent: Mutex<Vec<(String, String)>>,
    send_calls: AtomicU32,
    lookup_calls: AtomicU32,
    destroyed: AtomicBool,
    on_send: Mutex<Option<SendHook>>,
}

/// Session with queued answers. Once a queue is empty, sends succeed and
/// lookups resolve every number.
#[derive(Clone, Default)]
pub struct ScriptedSession {
    inner: Arc<ScriptedInner>,
}

impl ScriptedSession {
    pub fn push_send(&self, result: Result<SentMessage, ProviderError>) {
        lock(&self.inner.sends).push_back(result);
    }

    pub fn push_send_error(&self, detail: &str) {
        self.push_send(Err(ProviderError::Engine(detail.to_string())));
    }

    pub fn push_lookup(&self, result: Result<Option<String>, ProviderError>) {
        lock(&self.inner.lookups).push_back(result);
    }

    /// Called with the 1-based call number on every send.
    pub fn on_send(&self, hook: impl Fn(u32) + Send + Sync + 'static) {
        *lock(&self.inner.on_send) = Some(Box::new(hook));
    }

    pub fn send_calls(&self) -> u32 {
        self.inner.send_calls.load(Ordering::SeqCst)
    }

    pub fn lookup_calls(&self) -> u32 {
        self.inner.lookup_calls.load(Ordering::SeqCst)
    }

    /// Successfully sent `(chat_id, body)` pairs.
    pub fn sent(&self) -> Vec<(String, String)> {
        lock(&self.inner.sent).clone()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderSession for ScriptedSession {
    async fn send_text(&self, chat_id: &str, body: &str) -> Result<SentMessage, ProviderError> {
        let call = self.inner.send_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(hook) = lock(&self.inner.on_send).as_ref() {
            hook(call);
        }

        let result = lock(&self.inner.sends).pop_front().unwrap_or_else(|| {
            Ok(SentMessage {
                chat_id: chat_id.to_string(),
                message_id: Some(format!("scripted-{call}")),
            })
        });
        if result.is_ok() {
            lock(&self.inner.sent).push((chat_id.to_string(), body.to_string()));
        }
        result
    }

    async fn lookup(&self, digits: &str) -> Result<Option<String>, ProviderError> {
        self.inner.lookup_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.inner.lookups)
            .pop_front()
            .unwrap_or_else(|| Ok(Some(format!("{digits}{CHAT_ID_SUFFIX}"))))
    }

    async fn destroy(&self) {
        self.inner.destroyed.store(true, Ordering::SeqCst);
    }
}

/// In-memory [`RemovalStrategy`] that records every removal attempt.
#[derive(Default)]
pub struct MemoryRemover {
    present: Mutex<HashSet<PathBuf>>,
    attempts: Mutex<Vec<(PathBuf, bool)>>,
    failures: AtomicU32,
}

impl MemoryRemover {
    pub fn insert(&self, path: &Path) {
        lock(&self.present).insert(path.to_path_buf());
    }

    pub fn contains(&self, path: &Path) -> bool {
        lock(&self.present).contains(path)
    }

    /// Make the next `n` removals fail as if the path were still in use.
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Every `(path, forceful)` removal attempt, in order.
    pub fn attempts(&self) -> Vec<(PathBuf, bool)> {
        lock(&self.attempts).clone()
    }
}

#[async_trait]
impl RemovalStrategy for MemoryRemover {
    async fn exists(&self, path: &Path) -> bool {
        self.contains(path)
    }

    async fn remove(&self, path: &Path, forceful: bool) -> io::Result<()> {
        lock(&self.attempts).push((path.to_path_buf(), forceful));
        if consume(&self.failures) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "resource busy or locked",
            ));
        }
        lock(&self.present).remove(path);
        Ok(())
    }
}
