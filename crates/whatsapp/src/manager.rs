//! Session lifecycle and recovery.
//!
//! [`SessionManager`] is a cheap handle to an actor task that exclusively
//! owns the session instance, its [`SessionState`] and the reconnect
//! counter. Provider events, administrative commands and timer firings are
//! all serialized through that task, so no lock guards the state machine.
//! Readers get a consistent snapshot through a `watch` channel.

use std::{ops::ControlFlow, sync::Arc};

use {
    tokio::{
        sync::{mpsc, oneshot, watch},
        task::JoinHandle,
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use crate::{
    error::{FailureClass, ProviderError},
    pairing,
    policy::{ReconnectPolicy, RecoveryTrigger},
    provider::{
        DisconnectReason, EventEnvelope, EventSink, ProviderSession, SessionEvent,
        SessionProvider,
    },
    state::{SessionSnapshot, SessionState},
    store::SessionStateStore,
    timer::ScheduledTask,
};

/// What readers see: the snapshot and the session it describes, published
/// together so a `Ready` snapshot never pairs with a stale session.
struct Published {
    snapshot: SessionSnapshot,
    session: Option<Arc<dyn ProviderSession>>,
}

enum Msg {
    Initialize {
        clean: bool,
    },
    Restart {
        clean: bool,
    },
    ReportTransient {
        detail: String,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
    Started {
        generation: u64,
        result: Result<Arc<dyn ProviderSession>, ProviderError>,
    },
    RecoveryDue {
        ticket: u64,
    },
}

/// Handle to the session manager actor.
#[derive(Clone)]
pub struct SessionManager {
    tx: mpsc::UnboundedSender<Msg>,
    published: watch::Receiver<Published>,
    provider_name: &'static str,
}

impl SessionManager {
    /// Spawn the actor on the current runtime. Nothing connects until
    /// [`initialize`](Self::initialize) or [`restart`](Self::restart).
    pub fn spawn(
        provider: Arc<dyn SessionProvider>,
        store: SessionStateStore,
        policy: ReconnectPolicy,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (published_tx, published_rx) = watch::channel(Published {
            snapshot: SessionSnapshot {
                state: SessionState::Uninitialized,
                initializing: false,
                reconnect_attempts: 0,
                max_attempts: policy.max_attempts(),
            },
            session: None,
        });
        let provider_name = provider.name();

        let actor = Actor {
            provider,
            store,
            policy,
            state: SessionState::Uninitialized,
            initializing: false,
            reconnect_attempts: 0,
            generation: 0,
            launched: false,
            early_events: Vec::new(),
            session: None,
            init: None,
            recovery: None,
            artifact_cleanup: None,
            next_ticket: 0,
            tx: tx.downgrade(),
            event_tx,
            published: published_tx,
        };
        tokio::spawn(actor.run(rx, event_rx));

        Self {
            tx,
            published: published_rx,
            provider_name,
        }
    }

    /// Start a session. Dropped with a log if one is already initializing.
    pub fn initialize(&self, clean: bool) {
        self.send(Msg::Initialize { clean });
    }

    /// Reset the reconnect counter, cancel pending timers and start over
    /// regardless of the current state. An initialization still in flight is
    /// abandoned before the new one begins.
    ///
    /// The HTTP gateway always restarts with `clean`. Library callers may pass
    /// `false` to resume the stored pairing instead; that is upgraded to a
    /// clean slate while a logout cleanup is pending.
    pub fn restart(&self, clean: bool) {
        self.send(Msg::Restart { clean });
    }

    /// Dispatch-path signal that the current session looks broken.
    pub fn report_transient(&self, detail: impl Into<String>) {
        self.send(Msg::ReportTransient {
            detail: detail.into(),
        });
    }

    /// Tear the session down and stop the actor.
    pub async fn shutdown(&self) {
        let (done, rx) = oneshot::channel();
        if self.tx.send(Msg::Shutdown { done }).is_ok() {
            let _ = rx.await;
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.published.borrow().snapshot
    }

    pub fn is_ready(&self) -> bool {
        self.snapshot().is_ready()
    }

    /// The current session, only while it is `Ready`.
    pub fn ready_session(&self) -> Option<Arc<dyn ProviderSession>> {
        let published = self.published.borrow();
        if published.snapshot.is_ready() {
            published.session.clone()
        } else {
            None
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider_name
    }

    /// Wait until the snapshot satisfies `predicate`.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&SessionSnapshot) -> bool,
    ) -> SessionSnapshot {
        let mut rx = self.published.clone();
        match rx.wait_for(|p| predicate(&p.snapshot)).await {
            Ok(published) => published.snapshot,
            Err(_) => self.snapshot(),
        }
    }

    fn send(&self, msg: Msg) {
        if self.tx.send(msg).is_err() {
            warn!("session manager is no longer running");
        }
    }
}

struct PendingRecovery {
    task: ScheduledTask,
    trigger: RecoveryTrigger,
}

/// The spawned work of one initialization: teardown of the previous
/// session, optional artifact wipe and the provider launch.
struct InitTask {
    generation: u64,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl InitTask {
    /// Stop the launch at its next await point. Teardown of the previous
    /// session is not interrupted.
    fn abandon(self) -> JoinHandle<()> {
        if !self.handle.is_finished() {
            debug!(generation = self.generation, "abandoning in-flight initialization");
        }
        self.token.cancel();
        self.handle
    }
}

struct Actor {
    provider: Arc<dyn SessionProvider>,
    store: SessionStateStore,
    policy: ReconnectPolicy,

    state: SessionState,
    initializing: bool,
    reconnect_attempts: u32,
    /// Bumped for every session instance; tags events and launches.
    generation: u64,
    /// Whether the provider acknowledged the launch of `generation`.
    launched: bool,
    /// Events of `generation` that arrived before its launch was acknowledged.
    early_events: Vec<SessionEvent>,
    session: Option<Arc<dyn ProviderSession>>,
    init: Option<InitTask>,

    recovery: Option<PendingRecovery>,
    artifact_cleanup: Option<ScheduledTask>,
    next_ticket: u64,

    tx: mpsc::WeakUnboundedSender<Msg>,
    event_tx: mpsc::UnboundedSender<EventEnvelope>,
    published: watch::Sender<Published>,
}

impl Actor {
    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<Msg>,
        mut event_rx: mpsc::UnboundedReceiver<EventEnvelope>,
    ) {
        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else { break };
                    if self.handle(msg).await.is_break() {
                        return;
                    }
                },
                Some(envelope) = event_rx.recv() => self.on_envelope(envelope),
            }
        }

        debug!("all session manager handles dropped, stopping");
        self.stop().await;
    }

    async fn handle(&mut self, msg: Msg) -> ControlFlow<()> {
        match msg {
            Msg::Initialize { clean } => self.begin_initialize(clean, false),
            Msg::Restart { clean } => self.restart(clean),
            Msg::ReportTransient { detail } => self.on_dispatch_transient(detail),
            Msg::Started { generation, result } => self.on_started(generation, result),
            Msg::RecoveryDue { ticket } => self.on_recovery_due(ticket),
            Msg::Shutdown { done } => {
                self.stop().await;
                let _ = done.send(());
                return ControlFlow::Break(());
            },
        }
        ControlFlow::Continue(())
    }

    // ── Initialization ──────────────────────────────────────────────────────

    fn begin_initialize(&mut self, clean: bool, force: bool) {
        if self.initializing && !force {
            info!(
                generation = self.generation,
                "session initialization already in progress, request dropped"
            );
            return;
        }
        let Some(tx) = self.tx.upgrade() else {
            return;
        };

        self.generation += 1;
        self.launched = false;
        self.early_events.clear();
        let generation = self.generation;
        let previous = self.session.take();
        self.state = SessionState::Initializing;
        self.initializing = true;
        self.publish();
        info!(generation, clean, "initializing session");

        // The superseded launch must be gone before this one touches the
        // artifact or the provider.
        let superseded = self.init.take().map(InitTask::abandon);
        let provider = Arc::clone(&self.provider);
        let store = self.store.clone();
        let sink = EventSink::new(generation, self.event_tx.clone());
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let handle = tokio::spawn(async move {
            if let Some(superseded) = superseded {
                let _ = superseded.await;
            }
            if let Some(previous) = previous {
                previous.destroy().await;
            }

            let launch = async {
                if clean {
                    if !store.delete_artifact().await {
                        warn!(
                            generation,
                            "could not clear session data, continuing without a clean slate"
                        );
                    }
                } else if store.has_artifact().await {
                    info!(generation, path = %store.data_dir().display(), "resuming stored pairing");
                }
                if cancelled.is_cancelled() {
                    return None;
                }
                Some(provider.start(store.data_dir(), sink).await)
            };
            let result = tokio::select! {
                biased;
                () = cancelled.cancelled() => None,
                result = launch => result,
            };
            let Some(result) = result else {
                debug!(generation, "initialization abandoned before launch");
                return;
            };

            if let Err(mpsc::error::SendError(Msg::Started {
                result: Ok(session),
                ..
            })) = tx.send(Msg::Started { generation, result })
            {
                session.destroy().await;
            }
        });
        self.init = Some(InitTask {
            generation,
            token,
            handle,
        });
    }

    fn on_started(
        &mut self,
        generation: u64,
        result: Result<Arc<dyn ProviderSession>, ProviderError>,
    ) {
        if generation != self.generation {
            if let Ok(session) = result {
                debug!(generation, "discarding session from an abandoned initialization");
                tokio::spawn(async move { session.destroy().await });
            }
            return;
        }

        match result {
            Ok(session) => {
                self.launched = true;
                self.session = Some(session);
                self.publish();
                debug!(generation, "session launched, waiting for provider events");

                for event in std::mem::take(&mut self.early_events) {
                    self.on_event(generation, event);
                }
            },
            Err(e) => {
                error!(generation, error = %e, "failed to start session provider");
                self.early_events.clear();
                self.state = SessionState::ErroredTerminating;
                self.initializing = false;
                self.publish();
                self.schedule_recovery(RecoveryTrigger::StartFailure);
            },
        }
    }

    // ── Provider events ─────────────────────────────────────────────────────

    fn on_envelope(&mut self, envelope: EventEnvelope) {
        let EventEnvelope { generation, event } = envelope;
        if generation != self.generation {
            debug!(
                generation,
                current = self.generation,
                "ignoring event from an abandoned session"
            );
            return;
        }
        if !self.launched {
            self.early_events.push(event);
            return;
        }
        self.on_event(generation, event);
    }

    fn on_event(&mut self, generation: u64, event: SessionEvent) {
        let next = self.state.on_event(&event);
        match event {
            SessionEvent::PairingCode(code) => {
                if let Some(next) = next {
                    self.state = next;
                    self.publish();
                }
                if self.state == SessionState::AwaitingPairing {
                    pairing::announce(&code);
                } else {
                    debug!(generation, state = %self.state, "ignoring pairing code");
                }
            },
            SessionEvent::Ready => {
                let Some(next) = next else {
                    debug!(generation, state = %self.state, "ignoring ready event");
                    return;
                };
                self.state = next;
                self.initializing = false;
                self.reconnect_attempts = 0;
                self.recovery = None;
                self.publish();
                info!(generation, "session ready");
            },
            SessionEvent::AuthFailed(reason) => {
                error!(generation, reason = %reason, "session authentication failed");
                self.end_session(SessionState::AuthFailed);
                self.schedule_recovery(RecoveryTrigger::AuthFailure);
            },
            SessionEvent::Disconnected(reason) => self.on_disconnected(generation, reason),
            SessionEvent::ProviderError(err) => match err.class() {
                FailureClass::Transient => {
                    warn!(generation, error = %err, "transient provider error");
                    self.schedule_recovery(RecoveryTrigger::ProviderError);
                },
                _ => {
                    error!(generation, error = %err, "unrecoverable provider error");
                    self.on_disconnected(generation, DisconnectReason::Fatal);
                },
            },
        }
    }

    fn on_disconnected(&mut self, generation: u64, reason: DisconnectReason) {
        warn!(generation, reason = %reason, "session disconnected");
        self.end_session(SessionState::Disconnected);

        if reason.invalidates_pairing() {
            info!(
                generation,
                "pairing revoked, automatic reconnect disabled until restart"
            );
            self.recovery = None;
            self.schedule_artifact_cleanup();
        } else {
            self.schedule_recovery(RecoveryTrigger::Disconnect);
        }
    }

    fn on_dispatch_transient(&mut self, detail: String) {
        if self.state != SessionState::Ready {
            debug!(state = %self.state, detail, "ignoring dispatch failure signal");
            return;
        }
        warn!(
            generation = self.generation,
            detail, "repeated transient send failures, session may need recovery"
        );
        self.schedule_recovery(RecoveryTrigger::ProviderError);
    }

    // ── Recovery ────────────────────────────────────────────────────────────

    fn schedule_recovery(&mut self, trigger: RecoveryTrigger) {
        if let Some(pending) = &self.recovery {
            debug!(
                pending = pending.trigger.as_str(),
                trigger = trigger.as_str(),
                "recovery already scheduled"
            );
            return;
        }
        if !self.policy.should_retry(self.reconnect_attempts) {
            error!(
                attempts = self.reconnect_attempts,
                max_attempts = self.policy.max_attempts(),
                trigger = trigger.as_str(),
                "reconnect attempts exhausted, waiting for manual restart"
            );
            return;
        }

        self.reconnect_attempts += 1;
        let delay = self.policy.next_delay(trigger);
        let ticket = self.next_ticket();
        let weak = self.tx.clone();
        let task = ScheduledTask::spawn(ticket, delay, async move {
            if let Some(tx) = weak.upgrade() {
                let _ = tx.send(Msg::RecoveryDue { ticket });
            }
        });

        info!(
            attempt = self.reconnect_attempts,
            max_attempts = self.policy.max_attempts(),
            trigger = trigger.as_str(),
            delay_secs = delay.as_secs(),
            clean = trigger.clean_slate(),
            "scheduling session recovery"
        );
        self.recovery = Some(PendingRecovery { task, trigger });
        self.publish();
    }

    fn on_recovery_due(&mut self, ticket: u64) {
        match self.recovery.take() {
            Some(pending) if pending.task.ticket() == ticket => {
                self.begin_initialize(pending.trigger.clean_slate(), false);
            },
            other => {
                self.recovery = other;
                debug!(ticket, "ignoring superseded recovery timer");
            },
        }
    }

    fn schedule_artifact_cleanup(&mut self) {
        let delay = self.policy.next_delay(RecoveryTrigger::LogoutGrace);
        let ticket = self.next_ticket();
        let store = self.store.clone();
        debug!(delay_secs = delay.as_secs(), "session data cleanup scheduled");
        self.artifact_cleanup = Some(ScheduledTask::spawn(ticket, delay, async move {
            if store.delete_artifact().await {
                info!("cleared session data after logout");
            } else {
                warn!("session data left behind after logout, it will be wiped on restart");
            }
        }));
    }

    fn restart(&mut self, clean: bool) {
        // A pending logout cleanup means the stored pairing is already dead.
        let clean = clean || self.artifact_cleanup.take().is_some();
        info!(clean, state = %self.state, "manual restart requested");
        self.reconnect_attempts = 0;
        self.recovery = None;
        self.begin_initialize(clean, true);
    }

    // ── Helpers ─────────────────────────────────────────────────────────────

    /// Leave the current session behind in a non-ready `state`.
    fn end_session(&mut self, state: SessionState) {
        self.state = state;
        self.initializing = false;
        if let Some(session) = self.session.take() {
            tokio::spawn(async move { session.destroy().await });
        }
        self.publish();
    }

    async fn stop(&mut self) {
        self.recovery = None;
        self.artifact_cleanup = None;
        if let Some(init) = self.init.take() {
            let _ = init.abandon().await;
        }
        // Anything still in flight belongs to an abandoned generation now.
        self.generation += 1;
        self.state = SessionState::Disconnected;
        self.initializing = false;
        if let Some(session) = self.session.take() {
            session.destroy().await;
        }
        self.publish();
        info!("session manager stopped");
    }

    fn next_ticket(&mut self) -> u64 {
        self.next_ticket += 1;
        self.next_ticket
    }

    fn publish(&self) {
        self.published.send_replace(Published {
            snapshot: SessionSnapshot {
                state: self.state,
                initializing: self.initializing,
                reconnect_attempts: self.reconnect_attempts,
                max_attempts: self.policy.max_attempts(),
            },
            session: self.session.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, time::Duration};

    use tokio::time::{Instant, sleep, timeout};

    use super::*;
    use crate::testing::{Launch, MemoryRemover, ScriptedProvider};

    struct Harness {
        manager: SessionManager,
        provider: Arc<ScriptedProvider>,
        launches: mpsc::UnboundedReceiver<Launch>,
        remover: Arc<MemoryRemover>,
        data_dir: PathBuf,
    }

    fn harness() -> Harness {
        let (provider, launches) = ScriptedProvider::new();
        let remover = Arc::new(MemoryRemover::default());
        let data_dir = PathBuf::from("/relay/session");
        remover.insert(&data_dir);
        let store = SessionStateStore::new(&data_dir).with_strategy(remover.clone());
        let manager = SessionManager::spawn(provider.clone(), store, ReconnectPolicy::default());
        Harness {
            manager,
            provider,
            launches,
            remover,
            data_dir,
        }
    }

    impl Harness {
        async fn next_launch(&mut self) -> Launch {
            self.launches.recv().await.unwrap()
        }

        async fn ready(&mut self) -> Launch {
            self.manager.initialize(false);
            let launch = self.next_launch().await;
            launch.sink.emit(SessionEvent::Ready);
            self.wait_state(SessionState::Ready).await;
            launch
        }

        async fn wait_state(&self, state: SessionState) -> SessionSnapshot {
            self.manager.wait_for(|s| s.state == state).await
        }

        async fn no_launch_within(&mut self, secs: u64) -> bool {
            timeout(Duration::from_secs(secs), self.launches.recv())
                .await
                .is_err()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pairing_then_ready() {
        let mut h = harness();
        assert_eq!(h.manager.snapshot().state, SessionState::Uninitialized);

        h.manager.initialize(false);
        let launch = h.next_launch().await;
        assert_eq!(launch.data_dir, h.data_dir);
        let snapshot = h.manager.snapshot();
        assert_eq!(snapshot.state, SessionState::Initializing);
        assert!(snapshot.initializing);
        assert!(!h.manager.is_ready());

        launch.sink.emit(SessionEvent::PairingCode("2@pairing".into()));
        let snapshot = h.wait_state(SessionState::AwaitingPairing).await;
        assert!(snapshot.initializing);

        launch.sink.emit(SessionEvent::Ready);
        let snapshot = h.wait_state(SessionState::Ready).await;
        assert!(!snapshot.initializing);
        assert_eq!(snapshot.reconnect_attempts, 0);
        assert_eq!(snapshot.max_attempts, 5);
        assert!(h.manager.ready_session().is_some());
        // First startup resumes, it never wipes.
        assert!(h.remover.contains(&h.data_dir));
    }

    #[tokio::test(start_paused = true)]
    async fn logout_disables_reconnect_and_wipes_artifact() {
        let mut h = harness();
        let launch = h.ready().await;

        launch
            .sink
            .emit(SessionEvent::Disconnected(DisconnectReason::LoggedOut));
        let snapshot = h.wait_state(SessionState::Disconnected).await;
        assert_eq!(snapshot.reconnect_attempts, 0);
        assert!(h.manager.ready_session().is_none());

        sleep(Duration::from_secs(4)).await;
        assert!(h.remover.contains(&h.data_dir));

        assert!(h.no_launch_within(60).await);
        assert!(!h.remover.contains(&h.data_dir));
        assert_eq!(h.provider.start_count(), 1);
        assert_eq!(h.manager.snapshot().state, SessionState::Disconnected);
        assert!(launch.session.is_destroyed());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_resumes_without_wiping() {
        let mut h = harness();
        let launch = h.ready().await;

        let lost_at = Instant::now();
        launch.sink.emit(SessionEvent::Disconnected(DisconnectReason::Other(
            "CONFLICT".into(),
        )));
        let snapshot = h.wait_state(SessionState::Disconnected).await;
        assert_eq!(snapshot.reconnect_attempts, 1);

        let second = h.next_launch().await;
        assert!(lost_at.elapsed() >= Duration::from_secs(5));
        assert_eq!(second.sink.generation(), launch.sink.generation() + 1);
        assert!(h.remover.contains(&h.data_dir));

        second.sink.emit(SessionEvent::Ready);
        let snapshot = h.wait_state(SessionState::Ready).await;
        assert_eq!(snapshot.reconnect_attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failure_recovers_with_clean_slate() {
        let mut h = harness();
        let launch = h.ready().await;

        let failed_at = Instant::now();
        launch.sink.emit(SessionEvent::AuthFailed("bad credentials".into()));
        h.wait_state(SessionState::AuthFailed).await;

        let _second = h.next_launch().await;
        assert!(failed_at.elapsed() >= Duration::from_secs(10));
        assert!(!h.remover.contains(&h.data_dir));
        assert_eq!(h.manager.snapshot().state, SessionState::Initializing);
    }

    #[tokio::test(start_paused = true)]
    async fn start_failures_stop_at_the_ceiling() {
        let mut h = harness();
        h.provider.fail_next_starts(u32::MAX);

        h.manager.initialize(false);
        sleep(Duration::from_secs(120)).await;

        assert_eq!(h.provider.start_count(), 6);
        let snapshot = h.manager.snapshot();
        assert_eq!(snapshot.state, SessionState::ErroredTerminating);
        assert_eq!(snapshot.reconnect_attempts, 5);
        assert!(!snapshot.initializing);

        sleep(Duration::from_secs(120)).await;
        assert_eq!(h.provider.start_count(), 6);

        h.provider.fail_next_starts(0);
        h.manager.restart(true);
        let _launch = h.next_launch().await;
        assert_eq!(h.manager.snapshot().reconnect_attempts, 0);
        assert_eq!(h.provider.start_count(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_cancels_pending_recovery() {
        let mut h = harness();
        let launch = h.ready().await;

        launch.sink.emit(SessionEvent::Disconnected(DisconnectReason::Other(
            "stream errored".into(),
        )));
        let snapshot = h.wait_state(SessionState::Disconnected).await;
        assert_eq!(snapshot.reconnect_attempts, 1);

        h.manager.restart(false);
        let _restarted = h.next_launch().await;
        assert_eq!(h.manager.snapshot().reconnect_attempts, 0);

        assert!(h.no_launch_within(30).await);
        assert_eq!(h.provider.start_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_after_logout_forces_clean_slate() {
        let mut h = harness();
        let launch = h.ready().await;

        launch
            .sink
            .emit(SessionEvent::Disconnected(DisconnectReason::LoggedOut));
        h.wait_state(SessionState::Disconnected).await;

        h.manager.restart(false);
        let _restarted = h.next_launch().await;
        assert!(!h.remover.contains(&h.data_dir));
    }

    #[tokio::test(start_paused = true)]
    async fn events_from_abandoned_sessions_are_ignored() {
        let mut h = harness();
        h.manager.initialize(false);
        let first = h.next_launch().await;

        h.manager.restart(false);
        let second = h.next_launch().await;

        first.sink.emit(SessionEvent::Ready);
        sleep(Duration::from_secs(1)).await;
        assert_eq!(h.manager.snapshot().state, SessionState::Initializing);
        assert!(first.session.is_destroyed());

        second.sink.emit(SessionEvent::Ready);
        h.wait_state(SessionState::Ready).await;
    }

    #[tokio::test(start_paused = true)]
    async fn restart_abandons_in_flight_clean_initialization() {
        let mut h = harness();
        h.remover.fail_next(1);

        h.manager.initialize(true);
        sleep(Duration::from_millis(500)).await;
        h.manager.restart(true);

        let launch = h.next_launch().await;
        assert_eq!(launch.sink.generation(), 2);
        h.remover.insert(&h.data_dir);
        launch.sink.emit(SessionEvent::Ready);
        h.wait_state(SessionState::Ready).await;

        sleep(Duration::from_secs(3)).await;
        assert!(h.remover.contains(&h.data_dir));
        assert_eq!(h.remover.attempts().len(), 2);
        assert_eq!(h.provider.start_count(), 1);
        assert!(h.no_launch_within(10).await);
        assert_eq!(h.manager.snapshot().state, SessionState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_provider_error_recovers_with_clean_slate() {
        let mut h = harness();
        let launch = h.ready().await;

        let failed_at = Instant::now();
        launch
            .sink
            .emit(SessionEvent::ProviderError(ProviderError::Engine(
                "Protocol error: Target closed".into(),
            )));

        let second = h.next_launch().await;
        assert!(failed_at.elapsed() >= Duration::from_secs(3));
        assert!(failed_at.elapsed() < Duration::from_secs(5));
        assert!(!h.remover.contains(&h.data_dir));
        assert!(launch.session.is_destroyed());
        assert_eq!(h.manager.snapshot().reconnect_attempts, 1);

        second.sink.emit(SessionEvent::Ready);
        let snapshot = h.wait_state(SessionState::Ready).await;
        assert_eq!(snapshot.reconnect_attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_continues_when_artifact_cannot_be_deleted() {
        let mut h = harness();
        let launch = h.ready().await;
        h.remover.fail_next(u32::MAX);

        launch.sink.emit(SessionEvent::AuthFailed("bad credentials".into()));
        h.wait_state(SessionState::AuthFailed).await;

        let second = h.next_launch().await;
        assert!(h.remover.contains(&h.data_dir));
        let attempts = h.remover.attempts();
        assert_eq!(attempts.len(), 5);
        assert!(!attempts[0].1);
        assert!(attempts[1..].iter().all(|(_, forceful)| *forceful));
        assert_eq!(h.provider.start_count(), 2);

        second.sink.emit(SessionEvent::Ready);
        h.wait_state(SessionState::Ready).await;
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_initialize_is_dropped() {
        let mut h = harness();
        h.manager.initialize(false);
        h.manager.initialize(false);
        let _launch = h.next_launch().await;

        assert!(h.no_launch_within(10).await);
        assert_eq!(h.provider.start_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_signal_triggers_clean_recovery() {
        let mut h = harness();
        let _launch = h.ready().await;

        let signalled_at = Instant::now();
        h.manager.report_transient("Execution context was destroyed");
        let second = h.next_launch().await;
        assert!(signalled_at.elapsed() >= Duration::from_secs(3));
        assert!(!h.remover.contains(&h.data_dir));
        assert_eq!(h.manager.snapshot().reconnect_attempts, 1);

        second.sink.emit(SessionEvent::Ready);
        let snapshot = h.wait_state(SessionState::Ready).await;
        assert_eq!(snapshot.reconnect_attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_signal_ignored_while_not_ready() {
        let mut h = harness();
        h.manager.initialize(false);
        let _launch = h.next_launch().await;

        h.manager.report_transient("Target closed");
        assert!(h.no_launch_within(30).await);
        assert_eq!(h.manager.snapshot().reconnect_attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_provider_error_disconnects_and_resumes() {
        let mut h = harness();
        let launch = h.ready().await;

        launch
            .sink
            .emit(SessionEvent::ProviderError(ProviderError::Engine(
                "unexpected page crash".into(),
            )));
        h.wait_state(SessionState::Disconnected).await;

        let _second = h.next_launch().await;
        assert!(h.remover.contains(&h.data_dir));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_destroys_session() {
        let mut h = harness();
        let launch = h.ready().await;

        h.manager.shutdown().await;
        assert!(launch.session.is_destroyed());
        assert!(!h.manager.is_ready());
        assert!(h.manager.ready_session().is_none());
    }
}
