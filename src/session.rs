//! Session client: connection lifecycle, correlated requests, shared state.
//!
//! ARCHITECTURE
//! ============
//! A [`SessionClient`] owns at most one live connection (a `Link`) to one
//! state endpoint. Each link has:
//! - a writer task draining an outbound queue into the transport sink
//! - a reader task that decodes inbound messages, applies `state` pushes,
//!   answers server pings, and offers every message to the link's correlator
//! - a correlator holding the requests waiting on this connection
//!
//! A heartbeat task runs on top of the link once it is synced.
//!
//! LIFECYCLE
//! =========
//! `Idle → Connecting → Syncing → Connected`, back to `Connecting` when the
//! link drops, and `→ Disconnecting → Idle` on an explicit disconnect.
//! 1. `connect` claims the `Connecting` phase (a second call while one is
//!    running returns immediately) and retires any previous link.
//! 2. Opening is retried forever at a fixed delay until it succeeds or a
//!    disconnect supersedes the attempt.
//! 3. The initial refresh (plus optional authentication and state restore)
//!    runs in `Syncing`; a failure there drops the link and retries.
//! 4. The heartbeat starts and the phase becomes `Connected`.
//!
//! DESIGN
//! ======
//! Phase, epoch and the authenticated flag live in one watch channel and are
//! only changed through `send_if_modified`, which makes every transition an
//! atomic check-and-set. Each connect or disconnect bumps the epoch; work
//! started under an older epoch (retry loops, reader tasks, stalled
//! heartbeats) sees the mismatch and stands down.
//!
//! Reconnects requested from inside the reader or heartbeat are spawned, not
//! awaited, so that tearing down a link can join those tasks.
//!
//! The cached state is written only by the reader task, from server
//! messages. `set_state` sends a request and returns the server's echo; the
//! cache changes when that echo is processed, never before.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::correlator::Correlator;
use crate::credentials::TokenProvider;
use crate::error::SessionError;
use crate::heartbeat::Heartbeat;
use crate::protocol::{self, Inbound, Outbound, PING_TOKEN_LEN};
use crate::state::{CurrentState, DisplayState, StateRecord};
use crate::transport::{Connector, EventStream, TextSink, Transport, TransportEvent, WsConnector};

/// How long teardown waits for the writer to flush and close the sink.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Session on the `api/state` endpoint.
pub type StateSession = SessionClient<CurrentState>;

/// Session on the `api/display-state` endpoint.
pub type DisplaySession = SessionClient<DisplayState>;

// =============================================================================
// STATUS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No connection and none being made.
    Idle,
    /// Opening the transport (retrying on failure).
    Connecting,
    /// Transport open; initial refresh and authentication in progress.
    Syncing,
    /// Synced, heartbeat running.
    Connected,
    /// Explicit disconnect in progress.
    Disconnecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStatus {
    pub phase: Phase,
    pub authenticated: bool,
    /// Bumped by every connect and disconnect.
    pub epoch: u64,
}

impl SessionStatus {
    /// A transport handle is live.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self.phase, Phase::Syncing | Phase::Connected)
    }

    fn is_connecting(&self) -> bool {
        matches!(self.phase, Phase::Connecting | Phase::Syncing)
    }
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self { phase: Phase::Idle, authenticated: false, epoch: 0 }
    }
}

// =============================================================================
// CLIENT
// =============================================================================

/// Persistent duplex session to one state endpoint.
///
/// Cheap to clone; clones share the session. When the last clone is dropped
/// the background tasks shut down and the connection closes.
pub struct SessionClient<S: StateRecord> {
    inner: Arc<Inner<S>>,
    guard: Arc<DropGuard>,
}

impl<S: StateRecord> Clone for SessionClient<S> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner), guard: Arc::clone(&self.guard) }
    }
}

impl<S: StateRecord> SessionClient<S> {
    #[must_use]
    pub fn new(config: SessionConfig, connector: Arc<dyn Connector>, tokens: Arc<dyn TokenProvider>) -> Self {
        let shutdown = CancellationToken::new();
        let (status, _) = watch::channel(SessionStatus::default());
        let (state, _) = watch::channel(S::default());
        let (ping_delay, _) = watch::channel(config.ping_delay);

        let inner = Inner {
            config,
            connector,
            tokens,
            status,
            state,
            ping_delay,
            link: Mutex::new(None),
            heartbeat: Mutex::new(None),
            shutdown: shutdown.clone(),
        };
        Self { inner: Arc::new(inner), guard: Arc::new(shutdown.drop_guard()) }
    }

    /// Session over a real websocket.
    #[must_use]
    pub fn websocket(config: SessionConfig, tokens: Arc<dyn TokenProvider>) -> Self {
        Self::new(config, Arc::new(WsConnector), tokens)
    }

    /// Connect, or reconnect. Resolves once synced, or once a `disconnect`
    /// abandons the attempt. Returns immediately if a connect is already
    /// running.
    pub async fn connect(&self) {
        self.inner.connect().await;
    }

    /// Close the connection and cancel any reconnect attempt. Does not
    /// clear the cached state.
    pub async fn disconnect(&self) {
        self.inner.disconnect().await;
    }

    /// Authenticate the connection with the provider's token.
    ///
    /// # Errors
    ///
    /// Fails if not connected, or if no `auth` answer arrives in time.
    pub async fn authenticate(&self) -> Result<bool, SessionError> {
        self.inner.authenticate().await
    }

    /// Ask the server to replace the shared state; returns its confirmation.
    ///
    /// # Errors
    ///
    /// Fails if not connected, or if no `state` answer arrives in time.
    pub async fn set_state(&self, state: S) -> Result<S, SessionError> {
        self.inner.set_state(state).await
    }

    /// Fetch the server's current state.
    ///
    /// # Errors
    ///
    /// Fails if not connected, or if no `state` answer arrives in time.
    pub async fn refresh(&self) -> Result<S, SessionError> {
        self.inner.refresh().await
    }

    /// Round-trip a ping; returns the measured latency.
    ///
    /// # Errors
    ///
    /// Fails if not connected, or if the matching pong does not arrive in time.
    pub async fn ping(&self) -> Result<Duration, SessionError> {
        self.inner.ping().await
    }

    /// Change the heartbeat interval; `None` stops the heartbeat after its
    /// current ping. Takes effect on the running loop's next iteration, or on
    /// the next connect.
    pub fn set_ping_delay(&self, delay: Option<Duration>) {
        self.inner.ping_delay.send_replace(delay);
    }

    #[must_use]
    pub fn connected(&self) -> bool {
        self.inner.status.borrow().is_connected()
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        *self.inner.status.borrow()
    }

    /// Last server-confirmed state.
    #[must_use]
    pub fn current_state(&self) -> S {
        self.inner.state.borrow().clone()
    }

    /// Observe state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<S> {
        self.inner.state.subscribe()
    }

    /// Observe lifecycle changes.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status.subscribe()
    }
}

// =============================================================================
// INNER
// =============================================================================

struct Inner<S: StateRecord> {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    tokens: Arc<dyn TokenProvider>,
    status: watch::Sender<SessionStatus>,
    state: watch::Sender<S>,
    ping_delay: watch::Sender<Option<Duration>>,
    link: Mutex<Option<Link<S>>>,
    heartbeat: Mutex<Option<Heartbeat>>,
    shutdown: CancellationToken,
}

/// One live connection.
struct Link<S: StateRecord> {
    epoch: u64,
    /// Cancelled when the link is torn down; parent of the heartbeat token.
    cancel: CancellationToken,
    outbound: mpsc::UnboundedSender<String>,
    correlator: Arc<Correlator<Inbound<S>>>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl<S: StateRecord> Link<S> {
    /// Detach the reader, fail outstanding requests, close the transport.
    async fn close(self) {
        self.cancel.cancel();
        self.reader.abort();
        self.correlator.close(|| SessionError::Closed);
        drop(self.outbound);

        let mut writer = self.writer;
        if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
            warn!(epoch = self.epoch, "session: writer did not drain, aborting");
            writer.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<S: StateRecord> Inner<S> {
    // -------------------------------------------------------------------------
    // lifecycle
    // -------------------------------------------------------------------------

    async fn connect(self: &Arc<Self>) {
        self.connect_if(|s| !s.is_connecting()).await;
    }

    /// Start a connect attempt if `claim` accepts the current status.
    async fn connect_if(self: &Arc<Self>, claim: impl FnOnce(&SessionStatus) -> bool) {
        let mut epoch = 0;
        let claimed = self.status.send_if_modified(|s| {
            if !claim(s) {
                return false;
            }
            s.phase = Phase::Connecting;
            s.authenticated = false;
            s.epoch += 1;
            epoch = s.epoch;
            true
        });
        if !claimed {
            debug!(url = %self.config.url, "session: connect skipped");
            return;
        }
        if self.shutdown.is_cancelled() {
            return;
        }

        let previous = self.state.borrow().clone();
        self.teardown().await;

        let link = loop {
            let Some(transport) = self.open(epoch).await else {
                debug!(epoch, "session: connect abandoned");
                return;
            };
            let Some(link) = self.install(epoch, transport) else {
                debug!(epoch, "session: connect superseded before install");
                return;
            };
            info!(url = %self.config.url, epoch, "session: connected");

            match self.synchronize(&previous).await {
                Ok(()) => break link,
                Err(e) => {
                    warn!(epoch, error = %e, "session: initial sync failed, reconnecting");
                    self.teardown().await;
                    if !self.transition(epoch, Phase::Syncing, Phase::Connecting) || !self.pause(epoch).await {
                        return;
                    }
                }
            }
        };

        self.start_heartbeat(epoch, link).await;
    }

    async fn disconnect(&self) {
        let mut epoch = 0;
        let changed = self.status.send_if_modified(|s| {
            if s.phase == Phase::Idle {
                return false;
            }
            s.phase = Phase::Disconnecting;
            s.authenticated = false;
            s.epoch += 1;
            epoch = s.epoch;
            true
        });

        self.teardown().await;

        if changed {
            self.transition(epoch, Phase::Disconnecting, Phase::Idle);
            info!(url = %self.config.url, "session: disconnected");
        }
    }

    /// Stop the heartbeat, then close the link. Safe with nothing to close.
    async fn teardown(&self) {
        let heartbeat = lock(&self.heartbeat).take();
        if let Some(heartbeat) = heartbeat {
            heartbeat.stop().await;
        }
        let link = lock(&self.link).take();
        if let Some(link) = link {
            link.close().await;
        }
    }

    /// Move from `from` to `to` if `epoch` is still current.
    fn transition(&self, epoch: u64, from: Phase, to: Phase) -> bool {
        self.status.send_if_modified(|s| {
            if s.epoch != epoch || s.phase != from {
                return false;
            }
            s.phase = to;
            true
        })
    }

    /// Resolves once `epoch` is no longer current or the client shut down.
    async fn superseded(&self, epoch: u64) {
        let mut status = self.status.subscribe();
        tokio::select! {
            () = async { let _ = status.wait_for(|s| s.epoch != epoch).await; } => {}
            () = self.shutdown.cancelled() => {}
        }
    }

    /// Sleep the reconnect delay; false if superseded meanwhile.
    async fn pause(&self, epoch: u64) -> bool {
        tokio::select! {
            () = tokio::time::sleep(self.config.reconnect_delay) => true,
            () = self.superseded(epoch) => false,
        }
    }

    /// Open a transport, retrying at a fixed delay. `None` when abandoned.
    async fn open(&self, epoch: u64) -> Option<Transport> {
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            let result = tokio::select! {
                result = self.connector.open(&self.config.url) => result,
                () = self.superseded(epoch) => return None,
            };
            match result {
                Ok(transport) => return Some(transport),
                Err(e) => {
                    warn!(url = %self.config.url, attempt, error = %e, "session: connect failed, retrying");
                }
            }
            if !self.pause(epoch).await {
                return None;
            }
        }
    }

    /// Spawn the link tasks and publish the link, unless `epoch` was
    /// superseded while the transport was opening. Returns the link's token.
    fn install(self: &Arc<Self>, epoch: u64, transport: Transport) -> Option<CancellationToken> {
        let mut slot = lock(&self.link);
        if !self.transition(epoch, Phase::Connecting, Phase::Syncing) {
            return None;
        }

        let cancel = self.shutdown.child_token();
        let (outbound, queue) = mpsc::unbounded_channel();
        let correlator = Arc::new(Correlator::new());
        let writer = tokio::spawn(run_writer(transport.sink, queue));
        let reader = tokio::spawn(run_reader(
            Arc::clone(self),
            epoch,
            cancel.clone(),
            transport.events,
            outbound.clone(),
            Arc::clone(&correlator),
        ));

        *slot = Some(Link { epoch, cancel: cancel.clone(), outbound, correlator, reader, writer });
        Some(cancel)
    }

    /// Initial refresh, then authentication and state restore if enabled.
    async fn synchronize(&self, previous: &S) -> Result<(), SessionError> {
        let fresh = self.refresh().await?;

        if self.config.auto_authenticate && self.tokens.should_authenticate() {
            let authenticated = self.authenticate().await?;
            if authenticated && fresh.is_unset() && !previous.is_unset() {
                info!("session: server state empty, restoring last known state");
                self.set_state(previous.clone()).await?;
            }
        }
        Ok(())
    }

    async fn start_heartbeat(self: &Arc<Self>, epoch: u64, link: CancellationToken) {
        let pinger = Arc::clone(self);
        let stalled = Arc::clone(self);
        let heartbeat = Heartbeat::spawn(
            link.child_token(),
            self.ping_delay.subscribe(),
            move || {
                let inner = Arc::clone(&pinger);
                async move { inner.ping().await }
            },
            move || stalled.reconnect(epoch, &link, "heartbeat timeout"),
        );

        let rejected = {
            let mut slot = lock(&self.heartbeat);
            if self.transition(epoch, Phase::Syncing, Phase::Connected) {
                slot.replace(heartbeat)
            } else {
                Some(heartbeat)
            }
        };
        if let Some(heartbeat) = rejected {
            heartbeat.stop().await;
        }
    }

    /// Schedule a fresh connect after a link of `epoch` failed; `link` is
    /// that link's token.
    ///
    /// A link lost while syncing is retried by the connect already running,
    /// which tears the link down first. The scheduled attempt therefore waits
    /// for the phase to settle and only proceeds from `Connected`, under the
    /// same epoch, while the failed link is still the installed one.
    fn reconnect(self: &Arc<Self>, epoch: u64, link: &CancellationToken, reason: &'static str) {
        if link.is_cancelled() || self.status.borrow().epoch != epoch {
            return;
        }
        info!(epoch, reason, "session: connection lost");

        let inner = Arc::clone(self);
        let link = link.clone();
        tokio::spawn(async move {
            let mut status = inner.status.subscribe();
            let settled = tokio::select! {
                biased;
                () = link.cancelled() => false,
                settled = async { status.wait_for(|s| s.epoch != epoch || s.phase != Phase::Syncing).await.is_ok() } => settled,
            };
            if settled {
                inner
                    .connect_if(|s| !link.is_cancelled() && s.epoch == epoch && s.phase == Phase::Connected)
                    .await;
            }
        });
    }

    // -------------------------------------------------------------------------
    // requests
    // -------------------------------------------------------------------------

    fn current_link(&self) -> Result<(mpsc::UnboundedSender<String>, Arc<Correlator<Inbound<S>>>), SessionError> {
        lock(&self.link)
            .as_ref()
            .map(|link| (link.outbound.clone(), Arc::clone(&link.correlator)))
            .ok_or(SessionError::NotConnected)
    }

    /// Register `extract`, send `message`, wait for the match.
    async fn request<T, F>(&self, message: &Outbound<S>, extract: F) -> Result<T, SessionError>
    where
        T: Send + 'static,
        F: FnMut(&Inbound<S>) -> Option<T> + Send + 'static,
    {
        let (outbound, correlator) = self.current_link()?;
        let text = serde_json::to_string(message)?;
        let waiting = correlator.register(extract)?;
        if outbound.send(text).is_err() {
            debug!("session: send on a closed link dropped");
        }
        waiting.wait(self.config.request_timeout).await
    }

    async fn authenticate(&self) -> Result<bool, SessionError> {
        let auth_token = self.tokens.token().unwrap_or_default();
        let result = self.request(&Outbound::Auth { auth_token }, |m: &Inbound<S>| m.auth).await?;
        self.status.send_if_modified(|s| {
            let changed = s.authenticated != result;
            s.authenticated = result;
            changed
        });
        debug!(authenticated = result, "session: auth answered");
        Ok(result)
    }

    async fn set_state(&self, state: S) -> Result<S, SessionError> {
        self.request(&Outbound::State { state }, |m: &Inbound<S>| m.state.clone()).await
    }

    async fn refresh(&self) -> Result<S, SessionError> {
        self.request(&Outbound::get(), |m: &Inbound<S>| m.state.clone()).await
    }

    async fn ping(&self) -> Result<Duration, SessionError> {
        let token = protocol::random_token(PING_TOKEN_LEN);
        let started = Instant::now();
        let expected = token.clone();
        self.request(&Outbound::Ping { ping: token }, move |m: &Inbound<S>| m.is_pong_for(&expected).then_some(()))
            .await?;
        Ok(started.elapsed())
    }
}

// =============================================================================
// LINK TASKS
// =============================================================================

async fn run_writer(mut sink: TextSink, mut queue: mpsc::UnboundedReceiver<String>) {
    while let Some(text) = queue.recv().await {
        if let Err(e) = sink.send(text).await {
            debug!(error = %e, "session: send failed");
            break;
        }
    }
    let _ = sink.close().await;
}

async fn run_reader<S: StateRecord>(
    inner: Arc<Inner<S>>,
    epoch: u64,
    cancel: CancellationToken,
    mut events: EventStream,
    outbound: mpsc::UnboundedSender<String>,
    correlator: Arc<Correlator<Inbound<S>>>,
) {
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => return,
            event = events.next() => event,
        };
        match event {
            Some(TransportEvent::Text(text)) => handle_text(&inner, &outbound, &correlator, &text),
            Some(TransportEvent::Closed) | None => {
                info!(epoch, "session: connection closed");
                correlator.close(|| SessionError::Closed);
                inner.reconnect(epoch, &cancel, "connection closed");
                return;
            }
            Some(TransportEvent::Error(reason)) => {
                warn!(epoch, error = %reason, "session: transport error");
                correlator.close(|| SessionError::Transport(reason.clone()));
                inner.reconnect(epoch, &cancel, "transport error");
                return;
            }
        }
    }
}

/// Shared inbound handling: echo server pings, apply state, then offer the
/// message to waiting requests.
///
/// The frame is decoded untyped first, so a `ping` is answered even when the
/// `state` next to it does not match `S`.
fn handle_text<S: StateRecord>(
    inner: &Inner<S>,
    outbound: &mpsc::UnboundedSender<String>,
    correlator: &Correlator<Inbound<S>>,
    text: &str,
) {
    let raw = match protocol::decode(text) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(error = %e, "session: undecodable message dropped");
            reject_pending(correlator, &e);
            return;
        }
    };

    if let Some(ping) = &raw.ping {
        match serde_json::to_string(&Outbound::<S>::Pong { pong: ping.clone() }) {
            Ok(pong) => {
                let _ = outbound.send(pong);
            }
            Err(e) => warn!(error = %e, "session: pong encode failed"),
        }
    }

    let message = match raw.typed::<S>() {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, "session: state payload does not match record, dropped");
            reject_pending(correlator, &e);
            return;
        }
    };

    if let Some(state) = &message.state {
        inner.state.send_replace(state.clone());
    }

    correlator.dispatch(&message);
}

fn reject_pending<S: StateRecord>(correlator: &Correlator<Inbound<S>>, error: &serde_json::Error) {
    let reason = error.to_string();
    correlator.reject_all(|| SessionError::Decode(reason.clone()));
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
