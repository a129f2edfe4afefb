//! Synchronization session: one per link between two nodes.
//!
//! ## Protocol
//!
//! ```text
//! A                               B
//! │── Digest{id, clock, accept} ─▶│
//! │◀─ Digest{id, clock, accept} ──│
//! │── history A has, B lacks ────▶│
//! │── SYNC ──────────────────────▶│
//! │◀─ history B has, A lacks ─────│
//! │◀─ SYNC ───────────────────────│
//! │◀════ live updates ═══════════▶│
//! ```
//!
//! A readable session sends; a writable session receives. A session that is
//! not writable counts its inbound SYNC as already received, and one that is
//! not readable counts its outbound SYNC as already sent.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tracing::Span;

use scuttle_core::{validate_update, AcceptPolicy, SourceId, Sources, Update};
use scuttle_store::ReplicatedStore;

use crate::error::{Result, SyncError};
use crate::messages::{Digest, Frame};
use crate::node::{Admission, ListenerId, Node, NodeEvent, NodeListener};
use crate::transport::{Duplex, DuplexOptions, FrameHandler, Termination};

const SESSION_EVENT_CAPACITY: usize = 64;

/// Configuration for a sync session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Label used in logs.
    pub name: String,
    /// Send local updates to the peer.
    pub readable: bool,
    /// Accept updates from the peer.
    pub writable: bool,
    /// Keep forwarding live updates after the initial sync.
    pub tail: bool,
    /// Clock assumed for the peer when a read-only session starts without
    /// waiting for a digest.
    pub peer_clock: Option<Sources>,
    /// A read-only session waits for the peer's digest instead of starting
    /// at once. The peer must send one, see `send_clock`.
    pub await_digest: bool,
    /// Send the digest even when not readable.
    pub send_clock: bool,
    /// Opaque data carried in the digest.
    pub meta: Option<Value>,
    /// Defaults to half-open unless both readable and writable.
    pub half_open: Option<bool>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: "stream".into(),
            readable: true,
            writable: true,
            tail: true,
            peer_clock: None,
            await_digest: false,
            send_clock: false,
            meta: None,
            half_open: None,
        }
    }
}

impl SessionConfig {
    pub fn duplex() -> Self {
        Self::default()
    }

    pub fn read_only() -> Self {
        Self {
            writable: false,
            ..Self::default()
        }
    }

    pub fn write_only() -> Self {
        Self {
            readable: false,
            ..Self::default()
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn tail(mut self, tail: bool) -> Self {
        self.tail = tail;
        self
    }

    pub fn with_peer_clock(mut self, clock: Sources) -> Self {
        self.peer_clock = Some(clock);
        self
    }

    pub fn await_digest(mut self, wait: bool) -> Self {
        self.await_digest = wait;
        self
    }

    pub fn send_clock(mut self, send: bool) -> Self {
        self.send_clock = send;
        self
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn half_open(mut self, half_open: bool) -> Self {
        self.half_open = Some(half_open);
        self
    }

    fn resolved_half_open(&self) -> bool {
        self.half_open
            .unwrap_or(!(self.readable && self.writable))
    }
}

/// Where a session is in the protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    AwaitingDigest,
    AwaitingHistoryOrLive,
    /// Our SYNC is out; waiting for the peer's.
    SyncPending,
    Synced,
    Closed(Termination),
}

/// Frame counters for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub sent: u64,
    pub received: u64,
    pub stale: u64,
    pub rejected: u64,
    pub malformed: u64,
}

/// Per-session notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Header(Digest),
    SyncSent,
    SyncReceived,
    Synced,
    Error(String),
    Closed(Termination),
}

#[derive(Debug, Default)]
struct PeerState {
    peer_sources: Sources,
    peer_id: Option<SourceId>,
    peer_accept: Option<AcceptPolicy>,
    started: bool,
    sync_sent: bool,
    sync_recv: bool,
    synced: bool,
    closed: bool,
}

#[derive(Debug, Default)]
struct Counters {
    sent: AtomicU64,
    received: AtomicU64,
    stale: AtomicU64,
    rejected: AtomicU64,
    malformed: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> SessionStats {
        SessionStats {
            sent: self.sent.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

struct SessionInner<S> {
    node: Node<S>,
    id: ListenerId,
    config: SessionConfig,
    duplex: Duplex<Frame>,
    span: Span,
    state: Mutex<PeerState>,
    phase: watch::Sender<SessionPhase>,
    events: broadcast::Sender<SessionEvent>,
    counters: Counters,
}

/// Handle to a sync session.
///
/// Link its duplex to a peer's with [`crate::link`]. The session stays
/// registered with its node until the transport has fully closed.
pub struct SyncSession<S> {
    inner: Arc<SessionInner<S>>,
}

impl<S> Clone for SyncSession<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> std::fmt::Debug for SyncSession<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSession")
            .field("name", &self.inner.config.name)
            .field("listener", &self.inner.id)
            .finish()
    }
}

impl<S> AsRef<Duplex<Frame>> for SyncSession<S> {
    fn as_ref(&self) -> &Duplex<Frame> {
        &self.inner.duplex
    }
}

impl<S: ReplicatedStore> SyncSession<S> {
    pub(crate) fn new(node: Node<S>, config: SessionConfig) -> Self {
        let duplex = Duplex::new(
            config.name.clone(),
            DuplexOptions {
                half_open: config.resolved_half_open(),
                readable: config.readable,
                writable: config.writable,
            },
        );
        let id = node.allocate_listener();
        let span = tracing::debug_span!(parent: node.span(), "session", name = %config.name, listener = id);
        let (phase, _) = watch::channel(SessionPhase::AwaitingDigest);
        let (events, _) = broadcast::channel(SESSION_EVENT_CAPACITY);
        let state = PeerState {
            sync_sent: !config.readable,
            sync_recv: !config.writable,
            ..PeerState::default()
        };

        let inner = Arc::new(SessionInner {
            node: node.clone(),
            id,
            config,
            duplex,
            span,
            state: Mutex::new(state),
            phase,
            events,
            counters: Counters::default(),
        });

        node.register(id, inner.clone());
        let handler: Arc<dyn FrameHandler<Frame>> = inner.clone();
        inner.duplex.set_handler(Arc::downgrade(&handler));

        if inner.config.readable || inner.config.send_clock {
            let digest = Digest {
                id: Some(node.id().clone()),
                clock: Some(node.sources()),
                accept: node.accept().cloned(),
                meta: inner.config.meta.clone(),
            };
            inner.duplex.push_front(Frame::Digest(digest));
        }

        // A write-only peer only sends a digest when asked to.
        if inner.config.readable && !inner.config.writable && !inner.config.await_digest {
            let clock = inner.config.peer_clock.clone().unwrap_or_default();
            let task = Arc::clone(&inner);
            tokio::spawn(async move { task.start(None, clock, None).await });
        }

        tracing::debug!(parent: &inner.span, readable = inner.config.readable, writable = inner.config.writable, "session created");
        Self { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn duplex(&self) -> &Duplex<Frame> {
        &self.inner.duplex
    }

    pub fn node(&self) -> &Node<S> {
        &self.inner.node
    }

    /// Graceful close: buffered frames are still delivered.
    pub fn end(&self) {
        self.inner.duplex.end();
    }

    /// Immediate close: buffered frames are dropped.
    pub fn abort(&self) {
        self.inner.duplex.abort();
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner.phase.borrow().clone()
    }

    /// Id announced in the peer's digest.
    pub fn peer_id(&self) -> Option<SourceId> {
        self.inner.state().peer_id.clone()
    }

    /// What this session believes the peer has seen.
    pub fn peer_sources(&self) -> Sources {
        self.inner.state().peer_sources.clone()
    }

    pub fn is_synced(&self) -> bool {
        self.inner.state().synced
    }

    pub fn stats(&self) -> SessionStats {
        self.inner.counters.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Resolve once both sides have exchanged SYNC.
    ///
    /// Fails with [`SyncError::Closed`] if the transport closes first.
    pub async fn wait_synced(&self) -> Result<()> {
        let mut rx = self.inner.phase.subscribe();
        rx.wait_for(|p| matches!(p, SessionPhase::Synced | SessionPhase::Closed(_)))
            .await
            .map_err(|_| SyncError::Closed)?;
        if self.is_synced() {
            Ok(())
        } else {
            Err(SyncError::Closed)
        }
    }

    /// Resolve once the transport has fully closed.
    pub async fn wait_closed(&self) -> Result<Termination> {
        let mut rx = self.inner.phase.subscribe();
        let phase = rx
            .wait_for(|p| matches!(p, SessionPhase::Closed(_)))
            .await
            .map_err(|_| SyncError::Closed)?;
        match &*phase {
            SessionPhase::Closed(t) => Ok(t.clone()),
            _ => Err(SyncError::Closed),
        }
    }
}

impl<S: ReplicatedStore> SessionInner<S> {
    fn state(&self) -> MutexGuard<'_, PeerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn refresh_phase(&self) {
        let next = {
            let state = self.state();
            if state.closed {
                return;
            }
            if state.synced {
                SessionPhase::Synced
            } else if !state.started {
                SessionPhase::AwaitingDigest
            } else if state.sync_sent {
                SessionPhase::SyncPending
            } else {
                SessionPhase::AwaitingHistoryOrLive
            }
        };
        self.phase.send_if_modified(|phase| {
            if matches!(phase, SessionPhase::Closed(_)) || *phase == next {
                return false;
            }
            *phase = next;
            true
        });
    }

    fn fail(&self, reason: String) {
        tracing::warn!(parent: &self.span, %reason, "protocol error");
        self.emit(SessionEvent::Error(reason.clone()));
        self.duplex.abort_with(Termination::Error(reason));
    }

    /// Begin replication once the peer's clock is known.
    async fn start(&self, peer_id: Option<SourceId>, clock: Sources, accept: Option<AcceptPolicy>) {
        {
            let mut state = self.state();
            if state.started || state.closed {
                tracing::trace!(parent: &self.span, "already started, ignoring digest");
                return;
            }
            state.started = true;
            state.peer_sources = clock;
            state.peer_id = peer_id;
            state.peer_accept = accept;
        }
        self.refresh_phase();

        if self.config.readable {
            if let Err(e) = self.replay().await {
                self.fail(format!("history replay failed: {e}"));
                return;
            }
        }
        self.refresh_phase();
        self.check_synced();
    }

    /// Push the peer's missing history, then SYNC, then go live.
    async fn replay(&self) -> Result<()> {
        let node = &self.node;
        let _guard = node.lock_history().await;
        let (peer_sources, peer_accept) = {
            let state = self.state();
            (state.peer_sources.clone(), state.peer_accept.clone())
        };
        let history = node.history(&peer_sources, peer_accept.as_ref()).await?;
        let count = history.len();

        {
            let mut state = self.state();
            for update in &history {
                state.peer_sources.advance(&update.source, update.timestamp);
            }
        }
        for update in history {
            self.duplex.push(Frame::Update(update.forwarded(node.id())));
        }
        // Live updates from here on; the history lock keeps the two seamless.
        node.subscribe_listener(self.id);
        self.duplex.push(Frame::Sync);
        self.state().sync_sent = true;

        bump(&self.counters.sent, count as u64);
        tracing::debug!(parent: &self.span, history = count, "sent history");
        self.emit(SessionEvent::SyncSent);
        Ok(())
    }

    fn check_synced(&self) {
        let newly = {
            let mut state = self.state();
            if state.synced || state.closed || !(state.sync_sent && state.sync_recv) {
                false
            } else {
                state.synced = true;
                true
            }
        };
        if !newly {
            return;
        }
        tracing::debug!(parent: &self.span, "synced");
        self.refresh_phase();
        self.emit(SessionEvent::Synced);
        if !self.config.tail {
            self.duplex.end();
        }
    }

    async fn on_update(&self, update: Update) {
        if let Err(e) = validate_update(&update) {
            bump(&self.counters.malformed, 1);
            tracing::warn!(parent: &self.span, error = %e, "dropping malformed update");
            self.emit(SessionEvent::Error(e.to_string()));
            return;
        }
        bump(&self.counters.received, 1);
        match self.node.admit(update).await {
            Ok(Admission::Applied) => {}
            Ok(Admission::Stale) => bump(&self.counters.stale, 1),
            Ok(Admission::Rejected(_)) => bump(&self.counters.rejected, 1),
            Err(e) => self.fail(format!("admission failed: {e}")),
        }
    }
}

#[async_trait]
impl<S: ReplicatedStore> FrameHandler<Frame> for SessionInner<S> {
    async fn on_frame(&self, frame: Frame) {
        tracing::trace!(parent: &self.span, kind = frame.kind(), "frame");
        match frame {
            Frame::Digest(digest) => {
                let Some(clock) = digest.clock.clone() else {
                    bump(&self.counters.malformed, 1);
                    self.fail("digest without a clock".into());
                    return;
                };
                self.emit(SessionEvent::Header(digest.clone()));
                self.start(digest.id, clock, digest.accept).await;
            }
            Frame::Sync => {
                if !self.config.writable {
                    return;
                }
                self.state().sync_recv = true;
                self.emit(SessionEvent::SyncReceived);
                self.check_synced();
            }
            Frame::Update(update) => {
                if !self.config.writable {
                    return;
                }
                self.on_update(update).await;
            }
        }
    }

    fn on_finished(&self, termination: Termination) {
        self.state().closed = true;
        let remaining = self.node.unregister(self.id);
        tracing::debug!(parent: &self.span, %termination, remaining, "session closed");
        self.phase
            .send_replace(SessionPhase::Closed(termination.clone()));
        self.emit(SessionEvent::Closed(termination));
        self.node.emit(NodeEvent::SessionClosed { remaining });
    }
}

impl<S: ReplicatedStore> NodeListener for SessionInner<S> {
    fn on_admitted(&self, update: &Update) {
        let frame = {
            let mut state = self.state();
            if state.closed || !state.peer_sources.is_novel(update) {
                return;
            }
            if update.forwarded_by.is_some() && update.forwarded_by == state.peer_id {
                // The peer sent it; it already has it.
                state.peer_sources.advance(&update.source, update.timestamp);
                return;
            }
            if let Some(policy) = &state.peer_accept {
                if !self.node.is_accepted(policy, update) {
                    return;
                }
            }
            state.peer_sources.advance(&update.source, update.timestamp);
            Frame::Update(update.forwarded(self.node.id()))
        };
        if self.duplex.push(frame) {
            bump(&self.counters.sent, 1);
        }
    }

    fn on_dispose(&self) {
        self.duplex.end();
    }
}
