//! Node core: identity, vector clock and the single admission gate.
//!
//! Every update, local or remote, enters through [`Node::admit`]. Admission
//! and the handshake of every session are serialized by one async lock per
//! node, so a session's history snapshot and its live subscription never
//! miss or duplicate an update.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tracing::Span;

use scuttle_core::{
    timestamp, validate_update, AcceptPolicy, Signer, SourceId, Sources, Timestamp, Update,
    Verifier,
};
use scuttle_store::{ApplyOutcome, ReplicatedStore};

use crate::error::{Result, SyncError};
use crate::protocol::{SessionConfig, SyncSession};
use crate::transport::link;

/// Default capacity of the node event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Configuration for a node.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node identity. Random when absent.
    pub id: Option<SourceId>,
    /// Keys this node is willing to receive, announced in every digest.
    pub accept: Option<AcceptPolicy>,
    /// Buffered notifications per event subscriber.
    pub event_capacity: usize,
    /// Parent span for the node's logging.
    #[serde(skip)]
    pub span: Option<Span>,
    #[serde(skip)]
    signer: Option<Arc<dyn Signer>>,
    #[serde(skip)]
    verifier: Option<Arc<dyn Verifier>>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: None,
            accept: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            span: None,
            signer: None,
            verifier: None,
        }
    }
}

impl fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeConfig")
            .field("id", &self.id)
            .field("accept", &self.accept)
            .field("event_capacity", &self.event_capacity)
            .field("signs", &self.signer.is_some())
            .field("verifies", &self.verifier.is_some())
            .finish()
    }
}

impl NodeConfig {
    pub fn with_id(mut self, id: SourceId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_accept(mut self, accept: AcceptPolicy) -> Self {
        self.accept = Some(accept);
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Sign every locally originated update.
    pub fn with_signer(mut self, signer: impl Signer + 'static) -> Self {
        self.signer = Some(Arc::new(signer));
        self
    }

    /// Check every update originated elsewhere.
    pub fn with_verifier(mut self, verifier: impl Verifier + 'static) -> Self {
        self.verifier = Some(Arc::new(verifier));
        self
    }
}

/// Why an admitted update was not applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The verifier refused it. The clock slot stays consumed.
    Unverified,
    /// The store holds a later value for the same key.
    Superseded,
    /// The store cannot apply the payload.
    Invalid(String),
}

/// Outcome of [`Node::admit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Applied to the store and forwarded to sessions.
    Applied,
    /// Not newer than the clock entry for its source. Nothing changed.
    Stale,
    /// Newer than the clock, but not applied.
    Rejected(Rejection),
}

impl Admission {
    pub fn is_applied(&self) -> bool {
        matches!(self, Admission::Applied)
    }
}

/// Notifications for applications and logging.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    Admitted(Update),
    Changed {
        key: String,
        value: Value,
    },
    /// A change that originated on another node.
    ChangedByPeer {
        key: String,
        value: Value,
        source: SourceId,
        /// The node that relayed it over the last hop.
        via: Option<SourceId>,
    },
    Stale(Update),
    Unverified(Update),
    Superseded(Update),
    Invalid(String),
    SessionClosed {
        remaining: usize,
    },
    Disposed,
    Cloned {
        clones: usize,
    },
}

/// Identifier of a registered session.
pub type ListenerId = u64;

/// A session as seen by its node.
pub trait NodeListener: Send + Sync {
    /// An update was applied. Only called on subscribed listeners.
    fn on_admitted(&self, update: &Update);

    /// The node is shutting down.
    fn on_dispose(&self);
}

struct Registration {
    listener: Arc<dyn NodeListener>,
    subscribed: bool,
}

#[derive(Default)]
struct Registry {
    entries: BTreeMap<ListenerId, Registration>,
}

struct NodeInner<S> {
    id: SourceId,
    store: S,
    accept: Option<AcceptPolicy>,
    clock: Mutex<Sources>,
    history_lock: AsyncMutex<()>,
    registry: Mutex<Registry>,
    next_listener: AtomicU64,
    events: broadcast::Sender<NodeEvent>,
    event_capacity: usize,
    signer: Option<Arc<dyn Signer>>,
    verifier: Option<Arc<dyn Verifier>>,
    span: Span,
    clones: AtomicUsize,
}

/// A replica: identity, vector clock and store.
///
/// Cheap to clone; all clones share the same state.
pub struct Node<S> {
    inner: Arc<NodeInner<S>>,
}

impl<S> Clone for Node<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> fmt::Debug for Node<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node").field("id", &self.inner.id).finish()
    }
}

impl<S: ReplicatedStore> Node<S> {
    pub fn new(store: S, config: NodeConfig) -> Self {
        let id = config.id.unwrap_or_else(SourceId::random);
        let span = match &config.span {
            Some(parent) => tracing::info_span!(parent: parent, "node", id = %id),
            None => tracing::info_span!("node", id = %id),
        };
        let capacity = config.event_capacity.max(1);
        let (events, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(NodeInner {
                id,
                store,
                accept: config.accept,
                clock: Mutex::new(Sources::new()),
                history_lock: AsyncMutex::new(()),
                registry: Mutex::new(Registry::default()),
                next_listener: AtomicU64::new(0),
                events,
                event_capacity: capacity,
                signer: config.signer,
                verifier: config.verifier,
                span,
                clones: AtomicUsize::new(0),
            }),
        }
    }

    /// Node with a random id and default configuration.
    pub fn with_store(store: S) -> Self {
        Self::new(store, NodeConfig::default())
    }

    pub fn id(&self) -> &SourceId {
        &self.inner.id
    }

    pub fn accept(&self) -> Option<&AcceptPolicy> {
        self.inner.accept.as_ref()
    }

    pub fn store(&self) -> &S {
        &self.inner.store
    }

    pub fn span(&self) -> &Span {
        &self.inner.span
    }

    /// Snapshot of the vector clock.
    pub fn sources(&self) -> Sources {
        self.clock().clone()
    }

    /// Number of clones made from this node.
    pub fn clones(&self) -> usize {
        self.inner.clones.load(Ordering::Relaxed)
    }

    /// Receive node notifications from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.inner.events.subscribe()
    }

    /// Publish a notification to subscribers.
    pub fn emit(&self, event: NodeEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Admission
    // ─────────────────────────────────────────────────────────────────────────

    /// Wrap `payload` in a fresh update from this node and admit it.
    pub async fn local_update(&self, payload: Value) -> Result<Admission> {
        let _guard = self.lock_history().await;
        let floor = match self.clock().get(&self.inner.id) {
            Some(ts) if ts >= Timestamp::MAX => {
                tracing::error!(parent: &self.inner.span, "own clock entry exhausted");
                return Err(SyncError::ClockExhausted);
            }
            Some(ts) => ts.as_micros() + 1,
            None => 0,
        };
        let ts = Timestamp(timestamp().as_micros().max(floor).min(Timestamp::MAX.as_micros()));
        let update = Update::new(payload, ts, self.inner.id.clone());
        self.admit_locked(update).await
    }

    /// The single admission gate for local and remote updates.
    pub async fn admit(&self, update: Update) -> Result<Admission> {
        let _guard = self.lock_history().await;
        self.admit_locked(update).await
    }

    /// Admission body; the caller holds the history lock.
    async fn admit_locked(&self, mut update: Update) -> Result<Admission> {
        let span = &self.inner.span;
        if let Err(e) = validate_update(&update) {
            let reason = e.to_string();
            tracing::debug!(parent: span, %reason, "refusing update");
            self.emit(NodeEvent::Invalid(reason.clone()));
            return Ok(Admission::Rejected(Rejection::Invalid(reason)));
        }
        {
            let mut clock = self.clock();
            if !clock.is_novel(&update) {
                drop(clock);
                tracing::trace!(parent: span, source = %update.source, ts = %update.timestamp, "stale update");
                self.emit(NodeEvent::Stale(update));
                return Ok(Admission::Stale);
            }
            // Claim the slot before anything can fail.
            clock.advance(&update.source, update.timestamp);
        }

        if update.source != self.inner.id {
            if let Some(verifier) = &self.inner.verifier {
                if !verifier.verify(&update) {
                    tracing::debug!(parent: span, source = %update.source, ts = %update.timestamp, "unverified update");
                    self.emit(NodeEvent::Unverified(update));
                    return Ok(Admission::Rejected(Rejection::Unverified));
                }
            }
        } else if update.signature.is_none() {
            if let Some(signer) = &self.inner.signer {
                update.signature = Some(signer.sign(&update));
            }
        }

        let outcome = match self.inner.store.apply_update(&update).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(parent: span, error = %e, "store failed to apply update");
                return Err(e.into());
            }
        };

        match outcome {
            ApplyOutcome::Applied(change) => {
                tracing::debug!(parent: span, key = %change.key, source = %update.source, ts = %update.timestamp, "applied update");
                for listener in self.subscribed_listeners() {
                    listener.on_admitted(&update);
                }
                if update.source != self.inner.id {
                    self.emit(NodeEvent::ChangedByPeer {
                        key: change.key.clone(),
                        value: change.value.clone(),
                        source: update.source.clone(),
                        via: update.forwarded_by.clone(),
                    });
                }
                self.emit(NodeEvent::Changed {
                    key: change.key,
                    value: change.value,
                });
                self.emit(NodeEvent::Admitted(update));
                Ok(Admission::Applied)
            }
            ApplyOutcome::Superseded => {
                tracing::trace!(parent: span, source = %update.source, ts = %update.timestamp, "superseded update");
                self.emit(NodeEvent::Superseded(update));
                Ok(Admission::Rejected(Rejection::Superseded))
            }
            ApplyOutcome::Invalid(reason) => {
                tracing::debug!(parent: span, %reason, "invalid update");
                self.emit(NodeEvent::Invalid(reason.clone()));
                Ok(Admission::Rejected(Rejection::Invalid(reason)))
            }
        }
    }

    /// Whether a peer with `policy` wants `update`.
    pub fn is_accepted(&self, policy: &AcceptPolicy, update: &Update) -> bool {
        self.inner.store.is_accepted(policy, update)
    }

    /// Updates unknown to `peer`, filtered by `accept`, in canonical order.
    pub async fn history(&self, peer: &Sources, accept: Option<&AcceptPolicy>) -> Result<Vec<Update>> {
        Ok(self.inner.store.history(peer, accept).await?)
    }

    /// Current store state as JSON.
    pub async fn snapshot(&self) -> Result<Value> {
        Ok(self.inner.store.to_json().await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sessions
    // ─────────────────────────────────────────────────────────────────────────

    /// Open a sync session. Must be called within a Tokio runtime.
    pub fn create_stream(&self, config: SessionConfig) -> SyncSession<S> {
        SyncSession::new(self.clone(), config)
    }

    /// Session that only sends this node's updates.
    pub fn create_read_stream(&self) -> SyncSession<S> {
        self.create_stream(SessionConfig::read_only())
    }

    /// Session that only receives the peer's updates.
    pub fn create_write_stream(&self) -> SyncSession<S> {
        self.create_stream(SessionConfig::write_only())
    }

    /// Open sessions.
    pub fn session_count(&self) -> usize {
        self.registry().entries.len()
    }

    /// Sessions subscribed to admitted updates.
    pub fn listener_count(&self) -> usize {
        self.registry()
            .entries
            .values()
            .filter(|r| r.subscribed)
            .count()
    }

    /// End every open session.
    pub fn dispose(&self) {
        let listeners: Vec<_> = self
            .registry()
            .entries
            .values()
            .map(|r| Arc::clone(&r.listener))
            .collect();
        tracing::debug!(parent: &self.inner.span, sessions = listeners.len(), "disposing node");
        for listener in listeners {
            listener.on_dispose();
        }
        self.emit(NodeEvent::Disposed);
    }

    /// Copy this node's state into `store` under the same identity.
    ///
    /// Runs one full sync pass over a private link and returns once the
    /// link has drained.
    pub async fn clone_into(&self, store: S) -> Result<Node<S>> {
        let clones = self.inner.clones.fetch_add(1, Ordering::Relaxed) + 1;
        let config = NodeConfig {
            id: Some(self.inner.id.clone()),
            accept: self.inner.accept.clone(),
            event_capacity: self.inner.event_capacity,
            span: Some(self.inner.span.clone()),
            signer: self.inner.signer.clone(),
            verifier: self.inner.verifier.clone(),
        };
        let copy = Node::new(store, config);

        let source = self.create_stream(SessionConfig::duplex().named("clone").tail(false));
        let target = copy.create_stream(SessionConfig::duplex().named("clone"));
        let link = link(&source, &target);
        source.wait_synced().await?;
        link.closed().await?;

        tracing::debug!(parent: &self.inner.span, clones, "cloned node");
        self.emit(NodeEvent::Cloned { clones });
        Ok(copy)
    }

    /// Copy this node into a fresh default store.
    pub async fn clone_node(&self) -> Result<Node<S>>
    where
        S: Default,
    {
        self.clone_into(S::default()).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Session plumbing
    // ─────────────────────────────────────────────────────────────────────────

    pub(crate) async fn lock_history(&self) -> AsyncMutexGuard<'_, ()> {
        self.inner.history_lock.lock().await
    }

    pub(crate) fn allocate_listener(&self) -> ListenerId {
        self.inner.next_listener.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn register(&self, id: ListenerId, listener: Arc<dyn NodeListener>) {
        self.registry().entries.insert(
            id,
            Registration {
                listener,
                subscribed: false,
            },
        );
    }

    /// Start delivering admitted updates to a registered session.
    pub(crate) fn subscribe_listener(&self, id: ListenerId) {
        if let Some(entry) = self.registry().entries.get_mut(&id) {
            entry.subscribed = true;
        }
    }

    /// Remove a session; returns how many remain.
    pub(crate) fn unregister(&self, id: ListenerId) -> usize {
        let mut registry = self.registry();
        registry.entries.remove(&id);
        registry.entries.len()
    }

    fn subscribed_listeners(&self) -> Vec<Arc<dyn NodeListener>> {
        self.registry()
            .entries
            .values()
            .filter(|r| r.subscribed)
            .map(|r| Arc::clone(&r.listener))
            .collect()
    }

    fn clock(&self) -> MutexGuard<'_, Sources> {
        self.inner.clock.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.inner.registry.lock().unwrap_or_else(|e| e.into_inner())
    }
}
