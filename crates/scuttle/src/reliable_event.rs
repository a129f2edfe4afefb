//! ReliableEvent: an event emitter whose events replicate.
//!
//! Every pushed event is kept, so a node that connects late still receives
//! the full sequence.

use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};

use scuttle_core::{SourceId, Update};
use scuttle_store::EventLog;
use scuttle_sync::{Admission, Node, NodeConfig, NodeEvent, SessionConfig, SyncSession};

use crate::error::{Result, ScuttleError};

/// One delivered event.
#[derive(Debug, Clone, PartialEq)]
pub struct FiredEvent {
    pub name: String,
    pub args: Vec<Value>,
}

/// Stream of events applied to a [`ReliableEvent`], local and remote.
#[derive(Debug)]
pub struct EventReceiver {
    rx: broadcast::Receiver<NodeEvent>,
}

impl EventReceiver {
    /// Wait for the next event.
    pub async fn recv(&mut self) -> Result<FiredEvent> {
        loop {
            match self.rx.recv().await {
                Ok(NodeEvent::Changed { key, value }) => {
                    let args = match value {
                        Value::Array(items) => items,
                        other => vec![other],
                    };
                    return Ok(FiredEvent { name: key, args });
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event receiver lagged");
                }
                Err(RecvError::Closed) => return Err(ScuttleError::ChannelClosed),
            }
        }
    }
}

/// A replicated event log.
#[derive(Clone)]
pub struct ReliableEvent {
    node: Node<EventLog>,
}

impl std::fmt::Debug for ReliableEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReliableEvent")
            .field("id", self.node.id())
            .finish()
    }
}

impl ReliableEvent {
    pub fn new(config: NodeConfig) -> Self {
        Self {
            node: Node::new(EventLog::new(), config),
        }
    }

    pub fn with_id(id: &str) -> Result<Self> {
        Ok(Self::new(NodeConfig::default().with_id(SourceId::new(id)?)))
    }

    pub fn node(&self) -> &Node<EventLog> {
        &self.node
    }

    pub fn id(&self) -> &SourceId {
        self.node.id()
    }

    /// Fire `event` with `args` locally and on every connected node.
    pub async fn push<I>(&self, event: &str, args: I) -> Result<Admission>
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        let mut payload = vec![Value::from(event)];
        payload.extend(args.into_iter().map(Into::into));
        Ok(self.node.local_update(Value::Array(payload)).await?)
    }

    /// Events applied from now on.
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            rx: self.node.subscribe(),
        }
    }

    /// Updates recorded for `event`, in arrival order.
    pub fn events(&self, event: &str) -> Vec<Update> {
        self.node.store().events(event)
    }

    /// Event name to list of argument arrays.
    pub async fn to_json(&self) -> Result<Value> {
        Ok(self.node.snapshot().await?)
    }

    pub fn create_stream(&self, config: SessionConfig) -> SyncSession<EventLog> {
        self.node.create_stream(config)
    }

    pub fn create_read_stream(&self) -> SyncSession<EventLog> {
        self.node.create_read_stream()
    }

    pub fn create_write_stream(&self) -> SyncSession<EventLog> {
        self.node.create_write_stream()
    }

    pub fn dispose(&self) {
        self.node.dispose();
    }

    pub async fn clone_event(&self) -> Result<ReliableEvent> {
        let node = self.node.clone_node().await?;
        Ok(ReliableEvent { node })
    }
}
