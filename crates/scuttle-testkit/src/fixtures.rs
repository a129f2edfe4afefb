//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use scuttle_core::{Keypair, Keyring, SourceId};
use scuttle_store::{LwwMap, ReplicatedStore};
use scuttle_sync::{link, Link, Node, NodeConfig, SessionConfig, SyncSession};

/// How long helpers wait before declaring a test hung.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Install a `tracing` subscriber once per process.
///
/// Honours `RUST_LOG`; output goes through the test harness capture.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// In-memory map node with a fixed id.
pub fn map_node(id: &str) -> Node<LwwMap> {
    Node::new(LwwMap::default(), NodeConfig::default().with_id(source(id)))
}

/// Parse a source id, panicking on invalid input.
pub fn source(id: &str) -> SourceId {
    SourceId::new(id).expect("valid source id")
}

/// Deterministic keypair for signed-node tests.
pub fn keypair(seed: u8) -> Keypair {
    Keypair::from_seed(&[seed; 32])
}

/// Keyring trusting every given keypair under its derived id.
pub fn keyring<'a>(keys: impl IntoIterator<Item = &'a Keypair>) -> Keyring {
    keys.into_iter()
        .fold(Keyring::new(), |ring, kp| ring.with(kp.source_id(), kp.public_key()))
}

/// Map node that signs with `keys` and verifies against `trusted`.
pub fn signed_map_node(keys: &Keypair, trusted: Keyring) -> Node<LwwMap> {
    Node::new(
        LwwMap::default(),
        NodeConfig::default()
            .with_id(keys.source_id())
            .with_signer(keys.clone())
            .with_verifier(trusted),
    )
}

/// Two linked sessions.
pub struct Connection<S> {
    pub a: SyncSession<S>,
    pub b: SyncSession<S>,
    pub link: Link,
}

impl<S: ReplicatedStore> Connection<S> {
    /// Wait until both sessions have exchanged SYNC.
    pub async fn synced(&self) {
        within(self.a.wait_synced()).await.expect("a synced");
        within(self.b.wait_synced()).await.expect("b synced");
    }

    /// Wait until the link has drained and both pumps stopped.
    pub async fn closed(self) {
        within(self.link.closed()).await.expect("link closed");
    }
}

/// Link `a` and `b` with full read/write sessions.
pub fn connect<S: ReplicatedStore>(a: &Node<S>, b: &Node<S>) -> Connection<S> {
    connect_with(a, SessionConfig::duplex(), b, SessionConfig::duplex())
}

/// Link `a` to `b` so updates only flow from `a` to `b`.
pub fn connect_one_way<S: ReplicatedStore>(a: &Node<S>, b: &Node<S>) -> Connection<S> {
    connect_with(a, SessionConfig::read_only(), b, SessionConfig::write_only())
}

pub fn connect_with<S: ReplicatedStore>(
    a: &Node<S>,
    config_a: SessionConfig,
    b: &Node<S>,
    config_b: SessionConfig,
) -> Connection<S> {
    let sa = a.create_stream(config_a);
    let sb = b.create_stream(config_b);
    let link = link(&sa, &sb);
    Connection { a: sa, b: sb, link }
}

/// Await `fut`, panicking after [`TEST_TIMEOUT`].
pub async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(TEST_TIMEOUT, fut)
        .await
        .expect("timed out")
}

/// Poll `check` until it holds, panicking after [`TEST_TIMEOUT`].
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    within(async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
}

/// Let spawned pumps run for a moment.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
