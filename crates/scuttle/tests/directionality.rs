//! Read-only and write-only streams.

use scuttle::{Model, SessionConfig, SessionEvent};
use scuttle_testkit::fixtures::{eventually, settle, within};
use scuttle_testkit::{connect_one_way, connect_with};
use serde_json::json;

#[tokio::test]
async fn test_read_only_to_write_only_flows_one_way() -> anyhow::Result<()> {
    let a = Model::with_id("A")?;
    let b = Model::with_id("B")?;
    a.set("before", "from A").await?;
    b.set("local", "from B").await?;

    let conn = connect_one_way(a.node(), b.node());
    conn.synced().await;
    assert_eq!(b.get("before").await?, Some(json!("from A")));

    a.set("after", "from A").await?;
    b.set("local", "changed by B").await?;
    eventually(|| async { b.get("after").await.unwrap().is_some() }).await;
    settle().await;

    assert_eq!(a.get("local").await?, None);
    assert_eq!(b.node().listener_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_read_only_against_duplex_peer() -> anyhow::Result<()> {
    let a = Model::with_id("A")?;
    let b = Model::with_id("B")?;
    b.set("foo", "changed by B").await?;

    let conn = connect_with(
        a.node(),
        SessionConfig::read_only(),
        b.node(),
        SessionConfig::duplex(),
    );
    conn.synced().await;
    settle().await;
    assert_eq!(a.get("foo").await?, None);
    Ok(())
}

#[tokio::test]
async fn test_synced_fires_once_per_side() -> anyhow::Result<()> {
    for (config_a, config_b) in [
        (SessionConfig::read_only(), SessionConfig::write_only()),
        (SessionConfig::read_only(), SessionConfig::duplex()),
        (SessionConfig::duplex(), SessionConfig::duplex()),
    ] {
        let a = Model::with_id("A")?;
        let b = Model::with_id("B")?;
        b.set("foo", "changed by B").await?;

        let sa = a.create_stream(config_a);
        let sb = b.create_stream(config_b);
        let mut ea = sa.subscribe();
        let mut eb = sb.subscribe();
        let link = scuttle::link(&sa, &sb);
        within(sa.wait_synced()).await?;
        within(sb.wait_synced()).await?;
        a.set("later", 1).await?;
        b.set("later", 2).await?;
        settle().await;
        sa.end();
        sb.end();
        within(link.closed()).await?;

        for events in [&mut ea, &mut eb] {
            let mut synced = 0;
            while let Ok(event) = events.try_recv() {
                if event == SessionEvent::Synced {
                    synced += 1;
                }
            }
            assert_eq!(synced, 1);
        }
    }
    Ok(())
}

#[tokio::test]
async fn test_read_only_with_known_peer_clock() -> anyhow::Result<()> {
    let a = Model::with_id("A")?;
    let b = Model::with_id("B")?;
    a.set("old", 1).await?;

    let first = connect_one_way(a.node(), b.node());
    first.synced().await;
    first.a.end();
    first.closed().await;

    a.set("new", 2).await?;
    let second = connect_with(
        a.node(),
        SessionConfig::read_only().with_peer_clock(b.sources()),
        b.node(),
        SessionConfig::write_only(),
    );
    second.synced().await;
    assert_eq!(second.a.stats().sent, 1);
    assert_eq!(b.get("new").await?, Some(json!(2)));
    Ok(())
}

#[tokio::test]
async fn test_read_only_waits_for_forced_digest() -> anyhow::Result<()> {
    let a = Model::with_id("A")?;
    let b = Model::with_id("B")?;
    a.set("old", 1).await?;

    let first = connect_one_way(a.node(), b.node());
    first.synced().await;
    first.a.end();
    first.closed().await;

    a.set("new", 2).await?;
    let second = connect_with(
        a.node(),
        SessionConfig::read_only().await_digest(true),
        b.node(),
        SessionConfig::write_only().send_clock(true),
    );
    second.synced().await;
    assert_eq!(second.a.peer_id(), Some(b.id().clone()));
    assert_eq!(second.a.stats().sent, 1);
    assert_eq!(b.get("new").await?, Some(json!(2)));

    second.b.end();
    second.closed().await;
    assert_eq!(a.node().session_count(), 0);
    assert_eq!(b.node().session_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_ending_one_way_link_closes_both_sessions() -> anyhow::Result<()> {
    let a = Model::with_id("A")?;
    let b = Model::with_id("B")?;
    a.set("k", 1).await?;

    let conn = connect_one_way(a.node(), b.node());
    conn.synced().await;
    conn.a.end();
    within(conn.b.wait_closed()).await?;
    conn.closed().await;
    assert_eq!(a.node().session_count(), 0);
    assert_eq!(b.node().session_count(), 0);
    Ok(())
}
