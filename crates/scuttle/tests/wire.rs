//! Models replicating over encoded byte streams.

use scuttle::sync::{connect_io, CborCodec, FrameCodec, JsonLinesCodec};
use scuttle::{Model, SessionConfig};
use scuttle_testkit::fixtures::{eventually, within};
use serde_json::json;

async fn replicate_over<C>(codec: C) -> anyhow::Result<()>
where
    C: FrameCodec + Clone + Send + 'static,
{
    let a = Model::with_id("A")?;
    let b = Model::with_id("B")?;
    a.set("from", "A").await?;
    b.set("other", json!({"nested": [1, 2]})).await?;

    let (left, right) = tokio::io::duplex(1024);
    let sa = a.create_stream(SessionConfig::duplex());
    let sb = b.create_stream(SessionConfig::duplex());
    let la = connect_io(&sa, left, codec.clone());
    let lb = connect_io(&sb, right, codec);

    within(sa.wait_synced()).await?;
    within(sb.wait_synced()).await?;
    assert_eq!(b.get("from").await?, Some(json!("A")));
    assert_eq!(a.get("other").await?, Some(json!({"nested": [1, 2]})));

    a.set("live", 1).await?;
    eventually(|| async { b.get("live").await.unwrap() == Some(json!(1)) }).await;

    sa.end();
    within(la.closed()).await?;
    within(lb.closed()).await?;
    assert_eq!(a.node().session_count(), 0);
    assert_eq!(b.node().session_count(), 0);
    assert_eq!(a.to_json().await?, b.to_json().await?);
    Ok(())
}

#[tokio::test]
async fn test_replicate_over_json_lines() -> anyhow::Result<()> {
    replicate_over(JsonLinesCodec::new()).await
}

#[tokio::test]
async fn test_replicate_over_cbor() -> anyhow::Result<()> {
    replicate_over(CborCodec::new()).await
}

#[tokio::test]
async fn test_one_way_over_bytes_closes() -> anyhow::Result<()> {
    let a = Model::with_id("A")?;
    let b = Model::with_id("B")?;
    a.set("k", "v").await?;

    let (left, right) = tokio::io::duplex(1024);
    let sa = a.create_read_stream();
    let sb = b.create_write_stream();
    let la = connect_io(&sa, left, JsonLinesCodec::new());
    let lb = connect_io(&sb, right, JsonLinesCodec::new());
    within(sb.wait_synced()).await?;
    assert_eq!(b.get("k").await?, Some(json!("v")));

    sb.end();
    within(la.closed()).await?;
    within(lb.closed()).await?;
    assert_eq!(a.node().session_count(), 0);
    assert_eq!(b.node().session_count(), 0);
    Ok(())
}
