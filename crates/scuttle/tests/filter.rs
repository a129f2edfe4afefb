//! Accept policies announced in the digest.

use scuttle::{AcceptPolicy, Model, NodeConfig, SourceId};
use scuttle_testkit::connect;
use scuttle_testkit::fixtures::{eventually, settle};
use serde_json::json;

fn model(id: &str, accept: Option<AcceptPolicy>) -> Model {
    let mut config = NodeConfig::default().with_id(SourceId::new(id).unwrap());
    if let Some(accept) = accept {
        config = config.with_accept(accept);
    }
    Model::new(config)
}

#[tokio::test]
async fn test_whitelist_filters_history() -> anyhow::Result<()> {
    let a = model("A", None);
    let b = model("B", Some(AcceptPolicy::whitelist(["foo"])));
    a.set("foo", "changed by A").await?;
    a.set("ignored", "changed by A").await?;

    let conn = connect(a.node(), b.node());
    conn.synced().await;
    assert_eq!(b.get("foo").await?, Some(json!("changed by A")));
    assert_eq!(b.get("ignored").await?, None);
    Ok(())
}

#[tokio::test]
async fn test_whitelist_filters_live_updates() -> anyhow::Result<()> {
    let a = model("A", None);
    let b = model("B", Some(AcceptPolicy::whitelist(["foo"])));
    let conn = connect(a.node(), b.node());
    conn.synced().await;

    a.set("ignored", "changed by A").await?;
    a.set("foo", "changed by A").await?;
    eventually(|| async { b.get("foo").await.unwrap().is_some() }).await;
    settle().await;

    assert_eq!(a.get("ignored").await?, Some(json!("changed by A")));
    assert_eq!(b.get("ignored").await?, None);
    assert_eq!(b.keys().await?, vec!["foo".to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_blacklist_filters_both_paths() -> anyhow::Result<()> {
    let a = model("A", None);
    let b = model("B", Some(AcceptPolicy::blacklist(["secret"])));
    a.set("secret", 1).await?;
    a.set("public", 1).await?;

    let conn = connect(a.node(), b.node());
    conn.synced().await;
    a.set("secret", 2).await?;
    a.set("public", 2).await?;
    eventually(|| async { b.get("public").await.unwrap() == Some(json!(2)) }).await;
    settle().await;
    assert_eq!(b.get("secret").await?, None);
    Ok(())
}

#[tokio::test]
async fn test_filtered_node_still_sends_everything() -> anyhow::Result<()> {
    // A policy limits what a node receives, not what it sends.
    let a = model("A", None);
    let b = model("B", Some(AcceptPolicy::whitelist(["foo"])));
    b.set("bar", 1).await?;
    let conn = connect(a.node(), b.node());
    conn.synced().await;
    assert_eq!(a.get("bar").await?, Some(json!(1)));
    Ok(())
}
