//! Random writes on three nodes converge once the nodes are linked.

use proptest::prelude::*;
use scuttle::sync::{state_hash, verify_convergence};
use scuttle::Model;
use scuttle_testkit::connect;
use scuttle_testkit::fixtures::eventually;
use scuttle_testkit::generators::{write_ops, WriteOp};

async fn run(ops: Vec<WriteOp>) -> anyhow::Result<()> {
    let nodes = [
        Model::with_id("A")?,
        Model::with_id("B")?,
        Model::with_id("C")?,
    ];
    for op in &ops {
        nodes[op.node].set(&op.key, op.value.clone()).await?;
    }

    let ab = connect(nodes[0].node(), nodes[1].node());
    let bc = connect(nodes[1].node(), nodes[2].node());
    ab.synced().await;
    bc.synced().await;

    eventually(|| async {
        let a = state_hash(&nodes[0].to_json().await.unwrap());
        let b = state_hash(&nodes[1].to_json().await.unwrap());
        let c = state_hash(&nodes[2].to_json().await.unwrap());
        a == b && b == c
    })
    .await;
    assert!(verify_convergence(nodes[0].node(), nodes[2].node()).await?.is_converged());
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn test_chain_converges(ops in write_ops(3, 24)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(run(ops)).unwrap();
    }
}

#[tokio::test]
async fn test_writes_during_sync_converge() -> anyhow::Result<()> {
    let a = Model::with_id("A")?;
    let b = Model::with_id("B")?;
    for i in 0..10 {
        a.set("shared", i).await?;
        b.set("shared", -i).await?;
    }
    let conn = connect(a.node(), b.node());
    for i in 10..20 {
        a.set("shared", i).await?;
        b.set(&format!("b{i}"), i).await?;
    }
    conn.synced().await;
    eventually(|| async { a.to_json().await.unwrap() == b.to_json().await.unwrap() }).await;
    Ok(())
}
