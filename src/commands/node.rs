use anyhow::Context;
use tm_supervisor::{NodeParams, NodeSupervisor};
use tracing::info;

pub(crate) async fn cmd_init() -> anyhow::Result<()> {
    let params = NodeParams::from_env();
    info!("{}", params);
    NodeSupervisor::new(params)
        .init()
        .await
        .context("Failed to initialize node home")?;
    info!("Node home initialized");
    Ok(())
}

pub(crate) async fn cmd_prune() -> anyhow::Result<()> {
    let params = NodeParams::from_env();
    info!("{}", params);
    NodeSupervisor::new(params)
        .prune_blocks()
        .await
        .context("Could not perform `unsafe-reset-all` successfully")?;
    info!("Node state pruned");
    Ok(())
}
