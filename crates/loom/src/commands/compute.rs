//! Ensure and teardown commands - manage a workspace's compute resources
//! without running the gateway.

use anyhow::{Context as _, Result};
use clap::Args;
use tracing::info;

use super::{Context, build_provisioner};

/// Arguments shared by `ensure` and `teardown`.
#[derive(Args, Debug)]
pub struct ComputeArgs {
    /// Workspace id
    pub workspace_id: String,

    /// Orchestration API URL (overrides config)
    #[arg(long)]
    pub api_url: Option<String>,

    /// Namespace (overrides config)
    #[arg(long)]
    pub namespace: Option<String>,

    /// Container image (overrides config)
    #[arg(long)]
    pub image: Option<String>,
}

fn provisioner(args: &ComputeArgs, ctx: &Context) -> Result<loom_session::Provisioner> {
    let loaded = ctx.load_config()?;
    let mut compute = loaded.config.compute();
    if let Some(url) = &args.api_url {
        compute.api_url = Some(url.clone());
    }
    if let Some(namespace) = &args.namespace {
        compute.namespace = namespace.clone();
    }
    if let Some(image) = &args.image {
        compute.image = image.clone();
    }
    build_provisioner(&compute)
}

/// Run the ensure command.
pub async fn ensure(args: ComputeArgs, ctx: &Context) -> Result<()> {
    let provisioner = provisioner(&args, ctx)?;
    let report = provisioner
        .ensure(&args.workspace_id)
        .await
        .with_context(|| format!("ensure failed for workspace '{}'", args.workspace_id))?;

    info!(workspace_id = %args.workspace_id, ?report, "Workspace ensured");
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Run the teardown command.
pub async fn teardown(args: ComputeArgs, ctx: &Context) -> Result<()> {
    let provisioner = provisioner(&args, ctx)?;
    let report = provisioner
        .teardown(&args.workspace_id)
        .await
        .with_context(|| format!("teardown failed for workspace '{}'", args.workspace_id))?;

    info!(workspace_id = %args.workspace_id, ?report, "Workspace torn down");
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
