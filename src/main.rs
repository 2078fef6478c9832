//! # ALB Rules Controller
//!
//! A lifecycle hook that converges an Application Load Balancer's listener
//! and rule set to a desired routing configuration.
//!
//! ## Overview
//!
//! The controller runs once per provisioning lifecycle event:
//!
//! 1. **Create** - builds the listener(s) and the base rule set, including
//!    OIDC-authenticated action chains and per-tenant routing rules
//! 2. **Update** - diffs the old and new desired state and applies the
//!    minimal set of listener/rule operations (listener replacement, path and
//!    host rewrites, auth enable/disable/rotation, tenant set reconciliation)
//! 3. **Delete** - removes every rule and listener, polling until the load
//!    balancer confirms the deletion
//!
//! The event arrives as a CloudFormation-style custom-resource payload on
//! stdin or from a file; the process exit code is the success/failure signal.

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use alb_rules_controller::api::{AwsElasticLoadBalancing, AwsSecretStore};
use alb_rules_controller::event::LifecycleRequest;
use alb_rules_controller::reconciler::{Reconciler, Settings};

#[derive(Debug, Parser)]
#[command(name = "alb-rules-controller", about = "ALB listener-rule reconciler")]
struct Args {
    /// Path to the lifecycle event JSON; reads stdin when omitted
    #[arg(long)]
    event: Option<PathBuf>,

    /// AWS region override; falls back to the default provider chain
    #[arg(long)]
    region: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "alb_rules_controller=info".into()),
        )
        .init();

    let args = Args::parse();
    info!("Starting ALB Rules Controller");

    let payload = read_event(&args).context("Failed to read lifecycle event")?;
    let request = LifecycleRequest::from_json(&payload)?;

    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
    if let Some(region) = args.region {
        loader = loader.region(aws_config::Region::new(region));
    }
    let sdk_config = loader.load().await;

    let reconciler = Reconciler::new(
        Arc::new(AwsElasticLoadBalancing::new(&sdk_config)),
        Arc::new(AwsSecretStore::new(&sdk_config)),
        Settings::from_env(),
    );

    if let Err(err) = reconciler.apply(request).await {
        error!("Reconciliation failed: {err}");
        return Err(err.into());
    }
    info!("Reconciliation complete");
    Ok(())
}

fn read_event(args: &Args) -> Result<String> {
    match &args.event {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading event file {}", path.display())),
        None => {
            let mut payload = String::new();
            std::io::stdin()
                .read_to_string(&mut payload)
                .context("reading event from stdin")?;
            Ok(payload)
        }
    }
}
