//! clusterlens - Kubernetes troubleshooting from the command line
//!
//! Builds relationship graphs around cluster objects and runs domain
//! diagnostics against a live cluster or an offline YAML snapshot.

use anyhow::{Context, Result};
use clap::Parser;
use clusterlens::analysis::{OutputFormat, Renderer, SecretRedactor};
use clusterlens::cli::{self, Command, Session};
use clusterlens::config::ConfigLoader;
use clusterlens::kube::{self, ClusterApi, InMemoryCluster, KubeCluster};
use std::path::PathBuf;
use std::sync::Arc;

/// Kubernetes troubleshooting engine: relationship graphs and ranked root causes
#[derive(Parser, Debug)]
#[command(name = "clusterlens")]
#[command(version, about, long_about = None)]
struct Args {
    /// Enable debug logging
    #[arg(long, short = 'd', global = true)]
    debug: bool,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Output format (json or yaml); overrides the configured output
    #[arg(long, short = 'o', global = true)]
    output: Option<OutputFormat>,

    /// Diagnose a multi-document YAML snapshot instead of a live cluster
    #[arg(long, global = true)]
    snapshot: Option<PathBuf>,

    /// Kubeconfig context; also selects the per-context config layer
    #[arg(long, global = true)]
    context: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    cli::init_logging(args.debug, args.log_file.as_deref())?;

    let context = args.context.clone().or_else(kube::current_context);

    let command = match args.command {
        Command::Config { subcommand } => {
            return cli::handle_config_command(subcommand, context.as_deref());
        }
        Command::Version => {
            return cli::display_version(args.output.unwrap_or_default());
        }
        command => command,
    };

    let config = ConfigLoader::load(context.as_deref()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    let output = args.output.unwrap_or(config.output);
    tracing::debug!(
        namespace = %config.default_namespace,
        user = %config.user.name,
        role = config.user.role.as_str(),
        "Configuration loaded"
    );

    let cluster: Arc<dyn ClusterApi> = match &args.snapshot {
        Some(path) => {
            let yaml = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read snapshot: {}", path.display()))?;
            let snapshot = InMemoryCluster::from_manifests(&yaml)
                .with_context(|| format!("Failed to load snapshot: {}", path.display()))?;
            tracing::info!("Serving cluster state from snapshot {}", path.display());
            Arc::new(snapshot)
        }
        None => {
            let client = kube::create_client(args.context.as_deref()).await?;
            Arc::new(KubeCluster::new(client))
        }
    };

    let session = Session::new(cluster, config)?;
    let ctx = session.request_context();

    let token = ctx.token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling request");
            token.cancel();
        }
    });

    let renderer = output.renderer();
    match session.execute(&ctx, command).await {
        Ok(value) => {
            println!("{}", renderer.render_value(&value)?.trim_end());
            Ok(())
        }
        Err(err) => {
            tracing::debug!(code = err.code(), "Request failed: {}", err);
            let payload = err.to_payload(&SecretRedactor);
            println!("{}", renderer.render_value(&payload)?.trim_end());
            std::process::exit(1);
        }
    }
}
