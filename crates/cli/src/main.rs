use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use converge_core::{FieldDeltaSet, LabelDelta, LabelMap, ResourceSnapshot, Settings};
use converge_kubehub::{KubeTarget, PromMetrics};
use converge_labels::{compute_delta, LabelReconciler};
use converge_ops::{Outcome, Reconciler};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "convergectl", version, about = "Drift detection and label convergence")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Kubernetes namespace for live targets
    #[arg(long = "ns", global = true, env = "CONVERGE_NAMESPACE")]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Label set operations
    Labels {
        #[command(subcommand)]
        command: LabelsCommand,
    },
    /// Compare two resource manifests and print drifted fields
    Drift {
        /// Desired manifest (YAML)
        desired: PathBuf,
        /// Observed manifest (YAML)
        observed: PathBuf,
    },
    /// Run one reconciliation pass against a live object
    Reconcile {
        /// GVK key, e.g. "bedrockagent.services.k8s.aws/v1alpha1/Agent"
        gvk: String,
        /// Object name
        name: String,
        /// Desired manifest (YAML)
        #[arg(short = 'f', long = "file")]
        desired: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum LabelsCommand {
    /// Show the label delta between two manifests' `spec.tags`
    Diff {
        desired: PathBuf,
        observed: PathBuf,
    },
    /// Converge a live object's labels to the manifest's `spec.tags`
    Sync {
        gvk: String,
        name: String,
        #[arg(short = 'f', long = "file")]
        desired: PathBuf,
    },
}

fn init_tracing() {
    let env = std::env::var("CONVERGE_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("CONVERGE_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid CONVERGE_METRICS_ADDR; expected host:port");
        }
    }
}

fn load_snapshot(path: &Path) -> Result<ResourceSnapshot> {
    let yaml = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    converge_kubehub::snapshot_from_yaml(&yaml).with_context(|| format!("loading {}", path.display()))
}

fn print_delta(delta: &FieldDeltaSet) {
    if delta.is_empty() {
        println!("no drift");
        return;
    }
    for d in delta {
        println!("~ {}: {} -> {}", d.path, d.desired, d.observed);
    }
}

fn print_label_delta(delta: &LabelDelta) {
    if delta.is_empty() {
        println!("labels in sync");
        return;
    }
    for (k, v) in delta.to_upsert.iter().flatten() {
        println!("+ {}={}", k, v);
    }
    for k in delta.to_remove.iter().flatten() {
        println!("- {}", k);
    }
}

async fn resolve(gvk: &str, ns: Option<&str>, settings: &Settings) -> Result<KubeTarget> {
    let client = converge_kubehub::client().await?;
    KubeTarget::resolve(client, gvk, ns, &settings.field_manager).await
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let settings = Settings::from_env();
    let ns = cli.namespace.as_deref();

    let res = run(&cli, ns, &settings).await;
    if let Err(e) = &res {
        error!(error = ?e, "command failed");
    }
    res
}

async fn run(cli: &Cli, ns: Option<&str>, settings: &Settings) -> Result<()> {
    match &cli.command {
        Commands::Drift { desired, observed } => {
            let desired = load_snapshot(desired)?;
            let observed = load_snapshot(observed)?;
            let delta = converge_drift::compare_resource(&desired, &observed, &settings.ready_status);
            info!(entries = delta.len(), "drift computed");
            match cli.output {
                Output::Human => print_delta(&delta),
                Output::Json => println!("{}", serde_json::to_string_pretty(&delta)?),
            }
        }
        Commands::Labels { command: LabelsCommand::Diff { desired, observed } } => {
            let desired = load_snapshot(desired)?.spec.tags.unwrap_or_default();
            let observed = load_snapshot(observed)?.spec.tags.unwrap_or_default();
            let delta = compute_delta(&desired, &observed);
            match cli.output {
                Output::Human => print_label_delta(&delta),
                Output::Json => println!("{}", serde_json::to_string_pretty(&delta)?),
            }
        }
        Commands::Labels { command: LabelsCommand::Sync { gvk, name, desired } } => {
            let desired: LabelMap = load_snapshot(desired)?.spec.tags.unwrap_or_default();
            let target = resolve(gvk, ns, settings).await?;
            let labels = LabelReconciler::new(Arc::new(target.label_store()), Arc::new(PromMetrics));
            let observed = labels.fetch_labels(name).await?;
            let delta = compute_delta(&desired, &observed);
            labels.converge(name, &desired, &observed).await?;
            match cli.output {
                Output::Human => print_label_delta(&delta),
                Output::Json => println!("{}", serde_json::to_string_pretty(&delta)?),
            }
        }
        Commands::Reconcile { gvk, name, desired } => {
            let desired = load_snapshot(desired)?;
            let target = resolve(gvk, ns, settings).await?;
            let observed = target.snapshot(name).await?;
            let reconciler = Reconciler::new(
                Arc::new(target.label_store()),
                Arc::new(target.promoter()),
                Arc::new(PromMetrics),
                settings.clone(),
            );
            let outcome = reconciler.reconcile_once(name, &desired, &observed).await?;
            match cli.output {
                Output::Human => match &outcome {
                    Outcome::InSync => println!("in sync"),
                    Outcome::Requeue => println!("prepare requested; re-run once the resource is {}", settings.ready_status),
                    Outcome::NeedsUpdate(paths) => {
                        println!("update required:");
                        for p in paths { println!("~ {}", p); }
                    }
                },
                Output::Json => println!("{}", serde_json::to_string_pretty(&outcome)?),
            }
        }
    }
    Ok(())
}
