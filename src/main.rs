//! chaosctl - apply, verify and tear down Chaos Mesh fault resources

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use chaosctl::client::{ClientFactory, KubeClientFactory, KubePodClient, PodClient};
use chaosctl::config::{ChaosSettings, OsEnv};
use chaosctl::controller::{ForceDeleteOutcome, ForceDeleter};
use chaosctl::crd::lookup_kind;
use chaosctl::discovery::{DeleteMode, ReleaseScanner};
use chaosctl::experiment::Experiment;
use chaosctl::format::render_resources;
use chaosctl::kube_utils::{create_client, load_manifests};
use chaosctl::remediation::ResidualMountRemediator;
use chaosctl::template::{parse_duration, ManifestOverrides};

/// chaosctl - lifecycle controller for Chaos Mesh fault resources
#[derive(Parser, Debug)]
#[command(name = "chaosctl", version, about, long_about = None)]
struct Cli {
    /// Namespace holding fault resources (default: $CHAOS_NAMESPACE or chaos-testing)
    #[arg(short, long, global = true)]
    namespace: Option<String>,

    /// Path to kubeconfig file (default: $KUBECONFIG or ~/.kube/config)
    #[arg(long, env = "KUBECONFIG", global = true)]
    kubeconfig: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List every fault resource in the namespace
    List {
        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        output: OutputFormat,
    },

    /// Find (and optionally delete) fault resources targeting a release
    Release(ReleaseArgs),

    /// Run a fault experiment: preflight, apply, wait, tear down, recover
    Apply(ApplyArgs),

    /// Delete a fault resource, stripping finalizers if it is stuck
    ForceDelete {
        /// Resource kind (e.g. IOChaos, iochaos, Schedule)
        kind: String,
        /// Resource name
        name: String,
        /// Seconds to wait for the resource to disappear
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Remove residual I/O-fault proxy mounts from pods, restarting stuck ones
    Remediate {
        /// Namespace of the pods
        #[arg(long)]
        target_namespace: String,
        /// Volume path the I/O fault was injected at
        #[arg(long)]
        volume_path: String,
        /// Pods to clean
        #[arg(required = true)]
        pods: Vec<String>,
    },
}

#[derive(Parser, Debug)]
struct ReleaseArgs {
    /// Release name matched against `release` and `app.kubernetes.io/instance`
    release: String,

    /// Delete the matched resources
    #[arg(long)]
    delete: bool,

    /// Force delete: wait for each resource and strip stuck finalizers
    #[arg(long, requires = "delete")]
    force: bool,

    /// Skip confirmation
    #[arg(short, long)]
    yes: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    output: OutputFormat,
}

#[derive(Parser, Debug)]
struct ApplyArgs {
    /// Fault manifest (YAML or JSON, may hold several documents)
    #[arg(short, long)]
    file: PathBuf,

    /// Namespace of the workload pods under test
    #[arg(long)]
    target_namespace: String,

    /// Release the fault should target
    #[arg(long)]
    release: Option<String>,

    /// Override metadata.name (single-document manifests only)
    #[arg(long)]
    name: Option<String>,

    /// How long the fault runs, e.g. 5m or 1h30m
    #[arg(long, default_value = "5m")]
    duration: String,

    /// Schedule interval for Schedule resources, e.g. 30s or 5m
    #[arg(long)]
    interval: Option<String>,

    /// Selection mode (one, all, fixed, fixed-percent, random-max-percent)
    #[arg(long)]
    mode: Option<String>,

    /// Argument of the selection mode
    #[arg(long)]
    value: Option<String>,

    /// Targets are deployed by the operator (component -> app.kubernetes.io/component)
    #[arg(long)]
    operator_labels: bool,

    /// Write the experiment record as JSON to this path
    #[arg(long)]
    record: Option<PathBuf>,
}

/// Output format
#[derive(Clone, Copy, Debug, Default, ValueEnum)]
enum OutputFormat {
    /// Columnar table (default)
    #[default]
    Table,
    /// JSON
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }

    let mut settings = ChaosSettings::from_env(&OsEnv);
    if let Some(namespace) = cli.namespace {
        settings.namespace = namespace;
    }

    let client = create_client(cli.kubeconfig.as_deref()).await?;
    let factory: Arc<dyn ClientFactory> = Arc::new(KubeClientFactory::with_api(
        client.clone(),
        &settings.group,
        &settings.version,
    ));
    let pods: Arc<dyn PodClient> = Arc::new(KubePodClient::new(client));

    match cli.command {
        Commands::List { output } => run_list(factory, &settings, output).await,
        Commands::Release(args) => run_release(factory, &settings, args).await,
        Commands::Apply(args) => run_apply(factory, pods, settings, args).await,
        Commands::ForceDelete {
            kind,
            name,
            timeout,
        } => run_force_delete(factory, &settings, &kind, &name, timeout).await,
        Commands::Remediate {
            target_namespace,
            volume_path,
            pods: names,
        } => run_remediate(pods, &target_namespace, &volume_path, &names).await,
    }
}

async fn run_list(
    factory: Arc<dyn ClientFactory>,
    settings: &ChaosSettings,
    output: OutputFormat,
) -> anyhow::Result<()> {
    let scanner = ReleaseScanner::new(factory);
    let resources = scanner.list_all(&settings.namespace).await?;
    match output {
        OutputFormat::Table => println!("{}", render_resources(&resources, Utc::now())),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&resources)?),
    }
    Ok(())
}

async fn run_release(
    factory: Arc<dyn ClientFactory>,
    settings: &ChaosSettings,
    args: ReleaseArgs,
) -> anyhow::Result<()> {
    let scanner = ReleaseScanner::new(factory).with_poll_interval(settings.poll_interval);
    let resources = scanner
        .find_for_release(&settings.namespace, &args.release)
        .await?;

    match args.output {
        OutputFormat::Table => println!("{}", render_resources(&resources, Utc::now())),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&resources)?),
    }

    if !args.delete || resources.is_empty() {
        return Ok(());
    }
    if !args.yes {
        println!(
            "\nDelete {} resource(s) targeting release '{}'?",
            resources.len(),
            args.release
        );
        println!("Run with --yes to confirm");
        return Ok(());
    }

    let mode = if args.force {
        DeleteMode::Force {
            timeout: settings.bulk_force_delete_timeout,
        }
    } else {
        DeleteMode::Plain
    };
    let report = scanner.delete_all(&resources, mode).await;
    println!("\nDeleted {}/{}", report.success_count(), report.attempted);
    for failed in &report.failed {
        println!("  failed: {}", failed);
    }
    if !report.failed.is_empty() {
        bail!("{} resource(s) could not be deleted", report.failed.len());
    }
    Ok(())
}

async fn run_apply(
    factory: Arc<dyn ClientFactory>,
    pods: Arc<dyn PodClient>,
    settings: ChaosSettings,
    args: ApplyArgs,
) -> anyhow::Result<()> {
    let duration = Duration::from_secs(parse_duration(&args.duration)?);
    let overrides = ManifestOverrides {
        name: args.name.clone(),
        resource_namespace: Some(settings.namespace.clone()),
        release: args.release.clone(),
        target_namespaces: vec![args.target_namespace.clone()],
        mode: args.mode.clone(),
        value: args.value.clone(),
        duration: Some(args.duration.clone()),
        interval: args.interval.clone(),
        operator_labels: args.operator_labels,
    };

    let mut manifests = load_manifests(&args.file)?;
    if manifests.is_empty() {
        bail!("{} contains no manifests", args.file.display());
    }
    overrides
        .apply_all(&mut manifests)
        .with_context(|| format!("invalid overrides for {}", args.file.display()))?;

    let experiment =
        Experiment::new(factory, pods, settings, &args.target_namespace).with_duration(duration);
    let mut records = Vec::with_capacity(manifests.len());
    for manifest in manifests {
        let record = experiment.run(&manifest).await?;
        info!(name = %record.name, recovered = record.recovered, "experiment finished");
        records.push(record);
    }

    let json = serde_json::to_string_pretty(&records)?;
    if let Some(path) = &args.record {
        write_record(path, &json)?;
    }
    println!("{}", json);

    if records.iter().any(|r| !r.recovered) {
        bail!("targeted pods did not recover within the pod-ready timeout");
    }
    Ok(())
}

fn write_record(path: &Path, json: &str) -> anyhow::Result<()> {
    std::fs::write(path, json)
        .with_context(|| format!("failed to write experiment record to {}", path.display()))
}

async fn run_force_delete(
    factory: Arc<dyn ClientFactory>,
    settings: &ChaosSettings,
    kind: &str,
    name: &str,
    timeout: Option<u64>,
) -> anyhow::Result<()> {
    let kind = lookup_kind(kind).map(|k| k.kind).unwrap_or(kind);
    let timeout = timeout
        .map(Duration::from_secs)
        .unwrap_or(settings.force_delete_timeout);

    let deleter = ForceDeleter::new(factory.resource_client(kind, &settings.namespace))
        .with_interval(settings.poll_interval);
    match deleter.force_delete(name, timeout).await {
        ForceDeleteOutcome::AlreadyAbsent => println!("{}/{} not found", kind, name),
        ForceDeleteOutcome::Removed {
            finalizers_stripped,
        } => {
            if finalizers_stripped > 0 {
                println!("{}/{} deleted (finalizers removed)", kind, name);
            } else {
                println!("{}/{} deleted", kind, name);
            }
        }
        ForceDeleteOutcome::TimedOut => {
            bail!("{}/{} still present after {}s", kind, name, timeout.as_secs())
        }
    }
    Ok(())
}

async fn run_remediate(
    pods: Arc<dyn PodClient>,
    namespace: &str,
    volume_path: &str,
    names: &[String],
) -> anyhow::Result<()> {
    let report = ResidualMountRemediator::new(pods)
        .remediate(names, namespace, volume_path)
        .await;

    println!("Cleaned: {}", report.cleaned_count());
    if !report.needing_restart.is_empty() {
        println!("Needed restart: {}", report.needing_restart.join(", "));
        println!("Restarted: {}", report.restarted.join(", "));
    }
    if !report.failed.is_empty() {
        println!("Failed: {}", report.failed.join(", "));
    }
    if !report.is_complete() {
        bail!("remediation incomplete");
    }
    Ok(())
}
