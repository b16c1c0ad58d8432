/// tgjob - run the Telegram message management script as a one-shot Kubernetes pod
///
/// Creates the pod (plus a persistent volume and claim for `--persist` runs)
/// and blocks until it reaches Succeeded or Failed.
mod config;
mod job;
mod k8s;
mod utils;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::DeployConfig;
use crate::job::{JobId, JobOutcome, JobRequest, JobRunner, MessageIds, RunOptions};
use crate::k8s::{KubernetesClient, PodManager};

#[derive(Parser)]
#[command(name = "tgjob", version)]
#[command(
    about = "Deploy the Python Telegram message management script to Kubernetes and wait for it",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Deployment defaults file
    #[arg(short, long, global = true, default_value = "tgjob.yaml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy a job and wait until its pod finishes
    Run(RunArgs),

    /// Show the pod status of a job started earlier
    Status {
        #[command(flatten)]
        cluster: ClusterArgs,

        /// Job id printed by `run`
        #[arg(long)]
        job_id: String,

        /// Print JSON instead of log lines
        #[arg(long)]
        json: bool,
    },

    /// Generate example configuration file
    Init,
}

/// Cluster selection shared by subcommands
#[derive(Args)]
struct ClusterArgs {
    /// Path to the kubeconfig file; of a `KUBECONFIG` list only the first entry is read
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: PathBuf,

    /// Kubeconfig context, defaults to current-context
    #[arg(long)]
    context: Option<String>,

    /// Kubernetes namespace, overrides the config file
    #[arg(long)]
    namespace: Option<String>,
}

impl ClusterArgs {
    /// The kubeconfig to read, the first entry when given a path list
    fn kubeconfig_path(&self) -> Result<PathBuf> {
        std::env::split_paths(self.kubeconfig.as_os_str())
            .find(|path| !path.as_os_str().is_empty())
            .context("No kubeconfig path given")
    }
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    cluster: ClusterArgs,

    /// Path to the file with a Telegram Pyrogram session string
    #[arg(long)]
    session: PathBuf,

    /// Telegram API id
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    api_id: i64,

    /// Telegram API hash
    #[arg(long, env = "TG_MANAGE_API_HASH", hide_env_values = true, default_value = "")]
    api_hash: String,

    /// Create a persistent volume and export results to it
    #[arg(long)]
    persist: bool,

    /// Remove all messages in public chats
    #[arg(long)]
    remove_all: bool,

    /// Results filename, defaults to results_<timestamp>.csv
    #[arg(long)]
    results_filename: Option<String>,

    /// Message ids to remove, comma separated without spaces, e.g. 1,2,3
    #[arg(long, default_value = "")]
    message_ids: String,

    /// Chat id to remove the messages in
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    chat_id: i64,

    /// Container image, overrides the config file
    #[arg(long, visible_alias = "imagename")]
    image: Option<String>,

    /// Limit in seconds on the whole run, claim binding and pod watch included (0 waits forever)
    #[arg(long)]
    timeout: Option<u64>,

    /// Print the container log after the pod finishes
    #[arg(long)]
    show_logs: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("tgjob={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let result = match &cli.command {
        Commands::Run(args) => run_job(&cli, args).await,
        Commands::Status {
            cluster,
            job_id,
            json,
        } => show_status(&cli, cluster, job_id, *json).await.map(|_| None),
        Commands::Init => init_config(&cli).await.map(|_| None),
    };

    match result {
        Ok(Some(JobOutcome::Failed)) => {
            error!("Pod failed.");
            std::process::exit(1);
        }
        Ok(Some(JobOutcome::Succeeded)) => info!("✓ Pod completed successfully."),
        Ok(None) => {}
        Err(e) => {
            error!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Deploy the job described by the flags and wait for it
async fn run_job(cli: &Cli, args: &RunArgs) -> Result<Option<JobOutcome>> {
    let mut config = load_config(&cli.config, args.cluster.namespace.as_deref())?;
    if let Some(image) = &args.image {
        config.image = image.clone();
    }
    if let Some(timeout) = args.timeout {
        config.watch.timeout_secs = timeout;
    }
    config.validate()?;

    let message_ids: MessageIds = args.message_ids.parse()?;
    let session = read_session(&args.session).await?;

    let request = JobRequest {
        api_id: args.api_id,
        api_hash: args.api_hash.clone(),
        session,
        persist: args.persist,
        remove_all: args.remove_all,
        results_filename: args
            .results_filename
            .clone()
            .unwrap_or_else(JobRequest::default_results_filename),
        message_ids,
        chat_id: args.chat_id,
        image: config.image.clone(),
        namespace: config.namespace.clone(),
    };
    request.validate(&args.session.display().to_string())?;

    info!("Values of command-line flags:");
    info!("  sessionFile: {}", args.session.display());
    info!("  persist: {}", request.persist);
    info!("  removeAll: {}", request.remove_all);
    info!("  resultsFile: {}", request.results_filename);
    info!("  messageIDs: {}", args.message_ids);
    info!("  chatID: {}", request.chat_id);
    let kubeconfig = args.cluster.kubeconfig_path()?;
    info!("  kubeconfigPath: {}", kubeconfig.display());

    info!("Deploying docker image {} to Kubernetes...", request.image);
    let client =
        KubernetesClient::from_kubeconfig(&kubeconfig, args.cluster.context.as_deref()).await?;
    info!("Using API server {}", client.api_server());

    let options = RunOptions {
        timeout: (config.watch.timeout_secs > 0)
            .then(|| Duration::from_secs(config.watch.timeout_secs)),
        show_logs: args.show_logs,
    };

    let runner = JobRunner::new(client, config);
    let outcome = runner.run(&request, &options).await?;

    Ok(Some(outcome))
}

/// Show the phase of a previously launched job pod
async fn show_status(cli: &Cli, cluster: &ClusterArgs, job_id: &str, json: bool) -> Result<()> {
    let config = load_config(&cli.config, cluster.namespace.as_deref())?;
    let job_id = JobId::parse(job_id)?;
    let names = job_id.names();

    let client =
        KubernetesClient::from_kubeconfig(&cluster.kubeconfig_path()?, cluster.context.as_deref())
            .await?;
    let pods = PodManager::new(client);
    let summary = pods.get_summary(&names.pod, &config.namespace).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    info!("Job: {}", job_id);
    info!("  Pod: {}", summary.name);
    info!("  Namespace: {}", summary.namespace);
    info!("  Phase: {}", summary.phase);
    if let Some(node) = &summary.node {
        info!("  Node: {}", node);
    }
    if let Some(started_at) = &summary.started_at {
        info!("  Started: {}", started_at);
    }
    if let Some(reason) = &summary.reason {
        info!("  Reason: {}", reason);
    }
    if summary.phase.is_terminal() {
        info!("  Finished: yes");
    }

    Ok(())
}

/// Initialize example configuration file
async fn init_config(cli: &Cli) -> Result<()> {
    if cli.config.exists() {
        anyhow::bail!(
            "Configuration file already exists: {}",
            cli.config.display()
        );
    }

    let yaml = serde_yaml::to_string(&DeployConfig::example())?;

    tokio::fs::write(&cli.config, yaml)
        .await
        .context("Failed to write configuration file")?;

    info!("Example configuration created: {}", cli.config.display());
    info!("");
    info!("Next steps:");
    info!("  1. Edit the image, namespace and storage settings");
    info!("  2. Run a job:");
    info!("     tgjob run --kubeconfig ~/.kube/config --session ./session --api-id <id> --api-hash <hash>");

    Ok(())
}

/// Config file (or defaults) with the namespace override applied
fn load_config(path: &Path, namespace: Option<&str>) -> Result<DeployConfig> {
    let mut config = DeployConfig::load_or_default(path)
        .with_context(|| format!("Failed to load configuration {}", path.display()))?;
    if let Some(namespace) = namespace {
        config.namespace = namespace.to_string();
    }
    config.validate()?;
    Ok(config)
}

/// Read the Pyrogram session string, surrounding whitespace stripped
async fn read_session(path: &Path) -> Result<String> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read session file {}", path.display()))?;
    Ok(content.trim().to_string())
}
