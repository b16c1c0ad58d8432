/// The deploy sequence: storage (persisted runs only), pod, watch
use anyhow::Result;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

use super::{JobId, JobNames, JobOutcome, JobRequest};
use crate::config::DeployConfig;
use crate::k8s::{KubernetesClient, PodManager, PodWatcher, StorageManager};

/// Knobs of a single `run` invocation
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Limit on the whole deploy-and-watch sequence, `None` waits forever
    pub timeout: Option<Duration>,
    /// Print the container log once the pod terminated
    pub show_logs: bool,
}

/// Cluster calls the deploy sequence is made of
#[async_trait]
pub trait JobBackend: Send + Sync {
    async fn create_persistent_volume(&self, names: &JobNames) -> Result<()>;

    async fn create_persistent_volume_claim(&self, names: &JobNames, namespace: &str)
        -> Result<()>;

    async fn wait_for_claim_bound(&self, names: &JobNames, namespace: &str) -> Result<()>;

    async fn create_job_pod(
        &self,
        names: &JobNames,
        request: &JobRequest,
        config: &DeployConfig,
    ) -> Result<()>;

    async fn watch_pod_until_terminal(&self, name: &str, namespace: &str) -> Result<JobOutcome>;

    async fn logs(&self, name: &str, namespace: &str) -> Result<String>;
}

/// The kube-rs managers behind [`JobBackend`]
pub struct KubeBackend {
    storage: StorageManager,
    pods: PodManager,
    watcher: PodWatcher,
}

impl KubeBackend {
    pub fn new(client: KubernetesClient, config: &DeployConfig) -> Self {
        Self {
            storage: StorageManager::new(client.clone(), config.storage.clone()),
            pods: PodManager::new(client.clone()),
            watcher: PodWatcher::new(client),
        }
    }
}

#[async_trait]
impl JobBackend for KubeBackend {
    async fn create_persistent_volume(&self, names: &JobNames) -> Result<()> {
        self.storage.create_persistent_volume(names).await?;
        Ok(())
    }

    async fn create_persistent_volume_claim(
        &self,
        names: &JobNames,
        namespace: &str,
    ) -> Result<()> {
        self.storage
            .create_persistent_volume_claim(names, namespace)
            .await?;
        Ok(())
    }

    async fn wait_for_claim_bound(&self, names: &JobNames, namespace: &str) -> Result<()> {
        self.storage.wait_for_claim_bound(names, namespace).await
    }

    async fn create_job_pod(
        &self,
        names: &JobNames,
        request: &JobRequest,
        config: &DeployConfig,
    ) -> Result<()> {
        self.pods.create_job_pod(names, request, config).await?;
        Ok(())
    }

    async fn watch_pod_until_terminal(&self, name: &str, namespace: &str) -> Result<JobOutcome> {
        self.watcher.watch_pod_until_terminal(name, namespace).await
    }

    async fn logs(&self, name: &str, namespace: &str) -> Result<String> {
        self.pods.logs(name, namespace).await
    }
}

/// Drives one job from first API call to terminal pod phase
pub struct JobRunner<B = KubeBackend> {
    config: DeployConfig,
    backend: B,
}

impl JobRunner<KubeBackend> {
    pub fn new(client: KubernetesClient, config: DeployConfig) -> Self {
        let backend = KubeBackend::new(client, &config);
        Self::with_backend(backend, config)
    }
}

impl<B: JobBackend> JobRunner<B> {
    pub fn with_backend(backend: B, config: DeployConfig) -> Self {
        Self { config, backend }
    }

    /// Deploy the job and block until its pod is Succeeded or Failed
    ///
    /// `options.timeout` bounds everything up to the terminal phase, the
    /// claim bind wait included. Fetching logs afterwards is not bounded.
    pub async fn run(&self, request: &JobRequest, options: &RunOptions) -> Result<JobOutcome> {
        let job_id = JobId::generate();
        let names = job_id.names();
        info!("Running a job with job id: {}", job_id);

        let outcome = with_deadline(options.timeout, self.deploy(&names, request)).await?;
        info!("Job {} {}", job_id, outcome);

        if options.show_logs {
            match self.backend.logs(&names.pod, &request.namespace).await {
                Ok(logs) => {
                    info!("Logs of Pod {}:", names.pod);
                    for line in logs.lines() {
                        info!("  {}", line);
                    }
                }
                Err(e) => warn!("Could not fetch logs: {:#}", e),
            }
        }

        if request.persist {
            info!(
                "Results are in {} on volume {}",
                request.persist_path(&self.config.storage.results_dir),
                names.volume
            );
        }

        Ok(outcome)
    }

    async fn deploy(&self, names: &JobNames, request: &JobRequest) -> Result<JobOutcome> {
        if request.persist {
            self.backend.create_persistent_volume(names).await?;
            self.backend
                .create_persistent_volume_claim(names, &request.namespace)
                .await?;
            self.backend
                .wait_for_claim_bound(names, &request.namespace)
                .await?;
        }

        info!("Running the main script:");
        self.backend
            .create_job_pod(names, request, &self.config)
            .await?;

        self.backend
            .watch_pod_until_terminal(&names.pod, &request.namespace)
            .await
    }
}

/// Run `work` to completion, or fail once `limit` has elapsed
pub async fn with_deadline<F, T>(limit: Option<Duration>, work: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, work).await.map_err(|_| {
            anyhow::anyhow!(
                "Timeout after {} seconds waiting for the job to finish",
                limit.as_secs()
            )
        })?,
        None => work.await,
    }
}
