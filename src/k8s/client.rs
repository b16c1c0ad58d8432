/// Kubernetes API client construction
use anyhow::{Context, Result};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::path::Path;
use tracing::{debug, info};

/// kube-rs client bound to the cluster selected from a kubeconfig file
#[derive(Clone)]
pub struct KubernetesClient {
    inner: Client,
    api_server: String,
}

impl KubernetesClient {
    /// Build a client from an explicit kubeconfig path and optional context
    pub async fn from_kubeconfig(path: &Path, context: Option<&str>) -> Result<Self> {
        info!("Reading kubeconfig from {}", path.display());

        let kubeconfig = Kubeconfig::read_from(path)
            .with_context(|| format!("Failed to read kubeconfig {}", path.display()))?;

        let options = KubeConfigOptions {
            context: context.map(String::from),
            ..Default::default()
        };

        let config = Config::from_custom_kubeconfig(kubeconfig, &options)
            .await
            .context("Failed to build Kubernetes client configuration")?;

        let api_server = config.cluster_url.to_string();
        debug!("Using API server {}", api_server);

        let inner = Client::try_from(config).context("Failed to create Kubernetes client")?;

        Ok(Self { inner, api_server })
    }

    /// The underlying kube-rs client
    pub fn inner(&self) -> &Client {
        &self.inner
    }

    pub fn api_server(&self) -> &str {
        &self.api_server
    }
}

impl std::fmt::Debug for KubernetesClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubernetesClient")
            .field("api_server", &self.api_server)
            .finish()
    }
}
