/// Deployment defaults for tgjob runs
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Settings shared by every job launched from this machine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Container image running the message management script
    #[serde(default = "default_image")]
    pub image: String,

    /// Namespace for the job pod and its claim
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Container entrypoint
    #[serde(default = "default_command")]
    pub command: Vec<String>,

    /// Persistent storage used by `--persist` runs
    #[serde(default)]
    pub storage: StorageConfig,

    /// Pod watch settings
    #[serde(default)]
    pub watch: WatchConfig,
}

/// Persistent volume and claim settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage class shared by the volume and its claim
    #[serde(default = "default_storage_class")]
    pub storage_class: String,

    /// Volume capacity and claim request (e.g., "100Mi")
    #[serde(default = "default_capacity")]
    pub capacity: String,

    /// Node directory backing the volume
    #[serde(default = "default_host_path")]
    pub host_path: String,

    /// Where the claim is mounted inside the container
    #[serde(default = "default_mount_path")]
    pub mount_path: String,

    /// Results directory as seen from the script's working directory
    #[serde(default = "default_results_dir")]
    pub results_dir: String,

    /// Reclaim policy for the volume (Retain, Recycle or Delete)
    #[serde(default = "default_reclaim_policy")]
    pub reclaim_policy: String,

    /// Seconds to wait for the claim to bind, 0 skips the wait
    #[serde(default = "default_bind_timeout")]
    pub bind_timeout_secs: u64,
}

/// Pod watch configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Limit in seconds on the whole run up to the terminal phase, 0 waits forever
    #[serde(default)]
    pub timeout_secs: u64,
}

const RECLAIM_POLICIES: &[&str] = &["Retain", "Recycle", "Delete"];

fn default_image() -> String {
    "you2ku/python-tg-script:latest".to_string()
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_command() -> Vec<String> {
    vec!["python".to_string(), "-m".to_string(), "manage".to_string()]
}

fn default_storage_class() -> String {
    "standard".to_string()
}

fn default_capacity() -> String {
    "100Mi".to_string()
}

fn default_host_path() -> String {
    "/tmp".to_string()
}

fn default_mount_path() -> String {
    "/usr/results".to_string()
}

fn default_results_dir() -> String {
    "./results".to_string()
}

fn default_reclaim_policy() -> String {
    "Recycle".to_string()
}

fn default_bind_timeout() -> u64 {
    60
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_class: default_storage_class(),
            capacity: default_capacity(),
            host_path: default_host_path(),
            mount_path: default_mount_path(),
            results_dir: default_results_dir(),
            reclaim_policy: default_reclaim_policy(),
            bind_timeout_secs: default_bind_timeout(),
        }
    }
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            namespace: default_namespace(),
            command: default_command(),
            storage: StorageConfig::default(),
            watch: WatchConfig::default(),
        }
    }
}

impl DeployConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DeployConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file, falling back to defaults when it does not exist
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.image.trim().is_empty() {
            anyhow::bail!("image cannot be empty");
        }

        if self.namespace.trim().is_empty() {
            anyhow::bail!("namespace cannot be empty");
        }

        if self.command.is_empty() {
            anyhow::bail!("command must have at least one element");
        }

        if self.storage.capacity.trim().is_empty() {
            anyhow::bail!("storage.capacity cannot be empty");
        }

        if !self.storage.mount_path.starts_with('/') {
            anyhow::bail!(
                "storage.mount_path must be absolute: {}",
                self.storage.mount_path
            );
        }

        if !RECLAIM_POLICIES.contains(&self.storage.reclaim_policy.as_str()) {
            anyhow::bail!(
                "Invalid storage.reclaim_policy: {} (expected one of {})",
                self.storage.reclaim_policy,
                RECLAIM_POLICIES.join(", ")
            );
        }

        Ok(())
    }

    /// Generate an example configuration file
    pub fn example() -> Self {
        Self {
            watch: WatchConfig { timeout_secs: 3600 },
            ..Self::default()
        }
    }
}
