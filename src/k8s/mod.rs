/// Kubernetes API operations for job runs
pub mod client;
pub mod pods;
pub mod storage;
pub mod watch;

pub use client::KubernetesClient;
pub use pods::PodManager;
pub use storage::StorageManager;
pub use watch::PodWatcher;
