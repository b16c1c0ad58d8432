/// Job pod creation and inspection
use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::{
    Container, PersistentVolumeClaimVolumeSource, Pod, PodSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, LogParams, PostParams};
use serde::Serialize;
use tracing::{debug, info};

use super::client::KubernetesClient;
use super::storage::job_labels;
use crate::config::DeployConfig;
use crate::job::{JobNames, JobRequest};

/// Pod lifecycle phase as reported in `status.phase`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    pub fn from_pod(pod: &Pod) -> Self {
        match pod.status.as_ref().and_then(|s| s.phase.as_deref()) {
            Some("Pending") => PodPhase::Pending,
            Some("Running") => PodPhase::Running,
            Some("Succeeded") => PodPhase::Succeeded,
            Some("Failed") => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PodPhase::Succeeded | PodPhase::Failed)
    }
}

impl std::fmt::Display for PodPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let phase = match self {
            PodPhase::Pending => "Pending",
            PodPhase::Running => "Running",
            PodPhase::Succeeded => "Succeeded",
            PodPhase::Failed => "Failed",
            PodPhase::Unknown => "Unknown",
        };
        f.write_str(phase)
    }
}

/// Snapshot of a job pod for `tgjob status`
#[derive(Debug, Clone, Serialize)]
pub struct PodSummary {
    pub name: String,
    pub namespace: String,
    pub phase: PodPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PodSummary {
    fn from_pod(pod: &Pod, namespace: &str) -> Self {
        let status = pod.status.as_ref();
        Self {
            name: pod.metadata.name.clone().unwrap_or_default(),
            namespace: pod
                .metadata
                .namespace
                .clone()
                .unwrap_or_else(|| namespace.to_string()),
            phase: PodPhase::from_pod(pod),
            node: pod.spec.as_ref().and_then(|s| s.node_name.clone()),
            started_at: status
                .and_then(|s| s.start_time.as_ref())
                .map(|t| t.0.to_rfc3339()),
            reason: status.and_then(|s| s.reason.clone()),
        }
    }
}

/// Creates and reads the single pod of a job
pub struct PodManager {
    client: KubernetesClient,
}

impl PodManager {
    pub fn new(client: KubernetesClient) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.inner().clone(), namespace)
    }

    /// Create the job pod, mounting the claim when the run is persisted
    pub async fn create_job_pod(
        &self,
        names: &JobNames,
        request: &JobRequest,
        config: &DeployConfig,
    ) -> Result<Pod> {
        let pod = Self::build_job_pod(names, request, config);
        debug!("Pod manifest for {} built", names.pod);

        let created = self
            .api(&request.namespace)
            .create(&PostParams::default(), &pod)
            .await
            .with_context(|| format!("Failed to create Pod {}", names.pod))?;

        info!(
            "Created Pod {} in namespace {}",
            names.pod, request.namespace
        );
        Ok(created)
    }

    /// Current state of a pod
    pub async fn get_summary(&self, name: &str, namespace: &str) -> Result<PodSummary> {
        let pod = self
            .api(namespace)
            .get(name)
            .await
            .with_context(|| format!("Failed to get Pod {} in namespace {}", name, namespace))?;
        Ok(PodSummary::from_pod(&pod, namespace))
    }

    /// Full log of the job container
    pub async fn logs(&self, name: &str, namespace: &str) -> Result<String> {
        let params = LogParams {
            container: Some(name.to_string()),
            ..LogParams::default()
        };
        self.api(namespace)
            .logs(name, &params)
            .await
            .with_context(|| format!("Failed to fetch logs of Pod {}", name))
    }

    /// Pod manifest: one never-restarted container running the script
    pub fn build_job_pod(names: &JobNames, request: &JobRequest, config: &DeployConfig) -> Pod {
        let persist_path = request
            .persist
            .then(|| request.persist_path(&config.storage.results_dir));

        let mut container = Container {
            name: names.pod.clone(),
            image: Some(request.image.clone()),
            command: Some(config.command.clone()),
            env: Some(request.env(persist_path.as_deref())),
            ..Default::default()
        };

        let volumes = if request.persist {
            container.volume_mounts = Some(vec![VolumeMount {
                name: names.volume.clone(),
                mount_path: config.storage.mount_path.clone(),
                ..Default::default()
            }]);

            Some(vec![Volume {
                name: names.volume.clone(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: names.claim.clone(),
                    read_only: None,
                }),
                ..Default::default()
            }])
        } else {
            None
        };

        Pod {
            metadata: ObjectMeta {
                name: Some(names.pod.clone()),
                namespace: Some(request.namespace.clone()),
                labels: Some(job_labels(names)),
                ..Default::default()
            },
            spec: Some(PodSpec {
                restart_policy: Some("Never".to_string()),
                containers: vec![container],
                volumes,
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobId, MessageIds};
    use k8s_openapi::api::core::v1::PodStatus;

    fn request(persist: bool) -> JobRequest {
        JobRequest {
            api_id: 42,
            api_hash: "hash".to_string(),
            session: "session".to_string(),
            persist,
            remove_all: true,
            results_filename: "out.csv".to_string(),
            message_ids: MessageIds::default(),
            chat_id: 0,
            image: "registry.local/tg:1".to_string(),
            namespace: "jobs".to_string(),
        }
    }

    fn names() -> JobNames {
        JobId::parse("f00d").unwrap().names()
    }

    fn pod_in_phase(phase: Option<&str>) -> Pod {
        Pod {
            status: Some(PodStatus {
                phase: phase.map(String::from),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_ephemeral_pod_has_no_volumes() {
        let pod = PodManager::build_job_pod(&names(), &request(false), &DeployConfig::default());
        assert_eq!(pod.metadata.name.as_deref(), Some("tgjob-f00d"));
        assert_eq!(pod.metadata.namespace.as_deref(), Some("jobs"));

        let spec = pod.spec.unwrap();
        assert_eq!(spec.restart_policy.as_deref(), Some("Never"));
        assert!(spec.volumes.is_none());

        let container = &spec.containers[0];
        assert_eq!(container.name, "tgjob-f00d");
        assert_eq!(container.image.as_deref(), Some("registry.local/tg:1"));
        assert_eq!(
            container.command,
            Some(vec![
                "python".to_string(),
                "-m".to_string(),
                "manage".to_string()
            ])
        );
        assert!(container.volume_mounts.is_none());
        let env = container.env.as_ref().unwrap();
        assert!(!env.iter().any(|e| e.name == "TG_MANAGE_PERSIST_PATH"));
    }

    #[test]
    fn test_persisted_pod_mounts_claim() {
        let pod = PodManager::build_job_pod(&names(), &request(true), &DeployConfig::default());
        let spec = pod.spec.unwrap();

        let volumes = spec.volumes.unwrap();
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].name, "tgjobvolume-f00d");
        assert_eq!(
            volumes[0]
                .persistent_volume_claim
                .as_ref()
                .map(|c| c.claim_name.as_str()),
            Some("tgjobvolumeclaim-f00d")
        );

        let container = &spec.containers[0];
        let mounts = container.volume_mounts.as_ref().unwrap();
        assert_eq!(mounts[0].name, "tgjobvolume-f00d");
        assert_eq!(mounts[0].mount_path, "/usr/results");

        let persist = container
            .env
            .as_ref()
            .unwrap()
            .iter()
            .find(|e| e.name == "TG_MANAGE_PERSIST_PATH")
            .and_then(|e| e.value.clone());
        assert_eq!(persist.as_deref(), Some("./results/out.csv"));
    }

    #[test]
    fn test_phase_parsing() {
        assert_eq!(PodPhase::from_pod(&Pod::default()), PodPhase::Unknown);
        assert_eq!(
            PodPhase::from_pod(&pod_in_phase(Some("Pending"))),
            PodPhase::Pending
        );
        assert_eq!(
            PodPhase::from_pod(&pod_in_phase(Some("Succeeded"))),
            PodPhase::Succeeded
        );
        assert!(PodPhase::Failed.is_terminal());
        assert!(!PodPhase::Running.is_terminal());
    }

    #[test]
    fn test_summary_serializes_phase() {
        let mut pod = pod_in_phase(Some("Failed"));
        pod.metadata.name = Some("tgjob-f00d".to_string());
        let summary = PodSummary::from_pod(&pod, "jobs");
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["phase"], "Failed");
        assert_eq!(json["namespace"], "jobs");
        assert!(json.get("node").is_none());
    }
}
