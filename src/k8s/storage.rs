/// Result storage: a PersistentVolume plus the claim the job pod mounts
use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::{
    HostPathVolumeSource, PersistentVolume, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeSpec, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, PostParams};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;

use super::client::KubernetesClient;
use crate::config::StorageConfig;
use crate::job::JobNames;
use crate::utils::polling::PollingConfig;

const ACCESS_MODE: &str = "ReadWriteOnce";
const BIND_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Creates the storage objects of a persisted run
pub struct StorageManager {
    client: KubernetesClient,
    config: StorageConfig,
}

impl StorageManager {
    pub fn new(client: KubernetesClient, config: StorageConfig) -> Self {
        Self { client, config }
    }

    /// Create the cluster-scoped volume for a job
    pub async fn create_persistent_volume(&self, names: &JobNames) -> Result<PersistentVolume> {
        let volumes: Api<PersistentVolume> = Api::all(self.client.inner().clone());
        let volume = Self::build_persistent_volume(names, &self.config);

        let created = volumes
            .create(&PostParams::default(), &volume)
            .await
            .with_context(|| format!("Failed to create PersistentVolume {}", names.volume))?;

        info!("Created Persistent Volume: {}", names.volume);
        Ok(created)
    }

    /// Create the claim for a job's volume in `namespace`
    pub async fn create_persistent_volume_claim(
        &self,
        names: &JobNames,
        namespace: &str,
    ) -> Result<PersistentVolumeClaim> {
        let claims: Api<PersistentVolumeClaim> =
            Api::namespaced(self.client.inner().clone(), namespace);
        let claim = Self::build_persistent_volume_claim(names, namespace, &self.config);

        let created = claims
            .create(&PostParams::default(), &claim)
            .await
            .with_context(|| format!("Failed to create PersistentVolumeClaim {}", names.claim))?;

        info!("PersistentVolumeClaim {} created successfully", names.claim);
        Ok(created)
    }

    /// Wait until the claim reports phase `Bound`
    pub async fn wait_for_claim_bound(&self, names: &JobNames, namespace: &str) -> Result<()> {
        if self.config.bind_timeout_secs == 0 {
            return Ok(());
        }

        let claims: Api<PersistentVolumeClaim> =
            Api::namespaced(self.client.inner().clone(), namespace);
        let polling = PollingConfig::new(
            Duration::from_secs(self.config.bind_timeout_secs),
            BIND_POLL_INTERVAL,
            format!("Waiting for claim {} to bind", names.claim),
        );

        let claims = &claims;
        polling
            .poll_until(move || async move {
                let claim = claims
                    .get(&names.claim)
                    .await
                    .with_context(|| format!("Failed to read claim {}", names.claim))?;
                Ok::<_, anyhow::Error>(claim_phase(&claim) == Some("Bound"))
            })
            .await
    }

    /// Volume manifest: hostPath backed, single writer
    pub fn build_persistent_volume(names: &JobNames, config: &StorageConfig) -> PersistentVolume {
        let mut capacity = BTreeMap::new();
        capacity.insert("storage".to_string(), Quantity(config.capacity.clone()));

        PersistentVolume {
            metadata: ObjectMeta {
                name: Some(names.volume.clone()),
                labels: Some(job_labels(names)),
                ..Default::default()
            },
            spec: Some(PersistentVolumeSpec {
                storage_class_name: Some(config.storage_class.clone()),
                capacity: Some(capacity),
                access_modes: Some(vec![ACCESS_MODE.to_string()]),
                persistent_volume_reclaim_policy: Some(config.reclaim_policy.clone()),
                host_path: Some(HostPathVolumeSource {
                    path: config.host_path.clone(),
                    type_: None,
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Claim manifest, pre-bound to the job's volume
    pub fn build_persistent_volume_claim(
        names: &JobNames,
        namespace: &str,
        config: &StorageConfig,
    ) -> PersistentVolumeClaim {
        let mut requests = BTreeMap::new();
        requests.insert("storage".to_string(), Quantity(config.capacity.clone()));

        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(names.claim.clone()),
                namespace: Some(namespace.to_string()),
                labels: Some(job_labels(names)),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec![ACCESS_MODE.to_string()]),
                storage_class_name: Some(config.storage_class.clone()),
                volume_name: Some(names.volume.clone()),
                resources: Some(VolumeResourceRequirements {
                    requests: Some(requests),
                    limits: None,
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

/// Label tying every object of a run back to its pod name
pub(crate) fn job_labels(names: &JobNames) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app.kubernetes.io/name".to_string(), "tgjob".to_string());
    labels.insert("tgjob/pod".to_string(), names.pod.clone());
    labels
}

fn claim_phase(claim: &PersistentVolumeClaim) -> Option<&str> {
    claim.status.as_ref()?.phase.as_deref()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobId;
    use k8s_openapi::api::core::v1::PersistentVolumeClaimStatus;

    fn names() -> JobNames {
        JobId::parse("abc-123").unwrap().names()
    }

    #[test]
    fn test_persistent_volume_manifest() {
        let pv = StorageManager::build_persistent_volume(&names(), &StorageConfig::default());
        assert_eq!(pv.metadata.name.as_deref(), Some("tgjobvolume-abc-123"));
        assert!(pv.metadata.namespace.is_none());

        let spec = pv.spec.unwrap();
        assert_eq!(spec.storage_class_name.as_deref(), Some("standard"));
        assert_eq!(
            spec.capacity.unwrap().get("storage"),
            Some(&Quantity("100Mi".to_string()))
        );
        assert_eq!(spec.access_modes, Some(vec!["ReadWriteOnce".to_string()]));
        assert_eq!(
            spec.persistent_volume_reclaim_policy.as_deref(),
            Some("Recycle")
        );
        assert_eq!(spec.host_path.unwrap().path, "/tmp");
    }

    #[test]
    fn test_claim_manifest_binds_to_volume() {
        let config = StorageConfig {
            capacity: "1Gi".to_string(),
            ..StorageConfig::default()
        };
        let pvc = StorageManager::build_persistent_volume_claim(&names(), "telegram", &config);
        assert_eq!(pvc.metadata.name.as_deref(), Some("tgjobvolumeclaim-abc-123"));
        assert_eq!(pvc.metadata.namespace.as_deref(), Some("telegram"));

        let spec = pvc.spec.unwrap();
        assert_eq!(spec.volume_name.as_deref(), Some("tgjobvolume-abc-123"));
        assert_eq!(spec.storage_class_name.as_deref(), Some("standard"));
        assert_eq!(spec.access_modes, Some(vec!["ReadWriteOnce".to_string()]));
        let requests = spec.resources.unwrap().requests.unwrap();
        assert_eq!(requests.get("storage"), Some(&Quantity("1Gi".to_string())));
    }

    #[test]
    fn test_labels_reference_pod() {
        let labels = job_labels(&names());
        assert_eq!(labels.get("tgjob/pod").map(String::as_str), Some("tgjob-abc-123"));
    }

    #[test]
    fn test_claim_phase() {
        let mut claim = PersistentVolumeClaim::default();
        assert_eq!(claim_phase(&claim), None);

        claim.status = Some(PersistentVolumeClaimStatus {
            phase: Some("Bound".to_string()),
            ..Default::default()
        });
        assert_eq!(claim_phase(&claim), Some("Bound"));
    }
}
