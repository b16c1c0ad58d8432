/// Blocking watch on a single pod until it finishes
use anyhow::{Context, Result};
use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::api::Api;
use kube::runtime::watcher::{self, Event};
use tracing::{debug, info};

use super::client::KubernetesClient;
use super::pods::PodPhase;
use crate::job::JobOutcome;

/// Follows one pod's status stream
pub struct PodWatcher {
    client: KubernetesClient,
}

impl PodWatcher {
    pub fn new(client: KubernetesClient) -> Self {
        Self { client }
    }

    /// Wait for the pod to reach Succeeded or Failed
    pub async fn watch_pod_until_terminal(&self, name: &str, namespace: &str) -> Result<JobOutcome> {
        let pods: Api<Pod> = Api::namespaced(self.client.inner().clone(), namespace);
        let config = watcher::Config::default().fields(&format!("metadata.name={}", name));

        info!("Watching Pod {} until it completes...", name);
        wait_for_terminal(watcher::watcher(pods, config), name).await
    }
}

/// Outcome for a pod in a terminal phase, `None` while it is still going
pub fn pod_outcome(pod: &Pod) -> Option<JobOutcome> {
    match PodPhase::from_pod(pod) {
        PodPhase::Succeeded => Some(JobOutcome::Succeeded),
        PodPhase::Failed => Some(JobOutcome::Failed),
        _ => None,
    }
}

/// Consume watch events until the pod is terminal
///
/// Deletion of the pod, a watcher error or the end of the stream are errors.
pub async fn wait_for_terminal<S>(events: S, name: &str) -> Result<JobOutcome>
where
    S: Stream<Item = std::result::Result<Event<Pod>, watcher::Error>>,
{
    futures::pin_mut!(events);
    let mut last_phase = None;

    while let Some(event) = events.next().await {
        let event = event.with_context(|| format!("Error watching Pod {}", name))?;

        match event {
            Event::Apply(pod) | Event::InitApply(pod) => {
                let phase = PodPhase::from_pod(&pod);
                if last_phase != Some(phase) {
                    info!("Pod {} is {}", name, phase);
                    last_phase = Some(phase);
                }
                if let Some(outcome) = pod_outcome(&pod) {
                    return Ok(outcome);
                }
            }
            Event::Delete(_) => {
                anyhow::bail!("Pod {} was deleted before it completed", name);
            }
            Event::Init | Event::InitDone => {
                debug!("Watch on Pod {} (re)started", name);
            }
        }
    }

    anyhow::bail!("Pod watcher stream for {} closed unexpectedly", name)
}
