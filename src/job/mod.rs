/// Job identity, inputs and the deploy sequence
pub mod request;
pub mod runner;

pub use request::{JobRequest, MessageIds};
pub use runner::{JobRunner, RunOptions};

use std::fmt;
use uuid::Uuid;

const POD_PREFIX: &str = "tgjob";
const VOLUME_PREFIX: &str = "tgjobvolume";
const CLAIM_PREFIX: &str = "tgjobvolumeclaim";

/// Identifier shared by every resource of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobId(String);

impl JobId {
    /// Generate a fresh random id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Use an id from an earlier run (e.g. for `status`)
    pub fn parse(id: &str) -> anyhow::Result<Self> {
        let id = id.trim();
        if id.is_empty() {
            anyhow::bail!("job id cannot be empty");
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            anyhow::bail!(
                "Invalid job id '{}': only lowercase letters, digits and '-' are allowed",
                id
            );
        }
        Ok(Self(id.to_string()))
    }

    /// Resource names derived from this id
    pub fn names(&self) -> JobNames {
        JobNames {
            pod: format!("{}-{}", POD_PREFIX, self.0),
            volume: format!("{}-{}", VOLUME_PREFIX, self.0),
            claim: format!("{}-{}", CLAIM_PREFIX, self.0),
        }
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Names of the Kubernetes objects created for a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobNames {
    /// Pod and its single container
    pub pod: String,
    /// PersistentVolume, also used as the pod volume name
    pub volume: String,
    /// PersistentVolumeClaim
    pub claim: String,
}

/// Terminal result of a job pod
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed,
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Succeeded => write!(f, "succeeded"),
            JobOutcome::Failed => write!(f, "failed"),
        }
    }
}
