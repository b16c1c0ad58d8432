/// Bounded polling for cluster state that cannot be watched cheaply
use anyhow::Result;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Timeout, interval and label of a polling loop
pub struct PollingConfig {
    pub timeout: Duration,
    pub interval: Duration,
    pub description: String,
}

impl PollingConfig {
    pub fn new(timeout: Duration, interval: Duration, description: impl Into<String>) -> Self {
        Self {
            timeout,
            interval,
            description: description.into(),
        }
    }

    /// Poll until the check yields a value or the timeout elapses
    ///
    /// The check returns:
    /// - Ok(Some(T)) when done
    /// - Ok(None) to try again after `interval`
    /// - Err(e) to abort immediately
    pub async fn poll<F, Fut, T>(&self, check: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        info!("{}...", self.description);

        let start = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            if let Some(value) = check().await? {
                info!("✓ {}", self.description);
                return Ok(value);
            }
            debug!("{}: attempt {} not done yet", self.description, attempts);

            if start.elapsed() >= self.timeout {
                anyhow::bail!(
                    "Timeout after {} seconds: {}",
                    self.timeout.as_secs(),
                    self.description
                );
            }

            tokio::time::sleep(self.interval).await;
        }
    }

    /// Poll a boolean check until it returns true
    pub async fn poll_until<F, Fut>(&self, check: F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        let check = &check;
        self.poll(move || async move { Ok::<_, anyhow::Error>(check().await?.then_some(())) })
            .await
    }
}
