use std::time::Duration;

use tracing::trace;

use crate::error::DaemonError;

/// HTTP health check against `GET /ping` on localhost.
#[derive(Debug, Clone)]
pub struct Probe {
    client: reqwest::Client,
}

impl Probe {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

    pub fn new(timeout: Duration) -> Result<Self, DaemonError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()?;
        Ok(Self { client })
    }

    /// `true` when the daemon on `port` answers `/ping` with a success status.
    pub async fn ping(&self, port: u16) -> bool {
        let url = format!("http://127.0.0.1:{port}/ping");
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                trace!(port, error = %e, "ping failed");
                false
            }
        }
    }
}
