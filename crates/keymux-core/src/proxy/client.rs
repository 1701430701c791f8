//! Shared upstream HTTP client.

use std::time::Duration;

use reqwest::Client;

/// Per-call timeouts for the auxiliary operations. The long default
/// timeout on the shared client covers the streaming proxy path.
pub const MODEL_LIST_TIMEOUT: Duration = Duration::from_secs(15);
pub const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(20);
pub const VALIDATE_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the single connection-pooled client used for all upstream
/// traffic. Tuned for high concurrency against one upstream host.
pub fn build_upstream_client() -> Result<Client, reqwest::Error> {
    Client::builder()
        .pool_max_idle_per_host(50)
        .pool_idle_timeout(Duration::from_secs(120))
        .connect_timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(30))
        .timeout(Duration::from_secs(300))
        .build()
}
