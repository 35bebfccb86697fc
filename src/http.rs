use std::time::Duration;

use reqwest::Client;

use crate::config::Config;
use crate::error::Result;

/// Builds the client shared by feed fetches, downloads and size probes.
///
/// Both timeouts are always set so a stalled server can never hang a job forever.
pub fn build_client(config: &Config) -> Result<Client> {
    let client = Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs.max(1)))
        .user_agent(config.user_agent.clone())
        .build()?;
    Ok(client)
}
