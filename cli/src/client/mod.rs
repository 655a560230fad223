//! HTTP client construction for provider requests.

pub mod middleware;

use std::time::Duration;

use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};

use crate::client::middleware::RequestLogMiddleware;
use crate::config::HttpConfig;
use crate::error::Result;

/// Builds the shared HTTP client used for every provider call.
///
/// # Errors
///
/// Returns an error if the underlying TLS backend cannot be initialized.
pub fn build_http_client(config: &HttpConfig) -> Result<ClientWithMiddleware> {
    let inner = Client::builder()
        .user_agent(config.user_agent.as_str())
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    Ok(ClientBuilder::new(inner).with(RequestLogMiddleware).build())
}
