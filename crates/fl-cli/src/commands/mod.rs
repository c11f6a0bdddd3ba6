//! CLI command implementations.

pub mod alerts;
pub mod report;
pub mod util;

use anyhow::{Context, Result};
use fl_client::BackendClient;

use crate::Config;

/// Builds a backend client from the loaded configuration.
pub fn backend_client(config: &Config) -> Result<BackendClient> {
    let client = BackendClient::new(&config.backend_url, config.request_timeout())
        .context("failed to create backend client")?
        .with_api_token(config.api_token.clone());
    Ok(client)
}
