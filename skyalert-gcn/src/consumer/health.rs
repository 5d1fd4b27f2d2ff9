//! Health probe gating each poll cycle

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

use crate::error::{GcnError, GcnResult};

#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn is_healthy(&self) -> bool;
}

/// GET against a fixed URL; only a 200 counts as healthy
pub struct HttpHealthProbe {
    http_client: reqwest::Client,
    url: String,
}

impl HttpHealthProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> GcnResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GcnError::Config(format!("health probe client: {}", e)))?;

        Ok(Self {
            http_client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl HealthCheck for HttpHealthProbe {
    async fn is_healthy(&self) -> bool {
        match self.http_client.get(&self.url).send().await {
            Ok(response) if response.status() == StatusCode::OK => true,
            Ok(response) => {
                debug!(url = %self.url, status = %response.status(), "Health probe returned non-200");
                false
            }
            Err(e) => {
                debug!(url = %self.url, error = %e, "Health probe request failed");
                false
            }
        }
    }
}
