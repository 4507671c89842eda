//! Read endpoints of the trading engine.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use freqdash_core::models::{Balance, BotStatus, Envelope, EnvelopeStatus, Profit, Trade, TradeList};
use freqdash_core::{Endpoint, SyncError};
use freqdash_settings::ApiSettings;

/// The four read calls the aggregator issues.
#[async_trait]
pub trait EngineApi: Send + Sync {
    async fn status(&self) -> Result<BotStatus, SyncError>;
    async fn balance(&self) -> Result<Balance, SyncError>;
    async fn profit(&self) -> Result<Profit, SyncError>;
    async fn trades(&self) -> Result<Vec<Trade>, SyncError>;
}

/// `reqwest` client for `<base_url><prefix>/{status,balance,profit,trades}`.
pub struct HttpEngineApi {
    client: reqwest::Client,
    base: String,
    username: Option<String>,
    password: Option<SecretString>,
}

impl HttpEngineApi {
    pub fn new(settings: &ApiSettings) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()
            .map_err(|e| SyncError::Network(e.to_string()))?;

        let prefix = settings.prefix.trim_matches('/');
        let root = settings.base_url.trim_end_matches('/');
        let base = if prefix.is_empty() {
            root.to_string()
        } else {
            format!("{root}/{prefix}")
        };

        Ok(Self {
            client,
            base,
            username: settings.username.clone(),
            password: settings.password.clone().map(SecretString::from),
        })
    }

    pub fn endpoint_url(&self, endpoint: Endpoint) -> String {
        format!("{}/{}", self.base, endpoint.as_str())
    }

    async fn fetch<T: DeserializeOwned>(&self, endpoint: Endpoint) -> Result<T, SyncError> {
        let url = self.endpoint_url(endpoint);
        let mut request = self.client.get(&url);
        if let Some(username) = &self.username {
            request = request.basic_auth(username, self.password.as_ref().map(|p| p.expose_secret()));
        }

        let response = request
            .send()
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(endpoint = %endpoint, status = status.as_u16(), "engine returned error status");
            return Err(SyncError::from_status(status.as_u16(), body));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;
        let envelope: Envelope<T> =
            serde_json::from_slice(&body).map_err(|e| SyncError::MalformedBody(format!("{endpoint}: {e}")))?;

        match envelope.status {
            EnvelopeStatus::Error => Err(SyncError::Upstream(
                envelope
                    .message
                    .unwrap_or_else(|| format!("{endpoint} request failed")),
            )),
            EnvelopeStatus::Success => {
                debug!(endpoint = %endpoint, bytes = body.len(), "endpoint fetched");
                envelope
                    .data
                    .ok_or_else(|| SyncError::MalformedBody(format!("{endpoint}: response has no data")))
            }
        }
    }
}

#[async_trait]
impl EngineApi for HttpEngineApi {
    async fn status(&self) -> Result<BotStatus, SyncError> {
        self.fetch(Endpoint::Status).await
    }

    async fn balance(&self) -> Result<Balance, SyncError> {
        self.fetch(Endpoint::Balance).await
    }

    async fn profit(&self) -> Result<Profit, SyncError> {
        self.fetch(Endpoint::Profit).await
    }

    async fn trades(&self) -> Result<Vec<Trade>, SyncError> {
        self.fetch::<TradeList>(Endpoint::Trades).await.map(Vec::from)
    }
}
