//! Authenticated external-connection API client.
//!
//! Commands go to `{domain}/external-connection/api/{simulation}/{device}/{suffix}/`
//! with a fresh `transaction_id` injected into the body. Non-2xx answers
//! are logged and reported as `None` / `false`, matching the server's
//! fire-and-forget style.

use std::time::Duration;

use gridlink_core::{DeviceId, TransactionId};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error};

use crate::auth::{retrieve_jwt_token, Credentials, TokenRefresher, TokenStore};
use crate::error::{RestError, RestResult};

/// Default timeout for API requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestConfig {
    /// Scheme and host, e.g. `https://d3aweb.example.com`.
    pub domain: String,
    pub simulation_id: String,
    pub device_id: DeviceId,
    /// Server-side JWT lifetime.
    #[serde(default = "default_token_expiry_secs")]
    pub token_expiry_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_token_expiry_secs() -> u64 {
    48 * 3600
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

impl RestConfig {
    pub fn new(
        domain: impl Into<String>,
        simulation_id: impl Into<String>,
        device_id: impl Into<DeviceId>,
    ) -> Self {
        Self {
            domain: domain.into().trim_end_matches('/').to_string(),
            simulation_id: simulation_id.into(),
            device_id: device_id.into(),
            token_expiry_secs: default_token_expiry_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }

    /// `{domain}/external-connection/api/{simulation}/{device}`
    pub fn url_prefix(&self) -> String {
        format!(
            "{}/external-connection/api/{}/{}",
            self.domain, self.simulation_id, self.device_id
        )
    }

    pub fn endpoint(&self, suffix: &str) -> String {
        format!("{}/{}/", self.url_prefix(), suffix.trim_matches('/'))
    }

    pub fn token_expiry(&self) -> Duration {
        Duration::from_secs(self.token_expiry_secs)
    }
}

/// `{domain}/external-connection/aggregator-api/{simulation}/`
pub fn aggregator_prefix(domain: &str, simulation_id: &str) -> String {
    format!(
        "{}/external-connection/aggregator-api/{simulation_id}/",
        domain.trim_end_matches('/')
    )
}

pub(crate) fn http_client(timeout: Duration) -> RestResult<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| RestError::HttpClient(format!("Failed to create HTTP client: {e}")))
}

/// Device-scoped REST client with automatic token refresh.
pub struct RestClient {
    config: RestConfig,
    client: Client,
    token: TokenStore,
    refresher: TokenRefresher,
}

impl RestClient {
    /// Authenticate and start the refresher. Must run inside a Tokio runtime.
    pub async fn connect(config: RestConfig, credentials: Credentials) -> RestResult<Self> {
        let client = http_client(Duration::from_secs(config.request_timeout_secs))?;
        let token = TokenStore::new(retrieve_jwt_token(&client, &config.domain, &credentials).await?);
        let refresher = TokenRefresher::spawn(
            client.clone(),
            config.domain.clone(),
            credentials,
            token.clone(),
            config.token_expiry(),
        );
        debug!(prefix = %config.url_prefix(), "REST client authenticated");

        Ok(Self {
            config,
            client,
            token,
            refresher,
        })
    }

    /// POST a command. Returns the injected transaction id and the parsed
    /// body on 2xx, `None` otherwise.
    pub async fn post(
        &self,
        suffix: &str,
        data: Map<String, Value>,
    ) -> RestResult<(TransactionId, Option<Value>)> {
        let endpoint = self.config.endpoint(suffix);
        let (transaction_id, body) = with_transaction_id(data);
        debug!(%endpoint, %transaction_id, "Sending command");

        let response = self.authorized(self.client.post(&endpoint)).json(&body).send().await?;
        let Some(response) = check_status(&endpoint, response).await else {
            return Ok((transaction_id, None));
        };
        let text = response.text().await?;
        let parsed = serde_json::from_str(&text)?;
        debug!(%endpoint, %transaction_id, response = %text, "Command responded");
        Ok((transaction_id, Some(parsed)))
    }

    /// GET a command. Returns the injected transaction id and whether the
    /// server answered 2xx.
    pub async fn get(
        &self,
        suffix: &str,
        data: Map<String, Value>,
    ) -> RestResult<(TransactionId, bool)> {
        let endpoint = self.config.endpoint(suffix);
        let (transaction_id, body) = with_transaction_id(data);
        debug!(%endpoint, %transaction_id, "Sending query");

        let response = self.authorized(self.client.get(&endpoint)).json(&body).send().await?;
        let ok = check_status(&endpoint, response).await.is_some();
        Ok((transaction_id, ok))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(reqwest::header::AUTHORIZATION, self.token.header_value())
    }

    pub fn config(&self) -> &RestConfig {
        &self.config
    }

    pub fn token(&self) -> &TokenStore {
        &self.token
    }

    /// Stop the token refresher.
    pub fn shutdown(&self) {
        self.refresher.stop();
    }
}

fn with_transaction_id(mut data: Map<String, Value>) -> (TransactionId, Map<String, Value>) {
    let transaction_id = TransactionId::new();
    data.insert(
        "transaction_id".to_string(),
        Value::String(transaction_id.as_str().to_string()),
    );
    (transaction_id, data)
}

/// Pass 2xx responses through; log and swallow the rest.
async fn check_status(endpoint: &str, response: Response) -> Option<Response> {
    let status = response.status();
    if status.is_success() {
        return Some(response);
    }
    let body = response.text().await.unwrap_or_default();
    error!(%endpoint, status = status.as_u16(), %body, "Request failed");
    None
}
