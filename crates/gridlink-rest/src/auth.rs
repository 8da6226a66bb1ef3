//! JWT acquisition and refresh.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{RestError, RestResult};

pub const USERNAME_ENV: &str = "API_CLIENT_USERNAME";
pub const PASSWORD_ENV: &str = "API_CLIENT_PASSWORD";

/// Tokens are refreshed this long before they expire.
pub const REFRESH_MARGIN: Duration = Duration::from_secs(30);

/// API user credentials.
#[derive(Clone, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Read `API_CLIENT_USERNAME` / `API_CLIENT_PASSWORD`.
    pub fn from_env() -> RestResult<Self> {
        let username =
            std::env::var(USERNAME_ENV).map_err(|_| RestError::MissingCredentials(USERNAME_ENV))?;
        let password =
            std::env::var(PASSWORD_ENV).map_err(|_| RestError::MissingCredentials(PASSWORD_ENV))?;
        Ok(Self { username, password })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

/// `POST {domain}/api-token-auth/` and return the JWT.
pub async fn retrieve_jwt_token(
    client: &Client,
    domain: &str,
    credentials: &Credentials,
) -> RestResult<String> {
    let url = format!("{domain}/api-token-auth/");
    debug!(%url, username = %credentials.username, "Requesting JWT");

    let response = client.post(&url).json(credentials).send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        error!(%url, status = status.as_u16(), %body, "Token authentication failed");
        return Err(RestError::AuthenticationFailure {
            status: status.as_u16(),
            body,
        });
    }

    let body = response.text().await?;
    let parsed: TokenResponse = serde_json::from_str(&body)?;
    Ok(parsed.token)
}

// ============================================================================
// TokenStore
// ============================================================================

/// Shared current token, swapped by the refresher.
#[derive(Debug, Clone)]
pub struct TokenStore {
    token: Arc<RwLock<String>>,
}

impl TokenStore {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Arc::new(RwLock::new(token.into())),
        }
    }

    #[must_use]
    pub fn get(&self) -> String {
        self.token.read().clone()
    }

    pub fn set(&self, token: String) {
        *self.token.write() = token;
    }

    /// `Authorization` header value.
    #[must_use]
    pub fn header_value(&self) -> String {
        format!("JWT {}", self.token.read())
    }
}

// ============================================================================
// TokenRefresher
// ============================================================================

/// Background task that re-authenticates before the token expires.
///
/// A failed refresh keeps the previous token and retries on the next tick.
#[derive(Debug)]
pub struct TokenRefresher {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl TokenRefresher {
    /// Spawn on the current runtime, refreshing every `expiry - 30s`.
    pub fn spawn(
        client: Client,
        domain: String,
        credentials: Credentials,
        store: TokenStore,
        expiry: Duration,
    ) -> Self {
        let period = refresh_period(expiry);
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            info!(period_secs = period.as_secs(), "JWT refresher started");
            loop {
                tokio::select! {
                    () = token.cancelled() => {
                        debug!("JWT refresher stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        match retrieve_jwt_token(&client, &domain, &credentials).await {
                            Ok(fresh) => {
                                store.set(fresh);
                                debug!("JWT refreshed");
                            }
                            Err(e) => warn!(error = %e, "JWT refresh failed, keeping previous token"),
                        }
                    }
                }
            }
        });

        Self { cancel, task }
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for TokenRefresher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn refresh_period(expiry: Duration) -> Duration {
    expiry
        .checked_sub(REFRESH_MARGIN)
        .filter(|period| !period.is_zero())
        .unwrap_or(Duration::from_secs(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_period() {
        assert_eq!(
            refresh_period(Duration::from_secs(48 * 3600)),
            Duration::from_secs(48 * 3600 - 30)
        );
        assert_eq!(refresh_period(Duration::from_secs(10)), Duration::from_secs(1));
        assert_eq!(refresh_period(Duration::from_secs(30)), Duration::from_secs(1));
    }

    #[test]
    fn test_token_store_header() {
        let store = TokenStore::new("abc");
        assert_eq!(store.header_value(), "JWT abc");
        store.set("def".to_string());
        assert_eq!(store.get(), "def");
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let credentials = Credentials::new("user", "secret");
        let rendered = format!("{credentials:?}");
        assert!(rendered.contains("user"));
        assert!(!rendered.contains("secret"));
    }

    #[test]
    fn test_credentials_serialize() {
        let value = serde_json::to_value(Credentials::new("user", "pw")).unwrap();
        assert_eq!(value, serde_json::json!({"username": "user", "password": "pw"}));
    }
}
