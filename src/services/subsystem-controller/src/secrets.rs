//! Secret retrieval for the X-Road API key
//!
//! The key lives in Secrets Manager and is read through the Parameters and
//! Secrets Lambda extension listening on localhost. The extension answers
//! with the regular `GetSecretValue` JSON document.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::ControllerConfig;
use crate::error::{ControllerError, ControllerResult};

/// Header carrying the session token expected by the extension
pub const SECRETS_TOKEN_HEADER: &str = "X-Aws-Parameters-Secrets-Token";

/// Fetch-by-name access to decrypted secrets
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret(&self, secret_id: &str) -> ControllerResult<String>;
}

#[derive(Debug, Deserialize)]
struct SecretValue {
    #[serde(rename = "SecretString")]
    secret_string: Option<String>,
}

/// Secret store backed by the Lambda secrets extension
pub struct ExtensionSecretStore {
    http_client: reqwest::Client,
    endpoint: Url,
    session_token: Option<String>,
}

impl ExtensionSecretStore {
    pub fn new(
        endpoint: Url,
        session_token: Option<String>,
        timeout: Duration,
    ) -> ControllerResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                ControllerError::configuration(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            http_client,
            endpoint,
            session_token,
        })
    }

    pub fn from_config(config: &ControllerConfig) -> ControllerResult<Self> {
        let endpoint = config.secrets_base_url().map_err(|e| {
            ControllerError::configuration(format!("Invalid secrets extension URL: {}", e))
        })?;
        Self::new(
            endpoint,
            config.secrets.session_token.clone(),
            config.request_timeout(),
        )
    }

    fn secret_url(&self, secret_id: &str) -> ControllerResult<Url> {
        let mut url = self.endpoint.join("secretsmanager/get").map_err(|e| {
            ControllerError::configuration(format!("Invalid secrets extension URL: {}", e))
        })?;
        url.query_pairs_mut()
            .append_pair("secretId", secret_id)
            .append_pair("withDecryption", "true");
        Ok(url)
    }
}

#[async_trait]
impl SecretStore for ExtensionSecretStore {
    async fn get_secret(&self, secret_id: &str) -> ControllerResult<String> {
        let url = self.secret_url(secret_id)?;
        debug!(secret_id, "Fetching secret from extension");

        let mut request = self.http_client.get(url);
        if let Some(ref token) = self.session_token {
            request = request.header(SECRETS_TOKEN_HEADER, token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ControllerError::secret_unavailable(secret_id, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ControllerError::secret_unavailable(
                secret_id,
                format!("extension returned status {}", status.as_u16()),
            ));
        }

        let value: SecretValue = response
            .json()
            .await
            .map_err(|e| ControllerError::secret_unavailable(secret_id, e.to_string()))?;

        value
            .secret_string
            .filter(|secret| !secret.is_empty())
            .ok_or_else(|| ControllerError::secret_unavailable(secret_id, "SecretString missing"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn store_for(server: &MockServer, token: Option<&str>) -> ExtensionSecretStore {
        let endpoint = Url::parse(&format!("{}/", server.uri())).unwrap();
        ExtensionSecretStore::new(
            endpoint,
            token.map(str::to_string),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_get_secret() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/secretsmanager/get"))
            .and(query_param("secretId", "xroad-api-key"))
            .and(query_param("withDecryption", "true"))
            .and(header(SECRETS_TOKEN_HEADER, "session-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Name": "xroad-api-key",
                "SecretString": "0a1b2c3d"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = store_for(&server, Some("session-token")).await;
        let secret = store.get_secret("xroad-api-key").await.unwrap();
        assert_eq!(secret, "0a1b2c3d");
    }

    #[tokio::test]
    async fn test_get_secret_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/secretsmanager/get"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let store = store_for(&server, None).await;
        let err = store.get_secret("xroad-api-key").await.unwrap_err();
        assert_eq!(err.error_code(), "SECRET_UNAVAILABLE");
        assert!(err.to_string().contains("status 400"));
    }

    #[tokio::test]
    async fn test_get_secret_without_secret_string() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/secretsmanager/get"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"Name": "xroad-api-key"})),
            )
            .mount(&server)
            .await;

        let store = store_for(&server, None).await;
        let err = store.get_secret("xroad-api-key").await.unwrap_err();
        assert!(matches!(err, ControllerError::SecretUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_mock_secret_store() {
        let mut store = MockSecretStore::new();
        store
            .expect_get_secret()
            .times(1)
            .returning(|id| Ok(format!("key-for-{}", id)));

        assert_eq!(
            store.get_secret("xroad-api-key").await.unwrap(),
            "key-for-xroad-api-key"
        );
    }
}
