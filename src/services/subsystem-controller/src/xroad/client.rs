//! HTTP client for the X-Road security server admin API
//!
//! Each operation fetches the API key, issues one authenticated request and
//! checks the status code against the single status the API documents for a
//! successful call. Anything else becomes `RemoteOperationFailed`.

use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use super::models::{
    parse_response, AccessRight, AccessRightItems, Client, ClientAdd, ServiceDescription,
    ServiceDescriptionAdd, ServiceUpdate,
};
use super::XroadApi;
use crate::config::ControllerConfig;
use crate::error::{ControllerError, ControllerResult};
use crate::poll::PollPolicy;
use crate::secrets::SecretStore;

/// Status and body of an API response
struct ApiResponse {
    status: StatusCode,
    body: String,
}

/// Authenticated client of the X-Road admin API
pub struct XroadClient {
    http_client: reqwest::Client,
    base_url: Url,
    secrets: Arc<dyn SecretStore>,
    secret_id: String,
    poll_policy: PollPolicy,
}

impl XroadClient {
    /// Create a new client from explicit parts
    pub fn new(
        http_client: reqwest::Client,
        base_url: Url,
        secrets: Arc<dyn SecretStore>,
        secret_id: impl Into<String>,
        poll_policy: PollPolicy,
    ) -> Self {
        Self {
            http_client,
            base_url,
            secrets,
            secret_id: secret_id.into(),
            poll_policy,
        }
    }

    /// Create a client for the security server named in `config`
    pub fn from_config(
        config: &ControllerConfig,
        secrets: Arc<dyn SecretStore>,
    ) -> ControllerResult<Self> {
        let base_url = config.api_base_url().map_err(|e| {
            ControllerError::configuration(format!("Invalid X-Road API URL: {}", e))
        })?;

        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .user_agent(concat!("xroad-subsystem-controller/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                ControllerError::configuration(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self::new(
            http_client,
            base_url,
            secrets,
            config.secret_id.clone(),
            config.poll_policy(),
        ))
    }

    fn endpoint(&self, segments: &[&str]) -> ControllerResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ControllerError::configuration("X-Road API URL cannot be a base"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn request(&self, method: Method, segments: &[&str]) -> ControllerResult<RequestBuilder> {
        let url = self.endpoint(segments)?;
        let api_key = self.secrets.get_secret(&self.secret_id).await?;
        let mut authorization = HeaderValue::from_str(&format!("X-Road-ApiKey token={}", api_key))
            .map_err(|_| {
                ControllerError::secret_unavailable(&self.secret_id, "API key is not a valid header value")
            })?;
        authorization.set_sensitive(true);

        debug!(%method, %url, "Calling X-Road API");
        Ok(self
            .http_client
            .request(method, url)
            .header(AUTHORIZATION, authorization))
    }

    async fn send(&self, operation: &str, request: RequestBuilder) -> ControllerResult<ApiResponse> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        debug!(operation, status = status.as_u16(), body = %body, "X-Road API responded");
        Ok(ApiResponse { status, body })
    }

    async fn call(
        &self,
        operation: &str,
        method: Method,
        segments: &[&str],
        expected: StatusCode,
    ) -> ControllerResult<String> {
        let request = self.request(method, segments).await?;
        let response = self.send(operation, request).await?;
        expect_status(operation, expected, response)
    }

    async fn call_with_body<B: Serialize + Sync>(
        &self,
        operation: &str,
        method: Method,
        segments: &[&str],
        body: &B,
        expected: StatusCode,
    ) -> ControllerResult<String> {
        let request = self.request(method, segments).await?.json(body);
        let response = self.send(operation, request).await?;
        expect_status(operation, expected, response)
    }
}

fn expect_status(
    operation: &str,
    expected: StatusCode,
    response: ApiResponse,
) -> ControllerResult<String> {
    if response.status == expected {
        Ok(response.body)
    } else {
        warn!(
            operation,
            status = response.status.as_u16(),
            expected = expected.as_u16(),
            body = %response.body,
            "Unexpected status from X-Road API"
        );
        Err(ControllerError::remote_operation_failed(
            operation,
            response.status.as_u16(),
            response.body,
        ))
    }
}

#[async_trait]
impl XroadApi for XroadClient {
    fn poll_policy(&self) -> PollPolicy {
        self.poll_policy
    }

    async fn get_client(&self, client_id: &str) -> ControllerResult<Option<Client>> {
        let operation = "get-client";
        let request = self.request(Method::GET, &["clients", client_id]).await?;
        let response = self.send(operation, request).await?;

        if response.status == StatusCode::NOT_FOUND {
            debug!(client_id, "Client does not exist");
            return Ok(None);
        }
        let body = expect_status(operation, StatusCode::OK, response)?;
        parse_response(operation, &body).map(Some)
    }

    async fn create_client(&self, client: &ClientAdd) -> ControllerResult<Client> {
        let operation = "create-client";
        info!(
            member_code = %client.client.member_code,
            subsystem_code = ?client.client.subsystem_code,
            "Creating client"
        );
        let body = self
            .call_with_body(operation, Method::POST, &["clients"], client, StatusCode::CREATED)
            .await?;
        parse_response(operation, &body)
    }

    async fn request_registration(&self, client_id: &str) -> ControllerResult<()> {
        info!(client_id, "Registering client");
        self.call_with_body(
            "register-client",
            Method::PUT,
            &["clients", client_id, "register"],
            &serde_json::json!({}),
            StatusCode::NO_CONTENT,
        )
        .await
        .map(drop)
    }

    async fn request_unregistration(&self, client_id: &str) -> ControllerResult<()> {
        info!(client_id, "Unregistering client");
        self.call_with_body(
            "unregister-client",
            Method::PUT,
            &["clients", client_id, "unregister"],
            &serde_json::json!({}),
            StatusCode::NO_CONTENT,
        )
        .await
        .map(drop)
    }

    async fn delete_client(&self, client_id: &str) -> ControllerResult<()> {
        info!(client_id, "Deleting client");
        self.call(
            "delete-client",
            Method::DELETE,
            &["clients", client_id],
            StatusCode::NO_CONTENT,
        )
        .await
        .map(drop)
    }

    async fn list_service_descriptions(
        &self,
        client_id: &str,
    ) -> ControllerResult<Vec<ServiceDescription>> {
        let operation = "list-service-descriptions";
        let body = self
            .call(
                operation,
                Method::GET,
                &["clients", client_id, "service-descriptions"],
                StatusCode::OK,
            )
            .await?;
        parse_response(operation, &body)
    }

    async fn add_service_description(
        &self,
        client_id: &str,
        description: &ServiceDescriptionAdd,
    ) -> ControllerResult<ServiceDescription> {
        let operation = "add-service-description";
        info!(client_id, url = %description.url, "Adding service description");
        let body = self
            .call_with_body(
                operation,
                Method::POST,
                &["clients", client_id, "service-descriptions"],
                description,
                StatusCode::CREATED,
            )
            .await?;
        parse_response(operation, &body)
    }

    async fn enable_service_description(&self, description_id: &str) -> ControllerResult<()> {
        info!(description_id, "Enabling service description");
        self.call_with_body(
            "enable-service-description",
            Method::PUT,
            &["service-descriptions", description_id, "enable"],
            &serde_json::json!({}),
            StatusCode::OK,
        )
        .await
        .map(drop)
    }

    async fn delete_service_description(&self, description_id: &str) -> ControllerResult<()> {
        info!(description_id, "Deleting service description");
        self.call(
            "delete-service-description",
            Method::DELETE,
            &["service-descriptions", description_id],
            StatusCode::NO_CONTENT,
        )
        .await
        .map(drop)
    }

    async fn update_service(
        &self,
        owner_id: &str,
        service_code: &str,
        update: &ServiceUpdate,
    ) -> ControllerResult<()> {
        let service_id = format!("{}:{}", owner_id, service_code);
        info!(service_id = %service_id, url = %update.url, "Updating service");
        self.call_with_body(
            "update-service",
            Method::PATCH,
            &["services", &service_id],
            update,
            StatusCode::OK,
        )
        .await
        .map(drop)
    }

    async fn get_access_rights(
        &self,
        owner_id: &str,
        consumer_id: &str,
    ) -> ControllerResult<Vec<AccessRight>> {
        let operation = "get-access-rights";
        let body = self
            .call(
                operation,
                Method::GET,
                &["clients", owner_id, "service-clients", consumer_id, "access-rights"],
                StatusCode::OK,
            )
            .await?;
        parse_response(operation, &body)
    }

    async fn grant_access_rights(
        &self,
        owner_id: &str,
        consumer_id: &str,
        rights: &AccessRightItems,
    ) -> ControllerResult<()> {
        info!(
            owner_id,
            consumer_id,
            service_codes = ?rights.service_codes(),
            "Granting access rights"
        );
        self.call_with_body(
            "grant-access-rights",
            Method::POST,
            &["clients", owner_id, "service-clients", consumer_id, "access-rights"],
            rights,
            StatusCode::CREATED,
        )
        .await
        .map(drop)
    }

    async fn revoke_access_rights(
        &self,
        owner_id: &str,
        consumer_id: &str,
        rights: &AccessRightItems,
    ) -> ControllerResult<()> {
        info!(
            owner_id,
            consumer_id,
            service_codes = ?rights.service_codes(),
            "Revoking access rights"
        );
        self.call_with_body(
            "revoke-access-rights",
            Method::POST,
            &[
                "clients",
                owner_id,
                "service-clients",
                consumer_id,
                "access-rights",
                "delete",
            ],
            rights,
            StatusCode::NO_CONTENT,
        )
        .await
        .map(drop)
    }
}
