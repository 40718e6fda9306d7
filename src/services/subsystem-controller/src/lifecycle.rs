//! CloudFormation custom resource adapter
//!
//! Turns `Create`, `Update` and `Delete` lifecycle events into engine calls and
//! always reports a terminal status to the event's `ResponseURL`. When the
//! engine fails, the `FAILED` report is delivered before the error is handed
//! back to the host runtime.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::desired::{AllowedSubsystem, DesiredState, ServiceEndpoint, WsdlService};
use crate::error::{ControllerError, ControllerResult};
use crate::reconcile::{Reconciler, TeardownOutcome};
use crate::xroad::models::{Client, ConnectionType, SubsystemId};

/// Prefix of the `Reason` field pointing operators at the invocation logs
const LOG_STREAM_REASON: &str = "See the details in CloudWatch Log Stream: ";

/// The engine operations a lifecycle event dispatches to
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubsystemEngine: Send + Sync {
    async fn reconcile(&self, desired: &DesiredState) -> ControllerResult<Client>;

    async fn teardown(&self, identity: &SubsystemId) -> ControllerResult<TeardownOutcome>;
}

#[async_trait]
impl SubsystemEngine for Reconciler {
    async fn reconcile(&self, desired: &DesiredState) -> ControllerResult<Client> {
        Reconciler::reconcile(self, desired).await
    }

    async fn teardown(&self, identity: &SubsystemId) -> ControllerResult<TeardownOutcome> {
        Reconciler::teardown(self, identity).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestType {
    Create,
    Update,
    Delete,
}

/// Custom resource request as delivered by CloudFormation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LifecycleEvent {
    pub request_type: RequestType,
    #[serde(rename = "ResponseURL")]
    pub response_url: String,
    pub stack_id: String,
    pub request_id: String,
    pub logical_resource_id: String,
    #[serde(default)]
    pub physical_resource_id: Option<String>,
    #[serde(default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub resource_properties: Value,
}

impl LifecycleEvent {
    pub fn from_json(body: &str) -> ControllerResult<Self> {
        serde_json::from_str(body).map_err(|e| ControllerError::invalid_event(e.to_string()))
    }

    /// Desired state carried by a `Create` or `Update` event
    pub fn desired_state(&self) -> ControllerResult<DesiredState> {
        let properties: ResourceProperties = parse_properties(&self.resource_properties)?;
        Ok(properties.into())
    }

    /// Subsystem identity, the only part a `Delete` event needs
    pub fn identity(&self) -> ControllerResult<SubsystemId> {
        let properties: IdentityProperties = parse_properties(&self.resource_properties)?;
        Ok(properties.into())
    }
}

fn parse_properties<T: serde::de::DeserializeOwned>(value: &Value) -> ControllerResult<T> {
    T::deserialize(value)
        .map_err(|e| ControllerError::invalid_event(format!("ResourceProperties: {}", e)))
}

/// Resource properties of a subsystem resource
///
/// CloudFormation passes scalars as strings, so `Registered` accepts both
/// `"true"`/`"false"` and JSON booleans. `ServiceToken` and unknown keys are
/// ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResourceProperties {
    pub xroad_instance: String,
    pub member_class: String,
    pub member_name: String,
    pub member_code: String,
    pub subsystem_name: String,
    #[serde(deserialize_with = "deserialize_flag")]
    pub registered: bool,
    #[serde(default)]
    pub connection_type: Option<ConnectionType>,
    #[serde(default)]
    pub wsdl_services: Vec<WsdlServiceProperty>,
    #[serde(default)]
    pub allowed_subsystems: Vec<AllowedSubsystemProperty>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsdlServiceProperty {
    pub wsdl_url: String,
    #[serde(default)]
    pub service_endpoints: Vec<ServiceEndpointProperty>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceEndpointProperty {
    pub service_code: String,
    pub endpoint: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowedSubsystemProperty {
    pub client_subsystem_id: String,
    #[serde(default)]
    pub service_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct IdentityProperties {
    xroad_instance: String,
    member_class: String,
    member_code: String,
    subsystem_name: String,
}

impl From<IdentityProperties> for SubsystemId {
    fn from(properties: IdentityProperties) -> Self {
        SubsystemId::new(
            properties.xroad_instance,
            properties.member_class,
            properties.member_code,
            properties.subsystem_name,
        )
    }
}

impl From<ResourceProperties> for DesiredState {
    fn from(properties: ResourceProperties) -> Self {
        DesiredState {
            identity: SubsystemId::new(
                properties.xroad_instance,
                properties.member_class,
                properties.member_code,
                properties.subsystem_name,
            ),
            member_name: properties.member_name,
            connection_type: properties.connection_type,
            registered: properties.registered,
            wsdl_services: properties
                .wsdl_services
                .into_iter()
                .map(|wsdl| WsdlService {
                    url: wsdl.wsdl_url,
                    service_endpoints: wsdl
                        .service_endpoints
                        .into_iter()
                        .map(|e| ServiceEndpoint {
                            service_code: e.service_code,
                            endpoint: e.endpoint,
                        })
                        .collect(),
                })
                .collect(),
            allowed_subsystems: properties
                .allowed_subsystems
                .into_iter()
                .map(|allowed| AllowedSubsystem {
                    consumer_id: allowed.client_subsystem_id,
                    service_ids: allowed.service_ids,
                })
                .collect(),
        }
    }
}

fn deserialize_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => Ok(value),
        Flag::Text(text) if text.eq_ignore_ascii_case("true") => Ok(true),
        Flag::Text(text) if text.eq_ignore_ascii_case("false") => Ok(false),
        Flag::Text(text) => Err(serde::de::Error::custom(format!(
            "expected \"true\" or \"false\", got \"{}\"",
            text
        ))),
    }
}

/// Per-invocation data supplied by the host runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationContext {
    pub request_id: String,
    pub log_stream_name: String,
    pub deadline: Option<DateTime<Utc>>,
}

impl InvocationContext {
    /// Time left for dispatch once `margin` is reserved for reporting
    pub fn dispatch_budget(&self, margin: Duration) -> Option<Duration> {
        self.deadline.map(|deadline| {
            (deadline - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO)
                .saturating_sub(margin)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseStatus {
    Success,
    Failed,
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseStatus::Success => f.write_str("SUCCESS"),
            ResponseStatus::Failed => f.write_str("FAILED"),
        }
    }
}

/// Terminal report PUT to the event's `ResponseURL`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LifecycleResponse {
    pub status: ResponseStatus,
    pub reason: String,
    pub physical_resource_id: String,
    pub stack_id: String,
    pub request_id: String,
    pub logical_resource_id: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
}

impl LifecycleResponse {
    fn new(
        event: &LifecycleEvent,
        status: ResponseStatus,
        reason: String,
        physical_resource_id: String,
        data: BTreeMap<String, String>,
    ) -> Self {
        Self {
            status,
            reason,
            physical_resource_id,
            stack_id: event.stack_id.clone(),
            request_id: event.request_id.clone(),
            logical_resource_id: event.logical_resource_id.clone(),
            data,
        }
    }

    pub fn success(event: &LifecycleEvent, context: &InvocationContext, outcome: Outcome) -> Self {
        Self::new(
            event,
            ResponseStatus::Success,
            format!("{}{}", LOG_STREAM_REASON, context.log_stream_name),
            outcome.physical_resource_id,
            outcome.data,
        )
    }

    /// Failure report carrying the error code but not the error detail
    pub fn failure(
        event: &LifecycleEvent,
        context: &InvocationContext,
        error: &ControllerError,
    ) -> Self {
        let physical_resource_id = event
            .physical_resource_id
            .clone()
            .or_else(|| event.identity().ok().map(|id| id.to_string()))
            .unwrap_or_else(|| context.log_stream_name.clone());

        Self::new(
            event,
            ResponseStatus::Failed,
            format!(
                "{}. {}{}",
                error.error_code(),
                LOG_STREAM_REASON,
                context.log_stream_name
            ),
            physical_resource_id,
            BTreeMap::new(),
        )
    }
}

/// Result of a successful dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub physical_resource_id: String,
    pub data: BTreeMap<String, String>,
}

impl Outcome {
    fn from_client(client: &Client) -> Self {
        let mut data = BTreeMap::from([
            ("ClientId".to_string(), client.id.clone()),
            ("InstanceId".to_string(), client.instance_id.clone()),
            ("MemberClass".to_string(), client.member_class.clone()),
            ("MemberCode".to_string(), client.member_code.clone()),
            ("Status".to_string(), client.status.to_string()),
        ]);
        if let Some(ref subsystem_code) = client.subsystem_code {
            data.insert("SubsystemCode".to_string(), subsystem_code.clone());
        }
        if let Some(ref member_name) = client.member_name {
            data.insert("MemberName".to_string(), member_name.clone());
        }

        Self {
            physical_resource_id: client.id.clone(),
            data,
        }
    }
}

/// Delivers terminal reports to pre-signed response URLs
pub struct ResponseReporter {
    http_client: reqwest::Client,
}

impl ResponseReporter {
    pub fn new(timeout: Duration) -> ControllerResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                ControllerError::configuration(format!("Failed to create HTTP client: {}", e))
            })?;
        Ok(Self { http_client })
    }

    /// PUT the report; the body goes without a content type since the URL is
    /// pre-signed for an empty one
    pub async fn send(&self, response_url: &str, response: &LifecycleResponse) -> ControllerResult<()> {
        let body = serde_json::to_string(response)?;
        info!(status = %response.status, physical_resource_id = %response.physical_resource_id, "Sending lifecycle response");
        debug!(body = %body, "Lifecycle response body");

        let result = self.http_client.put(response_url).body(body).send().await?;
        let status = result.status();
        if status.as_u16() >= 400 {
            warn!(status = status.as_u16(), "Lifecycle response rejected");
            return Err(ControllerError::ResponseDelivery {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

/// Dispatches lifecycle events to the engine and reports their outcome
pub struct LifecycleAdapter {
    engine: Arc<dyn SubsystemEngine>,
    reporter: ResponseReporter,
    report_margin: Duration,
}

impl LifecycleAdapter {
    pub fn new(
        engine: Arc<dyn SubsystemEngine>,
        reporter: ResponseReporter,
        report_margin: Duration,
    ) -> Self {
        Self {
            engine,
            reporter,
            report_margin,
        }
    }

    /// Handle one event; the report is delivered on every path where the
    /// event carries a usable `ResponseURL`
    #[instrument(
        skip_all,
        fields(
            request_type = ?event.request_type,
            request_id = %event.request_id,
            logical_resource_id = %event.logical_resource_id
        )
    )]
    pub async fn handle(
        &self,
        event: &LifecycleEvent,
        context: &InvocationContext,
    ) -> ControllerResult<LifecycleResponse> {
        info!(stack_id = %event.stack_id, "Handling lifecycle event");

        match self.dispatch_within_deadline(event, context).await {
            Ok(outcome) => {
                let response = LifecycleResponse::success(event, context, outcome);
                self.reporter.send(&event.response_url, &response).await?;
                Ok(response)
            }
            Err(err) => {
                error!(
                    error = %err,
                    error_code = err.error_code(),
                    retryable = err.is_retryable(),
                    "Lifecycle event failed"
                );
                let response = LifecycleResponse::failure(event, context, &err);
                if let Err(report_err) = self.reporter.send(&event.response_url, &response).await {
                    error!(error = %report_err, "Failed to deliver FAILED report");
                }
                Err(err)
            }
        }
    }

    async fn dispatch_within_deadline(
        &self,
        event: &LifecycleEvent,
        context: &InvocationContext,
    ) -> ControllerResult<Outcome> {
        let Some(budget) = context.dispatch_budget(self.report_margin) else {
            return self.dispatch(event).await;
        };

        let expired = || {
            ControllerError::timeout(
                "lifecycle-dispatch",
                "invocation deadline reached before the event was handled",
            )
        };
        if budget.is_zero() {
            return Err(expired());
        }
        tokio::time::timeout(budget, self.dispatch(event))
            .await
            .map_err(|_| expired())?
    }

    /// Identity to tear down, from the properties or else the physical id
    fn delete_identity(&self, event: &LifecycleEvent) -> Option<SubsystemId> {
        match event.identity() {
            Ok(identity) => Some(identity),
            Err(err) => match event
                .physical_resource_id
                .as_deref()
                .map(str::parse::<SubsystemId>)
            {
                Some(Ok(identity)) => {
                    warn!(
                        error = %err,
                        client_id = %identity,
                        "Using PhysicalResourceId as the subsystem to delete"
                    );
                    Some(identity)
                }
                _ => {
                    warn!(error = %err, "Delete names no subsystem, nothing to delete");
                    None
                }
            },
        }
    }

    async fn dispatch(&self, event: &LifecycleEvent) -> ControllerResult<Outcome> {
        match event.request_type {
            RequestType::Create | RequestType::Update => {
                let desired = event.desired_state()?;
                let client = self.engine.reconcile(&desired).await?;
                Ok(Outcome::from_client(&client))
            }
            RequestType::Delete => {
                let Some(identity) = self.delete_identity(event) else {
                    // A rolled back Create may never have produced a client
                    return Ok(Outcome {
                        physical_resource_id: event
                            .physical_resource_id
                            .clone()
                            .unwrap_or_else(|| event.logical_resource_id.clone()),
                        data: BTreeMap::new(),
                    });
                };
                let outcome = self.engine.teardown(&identity).await?;
                debug!(?outcome, "Teardown finished");
                Ok(Outcome {
                    physical_resource_id: event
                        .physical_resource_id
                        .clone()
                        .unwrap_or_else(|| identity.to_string()),
                    data: BTreeMap::new(),
                })
            }
        }
    }
}
