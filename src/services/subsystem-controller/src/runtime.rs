//! Lambda Runtime API loop
//!
//! Long-polls the runtime for the next invocation, hands the event to the
//! [`LifecycleAdapter`] and posts either the response or an invocation error.

use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::HeaderMap;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::error::{ControllerError, ControllerResult};
use crate::lifecycle::{InvocationContext, LifecycleAdapter, LifecycleEvent};

const RUNTIME_API_VERSION: &str = "2018-06-01";
const REQUEST_ID_HEADER: &str = "Lambda-Runtime-Aws-Request-Id";
const DEADLINE_HEADER: &str = "Lambda-Runtime-Deadline-Ms";
const ERROR_TYPE_HEADER: &str = "Lambda-Runtime-Function-Error-Type";

/// One invocation fetched from the runtime
#[derive(Debug, Clone)]
pub struct Invocation {
    pub request_id: String,
    pub deadline: Option<DateTime<Utc>>,
    pub body: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InvocationError {
    error_message: String,
    error_type: String,
}

/// Client of the Lambda Runtime API
pub struct LambdaRuntime {
    http_client: reqwest::Client,
    base_url: Url,
    log_stream_name: String,
}

impl LambdaRuntime {
    /// `base_url` is the runtime endpoint, e.g. `http://127.0.0.1:9001/`
    pub fn new(base_url: Url, log_stream_name: impl Into<String>) -> ControllerResult<Self> {
        // No timeout: fetching the next invocation blocks until one arrives
        let http_client = reqwest::Client::builder().build().map_err(|e| {
            ControllerError::configuration(format!("Failed to create HTTP client: {}", e))
        })?;

        Ok(Self {
            http_client,
            base_url,
            log_stream_name: log_stream_name.into(),
        })
    }

    /// Runtime configured through `AWS_LAMBDA_RUNTIME_API` and
    /// `AWS_LAMBDA_LOG_STREAM_NAME`
    pub fn from_env() -> ControllerResult<Self> {
        let api = std::env::var("AWS_LAMBDA_RUNTIME_API").map_err(|_| {
            ControllerError::configuration("AWS_LAMBDA_RUNTIME_API is not set")
        })?;
        let base_url = Url::parse(&format!("http://{}/", api)).map_err(|e| {
            ControllerError::configuration(format!("Invalid runtime API address {}: {}", api, e))
        })?;
        let log_stream_name = std::env::var("AWS_LAMBDA_LOG_STREAM_NAME").unwrap_or_default();

        Self::new(base_url, log_stream_name)
    }

    fn endpoint(&self, path: &str) -> ControllerResult<Url> {
        self.base_url
            .join(&format!("{}/runtime/{}", RUNTIME_API_VERSION, path))
            .map_err(|e| ControllerError::runtime(format!("Invalid runtime URL: {}", e)))
    }

    pub async fn next_invocation(&self) -> ControllerResult<Invocation> {
        let response = self
            .http_client
            .get(self.endpoint("invocation/next")?)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ControllerError::runtime(format!(
                "next invocation returned status {}",
                status.as_u16()
            )));
        }

        let headers = response.headers().clone();
        let request_id = header_str(&headers, REQUEST_ID_HEADER)
            .ok_or_else(|| ControllerError::runtime("invocation without request id"))?
            .to_string();
        let deadline = header_str(&headers, DEADLINE_HEADER)
            .and_then(|ms| ms.parse::<i64>().ok())
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single());

        let body = response.text().await?;
        debug!(request_id = %request_id, ?deadline, "Received invocation");

        Ok(Invocation {
            request_id,
            deadline,
            body,
        })
    }

    pub async fn respond<T: Serialize>(&self, request_id: &str, body: &T) -> ControllerResult<()> {
        let url = self.endpoint(&format!("invocation/{}/response", request_id))?;
        let response = self.http_client.post(url).json(body).send().await?;
        check_accepted("response", response.status())
    }

    /// Report an invocation error so the runtime records the failure
    pub async fn fail(&self, request_id: &str, err: &ControllerError) -> ControllerResult<()> {
        let url = self.endpoint(&format!("invocation/{}/error", request_id))?;
        let body = InvocationError {
            error_message: err.to_string(),
            error_type: err.error_code().to_string(),
        };
        let response = self
            .http_client
            .post(url)
            .header(ERROR_TYPE_HEADER, err.error_code())
            .json(&body)
            .send()
            .await?;
        check_accepted("error", response.status())
    }

    /// Process a single invocation end to end
    #[instrument(skip_all)]
    pub async fn run_once(&self, adapter: &LifecycleAdapter) -> ControllerResult<()> {
        let invocation = self.next_invocation().await?;
        let context = InvocationContext {
            request_id: invocation.request_id.clone(),
            log_stream_name: self.log_stream_name.clone(),
            deadline: invocation.deadline,
        };

        let result = match LifecycleEvent::from_json(&invocation.body) {
            Ok(event) => adapter.handle(&event, &context).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(response) => {
                info!(request_id = %invocation.request_id, "Invocation succeeded");
                self.respond(&invocation.request_id, &response).await
            }
            Err(err) => {
                warn!(request_id = %invocation.request_id, error = %err, "Invocation failed");
                self.fail(&invocation.request_id, &err).await
            }
        }
    }

    /// Serve invocations until the runtime API itself fails
    pub async fn run(&self, adapter: &LifecycleAdapter) -> ControllerResult<()> {
        info!(runtime_api = %self.base_url, "Waiting for invocations");
        loop {
            if let Err(err) = self.run_once(adapter).await {
                error!(error = %err, "Runtime API failure");
                return Err(err);
            }
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn check_accepted(kind: &str, status: reqwest::StatusCode) -> ControllerResult<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(ControllerError::runtime(format!(
            "posting invocation {} returned status {}",
            kind,
            status.as_u16()
        )))
    }
}
