//! Service wiring for the subsystem controller

use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::config::ControllerConfig;
use crate::error::{ControllerError, ControllerResult};
use crate::lifecycle::{
    InvocationContext, LifecycleAdapter, LifecycleEvent, LifecycleResponse, ResponseReporter,
};
use crate::reconcile::Reconciler;
use crate::runtime::LambdaRuntime;
use crate::secrets::{ExtensionSecretStore, SecretStore};
use crate::xroad::XroadClient;

/// Fully wired controller: secret store, X-Road client, engine and adapter
pub struct SubsystemControllerService {
    config: ControllerConfig,
    adapter: LifecycleAdapter,
}

impl SubsystemControllerService {
    /// Create a service reading the API key through the secrets extension
    pub fn new(config: ControllerConfig) -> ControllerResult<Self> {
        let secrets: Arc<dyn SecretStore> = Arc::new(ExtensionSecretStore::from_config(&config)?);
        Self::with_secret_store(config, secrets)
    }

    pub fn with_secret_store(
        config: ControllerConfig,
        secrets: Arc<dyn SecretStore>,
    ) -> ControllerResult<Self> {
        info!("Initializing X-Road subsystem controller");

        config.validate().map_err(ControllerError::configuration)?;

        let xroad = XroadClient::from_config(&config, secrets)?;
        let reconciler = Reconciler::new(Arc::new(xroad), config.service_defaults.clone());
        let reporter = ResponseReporter::new(config.request_timeout())?;
        let adapter = LifecycleAdapter::new(Arc::new(reconciler), reporter, config.report_margin());

        info!(
            api_host = %config.api_host,
            api_port = config.api_port,
            secret_id = %config.secret_id,
            "Subsystem controller initialized"
        );

        Ok(Self { config, adapter })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn adapter(&self) -> &LifecycleAdapter {
        &self.adapter
    }

    /// Serve Lambda invocations until the runtime API fails
    pub async fn serve(&self) -> ControllerResult<()> {
        let runtime = LambdaRuntime::from_env()?;
        runtime.run(&self.adapter).await
    }

    /// Handle one lifecycle event stored as JSON in `path`
    pub async fn handle_event_file(
        &self,
        path: &Path,
        log_stream_name: &str,
    ) -> ControllerResult<LifecycleResponse> {
        let body = tokio::fs::read_to_string(path).await.map_err(|e| {
            ControllerError::invalid_event(format!("cannot read {}: {}", path.display(), e))
        })?;
        let event = LifecycleEvent::from_json(&body)?;
        let context = InvocationContext {
            request_id: event.request_id.clone(),
            log_stream_name: log_stream_name.to_string(),
            deadline: None,
        };

        self.adapter.handle(&event, &context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::MockSecretStore;

    #[test]
    fn test_rejects_invalid_config() {
        let result = SubsystemControllerService::with_secret_store(
            ControllerConfig::default(),
            Arc::new(MockSecretStore::new()),
        );
        assert!(matches!(result, Err(ControllerError::Configuration { .. })));
    }

    #[test]
    fn test_wires_valid_config() {
        let config = ControllerConfig {
            api_host: "ss.example.internal".to_string(),
            ..ControllerConfig::default()
        };
        let service =
            SubsystemControllerService::with_secret_store(config, Arc::new(MockSecretStore::new()))
                .unwrap();
        assert_eq!(service.config().api_port, 4000);
    }

    #[tokio::test]
    async fn test_missing_event_file() {
        let config = ControllerConfig {
            api_host: "ss.example.internal".to_string(),
            ..ControllerConfig::default()
        };
        let service =
            SubsystemControllerService::with_secret_store(config, Arc::new(MockSecretStore::new()))
                .unwrap();

        let err = service
            .handle_event_file(Path::new("/nonexistent/event.json"), "local")
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_EVENT");
    }
}
