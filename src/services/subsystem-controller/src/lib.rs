//! # X-Road Subsystem Controller
//!
//! Reconciles X-Road client subsystems on a security server from a declarative
//! desired state, driven by CloudFormation custom resource events.
//!
//! ## Components
//!
//! - **API client** ([`xroad`]): typed, authenticated access to the security
//!   server admin REST API
//! - **Reconciliation engine** ([`reconcile`]): converges a client's
//!   registration, WSDL service descriptions and access rights, and tears it
//!   down again
//! - **Lifecycle adapter** ([`lifecycle`]): maps `Create`/`Update`/`Delete`
//!   events onto the engine and reports the outcome to the event's response URL
//! - **Runtime** ([`runtime`]): Lambda Runtime API loop feeding the adapter
//!
//! ## Usage
//!
//! ```rust,no_run
//! use xroad_subsystem_controller::{ControllerConfig, SubsystemControllerService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ControllerConfig::from_env()?;
//!     let service = SubsystemControllerService::new(config)?;
//!     service.serve().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod desired;
pub mod error;
pub mod lifecycle;
pub mod poll;
pub mod reconcile;
pub mod runtime;
pub mod secrets;
pub mod service;
pub mod xroad;

// Re-export main types for easier usage
pub use config::ControllerConfig;
pub use desired::{AllowedSubsystem, DesiredState, ServiceEndpoint, WsdlService};
pub use error::{ControllerError, ControllerResult};
pub use lifecycle::{
    InvocationContext, LifecycleAdapter, LifecycleEvent, LifecycleResponse, RequestType,
    ResponseReporter, ResponseStatus, SubsystemEngine,
};
pub use poll::{PollPolicy, StatusTarget};
pub use reconcile::{Reconciler, TeardownOutcome};
pub use runtime::LambdaRuntime;
pub use secrets::{ExtensionSecretStore, SecretStore};
pub use service::SubsystemControllerService;
pub use xroad::{XroadApi, XroadClient};

/// Service version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Service name
pub const SERVICE_NAME: &str = "xroad-subsystem-controller";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert!(!VERSION.is_empty());
        assert_eq!(SERVICE_NAME, "xroad-subsystem-controller");
    }
}
