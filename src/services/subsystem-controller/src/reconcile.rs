//! Reconciliation engine for X-Road client subsystems
//!
//! Drives the security server towards a [`DesiredState`] in a fixed order:
//!
//! 1. resolve the client, creating it when absent
//! 2. reconcile registration, waiting for the asynchronous transition
//! 3. reconcile WSDL service descriptions and service endpoints
//! 4. reconcile access rights per consumer
//!
//! Every step observes remote state first and only issues the calls needed to
//! converge, so running the same desired state again is a no-op. A failing
//! step aborts the pass; re-running it picks up where it stopped.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::config::ServiceDefaults;
use crate::desired::DesiredState;
use crate::error::ControllerResult;
use crate::poll::StatusTarget;
use crate::xroad::models::{
    AccessRight, AccessRightItems, Client, ClientStatus, ServiceDescription,
    ServiceDescriptionAdd, ServiceUpdate, SubsystemId,
};
use crate::xroad::XroadApi;

/// Result of a teardown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownOutcome {
    AlreadyAbsent,
    Deleted,
}

/// Set difference between desired and granted service codes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessRightsDiff {
    pub to_add: BTreeSet<String>,
    pub to_remove: BTreeSet<String>,
}

impl AccessRightsDiff {
    pub fn between<'a>(
        desired: impl IntoIterator<Item = &'a str>,
        existing: &[AccessRight],
    ) -> Self {
        let desired: BTreeSet<&str> = desired.into_iter().collect();
        let existing: BTreeSet<&str> = existing.iter().map(|r| r.service_code.as_str()).collect();

        Self {
            to_add: desired.difference(&existing).map(|s| s.to_string()).collect(),
            to_remove: existing.difference(&desired).map(|s| s.to_string()).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Engine converging client subsystems through an [`XroadApi`]
pub struct Reconciler {
    api: Arc<dyn XroadApi>,
    service_defaults: ServiceDefaults,
}

impl Reconciler {
    pub fn new(api: Arc<dyn XroadApi>, service_defaults: ServiceDefaults) -> Self {
        Self {
            api,
            service_defaults,
        }
    }

    /// Converges the remote client to `desired` and returns its refreshed record
    #[instrument(skip_all, fields(client_id = %desired.identity))]
    pub async fn reconcile(&self, desired: &DesiredState) -> ControllerResult<Client> {
        let client = self.resolve_client(desired).await?;
        let client = self
            .reconcile_registration(client, desired.registered)
            .await?;
        self.reconcile_services(&client.id, desired).await?;
        self.reconcile_access_rights(&client.id, desired).await?;

        let client = self.api.require_client(&client.id).await?;
        info!(status = %client.status, "Client reconciled");
        Ok(client)
    }

    /// Removes the client, unregistering it first when needed
    #[instrument(skip_all, fields(client_id = %identity))]
    pub async fn teardown(&self, identity: &SubsystemId) -> ControllerResult<TeardownOutcome> {
        let client_id = identity.to_string();
        let Some(client) = self.api.get_client(&client_id).await? else {
            info!("Client doesn't exist, nothing to delete");
            return Ok(TeardownOutcome::AlreadyAbsent);
        };

        // A client mid-registration cannot be deleted until it is unregistered
        if matches!(
            client.status,
            ClientStatus::Registered | ClientStatus::RegistrationInProgress
        ) {
            self.api.unregister_client(&client.id).await?;
        }
        self.api.delete_client(&client.id).await?;
        info!("Client deleted");
        Ok(TeardownOutcome::Deleted)
    }

    async fn resolve_client(&self, desired: &DesiredState) -> ControllerResult<Client> {
        let client_id = desired.client_id();
        match self.api.get_client(&client_id).await? {
            Some(client) => {
                debug!(status = %client.status, "Client exists");
                Ok(client)
            }
            None => self.api.create_client(&desired.client_add()).await,
        }
    }

    async fn reconcile_registration(
        &self,
        client: Client,
        registered: bool,
    ) -> ControllerResult<Client> {
        match (client.status, registered) {
            (status, true) if status.is_registered() => Ok(client),
            (ClientStatus::RegistrationInProgress, true) => {
                info!("Registration already in progress");
                self.api
                    .wait_for_status(&client.id, StatusTarget::Registered)
                    .await
            }
            (_, true) => self.api.register_client(&client.id).await,
            (status, false) if status.is_registered() => {
                self.api.unregister_client(&client.id).await
            }
            (_, false) => Ok(client),
        }
    }

    async fn reconcile_services(
        &self,
        client_id: &str,
        desired: &DesiredState,
    ) -> ControllerResult<()> {
        let existing = self.api.list_service_descriptions(client_id).await?;

        let mut known: BTreeMap<String, ServiceDescription> = existing
            .iter()
            .filter(|description| description.is_wsdl())
            .map(|description| (description.url.clone(), description.clone()))
            .collect();

        for wsdl in &desired.wsdl_services {
            if !known.contains_key(&wsdl.url) {
                let added = self
                    .api
                    .add_service_description(client_id, &ServiceDescriptionAdd::wsdl(&wsdl.url))
                    .await?;
                known.insert(wsdl.url.clone(), added);
            }

            // Also covers descriptions left disabled by an interrupted run
            if let Some(description) = known.get_mut(&wsdl.url).filter(|d| d.disabled) {
                self.api.enable_service_description(&description.id).await?;
                description.disabled = false;
            }

            let description = &known[&wsdl.url];
            for endpoint in &wsdl.service_endpoints {
                let update = self.service_update(&endpoint.endpoint);
                let observed = description.service(&endpoint.service_code);
                if observed.is_some_and(|service| update.is_applied_to(service)) {
                    debug!(service_code = %endpoint.service_code, "Service endpoint up to date");
                    continue;
                }
                // The API addresses services by their versioned code
                let service_code = observed.map_or(endpoint.service_code.as_str(), |service| {
                    service.full_service_code.as_str()
                });
                self.api
                    .update_service(client_id, service_code, &update)
                    .await?;
            }
        }

        // Any description type not listed is removed, WSDL or not
        let desired_urls = desired.wsdl_urls();
        for stale in existing
            .iter()
            .filter(|description| !desired_urls.contains(description.url.as_str()))
        {
            info!(url = %stale.url, "Removing service description no longer desired");
            self.api.delete_service_description(&stale.id).await?;
        }

        Ok(())
    }

    async fn reconcile_access_rights(
        &self,
        client_id: &str,
        desired: &DesiredState,
    ) -> ControllerResult<()> {
        for (consumer_id, service_codes) in desired.access_grants() {
            let existing = self.api.get_access_rights(client_id, consumer_id).await?;
            let diff = AccessRightsDiff::between(service_codes, &existing);
            if diff.is_empty() {
                debug!(consumer_id, "Access rights up to date");
                continue;
            }

            if !diff.to_add.is_empty() {
                let items: AccessRightItems = diff.to_add.iter().map(String::as_str).collect();
                self.api
                    .grant_access_rights(client_id, consumer_id, &items)
                    .await?;
            }
            if !diff.to_remove.is_empty() {
                let items: AccessRightItems = diff.to_remove.iter().map(String::as_str).collect();
                self.api
                    .revoke_access_rights(client_id, consumer_id, &items)
                    .await?;
            }
        }

        Ok(())
    }

    fn service_update(&self, endpoint: &str) -> ServiceUpdate {
        ServiceUpdate {
            url: endpoint.to_string(),
            url_all: false,
            timeout: self.service_defaults.timeout,
            timeout_all: false,
            ssl_auth: self.service_defaults.ssl_auth,
            ssl_auth_all: false,
            ignore_warnings: false,
        }
    }
}
