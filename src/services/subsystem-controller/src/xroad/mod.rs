//! X-Road security server admin API
//!
//! [`XroadApi`] is the seam between the reconciliation engine and the remote
//! API; [`client::XroadClient`] is its HTTP implementation.

pub mod client;
pub mod models;

use async_trait::async_trait;

use crate::error::{ControllerError, ControllerResult};
use crate::poll::{PollPolicy, StatusTarget, StatusWait};
use models::{
    AccessRight, AccessRightItems, Client, ClientAdd, ServiceDescription, ServiceDescriptionAdd,
    ServiceUpdate,
};

pub use client::XroadClient;

/// Operations of the X-Road admin API used by the controller
///
/// Every required method issues exactly one HTTP call. Registration state
/// changes are asynchronous on the remote side; the provided
/// [`register_client`](XroadApi::register_client) and
/// [`unregister_client`](XroadApi::unregister_client) issue the call and then
/// wait for the status to settle under [`poll_policy`](XroadApi::poll_policy).
#[async_trait]
pub trait XroadApi: Send + Sync {
    /// Budget for status waits
    fn poll_policy(&self) -> PollPolicy;

    /// `GET /clients/{id}`, `None` on 404
    async fn get_client(&self, client_id: &str) -> ControllerResult<Option<Client>>;

    async fn create_client(&self, client: &ClientAdd) -> ControllerResult<Client>;

    /// `PUT /clients/{id}/register` without waiting
    async fn request_registration(&self, client_id: &str) -> ControllerResult<()>;

    /// `PUT /clients/{id}/unregister` without waiting
    async fn request_unregistration(&self, client_id: &str) -> ControllerResult<()>;

    async fn delete_client(&self, client_id: &str) -> ControllerResult<()>;

    async fn list_service_descriptions(
        &self,
        client_id: &str,
    ) -> ControllerResult<Vec<ServiceDescription>>;

    async fn add_service_description(
        &self,
        client_id: &str,
        description: &ServiceDescriptionAdd,
    ) -> ControllerResult<ServiceDescription>;

    async fn enable_service_description(&self, description_id: &str) -> ControllerResult<()>;

    async fn delete_service_description(&self, description_id: &str) -> ControllerResult<()>;

    async fn update_service(
        &self,
        owner_id: &str,
        service_code: &str,
        update: &ServiceUpdate,
    ) -> ControllerResult<()>;

    async fn get_access_rights(
        &self,
        owner_id: &str,
        consumer_id: &str,
    ) -> ControllerResult<Vec<AccessRight>>;

    async fn grant_access_rights(
        &self,
        owner_id: &str,
        consumer_id: &str,
        rights: &AccessRightItems,
    ) -> ControllerResult<()>;

    async fn revoke_access_rights(
        &self,
        owner_id: &str,
        consumer_id: &str,
        rights: &AccessRightItems,
    ) -> ControllerResult<()>;

    /// Like [`get_client`](XroadApi::get_client) but absence is an error
    async fn require_client(&self, client_id: &str) -> ControllerResult<Client> {
        self.get_client(client_id)
            .await?
            .ok_or_else(|| ControllerError::client_missing(client_id))
    }

    /// Polls the client until `target` is reached or the budget is spent
    async fn wait_for_status(
        &self,
        client_id: &str,
        target: StatusTarget,
    ) -> ControllerResult<Client> {
        StatusWait::new(target, self.poll_policy())
            .run(client_id, || self.require_client(client_id))
            .await
    }

    async fn register_client(&self, client_id: &str) -> ControllerResult<Client> {
        self.request_registration(client_id).await?;
        self.wait_for_status(client_id, StatusTarget::Registered)
            .await
    }

    async fn unregister_client(&self, client_id: &str) -> ControllerResult<Client> {
        self.request_unregistration(client_id).await?;
        self.wait_for_status(client_id, StatusTarget::Unregistered)
            .await
    }
}
