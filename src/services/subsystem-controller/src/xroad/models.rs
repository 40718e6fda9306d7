//! Data models of the X-Road security server REST API
//!
//! Request bodies and response records exchanged with the admin API. Responses
//! go through [`parse_response`] so that a body of the wrong shape surfaces as
//! [`ControllerError::MalformedResponse`] instead of being trusted.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ControllerError, ControllerResult};

/// Composite identity of a client subsystem
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubsystemId {
    pub instance: String,
    pub member_class: String,
    pub member_code: String,
    pub subsystem_code: String,
}

impl SubsystemId {
    pub fn new(
        instance: impl Into<String>,
        member_class: impl Into<String>,
        member_code: impl Into<String>,
        subsystem_code: impl Into<String>,
    ) -> Self {
        Self {
            instance: instance.into(),
            member_class: member_class.into(),
            member_code: member_code.into(),
            subsystem_code: subsystem_code.into(),
        }
    }
}

impl fmt::Display for SubsystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.instance, self.member_class, self.member_code, self.subsystem_code
        )
    }
}

impl FromStr for SubsystemId {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [instance, class, code, subsystem]
                if parts.iter().all(|part| !part.trim().is_empty()) =>
            {
                Ok(Self::new(*instance, *class, *code, *subsystem))
            }
            _ => Err(ControllerError::invalid_event(format!(
                "'{}' is not a subsystem id of the form INSTANCE:CLASS:CODE:SUBSYSTEM",
                s
            ))),
        }
    }
}

/// Registration status of a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientStatus {
    Saved,
    RegistrationInProgress,
    Registered,
    DeletionInProgress,
    GlobalError,
}

impl ClientStatus {
    /// Boolean projection used when comparing against the desired flag
    pub fn is_registered(self) -> bool {
        matches!(self, ClientStatus::Registered)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ClientStatus::Saved => "SAVED",
            ClientStatus::RegistrationInProgress => "REGISTRATION_IN_PROGRESS",
            ClientStatus::Registered => "REGISTERED",
            ClientStatus::DeletionInProgress => "DELETION_IN_PROGRESS",
            ClientStatus::GlobalError => "GLOBAL_ERROR",
        }
    }
}

impl fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection type between the information system and the security server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionType {
    Http,
    Https,
    HttpsNoAuth,
}

/// Client record as returned by the API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub id: String,
    pub instance_id: String,
    #[serde(default)]
    pub member_name: Option<String>,
    pub member_class: String,
    pub member_code: String,
    #[serde(default)]
    pub subsystem_code: Option<String>,
    #[serde(default)]
    pub owner: bool,
    #[serde(default)]
    pub has_valid_local_sign_cert: bool,
    #[serde(default)]
    pub connection_type: Option<ConnectionType>,
    pub status: ClientStatus,
}

/// Body of `POST /clients`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientAdd {
    pub client: NewClient,
    pub ignore_warnings: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewClient {
    pub member_class: String,
    pub member_code: String,
    pub member_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subsystem_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<ConnectionType>,
}

/// Kind of a service description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServiceDescriptionType {
    Wsdl,
    Openapi3,
    Rest,
}

/// Service description owned by a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDescription {
    pub id: String,
    pub url: String,
    #[serde(rename = "type")]
    pub kind: ServiceDescriptionType,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default)]
    pub client_id: Option<String>,
}

impl ServiceDescription {
    pub fn is_wsdl(&self) -> bool {
        self.kind == ServiceDescriptionType::Wsdl
    }

    /// Finds a service by its code, with or without the version suffix
    pub fn service(&self, code: &str) -> Option<&Service> {
        self.services
            .iter()
            .find(|service| service.full_service_code == code || service.service_code == code)
    }
}

/// Operation inside a service description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub full_service_code: String,
    pub service_code: String,
    #[serde(default)]
    pub timeout: Option<u32>,
    #[serde(default)]
    pub ssl_auth: Option<bool>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Body of `POST /clients/{id}/service-descriptions`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceDescriptionAdd {
    pub url: String,
    #[serde(rename = "type")]
    pub kind: ServiceDescriptionType,
}

impl ServiceDescriptionAdd {
    pub fn wsdl(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: ServiceDescriptionType::Wsdl,
        }
    }
}

/// Body of `PATCH /services/{id}`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceUpdate {
    pub url: String,
    pub url_all: bool,
    pub timeout: u32,
    pub timeout_all: bool,
    pub ssl_auth: bool,
    pub ssl_auth_all: bool,
    pub ignore_warnings: bool,
}

impl ServiceUpdate {
    /// Whether an observed service already carries these settings
    pub fn is_applied_to(&self, service: &Service) -> bool {
        service.url.as_deref() == Some(self.url.as_str())
            && service.timeout == Some(self.timeout)
            && service.ssl_auth == Some(self.ssl_auth)
    }
}

/// Access right granted to a service client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessRight {
    pub service_code: String,
    #[serde(default)]
    pub service_title: Option<String>,
    #[serde(default)]
    pub rights_given_at: Option<DateTime<Utc>>,
}

/// Body of the access-right grant and revoke calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessRightItems {
    pub items: Vec<AccessRightItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessRightItem {
    pub service_code: String,
}

impl<S: Into<String>> FromIterator<S> for AccessRightItems {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            items: iter
                .into_iter()
                .map(|code| AccessRightItem {
                    service_code: code.into(),
                })
                .collect(),
        }
    }
}

impl AccessRightItems {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn service_codes(&self) -> Vec<&str> {
        self.items
            .iter()
            .map(|item| item.service_code.as_str())
            .collect()
    }
}

/// Parses a response body, mapping shape mismatches to `MalformedResponse`
pub fn parse_response<T: DeserializeOwned>(operation: &str, body: &str) -> ControllerResult<T> {
    if body.trim().is_empty() {
        return Err(ControllerError::malformed_response(
            operation,
            "empty response body",
        ));
    }
    serde_json::from_str(body).map_err(|e| ControllerError::malformed_response(operation, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    fn client_json(status: &str) -> serde_json::Value {
        json!({
            "id": "FI-TEST:GOV:0245437-2:palveluvayla",
            "instance_id": "FI-TEST",
            "member_name": "Opetushallitus",
            "member_class": "GOV",
            "member_code": "0245437-2",
            "subsystem_code": "palveluvayla",
            "owner": false,
            "has_valid_local_sign_cert": true,
            "connection_type": "HTTPS_NO_AUTH",
            "status": status
        })
    }

    #[test]
    fn test_subsystem_id_round_trip() {
        let id = SubsystemId::new("FI-TEST", "GOV", "0245437-2", "palveluvayla");
        assert_eq!(id.to_string(), "FI-TEST:GOV:0245437-2:palveluvayla");
        assert_eq!(id.to_string().parse::<SubsystemId>().unwrap(), id);
    }

    #[rstest]
    #[case("FI-TEST:GOV:0245437-2")]
    #[case("FI-TEST:GOV::palveluvayla")]
    #[case("a:b:c:d:e")]
    #[case("")]
    fn test_subsystem_id_rejects_malformed(#[case] raw: &str) {
        assert!(raw.parse::<SubsystemId>().is_err());
    }

    #[rstest]
    #[case(ClientStatus::Saved, false)]
    #[case(ClientStatus::RegistrationInProgress, false)]
    #[case(ClientStatus::Registered, true)]
    #[case(ClientStatus::DeletionInProgress, false)]
    #[case(ClientStatus::GlobalError, false)]
    fn test_status_projection(#[case] status: ClientStatus, #[case] registered: bool) {
        assert_eq!(status.is_registered(), registered);
    }

    #[test]
    fn test_parse_client() {
        let body = client_json("REGISTRATION_IN_PROGRESS").to_string();
        let client: Client = parse_response("get-client", &body).unwrap();
        assert_eq!(client.status, ClientStatus::RegistrationInProgress);
        assert_eq!(client.connection_type, Some(ConnectionType::HttpsNoAuth));
        assert_eq!(client.subsystem_code.as_deref(), Some("palveluvayla"));
    }

    #[test]
    fn test_parse_rejects_unknown_status() {
        let body = client_json("PENDING").to_string();
        let err = parse_response::<Client>("get-client", &body).unwrap_err();
        assert_eq!(err.error_code(), "MALFORMED_RESPONSE");
    }

    #[test]
    fn test_parse_rejects_empty_body() {
        let err = parse_response::<Vec<AccessRight>>("get-access-rights", "").unwrap_err();
        assert!(err.to_string().contains("empty response body"));
    }

    #[test]
    fn test_parse_service_descriptions() {
        let body = json!([{
            "id": "12",
            "url": "https://example.com/service.wsdl",
            "type": "WSDL",
            "disabled": false,
            "disabled_notice": "",
            "refreshed_at": "2024-01-10T10:00:00Z",
            "client_id": "FI-TEST:GOV:0245437-2:palveluvayla",
            "services": [{
                "id": "FI-TEST:GOV:0245437-2:palveluvayla:getPerson.v1",
                "full_service_code": "getPerson.v1",
                "service_code": "getPerson",
                "timeout": 60,
                "ssl_auth": false,
                "url": "https://backend.example.com/person",
                "endpoints": []
            }]
        }])
        .to_string();

        let descriptions: Vec<ServiceDescription> =
            parse_response("list-service-descriptions", &body).unwrap();
        assert_eq!(descriptions.len(), 1);
        assert!(descriptions[0].is_wsdl());
        assert!(descriptions[0].service("getPerson").is_some());
        assert!(descriptions[0].service("getPerson.v1").is_some());
        assert!(descriptions[0].service("getAddress").is_none());
    }

    #[test]
    fn test_serialize_client_add() {
        let body = ClientAdd {
            client: NewClient {
                member_class: "GOV".to_string(),
                member_code: "0245437-2".to_string(),
                member_name: "Opetushallitus".to_string(),
                subsystem_code: Some("palveluvayla".to_string()),
                connection_type: None,
            },
            ignore_warnings: false,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({
                "client": {
                    "member_class": "GOV",
                    "member_code": "0245437-2",
                    "member_name": "Opetushallitus",
                    "subsystem_code": "palveluvayla"
                },
                "ignore_warnings": false
            })
        );
    }

    #[test]
    fn test_service_update_applied() {
        let update = ServiceUpdate {
            url: "https://backend.example.com/person".to_string(),
            url_all: false,
            timeout: 60,
            timeout_all: false,
            ssl_auth: false,
            ssl_auth_all: false,
            ignore_warnings: false,
        };
        let mut service = Service {
            id: "x".to_string(),
            full_service_code: "getPerson.v1".to_string(),
            service_code: "getPerson".to_string(),
            timeout: Some(60),
            ssl_auth: Some(false),
            url: Some("https://backend.example.com/person".to_string()),
        };
        assert!(update.is_applied_to(&service));

        service.url = Some("http://old.example.com".to_string());
        assert!(!update.is_applied_to(&service));
    }

    #[test]
    fn test_access_right_items_from_codes() {
        let items: AccessRightItems = ["a", "b"].into_iter().collect();
        assert_eq!(
            serde_json::to_value(&items).unwrap(),
            json!({"items": [{"service_code": "a"}, {"service_code": "b"}]})
        );
    }
}
