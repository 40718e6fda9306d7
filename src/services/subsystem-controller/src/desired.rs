//! Desired state of a client subsystem
//!
//! The only externally supplied input of a reconciliation. Everything else is
//! observed from the security server.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::xroad::models::{ClientAdd, ConnectionType, NewClient, SubsystemId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredState {
    pub identity: SubsystemId,
    pub member_name: String,
    #[serde(default)]
    pub connection_type: Option<ConnectionType>,
    pub registered: bool,
    #[serde(default)]
    pub wsdl_services: Vec<WsdlService>,
    #[serde(default)]
    pub allowed_subsystems: Vec<AllowedSubsystem>,
}

/// WSDL service description and the endpoints of its services
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WsdlService {
    pub url: String,
    #[serde(default)]
    pub service_endpoints: Vec<ServiceEndpoint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub service_code: String,
    pub endpoint: String,
}

/// Consumer subsystem and the service codes it may call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowedSubsystem {
    pub consumer_id: String,
    #[serde(default)]
    pub service_ids: Vec<String>,
}

impl DesiredState {
    pub fn client_id(&self) -> String {
        self.identity.to_string()
    }

    /// Body for creating the client when it does not exist yet
    pub fn client_add(&self) -> ClientAdd {
        ClientAdd {
            client: NewClient {
                member_class: self.identity.member_class.clone(),
                member_code: self.identity.member_code.clone(),
                member_name: self.member_name.clone(),
                subsystem_code: Some(self.identity.subsystem_code.clone()),
                connection_type: self.connection_type,
            },
            ignore_warnings: false,
        }
    }

    /// Desired service codes per consumer, merging repeated consumers
    pub fn access_grants(&self) -> BTreeMap<&str, BTreeSet<&str>> {
        let mut grants: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for allowed in &self.allowed_subsystems {
            grants
                .entry(allowed.consumer_id.as_str())
                .or_default()
                .extend(allowed.service_ids.iter().map(String::as_str));
        }
        grants
    }

    pub fn wsdl_urls(&self) -> BTreeSet<&str> {
        self.wsdl_services.iter().map(|s| s.url.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn desired() -> DesiredState {
        DesiredState {
            identity: SubsystemId::new("FI-TEST", "GOV", "0245437-2", "palveluvayla"),
            member_name: "Opetushallitus".to_string(),
            connection_type: Some(ConnectionType::Https),
            registered: true,
            wsdl_services: vec![],
            allowed_subsystems: vec![
                AllowedSubsystem {
                    consumer_id: "FI-TEST:GOV:1:a".to_string(),
                    service_ids: vec!["getPerson".to_string()],
                },
                AllowedSubsystem {
                    consumer_id: "FI-TEST:GOV:1:a".to_string(),
                    service_ids: vec!["getAddress".to_string(), "getPerson".to_string()],
                },
                AllowedSubsystem {
                    consumer_id: "FI-TEST:GOV:2:b".to_string(),
                    service_ids: vec![],
                },
            ],
        }
    }

    #[test]
    fn test_client_add_from_identity() {
        let add = desired().client_add();
        assert_eq!(add.client.member_class, "GOV");
        assert_eq!(add.client.subsystem_code.as_deref(), Some("palveluvayla"));
        assert_eq!(add.client.connection_type, Some(ConnectionType::Https));
        assert!(!add.ignore_warnings);
    }

    #[test]
    fn test_access_grants_merge_repeated_consumers() {
        let desired = desired();
        let grants = desired.access_grants();
        assert_eq!(grants.len(), 2);
        assert_eq!(
            grants["FI-TEST:GOV:1:a"],
            BTreeSet::from(["getAddress", "getPerson"])
        );
        assert!(grants["FI-TEST:GOV:2:b"].is_empty());
    }
}
