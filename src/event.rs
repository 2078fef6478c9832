//! # Lifecycle Event Adapter
//!
//! Translates the inbound provisioning event (a property bag plus a lifecycle
//! verb) into the reconciler's typed request model.
//!
//! Parsing happens exactly once here; downstream code never sees raw strings.
//! The appId list arrives comma-separated with possible whitespace and empty
//! entries, both dropped at this boundary.

use std::collections::BTreeSet;

use serde::Deserialize;

use crate::error::ReconcileError;
use crate::model::{EndpointState, Protocol};

/// Lifecycle verb carried by the event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum RequestType {
    Create,
    Update,
    Delete,
}

/// Wire shape of the resource properties
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceProperties {
    pub endpoint_path: String,
    pub domain_name: String,
    pub protocol: Protocol,
    pub target_group_ref: String,
    pub load_balancer_ref: String,
    #[serde(default)]
    pub certificate_ref: Option<String>,
    #[serde(default)]
    pub authentication_secret_ref: Option<String>,
    #[serde(default)]
    pub tenant_routing_enabled: bool,
    #[serde(default)]
    pub app_ids: String,
}

/// Wire shape of the lifecycle event
#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleEvent {
    #[serde(rename = "RequestType")]
    pub request_type: RequestType,
    #[serde(rename = "ResourceProperties")]
    pub resource_properties: ResourceProperties,
    #[serde(rename = "OldResourceProperties")]
    pub old_resource_properties: Option<ResourceProperties>,
}

/// The reconciler's internal request model
#[derive(Debug, Clone)]
pub enum LifecycleRequest {
    Create {
        desired: EndpointState,
    },
    Update {
        desired: EndpointState,
        previous: EndpointState,
    },
    Delete {
        desired: EndpointState,
    },
}

impl LifecycleRequest {
    /// Parse an event from its JSON wire form
    pub fn from_json(payload: &str) -> Result<Self, ReconcileError> {
        let event: LifecycleEvent = serde_json::from_str(payload)
            .map_err(|e| ReconcileError::Configuration(format!("malformed event: {e}")))?;
        Self::from_event(event)
    }

    pub fn from_event(event: LifecycleEvent) -> Result<Self, ReconcileError> {
        let desired = endpoint_state(&event.resource_properties);
        match event.request_type {
            RequestType::Create => Ok(Self::Create { desired }),
            RequestType::Delete => Ok(Self::Delete { desired }),
            RequestType::Update => {
                let old = event.old_resource_properties.ok_or_else(|| {
                    ReconcileError::Configuration(
                        "update event is missing OldResourceProperties".to_string(),
                    )
                })?;
                Ok(Self::Update {
                    desired,
                    previous: endpoint_state(&old),
                })
            }
        }
    }
}

fn endpoint_state(props: &ResourceProperties) -> EndpointState {
    EndpointState {
        protocol: props.protocol,
        endpoint_path: props.endpoint_path.clone(),
        host_header: props.domain_name.clone(),
        target_group_arn: props.target_group_ref.clone(),
        load_balancer_arn: props.load_balancer_ref.clone(),
        certificate_arn: none_if_empty(props.certificate_ref.as_deref()),
        auth_secret_arn: none_if_empty(props.authentication_secret_ref.as_deref()),
        tenant_routing_enabled: props.tenant_routing_enabled,
        app_ids: parse_app_ids(&props.app_ids),
    }
}

fn none_if_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Split the comma-separated appId list, trimming entries and dropping
/// empties
fn parse_app_ids(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_json(request_type: &str, extra: &str) -> String {
        format!(
            r#"{{
                "RequestType": "{request_type}",
                "ResourceProperties": {{
                    "endpointPath": "/collect",
                    "domainName": "example.com",
                    "protocol": "HTTPS",
                    "targetGroupRef": "tg-1",
                    "loadBalancerRef": "lb-1",
                    "certificateRef": "cert-1",
                    "tenantRoutingEnabled": true,
                    "appIds": " a, b ,,c "
                }}{extra}
            }}"#
        )
    }

    #[test]
    fn test_create_event_parses_typed_state() {
        let request = LifecycleRequest::from_json(&event_json("Create", "")).unwrap();
        match request {
            LifecycleRequest::Create { desired } => {
                assert_eq!(desired.protocol, Protocol::Https);
                assert_eq!(desired.endpoint_path, "/collect");
                assert_eq!(desired.host_header, "example.com");
                assert!(desired.tenant_routing_enabled);
                assert_eq!(
                    desired.app_ids,
                    ["a", "b", "c"].iter().map(|s| s.to_string()).collect()
                );
                assert!(!desired.auth_enabled());
            }
            other => panic!("expected create request, got {other:?}"),
        }
    }

    #[test]
    fn test_update_event_requires_old_properties() {
        let err = LifecycleRequest::from_json(&event_json("Update", "")).unwrap_err();
        assert!(matches!(err, ReconcileError::Configuration(_)));
    }

    #[test]
    fn test_update_event_with_old_properties() {
        let old = r#",
            "OldResourceProperties": {
                "endpointPath": "/old",
                "domainName": "old.example.com",
                "protocol": "HTTP",
                "targetGroupRef": "tg-0",
                "loadBalancerRef": "lb-1",
                "appIds": ""
            }"#;
        let request = LifecycleRequest::from_json(&event_json("Update", old)).unwrap();
        match request {
            LifecycleRequest::Update { desired, previous } => {
                assert_eq!(previous.endpoint_path, "/old");
                assert_eq!(previous.protocol, Protocol::Http);
                assert!(previous.app_ids.is_empty());
                assert!(desired.requires_listener_replacement(&previous));
            }
            other => panic!("expected update request, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_refs_become_none() {
        let payload = r#"{
            "RequestType": "Create",
            "ResourceProperties": {
                "endpointPath": "/collect",
                "domainName": "example.com",
                "protocol": "HTTP",
                "targetGroupRef": "tg-1",
                "loadBalancerRef": "lb-1",
                "certificateRef": "",
                "authenticationSecretRef": "  "
            }
        }"#;
        let request = LifecycleRequest::from_json(payload).unwrap();
        match request {
            LifecycleRequest::Create { desired } => {
                assert_eq!(desired.certificate_arn, None);
                assert_eq!(desired.auth_secret_arn, None);
                assert!(!desired.tenant_routing_enabled);
            }
            other => panic!("expected create request, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_event_is_configuration_error() {
        let err = LifecycleRequest::from_json("{ not json").unwrap_err();
        assert!(matches!(err, ReconcileError::Configuration(_)));
    }

    #[test]
    fn test_app_ids_all_whitespace_is_empty() {
        assert!(parse_app_ids(" , ,  ").is_empty());
        assert!(parse_app_ids("").is_empty());
    }
}
