//! # Domain Model
//!
//! Typed representations of listeners, rules, conditions, and actions, plus
//! the desired endpoint state derived from a lifecycle event.
//!
//! Everything here is parsed once at the boundary; downstream code never
//! re-parses strings out of API responses.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::constants::{APP_ID_QUERY_KEY, LOGIN_PATH};

/// Listener protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum Protocol {
    #[serde(rename = "HTTP")]
    Http,
    #[serde(rename = "HTTPS")]
    Https,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http => write!(f, "HTTP"),
            Self::Https => write!(f, "HTTPS"),
        }
    }
}

/// A single rule condition; conditions on a rule are AND-combined
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleCondition {
    PathPattern { values: Vec<String> },
    HostHeader { values: Vec<String> },
    QueryString { key: String, value: String },
    HttpRequestMethod { values: Vec<String> },
}

impl RuleCondition {
    pub fn is_path_pattern(&self) -> bool {
        matches!(self, Self::PathPattern { .. })
    }

    pub fn is_host_header(&self) -> bool {
        matches!(self, Self::HostHeader { .. })
    }
}

/// Behavior when a request is not authenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnUnauthenticated {
    Deny,
    Authenticate,
}

/// OIDC provider configuration, sourced verbatim from a secret payload
/// and immutable for the duration of one reconciliation
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OidcConfig {
    pub issuer: String,
    pub user_info_endpoint: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub client_id: String,
    pub client_secret: String,
}

/// A rule action, executed by ascending order within a rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleAction {
    Forward {
        target_group_arn: String,
        order: Option<i32>,
    },
    AuthenticateOidc {
        config: OidcConfig,
        on_unauthenticated: OnUnauthenticated,
        order: Option<i32>,
    },
    FixedResponse {
        status_code: u16,
        message_body: String,
        order: Option<i32>,
    },
}

impl RuleAction {
    pub fn is_forward(&self) -> bool {
        matches!(self, Self::Forward { .. })
    }

    pub fn is_authenticate(&self) -> bool {
        matches!(self, Self::AuthenticateOidc { .. })
    }
}

/// Kinds of rule actions, used to locate rules by the actions they carry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Forward,
    AuthenticateOidc,
    FixedResponse,
}

impl RuleAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Forward { .. } => ActionKind::Forward,
            Self::AuthenticateOidc { .. } => ActionKind::AuthenticateOidc,
            Self::FixedResponse { .. } => ActionKind::FixedResponse,
        }
    }
}

/// A non-default listener rule as observed on the load balancer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub arn: String,
    pub priority: u16,
    pub conditions: Vec<RuleCondition>,
    pub actions: Vec<RuleAction>,
}

impl Rule {
    /// True when any path-pattern condition contains `path`
    pub fn matches_path(&self, path: &str) -> bool {
        self.conditions.iter().any(|c| match c {
            RuleCondition::PathPattern { values } => values.iter().any(|v| v == path),
            _ => false,
        })
    }

    /// True for the authentication login rule (path-pattern `/login`)
    pub fn is_login_rule(&self) -> bool {
        self.matches_path(LOGIN_PATH)
    }

    /// The tenant application identifier carried by this rule, if any
    pub fn app_id(&self) -> Option<&str> {
        self.conditions.iter().find_map(|c| match c {
            RuleCondition::QueryString { key, value } if key == APP_ID_QUERY_KEY => {
                Some(value.as_str())
            }
            _ => None,
        })
    }

    /// Target group of the first forward action, if any
    pub fn forward_target(&self) -> Option<&str> {
        self.actions.iter().find_map(|a| match a {
            RuleAction::Forward {
                target_group_arn, ..
            } => Some(target_group_arn.as_str()),
            _ => None,
        })
    }

    pub fn has_action(&self, kind: ActionKind) -> bool {
        self.actions.iter().any(|a| a.kind() == kind)
    }
}

/// Default action carried by a listener itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefaultAction {
    Forward {
        target_group_arn: String,
    },
    RedirectToHttps {
        port: u16,
    },
    FixedResponse {
        status_code: u16,
        message_body: String,
    },
}

impl DefaultAction {
    pub fn is_redirect(&self) -> bool {
        matches!(self, Self::RedirectToHttps { .. })
    }
}

/// A listener as observed on the load balancer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listener {
    pub arn: String,
    pub port: u16,
    pub protocol: Protocol,
    /// True when the listener's default action redirects rather than serves
    pub is_redirect: bool,
}

/// What to create when a listener is missing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerSpec {
    pub load_balancer_arn: String,
    pub port: u16,
    pub protocol: Protocol,
    pub certificate_arn: Option<String>,
    pub ssl_policy: Option<String>,
    pub default_action: DefaultAction,
}

/// Desired routing state for one endpoint, derived from lifecycle-event
/// properties exactly once at the boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointState {
    pub protocol: Protocol,
    pub endpoint_path: String,
    pub host_header: String,
    pub target_group_arn: String,
    pub load_balancer_arn: String,
    pub certificate_arn: Option<String>,
    pub auth_secret_arn: Option<String>,
    pub tenant_routing_enabled: bool,
    pub app_ids: BTreeSet<String>,
}

impl EndpointState {
    /// Authentication is enabled when a non-empty secret reference is present
    pub fn auth_enabled(&self) -> bool {
        self.auth_secret_arn
            .as_deref()
            .is_some_and(|arn| !arn.is_empty())
    }

    /// Listeners are never mutated in place: any change to the protocol,
    /// certificate, target group, or owning load balancer forces a
    /// delete-and-recreate
    pub fn requires_listener_replacement(&self, old: &EndpointState) -> bool {
        self.protocol != old.protocol
            || self.target_group_arn != old.target_group_arn
            || self.load_balancer_arn != old.load_balancer_arn
            || self.certificate_arn != old.certificate_arn
    }
}
