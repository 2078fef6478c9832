//! # Rule Condition/Action Builders
//!
//! Pure constructors for the condition sets and action chains the reconciler
//! attaches to listener rules.
//!
//! Action chains are fixed by convention:
//! - authenticated forward: `[authenticate(order 1, deny), forward(order 2)]`
//! - authenticated login: `[authenticate(order 1, authenticate), fixed-response 200 (order 2)]`

use crate::constants::{
    APP_ID_QUERY_KEY, LOGIN_OK_MESSAGE_BODY, LOGIN_OK_STATUS_CODE, LOGIN_PATH,
};
use crate::model::{OidcConfig, OnUnauthenticated, Protocol, RuleAction, RuleCondition};

/// Base forward condition: path-pattern, plus host-header only over HTTPS
pub fn base_forward_conditions(
    protocol: Protocol,
    endpoint_path: &str,
    host_header: &str,
) -> Vec<RuleCondition> {
    let mut conditions = vec![RuleCondition::PathPattern {
        values: vec![endpoint_path.to_string()],
    }];
    if protocol == Protocol::Https {
        conditions.push(RuleCondition::HostHeader {
            values: vec![host_header.to_string()],
        });
    }
    conditions
}

/// Query-string condition selecting one tenant application identifier
pub fn app_id_condition(app_id: &str) -> RuleCondition {
    RuleCondition::QueryString {
        key: APP_ID_QUERY_KEY.to_string(),
        value: app_id.to_string(),
    }
}

/// Conditions of the authentication login rule: GET on the login path
pub fn auth_login_conditions() -> Vec<RuleCondition> {
    vec![
        RuleCondition::PathPattern {
            values: vec![LOGIN_PATH.to_string()],
        },
        RuleCondition::HttpRequestMethod {
            values: vec!["GET".to_string()],
        },
    ]
}

/// Forward action chain: an authenticate step is prepended when OIDC
/// configuration is supplied
pub fn forward_actions(oidc: Option<&OidcConfig>, target_group_arn: &str) -> Vec<RuleAction> {
    let mut actions = Vec::new();
    if let Some(config) = oidc {
        actions.push(RuleAction::AuthenticateOidc {
            config: config.clone(),
            on_unauthenticated: OnUnauthenticated::Deny,
            order: Some(1),
        });
    }
    actions.push(RuleAction::Forward {
        target_group_arn: target_group_arn.to_string(),
        order: Some(2),
    });
    actions
}

/// Login action chain: authenticate interactively, then confirm with a 200
pub fn auth_login_actions(oidc: &OidcConfig) -> Vec<RuleAction> {
    vec![
        RuleAction::AuthenticateOidc {
            config: oidc.clone(),
            on_unauthenticated: OnUnauthenticated::Authenticate,
            order: Some(1),
        },
        RuleAction::FixedResponse {
            status_code: LOGIN_OK_STATUS_CODE,
            message_body: LOGIN_OK_MESSAGE_BODY.to_string(),
            order: Some(2),
        },
    ]
}
