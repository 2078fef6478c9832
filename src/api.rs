//! # Remote API Clients
//!
//! Typed interfaces over the Elastic Load Balancing v2 and Secrets Manager
//! APIs, with concrete AWS SDK implementations.
//!
//! The traits allow for mocking in tests while keeping the concrete
//! implementations for production use. All SDK wire types are converted to
//! the domain model at this boundary; nothing above this layer touches SDK
//! structs.

use async_trait::async_trait;
use aws_sdk_elasticloadbalancingv2::types as elb;
use aws_sdk_elasticloadbalancingv2::Client as ElbClient;
use aws_sdk_secretsmanager::Client as SecretsClient;
use tracing::debug;

use crate::error::ReconcileError;
use crate::model::{
    DefaultAction, Listener, ListenerSpec, OidcConfig, OnUnauthenticated, Protocol, Rule,
    RuleAction, RuleCondition,
};

/// Trait over the load-balancer control plane
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ElasticLoadBalancing: Send + Sync {
    /// All non-default rules attached to a listener
    async fn describe_rules(&self, listener_arn: &str) -> Result<Vec<Rule>, ReconcileError>;

    async fn create_rule(
        &self,
        listener_arn: &str,
        priority: u16,
        conditions: Vec<RuleCondition>,
        actions: Vec<RuleAction>,
    ) -> Result<(), ReconcileError>;

    /// Replace a rule's conditions, leaving its actions untouched
    async fn set_rule_conditions(
        &self,
        rule_arn: &str,
        conditions: Vec<RuleCondition>,
    ) -> Result<(), ReconcileError>;

    /// Replace a rule's actions, leaving its conditions untouched
    async fn set_rule_actions(
        &self,
        rule_arn: &str,
        actions: Vec<RuleAction>,
    ) -> Result<(), ReconcileError>;

    async fn delete_rule(&self, rule_arn: &str) -> Result<(), ReconcileError>;

    async fn describe_listeners(
        &self,
        load_balancer_arn: &str,
    ) -> Result<Vec<Listener>, ReconcileError>;

    /// Returns the new listener's ARN
    async fn create_listener(&self, spec: ListenerSpec) -> Result<String, ReconcileError>;

    async fn delete_listener(&self, listener_arn: &str) -> Result<(), ReconcileError>;

    /// Overwrite the listener's default action
    async fn set_default_action(
        &self,
        listener_arn: &str,
        action: DefaultAction,
    ) -> Result<(), ReconcileError>;
}

/// Trait over the secret store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// The secret's string payload
    async fn secret_value(&self, secret_arn: &str) -> Result<String, ReconcileError>;
}

/// AWS SDK implementation of [`ElasticLoadBalancing`]
#[derive(Debug, Clone)]
pub struct AwsElasticLoadBalancing {
    client: ElbClient,
}

impl AwsElasticLoadBalancing {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: ElbClient::new(config),
        }
    }
}

#[async_trait]
impl ElasticLoadBalancing for AwsElasticLoadBalancing {
    async fn describe_rules(&self, listener_arn: &str) -> Result<Vec<Rule>, ReconcileError> {
        let response = self
            .client
            .describe_rules()
            .listener_arn(listener_arn)
            .send()
            .await
            .map_err(ReconcileError::remote)?;

        let mut rules = Vec::new();
        for sdk_rule in response.rules() {
            if let Some(rule) = from_sdk_rule(sdk_rule)? {
                rules.push(rule);
            }
        }
        debug!(listener_arn, count = rules.len(), "Described listener rules");
        Ok(rules)
    }

    async fn create_rule(
        &self,
        listener_arn: &str,
        priority: u16,
        conditions: Vec<RuleCondition>,
        actions: Vec<RuleAction>,
    ) -> Result<(), ReconcileError> {
        let sdk_actions: Vec<elb::Action> = actions.iter().map(to_sdk_action).collect();
        self.client
            .create_rule()
            .listener_arn(listener_arn)
            .priority(i32::from(priority))
            .set_conditions(Some(conditions.iter().map(to_sdk_condition).collect()))
            .set_actions(Some(sdk_actions))
            .send()
            .await
            .map_err(ReconcileError::remote)?;
        Ok(())
    }

    async fn set_rule_conditions(
        &self,
        rule_arn: &str,
        conditions: Vec<RuleCondition>,
    ) -> Result<(), ReconcileError> {
        self.client
            .modify_rule()
            .rule_arn(rule_arn)
            .set_conditions(Some(conditions.iter().map(to_sdk_condition).collect()))
            .send()
            .await
            .map_err(ReconcileError::remote)?;
        Ok(())
    }

    async fn set_rule_actions(
        &self,
        rule_arn: &str,
        actions: Vec<RuleAction>,
    ) -> Result<(), ReconcileError> {
        let sdk_actions: Vec<elb::Action> = actions.iter().map(to_sdk_action).collect();
        self.client
            .modify_rule()
            .rule_arn(rule_arn)
            .set_actions(Some(sdk_actions))
            .send()
            .await
            .map_err(ReconcileError::remote)?;
        Ok(())
    }

    async fn delete_rule(&self, rule_arn: &str) -> Result<(), ReconcileError> {
        self.client
            .delete_rule()
            .rule_arn(rule_arn)
            .send()
            .await
            .map_err(ReconcileError::remote)?;
        Ok(())
    }

    async fn describe_listeners(
        &self,
        load_balancer_arn: &str,
    ) -> Result<Vec<Listener>, ReconcileError> {
        let response = self
            .client
            .describe_listeners()
            .load_balancer_arn(load_balancer_arn)
            .send()
            .await
            .map_err(ReconcileError::remote)?;

        Ok(response.listeners().iter().map(from_sdk_listener).collect())
    }

    async fn create_listener(&self, spec: ListenerSpec) -> Result<String, ReconcileError> {
        let mut request = self
            .client
            .create_listener()
            .load_balancer_arn(&spec.load_balancer_arn)
            .port(i32::from(spec.port))
            .protocol(match spec.protocol {
                Protocol::Http => elb::ProtocolEnum::Http,
                Protocol::Https => elb::ProtocolEnum::Https,
            })
            .default_actions(to_sdk_default_action(&spec.default_action));
        if let Some(certificate_arn) = &spec.certificate_arn {
            request = request.certificates(
                elb::Certificate::builder()
                    .certificate_arn(certificate_arn)
                    .build(),
            );
        }
        if let Some(ssl_policy) = &spec.ssl_policy {
            request = request.ssl_policy(ssl_policy);
        }

        let response = request.send().await.map_err(ReconcileError::remote)?;
        first_listener_arn(response.listeners())
    }

    async fn delete_listener(&self, listener_arn: &str) -> Result<(), ReconcileError> {
        self.client
            .delete_listener()
            .listener_arn(listener_arn)
            .send()
            .await
            .map_err(ReconcileError::remote)?;
        Ok(())
    }

    async fn set_default_action(
        &self,
        listener_arn: &str,
        action: DefaultAction,
    ) -> Result<(), ReconcileError> {
        self.client
            .modify_listener()
            .listener_arn(listener_arn)
            .default_actions(to_sdk_default_action(&action))
            .send()
            .await
            .map_err(ReconcileError::remote)?;
        Ok(())
    }
}

/// AWS SDK implementation of [`SecretStore`]
#[derive(Debug, Clone)]
pub struct AwsSecretStore {
    client: SecretsClient,
}

impl AwsSecretStore {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: SecretsClient::new(config),
        }
    }
}

#[async_trait]
impl SecretStore for AwsSecretStore {
    async fn secret_value(&self, secret_arn: &str) -> Result<String, ReconcileError> {
        let response = self
            .client
            .get_secret_value()
            .secret_id(secret_arn)
            .send()
            .await
            .map_err(ReconcileError::remote)?;
        response
            .secret_string()
            .map(str::to_string)
            .ok_or_else(|| {
                ReconcileError::Configuration(format!(
                    "secret {secret_arn} has no string payload"
                ))
            })
    }
}

fn to_sdk_condition(condition: &RuleCondition) -> elb::RuleCondition {
    match condition {
        RuleCondition::PathPattern { values } => elb::RuleCondition::builder()
            .field("path-pattern")
            .path_pattern_config(
                elb::PathPatternConditionConfig::builder()
                    .set_values(Some(values.clone()))
                    .build(),
            )
            .build(),
        RuleCondition::HostHeader { values } => elb::RuleCondition::builder()
            .field("host-header")
            .host_header_config(
                elb::HostHeaderConditionConfig::builder()
                    .set_values(Some(values.clone()))
                    .build(),
            )
            .build(),
        RuleCondition::QueryString { key, value } => elb::RuleCondition::builder()
            .field("query-string")
            .query_string_config(
                elb::QueryStringConditionConfig::builder()
                    .values(
                        elb::QueryStringKeyValuePair::builder()
                            .key(key)
                            .value(value)
                            .build(),
                    )
                    .build(),
            )
            .build(),
        RuleCondition::HttpRequestMethod { values } => elb::RuleCondition::builder()
            .field("http-request-method")
            .http_request_method_config(
                elb::HttpRequestMethodConditionConfig::builder()
                    .set_values(Some(values.clone()))
                    .build(),
            )
            .build(),
    }
}

fn from_sdk_condition(condition: &elb::RuleCondition) -> Option<RuleCondition> {
    match condition.field() {
        Some("path-pattern") => Some(RuleCondition::PathPattern {
            values: condition
                .path_pattern_config()
                .map(|c| c.values().to_vec())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| condition.values().to_vec()),
        }),
        Some("host-header") => Some(RuleCondition::HostHeader {
            values: condition
                .host_header_config()
                .map(|c| c.values().to_vec())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| condition.values().to_vec()),
        }),
        Some("query-string") => {
            let pair = condition
                .query_string_config()?
                .values()
                .iter()
                .find(|p| p.key().is_some() && p.value().is_some())?;
            Some(RuleCondition::QueryString {
                key: pair.key().unwrap_or_default().to_string(),
                value: pair.value().unwrap_or_default().to_string(),
            })
        }
        Some("http-request-method") => Some(RuleCondition::HttpRequestMethod {
            values: condition
                .http_request_method_config()
                .map(|c| c.values().to_vec())
                .unwrap_or_default(),
        }),
        _ => None,
    }
}

fn to_sdk_action(action: &RuleAction) -> elb::Action {
    match action {
        RuleAction::Forward {
            target_group_arn,
            order,
        } => {
            let mut builder = elb::Action::builder()
                .r#type(elb::ActionTypeEnum::Forward)
                .target_group_arn(target_group_arn);
            if let Some(order) = order {
                builder = builder.order(*order);
            }
            builder.build()
        }
        RuleAction::AuthenticateOidc {
            config,
            on_unauthenticated,
            order,
        } => {
            let oidc = elb::AuthenticateOidcActionConfig::builder()
                .issuer(&config.issuer)
                .authorization_endpoint(&config.authorization_endpoint)
                .token_endpoint(&config.token_endpoint)
                .user_info_endpoint(&config.user_info_endpoint)
                .client_id(&config.client_id)
                .client_secret(&config.client_secret)
                .on_unauthenticated_request(match on_unauthenticated {
                    OnUnauthenticated::Deny => {
                        elb::AuthenticateOidcActionConditionalBehaviorEnum::Deny
                    }
                    OnUnauthenticated::Authenticate => {
                        elb::AuthenticateOidcActionConditionalBehaviorEnum::Authenticate
                    }
                })
                .build();
            let mut builder = elb::Action::builder()
                .r#type(elb::ActionTypeEnum::AuthenticateOidc)
                .authenticate_oidc_config(oidc);
            if let Some(order) = order {
                builder = builder.order(*order);
            }
            builder.build()
        }
        RuleAction::FixedResponse {
            status_code,
            message_body,
            order,
        } => {
            let fixed = elb::FixedResponseActionConfig::builder()
                .status_code(status_code.to_string())
                .message_body(message_body)
                .content_type("text/plain")
                .build();
            let mut builder = elb::Action::builder()
                .r#type(elb::ActionTypeEnum::FixedResponse)
                .fixed_response_config(fixed);
            if let Some(order) = order {
                builder = builder.order(*order);
            }
            builder.build()
        }
    }
}

fn from_sdk_action(action: &elb::Action) -> Option<RuleAction> {
    match action.r#type()? {
        elb::ActionTypeEnum::Forward => Some(RuleAction::Forward {
            target_group_arn: action.target_group_arn().unwrap_or_default().to_string(),
            order: action.order(),
        }),
        elb::ActionTypeEnum::AuthenticateOidc => {
            let config = action.authenticate_oidc_config()?;
            // ClientSecret is withheld by describe-rules; it is always
            // rewritten from the secret store on modification
            Some(RuleAction::AuthenticateOidc {
                config: OidcConfig {
                    issuer: config.issuer().unwrap_or_default().to_string(),
                    user_info_endpoint: config.user_info_endpoint().unwrap_or_default().to_string(),
                    authorization_endpoint: config
                        .authorization_endpoint()
                        .unwrap_or_default()
                        .to_string(),
                    token_endpoint: config.token_endpoint().unwrap_or_default().to_string(),
                    client_id: config.client_id().unwrap_or_default().to_string(),
                    client_secret: config.client_secret().unwrap_or_default().to_string(),
                },
                on_unauthenticated: match config.on_unauthenticated_request() {
                    Some(elb::AuthenticateOidcActionConditionalBehaviorEnum::Authenticate) => {
                        OnUnauthenticated::Authenticate
                    }
                    _ => OnUnauthenticated::Deny,
                },
                order: action.order(),
            })
        }
        elb::ActionTypeEnum::FixedResponse => {
            let config = action.fixed_response_config()?;
            Some(RuleAction::FixedResponse {
                status_code: config
                    .status_code()
                    .and_then(|c| c.parse().ok())
                    .unwrap_or_default(),
                message_body: config.message_body().unwrap_or_default().to_string(),
                order: action.order(),
            })
        }
        _ => None,
    }
}

fn to_sdk_default_action(action: &DefaultAction) -> elb::Action {
    match action {
        DefaultAction::Forward { target_group_arn } => elb::Action::builder()
            .r#type(elb::ActionTypeEnum::Forward)
            .target_group_arn(target_group_arn)
            .build(),
        DefaultAction::RedirectToHttps { port } => {
            let redirect = elb::RedirectActionConfig::builder()
                .status_code(elb::RedirectActionStatusCodeEnum::Http301)
                .protocol("HTTPS")
                .port(port.to_string())
                .build();
            elb::Action::builder()
                .r#type(elb::ActionTypeEnum::Redirect)
                .redirect_config(redirect)
                .build()
        }
        DefaultAction::FixedResponse {
            status_code,
            message_body,
        } => {
            let fixed = elb::FixedResponseActionConfig::builder()
                .status_code(status_code.to_string())
                .message_body(message_body)
                .content_type("text/plain")
                .build();
            elb::Action::builder()
                .r#type(elb::ActionTypeEnum::FixedResponse)
                .fixed_response_config(fixed)
                .build()
        }
    }
}

fn first_listener_arn(listeners: &[elb::Listener]) -> Result<String, ReconcileError> {
    listeners
        .first()
        .and_then(|l| l.listener_arn())
        .map(str::to_string)
        .ok_or_else(|| {
            ReconcileError::RemoteApi(anyhow::anyhow!(
                "create-listener response contained no listener ARN"
            ))
        })
}

fn from_sdk_rule(rule: &elb::Rule) -> Result<Option<Rule>, ReconcileError> {
    if rule.is_default().unwrap_or(false) {
        return Ok(None);
    }
    let priority = rule
        .priority()
        .and_then(|p| p.parse::<u16>().ok())
        .ok_or_else(|| {
            ReconcileError::Configuration(format!(
                "rule {} has an unparsable priority",
                rule.rule_arn().unwrap_or("<unknown>")
            ))
        })?;
    Ok(Some(Rule {
        arn: rule.rule_arn().unwrap_or_default().to_string(),
        priority,
        conditions: rule.conditions().iter().filter_map(from_sdk_condition).collect(),
        actions: rule.actions().iter().filter_map(from_sdk_action).collect(),
    }))
}

fn from_sdk_listener(listener: &elb::Listener) -> Listener {
    let is_redirect = listener
        .default_actions()
        .first()
        .and_then(|a| a.r#type())
        .is_some_and(|t| *t == elb::ActionTypeEnum::Redirect);
    Listener {
        arn: listener.listener_arn().unwrap_or_default().to_string(),
        port: listener.port().and_then(|p| u16::try_from(p).ok()).unwrap_or_default(),
        protocol: match listener.protocol() {
            Some(elb::ProtocolEnum::Https) => Protocol::Https,
            _ => Protocol::Http,
        },
        is_redirect,
    }
}
