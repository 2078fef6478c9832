//! # Reconciler
//!
//! The Create/Update/Delete state machine. Each lifecycle verb runs once and
//! terminates; nothing is persisted between invocations beyond what can be
//! re-derived from the load balancer itself.
//!
//! Every create step checks for existing presence first, so a retried
//! invocation after a partial failure converges instead of duplicating.
//! Create and Update both end with an unconditional overwrite of the
//! listener's default action to a fixed 403: traffic matching no explicit
//! rule is rejected, never silently forwarded.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::api::{ElasticLoadBalancing, SecretStore};
use crate::constants::{
    AUTH_LOGIN_PRIORITY, DEFAULT_ACTION_MESSAGE_BODY, DEFAULT_ACTION_STATUS_CODE,
    DEFAULT_FORWARD_PRIORITY, DEFAULT_HEALTH_CHECK_PATH, FALLBACK_MESSAGE_BODY, FALLBACK_PRIORITY,
    FALLBACK_STATUS_CODE, TENANT_PRIORITY_FLOOR,
};
use crate::error::ReconcileError;
use crate::event::LifecycleRequest;
use crate::listener::{DeletionPoll, ListenerManager};
use crate::model::{
    ActionKind, DefaultAction, EndpointState, OidcConfig, RuleAction, RuleCondition,
};
use crate::oidc::OidcResolver;
use crate::priority::PriorityAllocator;
use crate::repository::RuleRepository;
use crate::rules::{
    app_id_condition, auth_login_actions, auth_login_conditions, base_forward_conditions,
    forward_actions,
};

/// Runtime settings, overridable in tests
#[derive(Debug, Clone)]
pub struct Settings {
    pub health_check_path: String,
    pub deletion_poll: DeletionPoll,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            health_check_path: DEFAULT_HEALTH_CHECK_PATH.to_string(),
            deletion_poll: DeletionPoll::default(),
        }
    }
}

impl Settings {
    /// Read settings from the environment (`HEALTH_CHECK_PATH`)
    pub fn from_env() -> Self {
        let health_check_path = std::env::var("HEALTH_CHECK_PATH")
            .unwrap_or_else(|_| DEFAULT_HEALTH_CHECK_PATH.to_string());
        Self {
            health_check_path,
            deletion_poll: DeletionPoll::default(),
        }
    }
}

/// Converges a load balancer's listener and rule set to a desired endpoint
/// state, once per lifecycle event
pub struct Reconciler {
    elb: Arc<dyn ElasticLoadBalancing>,
    secrets: Arc<dyn SecretStore>,
    settings: Settings,
}

impl Reconciler {
    pub fn new(
        elb: Arc<dyn ElasticLoadBalancing>,
        secrets: Arc<dyn SecretStore>,
        settings: Settings,
    ) -> Self {
        Self {
            elb,
            secrets,
            settings,
        }
    }

    /// Apply one lifecycle request end to end
    pub async fn apply(&self, request: LifecycleRequest) -> Result<(), ReconcileError> {
        match request {
            LifecycleRequest::Create { desired } => {
                info!(load_balancer_arn = %desired.load_balancer_arn, "Reconciling create");
                let listener_arn = self.handle_create(&desired).await?;
                self.overwrite_default_action(&listener_arn).await
            }
            LifecycleRequest::Update { desired, previous } => {
                info!(load_balancer_arn = %desired.load_balancer_arn, "Reconciling update");
                let listener_arn = self.handle_update(&desired, &previous).await?;
                self.overwrite_default_action(&listener_arn).await
            }
            LifecycleRequest::Delete { desired } => {
                info!(load_balancer_arn = %desired.load_balancer_arn, "Reconciling delete");
                self.handle_delete(&desired).await
            }
        }
    }

    async fn handle_create(&self, desired: &EndpointState) -> Result<String, ReconcileError> {
        let manager = ListenerManager::new(self.elb.as_ref(), self.settings.deletion_poll);
        let resolver = OidcResolver::new(self.secrets.as_ref());

        let listener_arn = manager.ensure_listener(desired).await?;
        let oidc = self.resolve_auth(&resolver, desired).await?;
        self.ensure_base_rules(&listener_arn, desired, oidc.as_ref())
            .await?;

        if desired.tenant_routing_enabled {
            self.reconcile_tenants(&resolver, &listener_arn, desired)
                .await?;
        }
        Ok(listener_arn)
    }

    async fn handle_update(
        &self,
        desired: &EndpointState,
        previous: &EndpointState,
    ) -> Result<String, ReconcileError> {
        let manager = ListenerManager::new(self.elb.as_ref(), self.settings.deletion_poll);
        let resolver = OidcResolver::new(self.secrets.as_ref());

        let listener_arn = if desired.requires_listener_replacement(previous) {
            // Listeners are never mutated in place; the old one goes away
            // with all of its rules and a fresh one is built from scratch.
            info!("Replacing listener");
            manager
                .delete_listeners(&previous.load_balancer_arn)
                .await?;
            let listener_arn = manager.ensure_listener(desired).await?;
            let oidc = self.resolve_auth(&resolver, desired).await?;
            self.ensure_base_rules(&listener_arn, desired, oidc.as_ref())
                .await?;
            listener_arn
        } else {
            let listener = manager
                .discover_main_listener(&desired.load_balancer_arn)
                .await?
                .ok_or_else(|| {
                    ReconcileError::MissingListener(desired.load_balancer_arn.clone())
                })?;

            if desired.endpoint_path != previous.endpoint_path
                || desired.host_header != previous.host_header
            {
                self.rewrite_path_and_host(&listener.arn, desired, previous)
                    .await?;
            } else if desired.auth_secret_arn != previous.auth_secret_arn {
                self.reconcile_auth(&resolver, &listener.arn, desired, previous)
                    .await?;
            }
            listener.arn
        };

        if desired.tenant_routing_enabled {
            self.reconcile_tenants(&resolver, &listener_arn, desired)
                .await?;
        }
        Ok(listener_arn)
    }

    async fn handle_delete(&self, desired: &EndpointState) -> Result<(), ReconcileError> {
        let manager = ListenerManager::new(self.elb.as_ref(), self.settings.deletion_poll);

        // A re-invoked delete may find the listener already gone; teardown
        // then only has to confirm the listener list is empty.
        if let Some(listener) = manager
            .discover_main_listener(&desired.load_balancer_arn)
            .await?
        {
            let rules = RuleRepository::new(self.elb.as_ref())
                .load(&listener.arn)
                .await?;
            for rule in &rules.rules {
                debug!(rule_arn = %rule.arn, "Deleting rule");
                self.elb.delete_rule(&rule.arn).await?;
            }
        }
        manager.delete_listeners(&desired.load_balancer_arn).await
    }

    /// Resolve OIDC configuration when authentication is enabled
    async fn resolve_auth(
        &self,
        resolver: &OidcResolver<'_>,
        desired: &EndpointState,
    ) -> Result<Option<OidcConfig>, ReconcileError> {
        match desired.auth_secret_arn.as_deref().filter(|a| !a.is_empty()) {
            Some(secret_arn) => Ok(Some(resolver.resolve(secret_arn).await?)),
            None => Ok(None),
        }
    }

    /// Create the default-forward rule and, when authentication is enabled,
    /// the login rule, skipping bands that are already occupied
    async fn ensure_base_rules(
        &self,
        listener_arn: &str,
        desired: &EndpointState,
        oidc: Option<&OidcConfig>,
    ) -> Result<(), ReconcileError> {
        let rules = RuleRepository::new(self.elb.as_ref())
            .load(listener_arn)
            .await?;
        let bands = rules.bands()?;

        if bands.default_forward.is_none() {
            info!("Creating default forward rule");
            self.elb
                .create_rule(
                    listener_arn,
                    DEFAULT_FORWARD_PRIORITY,
                    base_forward_conditions(
                        desired.protocol,
                        &desired.endpoint_path,
                        &desired.host_header,
                    ),
                    forward_actions(oidc, &desired.target_group_arn),
                )
                .await?;
        }

        if let Some(config) = oidc {
            if bands.auth_login.is_none() {
                info!("Creating authentication login rule");
                self.elb
                    .create_rule(
                        listener_arn,
                        AUTH_LOGIN_PRIORITY,
                        auth_login_conditions(),
                        auth_login_actions(config),
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// Rewrite path-pattern and host-header conditions on rules matched by
    /// the old path, preserving every other condition and all actions
    async fn rewrite_path_and_host(
        &self,
        listener_arn: &str,
        desired: &EndpointState,
        previous: &EndpointState,
    ) -> Result<(), ReconcileError> {
        let rules = RuleRepository::new(self.elb.as_ref())
            .load(listener_arn)
            .await?;

        let mut rewritten = BTreeSet::new();
        for rule in rules.find_by_path(&previous.endpoint_path) {
            debug!(rule_arn = %rule.arn, "Rewriting path and host conditions");
            let conditions = rule
                .conditions
                .iter()
                .map(|c| match c {
                    RuleCondition::PathPattern { .. } => RuleCondition::PathPattern {
                        values: vec![desired.endpoint_path.clone()],
                    },
                    RuleCondition::HostHeader { .. } => RuleCondition::HostHeader {
                        values: vec![desired.host_header.clone()],
                    },
                    other => other.clone(),
                })
                .collect();
            self.elb.set_rule_conditions(&rule.arn, conditions).await?;
            rewritten.insert(rule.arn.clone());
        }

        // Health-check rules share the host header but keep their own path
        if desired.host_header != previous.host_header {
            for rule in rules.find_by_path(&self.settings.health_check_path) {
                if rewritten.contains(&rule.arn) {
                    continue;
                }
                debug!(rule_arn = %rule.arn, "Rewriting health-check host condition");
                let conditions = rule
                    .conditions
                    .iter()
                    .map(|c| match c {
                        RuleCondition::HostHeader { .. } => RuleCondition::HostHeader {
                            values: vec![desired.host_header.clone()],
                        },
                        other => other.clone(),
                    })
                    .collect();
                self.elb.set_rule_conditions(&rule.arn, conditions).await?;
            }
        }
        Ok(())
    }

    /// Apply an authentication transition: enable, disable, or secret
    /// rotation while staying enabled
    async fn reconcile_auth(
        &self,
        resolver: &OidcResolver<'_>,
        listener_arn: &str,
        desired: &EndpointState,
        previous: &EndpointState,
    ) -> Result<(), ReconcileError> {
        match (previous.auth_enabled(), desired.auth_enabled()) {
            (false, true) => self.enable_auth(resolver, listener_arn, desired).await,
            (true, false) => self.disable_auth(listener_arn).await,
            (true, true) => self.rotate_auth_secret(resolver, listener_arn, desired).await,
            (false, false) => Ok(()),
        }
    }

    async fn enable_auth(
        &self,
        resolver: &OidcResolver<'_>,
        listener_arn: &str,
        desired: &EndpointState,
    ) -> Result<(), ReconcileError> {
        info!("Enabling authentication");
        let oidc = match self.resolve_auth(resolver, desired).await? {
            Some(config) => config,
            None => return Ok(()),
        };

        let rules = RuleRepository::new(self.elb.as_ref())
            .load(listener_arn)
            .await?;
        let bands = rules.bands()?;

        if bands.auth_login.is_none() {
            self.elb
                .create_rule(
                    listener_arn,
                    AUTH_LOGIN_PRIORITY,
                    auth_login_conditions(),
                    auth_login_actions(&oidc),
                )
                .await?;
        }

        // Each rule keeps its own forward target; the fallback rule has no
        // forward action and is left alone
        for rule in &rules.rules {
            if rule.has_action(ActionKind::AuthenticateOidc) {
                continue;
            }
            if let Some(target) = rule.forward_target() {
                debug!(rule_arn = %rule.arn, "Converting to authenticated forward chain");
                self.elb
                    .set_rule_actions(&rule.arn, forward_actions(Some(&oidc), target))
                    .await?;
            }
        }
        Ok(())
    }

    async fn disable_auth(&self, listener_arn: &str) -> Result<(), ReconcileError> {
        info!("Disabling authentication");
        let rules = RuleRepository::new(self.elb.as_ref())
            .load(listener_arn)
            .await?;
        let bands = rules.bands()?;

        let login_arn = bands.auth_login.as_ref().map(|r| r.arn.clone());
        if let Some(arn) = &login_arn {
            self.elb.delete_rule(arn).await?;
        }

        for rule in rules.find_by_action_kind(ActionKind::AuthenticateOidc) {
            if Some(&rule.arn) == login_arn.as_ref() {
                continue;
            }
            if let Some(target) = rule.forward_target() {
                debug!(rule_arn = %rule.arn, "Stripping authenticate action");
                self.elb
                    .set_rule_actions(&rule.arn, forward_actions(None, target))
                    .await?;
            }
        }
        Ok(())
    }

    async fn rotate_auth_secret(
        &self,
        resolver: &OidcResolver<'_>,
        listener_arn: &str,
        desired: &EndpointState,
    ) -> Result<(), ReconcileError> {
        info!("Rotating authentication secret");
        let oidc = match self.resolve_auth(resolver, desired).await? {
            Some(config) => config,
            None => return Ok(()),
        };

        let rules = RuleRepository::new(self.elb.as_ref())
            .load(listener_arn)
            .await?;
        for rule in rules.find_by_action_kind(ActionKind::AuthenticateOidc) {
            if rule.is_login_rule() {
                debug!(rule_arn = %rule.arn, "Rewriting login rule OIDC config");
                self.elb
                    .set_rule_actions(&rule.arn, auth_login_actions(&oidc))
                    .await?;
            } else if let Some(target) = rule.forward_target() {
                debug!(rule_arn = %rule.arn, "Rewriting forward rule OIDC config");
                self.elb
                    .set_rule_actions(&rule.arn, forward_actions(Some(&oidc), target))
                    .await?;
            }
        }
        Ok(())
    }

    /// Converge the tenant band to the desired appId set. An empty set means
    /// fallback plus default-forward; a non-empty set excludes both.
    async fn reconcile_tenants(
        &self,
        resolver: &OidcResolver<'_>,
        listener_arn: &str,
        desired: &EndpointState,
    ) -> Result<(), ReconcileError> {
        let rules = RuleRepository::new(self.elb.as_ref())
            .load(listener_arn)
            .await?;
        let bands = rules.bands()?;
        let observed = bands.tenant_app_ids();

        if desired.app_ids.is_empty() {
            for rule in &bands.tenant_rules {
                info!(rule_arn = %rule.arn, "Removing tenant rule");
                self.elb.delete_rule(&rule.arn).await?;
            }
            if bands.fallback.is_none() {
                info!("Creating fallback rule");
                self.elb
                    .create_rule(
                        listener_arn,
                        FALLBACK_PRIORITY,
                        vec![RuleCondition::PathPattern {
                            values: vec!["/*".to_string()],
                        }],
                        vec![RuleAction::FixedResponse {
                            status_code: FALLBACK_STATUS_CODE,
                            message_body: FALLBACK_MESSAGE_BODY.to_string(),
                            order: None,
                        }],
                    )
                    .await?;
            }
            if bands.default_forward.is_none() {
                let oidc = self.resolve_auth(resolver, desired).await?;
                info!("Creating default forward rule");
                self.elb
                    .create_rule(
                        listener_arn,
                        DEFAULT_FORWARD_PRIORITY,
                        base_forward_conditions(
                            desired.protocol,
                            &desired.endpoint_path,
                            &desired.host_header,
                        ),
                        forward_actions(oidc.as_ref(), &desired.target_group_arn),
                    )
                    .await?;
            }
            return Ok(());
        }

        // Tenant rules carry the routing; the catch-all bands must go
        if let Some(rule) = &bands.fallback {
            self.elb.delete_rule(&rule.arn).await?;
        }
        if let Some(rule) = &bands.default_forward {
            self.elb.delete_rule(&rule.arn).await?;
        }

        for rule in &bands.tenant_rules {
            let stale = !rule
                .app_id()
                .is_some_and(|id| desired.app_ids.contains(id));
            if stale {
                info!(rule_arn = %rule.arn, "Removing tenant rule");
                self.elb.delete_rule(&rule.arn).await?;
            }
        }

        let to_add: Vec<&String> = desired
            .app_ids
            .iter()
            .filter(|id| !observed.contains(*id))
            .collect();
        if to_add.is_empty() {
            return Ok(());
        }

        let oidc = self.resolve_auth(resolver, desired).await?;
        let mut allocator = PriorityAllocator::new(rules.priorities());
        for app_id in to_add {
            let priority = allocator.next(TENANT_PRIORITY_FLOOR);
            info!(app_id = %app_id, priority, "Creating tenant rule");
            let mut conditions = base_forward_conditions(
                desired.protocol,
                &desired.endpoint_path,
                &desired.host_header,
            );
            conditions.push(app_id_condition(app_id));
            self.elb
                .create_rule(
                    listener_arn,
                    priority,
                    conditions,
                    forward_actions(oidc.as_ref(), &desired.target_group_arn),
                )
                .await?;
        }
        Ok(())
    }

    /// Unconditional overwrite guaranteeing unmatched traffic is rejected
    async fn overwrite_default_action(&self, listener_arn: &str) -> Result<(), ReconcileError> {
        debug!(listener_arn, "Overwriting listener default action");
        self.elb
            .set_default_action(
                listener_arn,
                DefaultAction::FixedResponse {
                    status_code: DEFAULT_ACTION_STATUS_CODE,
                    message_body: DEFAULT_ACTION_MESSAGE_BODY.to_string(),
                },
            )
            .await
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
