//! # Rule Repository
//!
//! Reads the non-default rules attached to a listener and classifies them by
//! priority band.
//!
//! Rule identity across invocations is content-based (band plus condition
//! values), not ARN-based, so classification refuses to proceed when a
//! reserved band holds more than one rule. A silently-picked winner would
//! corrupt the rule set on the next write.

use std::collections::BTreeSet;

use crate::api::ElasticLoadBalancing;
use crate::constants::{
    AUTH_LOGIN_PRIORITY, DEFAULT_FORWARD_PRIORITY, FALLBACK_PRIORITY, TENANT_PRIORITY_FLOOR,
};
use crate::error::ReconcileError;
use crate::model::{ActionKind, Rule};

/// Rules grouped by the fixed priority bands
#[derive(Debug, Clone, Default)]
pub struct RuleBands {
    pub fallback: Option<Rule>,
    pub default_forward: Option<Rule>,
    pub auth_login: Option<Rule>,
    pub tenant_rules: Vec<Rule>,
}

impl RuleBands {
    /// Tenant application identifiers observed on the listener
    pub fn tenant_app_ids(&self) -> BTreeSet<String> {
        self.tenant_rules
            .iter()
            .filter_map(|r| r.app_id().map(str::to_string))
            .collect()
    }
}

/// The non-default rules of one listener, as observed in a single read
#[derive(Debug, Clone)]
pub struct ListenerRules {
    pub listener_arn: String,
    pub rules: Vec<Rule>,
}

impl ListenerRules {
    /// Classify rules into the fixed priority bands, failing when a reserved
    /// band is occupied twice
    pub fn bands(&self) -> Result<RuleBands, ReconcileError> {
        let mut bands = RuleBands::default();
        for rule in &self.rules {
            let slot = match rule.priority {
                FALLBACK_PRIORITY => &mut bands.fallback,
                DEFAULT_FORWARD_PRIORITY => &mut bands.default_forward,
                AUTH_LOGIN_PRIORITY => &mut bands.auth_login,
                p if p >= TENANT_PRIORITY_FLOOR => {
                    bands.tenant_rules.push(rule.clone());
                    continue;
                }
                _ => continue,
            };
            if slot.is_some() {
                return Err(ReconcileError::DuplicateBandRule {
                    priority: rule.priority,
                    listener_arn: self.listener_arn.clone(),
                });
            }
            *slot = Some(rule.clone());
        }
        Ok(bands)
    }

    /// Rules whose path-pattern condition contains `path`
    pub fn find_by_path(&self, path: &str) -> Vec<&Rule> {
        self.rules.iter().filter(|r| r.matches_path(path)).collect()
    }

    /// Rules carrying at least one action of the given kind
    pub fn find_by_action_kind(&self, kind: ActionKind) -> Vec<&Rule> {
        self.rules.iter().filter(|r| r.has_action(kind)).collect()
    }

    /// Every priority currently in use, for seeding the allocator
    pub fn priorities(&self) -> BTreeSet<u16> {
        self.rules.iter().map(|r| r.priority).collect()
    }
}

/// Fetches a listener's rules through the remote API
pub struct RuleRepository<'a> {
    elb: &'a dyn ElasticLoadBalancing,
}

impl std::fmt::Debug for RuleRepository<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleRepository").finish_non_exhaustive()
    }
}

impl<'a> RuleRepository<'a> {
    pub fn new(elb: &'a dyn ElasticLoadBalancing) -> Self {
        Self { elb }
    }

    /// One consistent read of the listener's non-default rules
    pub async fn load(&self, listener_arn: &str) -> Result<ListenerRules, ReconcileError> {
        let rules = self.elb.describe_rules(listener_arn).await?;
        Ok(ListenerRules {
            listener_arn: listener_arn.to_string(),
            rules,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RuleAction, RuleCondition};

    fn forward_rule(arn: &str, priority: u16, conditions: Vec<RuleCondition>) -> Rule {
        Rule {
            arn: arn.to_string(),
            priority,
            conditions,
            actions: vec![RuleAction::Forward {
                target_group_arn: "tg-1".to_string(),
                order: Some(2),
            }],
        }
    }

    fn path(values: &[&str]) -> RuleCondition {
        RuleCondition::PathPattern {
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    fn listener_rules(rules: Vec<Rule>) -> ListenerRules {
        ListenerRules {
            listener_arn: "listener-1".to_string(),
            rules,
        }
    }

    #[test]
    fn test_bands_classification() {
        let rules = listener_rules(vec![
            forward_rule("rule-2", 2, vec![path(&["/collect"])]),
            forward_rule("rule-3", 3, vec![path(&["/login"])]),
            Rule {
                arn: "rule-4".to_string(),
                priority: 4,
                conditions: vec![
                    path(&["/collect"]),
                    RuleCondition::QueryString {
                        key: "appId".to_string(),
                        value: "tenant-a".to_string(),
                    },
                ],
                actions: vec![],
            },
        ]);
        let bands = rules.bands().unwrap();
        assert!(bands.fallback.is_none());
        assert_eq!(bands.default_forward.unwrap().arn, "rule-2");
        assert_eq!(bands.auth_login.unwrap().arn, "rule-3");
        assert_eq!(bands.tenant_rules.len(), 1);
        assert_eq!(
            bands.tenant_rules[0].app_id(),
            Some("tenant-a"),
        );
    }

    #[test]
    fn test_bands_duplicate_reserved_band_fails() {
        let rules = listener_rules(vec![
            forward_rule("rule-a", 2, vec![path(&["/collect"])]),
            forward_rule("rule-b", 2, vec![path(&["/other"])]),
        ]);
        let err = rules.bands().unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::DuplicateBandRule { priority: 2, .. }
        ));
    }

    #[test]
    fn test_tenant_band_allows_many_rules() {
        let rules = listener_rules(vec![
            forward_rule("rule-4", 4, vec![path(&["/collect"])]),
            forward_rule("rule-5", 5, vec![path(&["/collect"])]),
        ]);
        let bands = rules.bands().unwrap();
        assert_eq!(bands.tenant_rules.len(), 2);
    }

    #[test]
    fn test_find_by_path() {
        let rules = listener_rules(vec![
            forward_rule("rule-2", 2, vec![path(&["/collect"])]),
            forward_rule("rule-4", 4, vec![path(&["/collect", "/other"])]),
            forward_rule("rule-5", 5, vec![path(&["/other"])]),
        ]);
        let matched = rules.find_by_path("/collect");
        assert_eq!(matched.len(), 2);
        assert!(rules.find_by_path("/missing").is_empty());
    }

    #[test]
    fn test_find_by_action_kind() {
        let rules = listener_rules(vec![forward_rule("rule-2", 2, vec![path(&["/collect"])])]);
        assert_eq!(rules.find_by_action_kind(ActionKind::Forward).len(), 1);
        assert!(rules
            .find_by_action_kind(ActionKind::AuthenticateOidc)
            .is_empty());
    }

    #[test]
    fn test_priorities_seed() {
        let rules = listener_rules(vec![
            forward_rule("rule-2", 2, vec![path(&["/collect"])]),
            forward_rule("rule-7", 7, vec![path(&["/collect"])]),
        ]);
        assert_eq!(rules.priorities(), [2, 7].into_iter().collect());
    }
}
