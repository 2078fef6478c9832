//! # Listener Lifecycle Manager
//!
//! Creates, discovers, and deletes listeners on the load balancer.
//!
//! HTTPS endpoints get a forwarding listener on 443 plus a redirect-only HTTP
//! listener on 80; HTTP endpoints get a single forwarding listener on 80.
//! Listener deletion is asynchronous on the load balancer side, so teardown
//! polls with a bounded retry budget until the listener list is empty.
//!
//! Replacing a listener drops all rules attached to the old one; callers must
//! rebuild the rule set afterwards.

use std::time::Duration;

use tracing::{debug, info};

use crate::api::ElasticLoadBalancing;
use crate::constants::{
    DELETION_POLL_INTERVAL, DELETION_POLL_MAX_ATTEMPTS, HTTPS_PORT, HTTP_PORT, SSL_POLICY,
};
use crate::error::ReconcileError;
use crate::model::{DefaultAction, EndpointState, Listener, ListenerSpec, Protocol};

/// Retry budget for confirming asynchronous listener deletion
#[derive(Debug, Clone, Copy)]
pub struct DeletionPoll {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for DeletionPoll {
    fn default() -> Self {
        Self {
            max_attempts: DELETION_POLL_MAX_ATTEMPTS,
            interval: DELETION_POLL_INTERVAL,
        }
    }
}

/// Manages listener creation, discovery, and teardown for one load balancer
pub struct ListenerManager<'a> {
    elb: &'a dyn ElasticLoadBalancing,
    poll: DeletionPoll,
}

impl std::fmt::Debug for ListenerManager<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerManager")
            .field("poll", &self.poll)
            .finish_non_exhaustive()
    }
}

impl<'a> ListenerManager<'a> {
    pub fn new(elb: &'a dyn ElasticLoadBalancing, poll: DeletionPoll) -> Self {
        Self { elb, poll }
    }

    /// Create the listener(s) the desired state calls for, reusing a matching
    /// listener when one already exists (a retried invocation after a partial
    /// failure must converge, not duplicate). Returns the main listener ARN.
    pub async fn ensure_listener(&self, desired: &EndpointState) -> Result<String, ReconcileError> {
        let listeners = self
            .elb
            .describe_listeners(&desired.load_balancer_arn)
            .await?;

        let main_port = match desired.protocol {
            Protocol::Https => HTTPS_PORT,
            Protocol::Http => HTTP_PORT,
        };
        if let Some(existing) = listeners
            .iter()
            .find(|l| !l.is_redirect && l.protocol == desired.protocol && l.port == main_port)
        {
            debug!(listener_arn = %existing.arn, "Reusing existing listener");
            return Ok(existing.arn.clone());
        }

        match desired.protocol {
            Protocol::Https => {
                let listener_arn = self
                    .elb
                    .create_listener(ListenerSpec {
                        load_balancer_arn: desired.load_balancer_arn.clone(),
                        port: HTTPS_PORT,
                        protocol: Protocol::Https,
                        certificate_arn: desired.certificate_arn.clone(),
                        ssl_policy: Some(SSL_POLICY.to_string()),
                        default_action: DefaultAction::Forward {
                            target_group_arn: desired.target_group_arn.clone(),
                        },
                    })
                    .await?;
                info!(listener_arn = %listener_arn, "Created HTTPS listener");

                if !listeners.iter().any(|l| l.is_redirect && l.port == HTTP_PORT) {
                    self.elb
                        .create_listener(ListenerSpec {
                            load_balancer_arn: desired.load_balancer_arn.clone(),
                            port: HTTP_PORT,
                            protocol: Protocol::Http,
                            certificate_arn: None,
                            ssl_policy: None,
                            default_action: DefaultAction::RedirectToHttps { port: HTTPS_PORT },
                        })
                        .await?;
                    info!("Created HTTP redirect listener");
                }
                Ok(listener_arn)
            }
            Protocol::Http => {
                let listener_arn = self
                    .elb
                    .create_listener(ListenerSpec {
                        load_balancer_arn: desired.load_balancer_arn.clone(),
                        port: HTTP_PORT,
                        protocol: Protocol::Http,
                        certificate_arn: None,
                        ssl_policy: None,
                        default_action: DefaultAction::Forward {
                            target_group_arn: desired.target_group_arn.clone(),
                        },
                    })
                    .await?;
                info!(listener_arn = %listener_arn, "Created HTTP listener");
                Ok(listener_arn)
            }
        }
    }

    /// The listener whose default action is not a redirect; there is at most
    /// one on load balancers managed by this controller
    pub async fn discover_main_listener(
        &self,
        load_balancer_arn: &str,
    ) -> Result<Option<Listener>, ReconcileError> {
        let listeners = self.elb.describe_listeners(load_balancer_arn).await?;
        Ok(listeners.into_iter().find(|l| !l.is_redirect))
    }

    /// Delete every listener on the load balancer, then poll until the
    /// deletion is confirmed or the retry budget runs out
    pub async fn delete_listeners(&self, load_balancer_arn: &str) -> Result<(), ReconcileError> {
        let listeners = self.elb.describe_listeners(load_balancer_arn).await?;
        for listener in &listeners {
            info!(listener_arn = %listener.arn, "Deleting listener");
            self.elb.delete_listener(&listener.arn).await?;
        }

        self.wait_for_deletion(load_balancer_arn).await
    }

    async fn wait_for_deletion(&self, load_balancer_arn: &str) -> Result<(), ReconcileError> {
        for attempt in 1..=self.poll.max_attempts {
            let remaining = self.elb.describe_listeners(load_balancer_arn).await?;
            if remaining.is_empty() {
                debug!(load_balancer_arn, attempt, "Listener deletion confirmed");
                return Ok(());
            }
            debug!(
                load_balancer_arn,
                attempt,
                remaining = remaining.len(),
                "Listeners still present, waiting"
            );
            tokio::time::sleep(self.poll.interval).await;
        }
        Err(ReconcileError::ListenerDeletionTimeout {
            load_balancer_arn: load_balancer_arn.to_string(),
            attempts: self.poll.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::api::MockElasticLoadBalancing;

    fn desired(protocol: Protocol) -> EndpointState {
        EndpointState {
            protocol,
            endpoint_path: "/collect".to_string(),
            host_header: "example.com".to_string(),
            target_group_arn: "tg-1".to_string(),
            load_balancer_arn: "lb-1".to_string(),
            certificate_arn: matches!(protocol, Protocol::Https).then(|| "cert-1".to_string()),
            auth_secret_arn: None,
            tenant_routing_enabled: false,
            app_ids: BTreeSet::new(),
        }
    }

    fn fast_poll(max_attempts: u32) -> DeletionPoll {
        DeletionPoll {
            max_attempts,
            interval: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_ensure_https_creates_forward_and_redirect_listeners() {
        let mut elb = MockElasticLoadBalancing::new();
        elb.expect_describe_listeners()
            .times(1)
            .returning(|_| Ok(Vec::new()));
        elb.expect_create_listener()
            .withf(|spec| {
                spec.port == 443
                    && spec.protocol == Protocol::Https
                    && spec.certificate_arn.as_deref() == Some("cert-1")
                    && spec.ssl_policy.as_deref() == Some(SSL_POLICY)
            })
            .times(1)
            .returning(|_| Ok("listener-https".to_string()));
        elb.expect_create_listener()
            .withf(|spec| {
                spec.port == 80
                    && spec.protocol == Protocol::Http
                    && spec.default_action == DefaultAction::RedirectToHttps { port: 443 }
            })
            .times(1)
            .returning(|_| Ok("listener-redirect".to_string()));

        let manager = ListenerManager::new(&elb, fast_poll(3));
        let arn = manager.ensure_listener(&desired(Protocol::Https)).await.unwrap();
        assert_eq!(arn, "listener-https");
    }

    #[tokio::test]
    async fn test_ensure_http_creates_single_listener() {
        let mut elb = MockElasticLoadBalancing::new();
        elb.expect_describe_listeners()
            .times(1)
            .returning(|_| Ok(Vec::new()));
        elb.expect_create_listener()
            .withf(|spec| spec.port == 80 && spec.protocol == Protocol::Http)
            .times(1)
            .returning(|_| Ok("listener-http".to_string()));

        let manager = ListenerManager::new(&elb, fast_poll(3));
        let arn = manager.ensure_listener(&desired(Protocol::Http)).await.unwrap();
        assert_eq!(arn, "listener-http");
    }

    #[tokio::test]
    async fn test_ensure_listener_reuses_existing() {
        let mut elb = MockElasticLoadBalancing::new();
        elb.expect_describe_listeners().times(1).returning(|_| {
            Ok(vec![
                Listener {
                    arn: "listener-https".to_string(),
                    port: 443,
                    protocol: Protocol::Https,
                    is_redirect: false,
                },
                Listener {
                    arn: "listener-redirect".to_string(),
                    port: 80,
                    protocol: Protocol::Http,
                    is_redirect: true,
                },
            ])
        });
        elb.expect_create_listener().times(0);

        let manager = ListenerManager::new(&elb, fast_poll(3));
        let arn = manager.ensure_listener(&desired(Protocol::Https)).await.unwrap();
        assert_eq!(arn, "listener-https");
    }

    #[tokio::test]
    async fn test_discover_main_listener_skips_redirect() {
        let mut elb = MockElasticLoadBalancing::new();
        elb.expect_describe_listeners().times(1).returning(|_| {
            Ok(vec![
                Listener {
                    arn: "listener-redirect".to_string(),
                    port: 80,
                    protocol: Protocol::Http,
                    is_redirect: true,
                },
                Listener {
                    arn: "listener-main".to_string(),
                    port: 443,
                    protocol: Protocol::Https,
                    is_redirect: false,
                },
            ])
        });

        let manager = ListenerManager::new(&elb, fast_poll(3));
        let listener = manager.discover_main_listener("lb-1").await.unwrap().unwrap();
        assert_eq!(listener.arn, "listener-main");
    }

    #[tokio::test]
    async fn test_delete_listeners_confirms_empty_list() {
        let mut elb = MockElasticLoadBalancing::new();
        // Initial enumeration, one stale poll, then confirmation
        elb.expect_describe_listeners().times(1).returning(|_| {
            Ok(vec![Listener {
                arn: "listener-1".to_string(),
                port: 443,
                protocol: Protocol::Https,
                is_redirect: false,
            }])
        });
        elb.expect_delete_listener()
            .times(1)
            .returning(|_| Ok(()));
        elb.expect_describe_listeners().times(1).returning(|_| {
            Ok(vec![Listener {
                arn: "listener-1".to_string(),
                port: 443,
                protocol: Protocol::Https,
                is_redirect: false,
            }])
        });
        elb.expect_describe_listeners()
            .times(1)
            .returning(|_| Ok(Vec::new()));

        let manager = ListenerManager::new(&elb, fast_poll(5));
        manager.delete_listeners("lb-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_listeners_times_out_when_never_drained() {
        let mut elb = MockElasticLoadBalancing::new();
        elb.expect_describe_listeners().returning(|_| {
            Ok(vec![Listener {
                arn: "listener-1".to_string(),
                port: 443,
                protocol: Protocol::Https,
                is_redirect: false,
            }])
        });
        elb.expect_delete_listener().returning(|_| Ok(()));

        let manager = ListenerManager::new(&elb, fast_poll(2));
        let err = manager.delete_listeners("lb-1").await.unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::ListenerDeletionTimeout { attempts: 2, .. }
        ));
    }
}
