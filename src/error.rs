//! # Error Types
//!
//! Error taxonomy for one reconciliation run.
//!
//! Configuration errors are fatal and not worth retrying; remote API errors
//! abort the remaining plan and are retried wholesale by the caller, relying
//! on idempotence to avoid duplication.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Malformed secret payload or missing required property
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A call to the load balancer or secret store failed
    #[error("remote API error: {0:#}")]
    RemoteApi(#[from] anyhow::Error),

    /// Listener deletion was not confirmed within the retry budget
    #[error("listener deletion not confirmed for {load_balancer_arn} after {attempts} attempts")]
    ListenerDeletionTimeout {
        load_balancer_arn: String,
        attempts: u32,
    },

    /// No non-redirect listener was found on the load balancer
    #[error("no listener found for load balancer: {0}")]
    MissingListener(String),

    /// A reserved priority band holds more than one rule, so content-based
    /// rule matching cannot be trusted
    #[error("priority band {priority} holds more than one rule on listener {listener_arn}")]
    DuplicateBandRule { priority: u16, listener_arn: String },
}

impl ReconcileError {
    /// Wrap a remote API failure, preserving the source chain
    pub fn remote<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::RemoteApi(anyhow::Error::new(err))
    }
}
