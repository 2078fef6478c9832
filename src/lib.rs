//! ALB Rules Controller Library
//!
//! Core functionality for the ALB listener-rule reconciler: given a desired
//! routing configuration for one endpoint, converge a live Application Load
//! Balancer's listener and rule set to match, once per lifecycle event.
//! Tests are included in the module files (e.g., reconciler.rs).

pub mod api;
pub mod constants;
pub mod error;
pub mod event;
pub mod listener;
pub mod model;
pub mod oidc;
pub mod priority;
pub mod reconciler;
pub mod repository;
pub mod rules;

pub use error::ReconcileError;
pub use event::{LifecycleEvent, LifecycleRequest, RequestType, ResourceProperties};
pub use model::{EndpointState, Protocol};
pub use reconciler::{Reconciler, Settings};
