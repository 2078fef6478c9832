//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! Priority bands are fixed and reserved: rules in bands 1-3 are singletons,
//! tenant rules live at or above `TENANT_PRIORITY_FLOOR`.

use std::time::Duration;

/// Priority of the fallback "invalid configuration" rule
/// Present only when tenant routing is active and the appId list is empty
pub const FALLBACK_PRIORITY: u16 = 1;

/// Priority of the default forward rule
pub const DEFAULT_FORWARD_PRIORITY: u16 = 2;

/// Priority of the authentication login rule (only when auth is enabled)
pub const AUTH_LOGIN_PRIORITY: u16 = 3;

/// First priority available to per-tenant rules
pub const TENANT_PRIORITY_FLOOR: u16 = 4;

/// Plain HTTP listener port
pub const HTTP_PORT: u16 = 80;

/// HTTPS listener port
pub const HTTPS_PORT: u16 = 443;

/// SSL policy applied to HTTPS listeners
pub const SSL_POLICY: &str = "ELBSecurityPolicy-TLS-1-2-2017-01";

/// Path matched by the authentication login rule
pub const LOGIN_PATH: &str = "/login";

/// Query-string key carrying the tenant application identifier
pub const APP_ID_QUERY_KEY: &str = "appId";

/// Default health-check path, overridable via `HEALTH_CHECK_PATH`
pub const DEFAULT_HEALTH_CHECK_PATH: &str = "/health";

/// Maximum attempts when confirming asynchronous listener deletion
pub const DELETION_POLL_MAX_ATTEMPTS: u32 = 20;

/// Delay between listener-deletion confirmation attempts
pub const DELETION_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Status code of the fallback rule created when the tenant id list is empty
pub const FALLBACK_STATUS_CODE: u16 = 400;

/// Body of the fallback rule response
pub const FALLBACK_MESSAGE_BODY: &str = "Configuration invalid!";

/// Status code returned by the login rule once authenticated
pub const LOGIN_OK_STATUS_CODE: u16 = 200;

/// Body returned by the login rule once authenticated
pub const LOGIN_OK_MESSAGE_BODY: &str = "Authenticated";

/// Status code of the listener default action
pub const DEFAULT_ACTION_STATUS_CODE: u16 = 403;

/// Body of the listener default action response
pub const DEFAULT_ACTION_MESSAGE_BODY: &str = "DefaultAction: Invalid request";
