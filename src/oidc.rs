//! # OIDC Resolver
//!
//! Fetches and parses an authentication provider's configuration from the
//! secret store.
//!
//! The secret payload is a JSON object with the fields `issuer`,
//! `userEndpoint`, `authorizationEndpoint`, `tokenEndpoint`, `appClientId`,
//! and `appClientSecret`. A missing or empty field is a configuration error:
//! there is no partially-valid OIDC setup.
//!
//! Resolved configurations are cached for the lifetime of the resolver, so
//! one reconciliation fetches each distinct secret reference at most once no
//! matter how many rules it rewrites.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Deserialize;
use tracing::debug;

use crate::api::SecretStore;
use crate::error::ReconcileError;
use crate::model::OidcConfig;

#[derive(Debug, Deserialize)]
struct OidcSecretPayload {
    issuer: Option<String>,
    #[serde(rename = "userEndpoint")]
    user_endpoint: Option<String>,
    #[serde(rename = "authorizationEndpoint")]
    authorization_endpoint: Option<String>,
    #[serde(rename = "tokenEndpoint")]
    token_endpoint: Option<String>,
    #[serde(rename = "appClientId")]
    app_client_id: Option<String>,
    #[serde(rename = "appClientSecret")]
    app_client_secret: Option<String>,
}

/// Resolves OIDC provider configuration from secret references
pub struct OidcResolver<'a> {
    secrets: &'a dyn SecretStore,
    cache: Mutex<HashMap<String, OidcConfig>>,
}

impl<'a> OidcResolver<'a> {
    pub fn new(secrets: &'a dyn SecretStore) -> Self {
        Self {
            secrets,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch and parse the configuration behind `secret_arn`
    pub async fn resolve(&self, secret_arn: &str) -> Result<OidcConfig, ReconcileError> {
        if let Some(config) = self
            .cache
            .lock()
            .expect("oidc cache lock poisoned")
            .get(secret_arn)
        {
            debug!(secret_arn, "Using cached OIDC configuration");
            return Ok(config.clone());
        }

        let payload = self.secrets.secret_value(secret_arn).await?;
        let config = parse_oidc_payload(secret_arn, &payload)?;

        self.cache
            .lock()
            .expect("oidc cache lock poisoned")
            .insert(secret_arn.to_string(), config.clone());
        Ok(config)
    }
}

impl std::fmt::Debug for OidcResolver<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OidcResolver").finish_non_exhaustive()
    }
}

fn parse_oidc_payload(secret_arn: &str, payload: &str) -> Result<OidcConfig, ReconcileError> {
    let parsed: OidcSecretPayload = serde_json::from_str(payload).map_err(|e| {
        ReconcileError::Configuration(format!("secret {secret_arn} is not valid JSON: {e}"))
    })?;

    let require = |field: Option<String>, name: &str| -> Result<String, ReconcileError> {
        field.filter(|v| !v.is_empty()).ok_or_else(|| {
            ReconcileError::Configuration(format!(
                "secret {secret_arn} is missing required field: {name}"
            ))
        })
    };

    Ok(OidcConfig {
        issuer: require(parsed.issuer, "issuer")?,
        user_info_endpoint: require(parsed.user_endpoint, "userEndpoint")?,
        authorization_endpoint: require(parsed.authorization_endpoint, "authorizationEndpoint")?,
        token_endpoint: require(parsed.token_endpoint, "tokenEndpoint")?,
        client_id: require(parsed.app_client_id, "appClientId")?,
        client_secret: require(parsed.app_client_secret, "appClientSecret")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockSecretStore;

    const SECRET_ARN: &str = "arn:aws:secretsmanager:us-east-1:1:secret:oidc";

    fn valid_payload() -> String {
        serde_json::json!({
            "issuer": "https://idp.example.com",
            "userEndpoint": "https://idp.example.com/userinfo",
            "authorizationEndpoint": "https://idp.example.com/authorize",
            "tokenEndpoint": "https://idp.example.com/token",
            "appClientId": "client-id",
            "appClientSecret": "client-secret",
        })
        .to_string()
    }

    #[test]
    fn test_parse_valid_payload() {
        let config = parse_oidc_payload(SECRET_ARN, &valid_payload()).unwrap();
        assert_eq!(config.issuer, "https://idp.example.com");
        assert_eq!(config.client_id, "client-id");
        assert_eq!(config.user_info_endpoint, "https://idp.example.com/userinfo");
    }

    #[test]
    fn test_missing_field_is_configuration_error() {
        let payload = serde_json::json!({
            "issuer": "https://idp.example.com",
            "userEndpoint": "https://idp.example.com/userinfo",
        })
        .to_string();
        let err = parse_oidc_payload(SECRET_ARN, &payload).unwrap_err();
        match err {
            ReconcileError::Configuration(message) => {
                assert!(message.contains("authorizationEndpoint"));
            }
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_field_is_configuration_error() {
        let mut value: serde_json::Value = serde_json::from_str(&valid_payload()).unwrap();
        value["appClientSecret"] = serde_json::json!("");
        let err = parse_oidc_payload(SECRET_ARN, &value.to_string()).unwrap_err();
        assert!(matches!(err, ReconcileError::Configuration(_)));
    }

    #[test]
    fn test_non_json_payload_is_configuration_error() {
        let err = parse_oidc_payload(SECRET_ARN, "not json").unwrap_err();
        assert!(matches!(err, ReconcileError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_resolve_fetches_each_secret_once() {
        let mut secrets = MockSecretStore::new();
        secrets
            .expect_secret_value()
            .times(1)
            .returning(|_| Ok(valid_payload_for_mock()));

        let resolver = OidcResolver::new(&secrets);
        let first = resolver.resolve(SECRET_ARN).await.unwrap();
        let second = resolver.resolve(SECRET_ARN).await.unwrap();
        assert_eq!(first, second);
    }

    fn valid_payload_for_mock() -> String {
        serde_json::json!({
            "issuer": "issuer",
            "userEndpoint": "userEndpoint",
            "authorizationEndpoint": "authorizationEndpoint",
            "tokenEndpoint": "tokenEndpoint",
            "appClientId": "appClientId",
            "appClientSecret": "appClientSecret",
        })
        .to_string()
    }
}
