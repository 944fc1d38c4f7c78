//! Session configuration.
//!
//! A [`SessionConfig`] is resolved once, before the session is built, from the
//! first source that provides one:
//!
//! 1. an explicit instance configuration passed by the caller,
//! 2. the `config` environment variable, holding the configuration as JSON,
//! 3. the `development` environment variable, which selects a local server at
//!    `ws://127.0.0.1:3000`.
//!
//! Sources are never merged: the winning source provides the whole
//! configuration. Missing endpoint or token is a configuration error and is
//! reported before any connection attempt.

use crate::{
    credentials::ServiceToken,
    error::{LinkError, Result},
    timeouts::LinkTimeouts,
};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Environment variable holding a JSON-encoded [`SessionConfig`].
pub const CONFIG_ENV_VAR: &str = "config";

/// Environment variable that enables the local development endpoint.
pub const DEVELOPMENT_ENV_VAR: &str = "development";

/// Endpoint used when [`DEVELOPMENT_ENV_VAR`] is set.
pub const DEVELOPMENT_SOCKET_ADDRESS: &str = "ws://127.0.0.1:3000";

/// Path appended to the socket address to reach the DDP endpoint.
const WEBSOCKET_PATH: &str = "websocket";

/// Which liveness probe the session runs while online.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LivenessMode {
    /// HTTP `GET /status`, also checking the server start epoch.
    #[default]
    HttpStatus,
    /// `externalServicePing` remote call.
    RpcPing,
    /// No probing.
    Disabled,
}

/// Field selection applied to every data subscription.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionProps {
    /// Fields to return from data subscriptions (preferred)
    #[serde(default)]
    pub data_fields: Option<JsonValue>,

    /// Generic field selection, used only when `data_fields` is absent
    #[serde(default)]
    pub fields: Option<JsonValue>,
}

impl ConnectionProps {
    /// Field filter for `subscribeToServiceData`: the more specific
    /// `data_fields` wins over `fields`.
    pub fn field_selection(&self) -> JsonValue {
        self.data_fields
            .clone()
            .or_else(|| self.fields.clone())
            .unwrap_or(JsonValue::Null)
    }
}

/// Everything a session needs to know before it connects.
///
/// # Example
///
/// ```rust
/// use catalogue_link::SessionConfig;
/// use serde_json::json;
///
/// let config = SessionConfig::new("wss://catalogue.example.org", "service-token")
///     .with_service_description(json!({"name": "thermostat-bridge"}))
///     .with_data_fields(json!({"name": 1, "value": 1}))
///     .with_wait_for_readiness(true);
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// WebSocket address of the catalogue instance (ws, wss, http or https)
    #[serde(default)]
    pub socket_address: Option<String>,

    /// Token identifying the external service
    #[serde(default)]
    pub token: Option<ServiceToken>,

    /// Descriptor announced to the server during registration
    #[serde(default)]
    pub service_description: JsonValue,

    /// Data subscription field selection
    #[serde(default)]
    pub connection_props: ConnectionProps,

    /// Poll the server readiness query before logging in
    #[serde(default)]
    pub wait_for_readiness: bool,

    /// Liveness probe variant
    #[serde(default)]
    pub liveness: LivenessMode,

    /// Intervals and deadlines (not read from JSON)
    #[serde(skip)]
    pub timeouts: LinkTimeouts,
}

impl SessionConfig {
    /// Configuration with the two mandatory fields set.
    pub fn new(socket_address: impl Into<String>, token: impl Into<ServiceToken>) -> Self {
        Self {
            socket_address: Some(socket_address.into()),
            token: Some(token.into()),
            ..Self::default()
        }
    }

    /// Set the service descriptor.
    pub fn with_service_description(mut self, description: JsonValue) -> Self {
        self.service_description = description;
        self
    }

    /// Set the preferred data field selection.
    pub fn with_data_fields(mut self, fields: JsonValue) -> Self {
        self.connection_props.data_fields = Some(fields);
        self
    }

    /// Set the fallback field selection.
    pub fn with_fields(mut self, fields: JsonValue) -> Self {
        self.connection_props.fields = Some(fields);
        self
    }

    /// Enable or disable the readiness wait.
    pub fn with_wait_for_readiness(mut self, wait: bool) -> Self {
        self.wait_for_readiness = wait;
        self
    }

    /// Select the liveness probe.
    pub fn with_liveness(mut self, mode: LivenessMode) -> Self {
        self.liveness = mode;
        self
    }

    /// Override intervals and deadlines.
    pub fn with_timeouts(mut self, timeouts: LinkTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Resolve the configuration from the caller and the process environment.
    pub fn resolve(instance: Option<SessionConfig>) -> Result<SessionConfig> {
        Self::resolve_with(instance, |key| std::env::var(key).ok())
    }

    /// Same as [`resolve`](Self::resolve) with an injectable environment lookup.
    pub fn resolve_with<F>(instance: Option<SessionConfig>, env: F) -> Result<SessionConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(config) = instance {
            log::debug!("[config] Using instance configuration");
            return Ok(config);
        }

        if let Some(raw) = env(CONFIG_ENV_VAR) {
            log::debug!("[config] Using configuration from ${}", CONFIG_ENV_VAR);
            return serde_json::from_str(&raw).map_err(|e| {
                LinkError::ConfigurationError(format!(
                    "Invalid JSON in ${}: {}",
                    CONFIG_ENV_VAR, e
                ))
            });
        }

        if env(DEVELOPMENT_ENV_VAR).is_some() {
            log::debug!("[config] Using development endpoint {}", DEVELOPMENT_SOCKET_ADDRESS);
            return Ok(SessionConfig {
                socket_address: Some(DEVELOPMENT_SOCKET_ADDRESS.to_string()),
                ..SessionConfig::default()
            });
        }

        Err(LinkError::ConfigurationError("Missing config".to_string()))
    }

    /// Check the mandatory fields.
    pub fn validate(&self) -> Result<()> {
        self.socket_url()?;
        match &self.token {
            Some(token) if !token.is_blank() => Ok(()),
            _ => Err(LinkError::ConfigurationError("Missing token".to_string())),
        }
    }

    /// Parsed socket address.
    pub fn socket_url(&self) -> Result<Url> {
        let raw = self
            .socket_address
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| LinkError::ConfigurationError("Missing socketAddress".to_string()))?;

        let url = Url::parse(raw).map_err(|e| {
            LinkError::ConfigurationError(format!("Invalid socketAddress '{}': {}", raw, e))
        })?;

        match url.scheme() {
            "ws" | "wss" | "http" | "https" => {},
            other => {
                return Err(LinkError::ConfigurationError(format!(
                    "Unsupported socketAddress scheme '{}'; expected ws(s) or http(s)",
                    other
                )));
            },
        }

        if url.host_str().is_none() {
            return Err(LinkError::ConfigurationError(format!(
                "socketAddress '{}' has no host",
                raw
            )));
        }

        Ok(url)
    }

    /// DDP endpoint: the socket address with `/websocket` appended and an
    /// http(s) scheme mapped to ws(s).
    pub fn websocket_url(&self) -> Result<String> {
        let mut url = self.socket_url()?;
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme).map_err(|_| {
            LinkError::ConfigurationError(format!("Cannot use scheme '{}' for {}", scheme, url))
        })?;

        let path = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{}/{}", path, WEBSOCKET_PATH));
        Ok(url.to_string())
    }

    /// Token, once validated.
    pub(crate) fn service_token(&self) -> Result<&ServiceToken> {
        self.token
            .as_ref()
            .filter(|t| !t.is_blank())
            .ok_or_else(|| LinkError::ConfigurationError("Missing token".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_instance_config_wins() {
        let instance = SessionConfig::new("ws://instance:3000", "t");
        let resolved = SessionConfig::resolve_with(
            Some(instance),
            env_of(&[(CONFIG_ENV_VAR, r#"{"socketAddress":"ws://env:3000"}"#), (DEVELOPMENT_ENV_VAR, "1")]),
        )
        .unwrap();

        assert_eq!(resolved.socket_address.as_deref(), Some("ws://instance:3000"));
    }

    #[test]
    fn test_env_json_wins_over_development() {
        let resolved = SessionConfig::resolve_with(
            None,
            env_of(&[
                (
                    CONFIG_ENV_VAR,
                    r#"{"socketAddress":"wss://env.example","token":"abc","connectionProps":{"dataFields":{"a":1}},"waitForReadiness":true,"liveness":"rpc_ping"}"#,
                ),
                (DEVELOPMENT_ENV_VAR, "1"),
            ]),
        )
        .unwrap();

        assert_eq!(resolved.socket_address.as_deref(), Some("wss://env.example"));
        assert_eq!(resolved.token, Some(ServiceToken::new("abc")));
        assert!(resolved.wait_for_readiness);
        assert_eq!(resolved.liveness, LivenessMode::RpcPing);
        assert_eq!(resolved.connection_props.field_selection(), json!({"a": 1}));
    }

    #[test]
    fn test_development_default_endpoint() {
        let resolved =
            SessionConfig::resolve_with(None, env_of(&[(DEVELOPMENT_ENV_VAR, "true")])).unwrap();
        assert_eq!(resolved.socket_address.as_deref(), Some(DEVELOPMENT_SOCKET_ADDRESS));
        // development mode still needs a token before the session can be built
        assert!(resolved.validate().is_err());
    }

    #[test]
    fn test_missing_config_is_an_error() {
        let err = SessionConfig::resolve_with(None, env_of(&[])).unwrap_err();
        assert_eq!(err, LinkError::ConfigurationError("Missing config".to_string()));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_invalid_env_json_is_a_configuration_error() {
        let err =
            SessionConfig::resolve_with(None, env_of(&[(CONFIG_ENV_VAR, "{not json")])).unwrap_err();
        assert!(matches!(err, LinkError::ConfigurationError(_)));
    }

    #[test]
    fn test_validate_requires_address_and_token() {
        let no_address = SessionConfig {
            token: Some(ServiceToken::new("t")),
            ..SessionConfig::default()
        };
        assert_eq!(
            no_address.validate().unwrap_err(),
            LinkError::ConfigurationError("Missing socketAddress".to_string())
        );

        let no_token = SessionConfig {
            socket_address: Some("ws://localhost:3000".to_string()),
            ..SessionConfig::default()
        };
        assert_eq!(
            no_token.validate().unwrap_err(),
            LinkError::ConfigurationError("Missing token".to_string())
        );

        let blank_token = SessionConfig::new("ws://localhost:3000", "   ");
        assert!(blank_token.validate().is_err());

        assert!(SessionConfig::new("ws://localhost:3000", "t").validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_scheme() {
        let config = SessionConfig::new("ftp://localhost", "t");
        assert!(matches!(config.validate(), Err(LinkError::ConfigurationError(_))));
    }

    #[test]
    fn test_websocket_url() {
        let cases = [
            ("ws://127.0.0.1:3000", "ws://127.0.0.1:3000/websocket"),
            ("wss://catalogue.example.org/", "wss://catalogue.example.org/websocket"),
            ("https://catalogue.example.org/base", "wss://catalogue.example.org/base/websocket"),
            ("http://localhost:3000", "ws://localhost:3000/websocket"),
        ];
        for (input, expected) in cases {
            let config = SessionConfig::new(input, "t");
            assert_eq!(config.websocket_url().unwrap(), expected, "input {}", input);
        }
    }

    #[test]
    fn test_field_selection_precedence() {
        let both = ConnectionProps {
            data_fields: Some(json!({"specific": 1})),
            fields: Some(json!({"general": 1})),
        };
        assert_eq!(both.field_selection(), json!({"specific": 1}));

        let general = ConnectionProps {
            data_fields: None,
            fields: Some(json!({"general": 1})),
        };
        assert_eq!(general.field_selection(), json!({"general": 1}));

        assert_eq!(ConnectionProps::default().field_selection(), JsonValue::Null);
    }

    #[test]
    fn test_debug_never_prints_token() {
        let config = SessionConfig::new("ws://localhost:3000", "very-secret-token");
        assert!(!format!("{:?}", config).contains("very-secret-token"));
    }
}
