//! Environment settings read once at startup.

use std::env;

/// Settings the manager and its installer take from the process environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Env {
    pub user: String,
    /// Overrides the agent image chosen by the manager; `None` keeps its default.
    pub agent_image: Option<String>,
    pub agent_port: u16,
    pub namespace: String,
    pub server_host: String,
    pub server_port: String,
    pub systema_host: String,
    pub systema_port: String,
    pub registry: String,
    pub cluster_id: String,
}

impl Default for Env {
    fn default() -> Self {
        Self {
            user: String::new(),
            agent_image: None,
            agent_port: 9900,
            namespace: String::new(),
            server_host: String::new(),
            server_port: "8081".to_owned(),
            systema_host: "app.getambassador.io".to_owned(),
            systema_port: "443".to_owned(),
            registry: "docker.io/datawire".to_owned(),
            cluster_id: String::new(),
        }
    }
}

impl Env {
    /// Reads the settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads the settings through `lookup`, falling back to the defaults for unset keys.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let string = |key: &str, default: String| lookup(key).unwrap_or(default);

        let agent_port = match lookup("TELEPRESENCE_AGENT_PORT") {
            Some(value) => value
                .parse()
                .map_err(|source| ConfigError::InvalidPort {
                    key: "TELEPRESENCE_AGENT_PORT",
                    value,
                    source,
                })?,
            None => defaults.agent_port,
        };

        Ok(Self {
            user: string("USER", defaults.user),
            agent_image: lookup("TELEPRESENCE_AGENT_IMAGE").filter(|image| !image.is_empty()),
            agent_port,
            namespace: string("MANAGER_NAMESPACE", defaults.namespace),
            server_host: string("SERVER_HOST", defaults.server_host),
            server_port: string("SERVER_PORT", defaults.server_port),
            systema_host: string("SYSTEMA_HOST", defaults.systema_host),
            systema_port: string("SYSTEMA_PORT", defaults.systema_port),
            registry: string("TELEPRESENCE_REGISTRY", defaults.registry),
            cluster_id: string("CLUSTER_ID", defaults.cluster_id),
        })
    }
}

/// The error type returned by [`Env::from_lookup`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key}={value:?} is not a valid port: {source}")]
    InvalidPort {
        key: &'static str,
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Env, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Env::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let env = load(&[]).unwrap();
        assert_eq!(env, Env::default());
        assert_eq!(env.agent_port, 9900);
        assert_eq!(env.registry, "docker.io/datawire");
        assert_eq!(env.systema_host, "app.getambassador.io");
        assert_eq!(env.systema_port, "443");
        assert_eq!(env.server_port, "8081");
    }

    #[test]
    fn set_variables_override_defaults() {
        let env = load(&[
            ("SYSTEMA_HOST", "systema.example.com"),
            ("TELEPRESENCE_REGISTRY", "ghcr.io/acme"),
            ("TELEPRESENCE_AGENT_PORT", "9901"),
            ("TELEPRESENCE_AGENT_IMAGE", "ghcr.io/acme/agent:1"),
        ])
        .unwrap();
        assert_eq!(env.systema_host, "systema.example.com");
        assert_eq!(env.registry, "ghcr.io/acme");
        assert_eq!(env.agent_port, 9901);
        assert_eq!(env.agent_image.as_deref(), Some("ghcr.io/acme/agent:1"));
    }

    #[test]
    fn empty_agent_image_is_no_override() {
        let env = load(&[("TELEPRESENCE_AGENT_IMAGE", "")]).unwrap();
        assert_eq!(env.agent_image, None);
    }

    #[test]
    fn bad_agent_port_is_rejected() {
        let err = load(&[("TELEPRESENCE_AGENT_PORT", "ninety")]).unwrap_err();
        assert!(err.to_string().contains("TELEPRESENCE_AGENT_PORT"));
    }
}
