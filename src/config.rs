use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, env, fs, path::Path};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    pub services: HashMap<String, ServiceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Externally reachable base URL of this process; the OAuth redirect URI
    /// is derived from it. Must match what the services' authorization
    /// servers were told.
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    /// Absolute expiry window for a pending login flow, in seconds.
    #[serde(default = "default_flow_ttl")]
    pub flow_ttl_secs: u64,
    /// Client name sent during dynamic client registration.
    #[serde(default = "default_client_name")]
    pub client_name: String,
}

/// One backend tool service a user can authenticate against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Tool RPC endpoint.
    pub endpoint: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes: Option<String>,
}

// Defaults
fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_public_url() -> String {
    "http://localhost:8080".to_string()
}
fn default_flow_ttl() -> u64 {
    300
}
fn default_client_name() -> String {
    "janus".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            log_level: default_log_level(),
            public_url: default_public_url(),
        }
    }
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            flow_ttl_secs: default_flow_ttl(),
            client_name: default_client_name(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let config_path = env::var("JANUS_CONFIG").unwrap_or_else(|_| {
            let home_config = format!(
                "{}/.config/janus/config.toml",
                env::var("HOME").unwrap_or_default()
            );
            let locations = vec![
                "./config.toml",
                "./janus.toml",
                "/etc/janus/config.toml",
                home_config.as_str(),
            ];

            for path in locations {
                if Path::new(path).exists() {
                    return path.to_string();
                }
            }

            "./config.toml".to_string()
        });

        let config_content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;

        // Substitute environment variables
        let config_content = Self::substitute_env_vars(&config_content);

        let config: Config = toml::from_str(&config_content)
            .with_context(|| format!("Failed to parse config file: {}", config_path))?;

        config.validate()?;

        Ok(config)
    }

    /// Substitute ${VAR_NAME} with environment variable values
    fn substitute_env_vars(content: &str) -> String {
        let mut result = content.to_string();

        while let Some(start) = result.find("${") {
            if let Some(end) = result[start..].find('}') {
                let var_name = &result[start + 2..start + end];
                let value = env::var(var_name).unwrap_or_default();
                result.replace_range(start..start + end + 1, &value);
            } else {
                break;
            }
        }

        result
    }

    fn validate(&self) -> Result<()> {
        url::Url::parse(&self.server.public_url)
            .with_context(|| format!("Invalid server.public_url: {}", self.server.public_url))?;

        for (name, service) in &self.services {
            if !service.enabled {
                continue;
            }
            for (field, value) in [
                ("endpoint", &service.endpoint),
                ("authorization_endpoint", &service.authorization_endpoint),
                ("token_endpoint", &service.token_endpoint),
            ] {
                if value.is_empty() {
                    anyhow::bail!("Service '{}' enabled but missing {}", name, field);
                }
            }
        }
        Ok(())
    }

    /// The redirect URI all services send the browser back to.
    pub fn redirect_uri(&self) -> String {
        format!("{}/callback", self.server.public_url.trim_end_matches('/'))
    }

    pub fn service(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.get(name).filter(|s| s.enabled)
    }

    /// Get enabled services
    pub fn enabled_services(&self) -> Vec<(String, &ServiceConfig)> {
        self.services
            .iter()
            .filter(|(_, config)| config.enabled)
            .map(|(name, config)| (name.clone(), config))
            .collect()
    }
}
