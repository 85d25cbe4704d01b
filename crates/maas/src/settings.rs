//! Provider configuration.
//!
//! Settings come from the provider block or a YAML file. Environment
//! variables fill in whatever the configuration leaves out.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::error::ProviderError;
use crate::poller::WaitTiming;

/// Environment variable for the MAAS URL.
pub const ENV_API_URL: &str = "MAAS_API_URL";
/// Environment variable for the admin API key.
pub const ENV_API_KEY: &str = "MAAS_API_KEY";
/// Environment variable for the API version.
pub const ENV_API_VERSION: &str = "MAAS_API_VERSION";

const DEFAULT_API_VERSION: &str = "2.0";

/// Wait parameters of every asynchronous transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// A freshly PXE-booted machine showing up in MAAS.
    pub machine_appear: WaitTiming,
    pub commission: WaitTiming,
    pub deploy: WaitTiming,
    pub release: WaitTiming,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            machine_appear: WaitTiming::new(60, 10, 3),
            commission: WaitTiming::new(25 * 60, 10, 3),
            deploy: WaitTiming::new(30 * 60, 120, 45),
            release: WaitTiming::new(30 * 60, 10, 3),
        }
    }
}

/// Provider-level settings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// MAAS server URL, e.g. `http://10.0.0.2:5240/MAAS`.
    #[serde(default)]
    pub api_url: String,
    /// Admin-level API key used for machine configuration.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
    /// API tokens per owner, used to deploy on behalf of that user.
    #[serde(default)]
    pub api_deploy_tokens: BTreeMap<String, String>,
    #[serde(default)]
    pub timeouts: Timeouts,
}

/// Everything a gateway needs to reach one MAAS endpoint as one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub url: Url,
    pub api_key: Option<String>,
    pub api_version: String,
}

impl ProviderConfig {
    /// Load settings from a YAML file, then fill gaps from the environment.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: &Path) -> Result<Self, ProviderError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProviderError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config: Self = serde_yaml::from_str(&content).map_err(|e| {
            ProviderError::Config(format!("failed to parse {}: {e}", path.display()))
        })?;
        info!(path = %path.display(), "Loaded provider config");
        let config = config.with_env_fallback();
        config.validate()?;
        Ok(config)
    }

    /// Parse settings from the provider block attributes.
    ///
    /// # Errors
    /// Returns an error if the attributes do not match or fail validation.
    pub fn from_attributes(attributes: serde_json::Value) -> Result<Self, ProviderError> {
        let config: Self = crate::config::from_attributes(attributes)?;
        let config = config.with_env_fallback();
        config.validate()?;
        Ok(config)
    }

    /// Fill unset values from `MAAS_API_URL`, `MAAS_API_KEY` and `MAAS_API_VERSION`.
    #[must_use]
    pub fn with_env_fallback(mut self) -> Self {
        if self.api_url.is_empty() {
            if let Ok(url) = std::env::var(ENV_API_URL) {
                debug!("Using {ENV_API_URL}");
                self.api_url = url;
            }
        }
        if self.api_key.is_none() {
            self.api_key = std::env::var(ENV_API_KEY).ok();
        }
        if self.api_version.is_none() {
            self.api_version = std::env::var(ENV_API_VERSION).ok();
        }
        self
    }

    /// Validate the settings.
    ///
    /// # Errors
    /// Returns [`ProviderError::Config`] describing the first problem.
    pub fn validate(&self) -> Result<(), ProviderError> {
        self.base_url()?;
        if let Some((owner, _)) = self.api_deploy_tokens.iter().find(|(_, t)| t.is_empty()) {
            return Err(ProviderError::Config(format!(
                "deploy token for owner '{owner}' is empty"
            )));
        }
        for (name, timing) in [
            ("machine_appear", self.timeouts.machine_appear),
            ("commission", self.timeouts.commission),
            ("deploy", self.timeouts.deploy),
            ("release", self.timeouts.release),
        ] {
            if timing.timeout_secs == 0 {
                return Err(ProviderError::Config(format!(
                    "timeout for {name} must be positive"
                )));
            }
        }
        Ok(())
    }

    fn base_url(&self) -> Result<Url, ProviderError> {
        if self.api_url.is_empty() {
            return Err(ProviderError::Config(format!(
                "api_url is required (or set {ENV_API_URL})"
            )));
        }
        let url = Url::parse(&self.api_url)
            .map_err(|e| {
                ProviderError::Config(format!("invalid api_url '{}': {e}", self.api_url))
            })?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ProviderError::Config(format!(
                "api_url must use http or https, not '{other}'"
            ))),
        }
    }

    fn api_version(&self) -> String {
        self.api_version
            .clone()
            .unwrap_or_else(|| DEFAULT_API_VERSION.to_string())
    }

    /// Endpoint for the admin key.
    ///
    /// # Errors
    /// Returns an error if `api_url` is invalid.
    pub fn endpoint(&self) -> Result<Endpoint, ProviderError> {
        Ok(Endpoint {
            url: self.base_url()?,
            api_key: self.api_key.clone(),
            api_version: self.api_version(),
        })
    }

    /// Endpoint for every owner with a deploy token.
    ///
    /// # Errors
    /// Returns an error if `api_url` is invalid.
    pub fn owner_endpoints(&self) -> Result<BTreeMap<String, Endpoint>, ProviderError> {
        let url = self.base_url()?;
        Ok(self
            .api_deploy_tokens
            .iter()
            .map(|(owner, token)| {
                (
                    owner.clone(),
                    Endpoint {
                        url: url.clone(),
                        api_key: Some(token.clone()),
                        api_version: self.api_version(),
                    },
                )
            })
            .collect())
    }
}
