//! Process-wide settings configuration.
//!
//! Resolved once at startup and passed into [`crate::SettingsStore`] and
//! [`crate::infra::params::SsmParameterStore`]; neither reads the environment itself.

use anyhow::{Context, Result};

pub const DEFAULT_REGION: &str = "us-east-1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsConfig {
    /// Name (or path) of the parameter holding the settings JSON.
    pub parameter_name: String,
    pub region: String,
    /// Overrides the service endpoint, e.g. `http://localhost:4566` for LocalStack.
    pub endpoint_url: Option<String>,
    /// Decrypt `SecureString` parameters on read.
    pub with_decryption: bool,
}

impl SettingsConfig {
    pub fn new(parameter_name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            parameter_name: parameter_name.into(),
            region: region.into(),
            endpoint_url: None,
            with_decryption: true,
        }
    }

    pub fn with_endpoint_url(mut self, endpoint_url: impl Into<String>) -> Self {
        self.endpoint_url = Some(endpoint_url.into());
        self
    }

    /// Loads configuration from the process environment.
    ///
    /// | Variable              | Required | Default     |
    /// |-----------------------|----------|-------------|
    /// | `SETTINGS_PARAMETER`  | yes      |             |
    /// | `AWS_REGION`          | no       | `us-east-1` |
    /// | `SSM_ENDPOINT_URL`    | no       |             |
    /// | `SSM_WITH_DECRYPTION` | no       | `true`      |
    pub fn from_env() -> Result<Self> {
        Self::from_env_with_parameter(None)
    }

    /// Like [`Self::from_env`], but `parameter_name` takes precedence over
    /// `SETTINGS_PARAMETER` when given.
    pub fn from_env_with_parameter(parameter_name: Option<String>) -> Result<Self> {
        Self::from_lookup(|key| match key {
            "SETTINGS_PARAMETER" if parameter_name.is_some() => parameter_name.clone(),
            _ => std::env::var(key).ok(),
        })
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let parameter_name = lookup("SETTINGS_PARAMETER")
            .filter(|v| !v.trim().is_empty())
            .context("SETTINGS_PARAMETER must be set to the settings parameter name")?;

        let region = lookup("AWS_REGION")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        let endpoint_url = lookup("SSM_ENDPOINT_URL").filter(|v| !v.trim().is_empty());

        let with_decryption = match lookup("SSM_WITH_DECRYPTION") {
            Some(v) => v
                .trim()
                .parse::<bool>()
                .with_context(|| format!("SSM_WITH_DECRYPTION must be true or false, got '{v}'"))?,
            None => true,
        };

        Ok(Self {
            parameter_name,
            region,
            endpoint_url,
            with_decryption,
        })
    }
}
