use anyhow::Result;
use aws_sdk_ssm::config::{BehaviorVersion, Region};
use aws_sdk_ssm::error::DisplayErrorContext;
use tracing::debug;

use super::{Credential, ParameterStore};
use crate::config::SettingsConfig;

/// Reads parameters from AWS SSM Parameter Store.
///
/// A client is built per read from the supplied credential and the configured
/// region, so a credential change never reuses a client signed with the old one.
/// With decryption enabled, `SecureString` values work as long as the credential
/// carries `ssm:GetParameter` and the matching KMS permissions.
#[derive(Debug, Clone)]
pub struct SsmParameterStore {
    region: String,
    endpoint_url: Option<String>,
    with_decryption: bool,
}

impl SsmParameterStore {
    pub fn new(config: &SettingsConfig) -> Self {
        Self {
            region: config.region.clone(),
            endpoint_url: config.endpoint_url.clone(),
            with_decryption: config.with_decryption,
        }
    }

    fn client(&self, credential: &Credential) -> aws_sdk_ssm::Client {
        let mut builder = aws_sdk_ssm::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(self.region.clone()))
            .credentials_provider(credential.clone());

        if let Some(endpoint_url) = &self.endpoint_url {
            debug!(endpoint = %endpoint_url, "Using custom SSM endpoint");
            builder = builder.endpoint_url(endpoint_url);
        }

        aws_sdk_ssm::Client::from_conf(builder.build())
    }
}

#[async_trait::async_trait]
impl ParameterStore for SsmParameterStore {
    async fn get(&self, name: &str, credential: &Credential) -> Result<Option<String>> {
        let resp = self
            .client(credential)
            .get_parameter()
            .name(name)
            .with_decryption(self.with_decryption)
            .send()
            .await
            .map_err(|e| {
                anyhow::anyhow!(
                    "SSM GetParameter failed for '{name}' in {}: {}",
                    self.region,
                    DisplayErrorContext(&e)
                )
            })?;

        Ok(resp.parameter.and_then(|p| p.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_takes_config_values() {
        let config = SettingsConfig::new("/idp/settings", "eu-central-1")
            .with_endpoint_url("http://localhost:4566");
        let store = SsmParameterStore::new(&config);

        assert_eq!(store.region, "eu-central-1");
        assert_eq!(store.endpoint_url.as_deref(), Some("http://localhost:4566"));
        assert!(store.with_decryption);
    }

    #[tokio::test]
    async fn test_client_uses_configured_region() {
        let store = SsmParameterStore::new(&SettingsConfig::new("p", "ap-southeast-2"));
        let credential = Credential::new("AKID", "secret", None, None, "test");

        let client = store.client(&credential);
        assert_eq!(
            client.config().region().map(|r| r.as_ref()),
            Some("ap-southeast-2")
        );
    }
}
