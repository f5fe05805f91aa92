//! Remote parameter reads.
//!
//! [`ParameterStore`] is the async trait for reading a single named parameter with
//! a caller-supplied [`Credential`]. [`SsmParameterStore`] implements it using AWS
//! SSM Parameter Store.

mod ssm;

pub use ssm::SsmParameterStore;

use anyhow::Result;

/// Opaque authorization for a parameter read. Supplied by the host, never
/// resolved by the store itself.
pub type Credential = aws_credential_types::Credentials;

/// Reads one parameter by name.
#[async_trait::async_trait]
pub trait ParameterStore: Send + Sync {
    /// Returns the parameter's value, or `None` if the parameter exists but holds
    /// no value.
    ///
    /// # Errors
    ///
    /// Fails on authorization, transport, or unknown-parameter errors.
    async fn get(&self, name: &str, credential: &Credential) -> Result<Option<String>>;
}

#[async_trait::async_trait]
impl<T: ParameterStore + ?Sized> ParameterStore for std::sync::Arc<T> {
    async fn get(&self, name: &str, credential: &Credential) -> Result<Option<String>> {
        (**self).get(name, credential).await
    }
}
