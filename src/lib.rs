pub mod config;
pub mod error;
pub mod infra;
pub mod output;
pub mod settings;
pub mod store;

#[cfg(test)]
mod test_support;

pub use config::SettingsConfig;
pub use error::{ErrorKind, SettingsError};
pub use infra::params::{Credential, ParameterStore, SsmParameterStore};
pub use settings::Settings;
pub use store::{RefreshStatus, SettingsState, SettingsStore, SettingsWatcher};
