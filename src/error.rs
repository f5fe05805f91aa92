//! Errors surfaced by a settings refresh.

use thiserror::Error;

/// Why a refresh failed. A missing credential is not an error.
#[derive(Error, Debug)]
pub enum SettingsError {
    /// The parameter service rejected or could not serve the read
    /// (authorization, transport, or parameter not found).
    #[error("failed to read parameter '{parameter}': {source}")]
    RemoteRead {
        parameter: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The stored value is not a JSON object.
    #[error("parameter '{parameter}' does not hold a JSON object: {source}")]
    MalformedValue {
        parameter: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Fieldless discriminant of [`SettingsError`], cheap to copy into status values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    RemoteRead,
    MalformedValue,
}

impl SettingsError {
    pub(crate) fn remote_read(parameter: &str, source: anyhow::Error) -> Self {
        Self::RemoteRead {
            parameter: parameter.to_string(),
            source: source.into(),
        }
    }

    pub(crate) fn malformed(parameter: &str, source: serde_json::Error) -> Self {
        Self::MalformedValue {
            parameter: parameter.to_string(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RemoteRead { .. } => ErrorKind::RemoteRead,
            Self::MalformedValue { .. } => ErrorKind::MalformedValue,
        }
    }
}
