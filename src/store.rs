//! Credential-driven settings state.
//!
//! [`SettingsStore`] reads one parameter, parses it as a JSON object and publishes
//! the result through a [`tokio::sync::watch`] channel. Each refresh replaces the
//! published settings wholesale. A refresh that fails leaves them untouched and
//! records the failure in [`RefreshStatus`].
//!
//! Refreshes are ordered by start, not completion: every call takes a generation
//! number and may only publish while it is still the newest one.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, warn};

use crate::config::SettingsConfig;
use crate::error::{ErrorKind, SettingsError};
use crate::infra::params::{Credential, ParameterStore};
use crate::settings::Settings;

/// Outcome of the most recently published refresh.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshStatus {
    /// No refresh has completed yet.
    Pending,
    /// No credential was available; settings are empty and nothing was fetched.
    Unauthenticated,
    /// The parameter holds no value; settings are empty.
    Unset,
    /// Settings hold the object parsed at `at`.
    Loaded { at: DateTime<Utc> },
    /// The refresh failed; settings keep their previous value.
    Failed {
        kind: ErrorKind,
        message: String,
        at: DateTime<Utc>,
    },
}

/// What consumers observe: the settings plus how they got there.
#[derive(Debug, Clone)]
pub struct SettingsState {
    pub settings: Settings,
    pub status: RefreshStatus,
    /// Generation of the refresh that last published, `0` before any.
    pub generation: u64,
}

impl Default for SettingsState {
    fn default() -> Self {
        Self {
            settings: Settings::empty(),
            status: RefreshStatus::Pending,
            generation: 0,
        }
    }
}

pub struct SettingsStore<S> {
    store: S,
    config: SettingsConfig,
    latest: AtomicU64,
    state: watch::Sender<SettingsState>,
}

impl<S: ParameterStore> SettingsStore<S> {
    /// Creates a store publishing empty settings with [`RefreshStatus::Pending`].
    pub fn new(store: S, config: SettingsConfig) -> Self {
        let (state, _) = watch::channel(SettingsState::default());
        Self {
            store,
            config,
            latest: AtomicU64::new(0),
            state,
        }
    }

    pub fn config(&self) -> &SettingsConfig {
        &self.config
    }

    /// Subscribes to published state. The receiver starts with the current value
    /// marked as seen.
    pub fn subscribe(&self) -> watch::Receiver<SettingsState> {
        self.state.subscribe()
    }

    /// Snapshot of the published settings.
    pub fn current(&self) -> Settings {
        self.state.borrow().settings.clone()
    }

    pub fn status(&self) -> RefreshStatus {
        self.state.borrow().status.clone()
    }

    /// Fetches and publishes settings for `credential`.
    ///
    /// Without a credential the result is empty settings and no remote call is
    /// made. If a newer refresh started while this one was in flight, the result
    /// is still returned but not published.
    ///
    /// # Errors
    ///
    /// [`SettingsError::RemoteRead`] if the parameter read fails and
    /// [`SettingsError::MalformedValue`] if its value is not a JSON object. The
    /// published settings are left unchanged in both cases.
    #[tracing::instrument(
        skip(self, credential),
        fields(
            parameter = %self.config.parameter_name,
            has_credential = credential.is_some(),
            generation = tracing::field::Empty,
        )
    )]
    pub async fn refresh(&self, credential: Option<&Credential>) -> Result<Settings, SettingsError> {
        let generation = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::Span::current().record("generation", generation);

        match self.fetch(credential).await {
            Ok((settings, status)) => {
                self.publish(generation, Some(settings.clone()), status);
                Ok(settings)
            }
            Err(e) => {
                let status = RefreshStatus::Failed {
                    kind: e.kind(),
                    message: e.to_string(),
                    at: Utc::now(),
                };
                self.publish(generation, None, status);
                Err(e)
            }
        }
    }

    async fn fetch(
        &self,
        credential: Option<&Credential>,
    ) -> Result<(Settings, RefreshStatus), SettingsError> {
        let Some(credential) = credential else {
            debug!("No credential available, using empty settings");
            return Ok((Settings::empty(), RefreshStatus::Unauthenticated));
        };

        let name = &self.config.parameter_name;
        let value = self
            .store
            .get(name, credential)
            .await
            .map_err(|e| SettingsError::remote_read(name, e))?;

        match value {
            Some(raw) if !raw.is_empty() => {
                debug!(bytes = raw.len(), "Parameter value received, parsing");
                let settings =
                    Settings::from_json(&raw).map_err(|e| SettingsError::malformed(name, e))?;
                info!(keys = settings.len(), "Settings loaded");
                Ok((settings, RefreshStatus::Loaded { at: Utc::now() }))
            }
            _ => {
                info!("Parameter has no value, using empty settings");
                Ok((Settings::empty(), RefreshStatus::Unset))
            }
        }
    }

    /// Publishes unless a newer refresh has started. `None` keeps the current
    /// settings and only updates the status.
    fn publish(&self, generation: u64, settings: Option<Settings>, status: RefreshStatus) -> bool {
        // The check runs under the channel's write lock, so a newer refresh that
        // publishes first can never be overwritten by this one.
        let published = self.state.send_if_modified(|state| {
            if self.latest.load(Ordering::SeqCst) != generation {
                return false;
            }
            if let Some(settings) = settings {
                state.settings = settings;
            }
            state.status = status;
            state.generation = generation;
            true
        });

        if !published {
            debug!(generation, "Newer refresh in progress, discarding result");
        }
        published
    }
}

impl<S: ParameterStore + 'static> SettingsStore<S> {
    /// Refreshes with the current credential, then again whenever it changes.
    ///
    /// A refresh still in flight when a newer credential arrives is abandoned.
    /// Once the credential sender is dropped, the refresh in flight is allowed to
    /// finish and the task ends. Dropping or shutting down the returned
    /// [`SettingsWatcher`] stops the task without publishing.
    pub fn watch(
        self: &Arc<Self>,
        mut credentials: watch::Receiver<Option<Credential>>,
    ) -> SettingsWatcher {
        let store = Arc::clone(self);
        let span = tracing::info_span!("settings_watch", parameter = %self.config.parameter_name);

        let handle = tokio::spawn(
            async move {
                loop {
                    let credential = credentials.borrow_and_update().clone();
                    let refresh = store.refresh(credential.as_ref());
                    tokio::pin!(refresh);

                    let mut source_open = true;
                    let outcome = loop {
                        tokio::select! {
                            result = &mut refresh => break Some(result),
                            changed = credentials.changed(), if source_open => {
                                if changed.is_err() {
                                    debug!("Credential source closed, finishing current refresh");
                                    source_open = false;
                                } else {
                                    debug!("Credential changed during refresh, restarting");
                                    break None;
                                }
                            }
                        }
                    };

                    let Some(result) = outcome else {
                        continue;
                    };
                    if let Err(e) = result {
                        error!(error = %e, kind = ?e.kind(), "Settings refresh failed");
                    }

                    if !source_open || credentials.changed().await.is_err() {
                        break;
                    }
                }
                warn!("Credential source closed, settings watch stopped");
            }
            .instrument(span),
        );

        SettingsWatcher { handle }
    }
}

/// Handle to a running [`SettingsStore::watch`] task. Dropping it stops the task.
///
/// Dropping only requests the stop; a publish already under way may still land
/// afterwards on a multi-threaded runtime. Use [`SettingsWatcher::shutdown`] to
/// wait until the task is gone.
pub struct SettingsWatcher {
    handle: JoinHandle<()>,
}

impl SettingsWatcher {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stops the task and waits for it to exit. Nothing is published after this
    /// returns.
    pub async fn shutdown(mut self) {
        self.handle.abort();
        if let Err(e) = (&mut self.handle).await {
            if e.is_panic() {
                error!(error = %e, "Settings watch task panicked");
            }
        }
    }
}

impl Drop for SettingsWatcher {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::capture_logs;
    use anyhow::Result;

    struct Fixed(Option<&'static str>);

    #[async_trait::async_trait]
    impl ParameterStore for Fixed {
        async fn get(&self, _name: &str, _credential: &Credential) -> Result<Option<String>> {
            Ok(self.0.map(str::to_string))
        }
    }

    fn credential() -> Credential {
        Credential::new("AKID", "secret", None, None, "test")
    }

    fn store(value: Option<&'static str>) -> SettingsStore<Fixed> {
        SettingsStore::new(Fixed(value), SettingsConfig::new("/app/settings", "us-east-1"))
    }

    #[test]
    fn test_initial_state() {
        let store = store(None);

        assert!(store.current().is_empty());
        assert_eq!(store.status(), RefreshStatus::Pending);
        assert_eq!(store.subscribe().borrow().generation, 0);
    }

    #[test]
    fn test_stale_generation_is_not_published() {
        let store = store(None);
        store.latest.store(2, Ordering::SeqCst);

        let stale = Settings::from_json(r#"{"old":true}"#).unwrap();
        assert!(!store.publish(1, Some(stale), RefreshStatus::Loaded { at: Utc::now() }));
        assert!(store.current().is_empty());
        assert_eq!(store.status(), RefreshStatus::Pending);

        let fresh = Settings::from_json(r#"{"new":true}"#).unwrap();
        assert!(store.publish(2, Some(fresh.clone()), RefreshStatus::Loaded { at: Utc::now() }));
        assert_eq!(store.current(), fresh);
    }

    #[test]
    fn test_failed_publish_keeps_settings() {
        let store = store(None);
        let settings = Settings::from_json(r#"{"a":1}"#).unwrap();
        store.latest.store(1, Ordering::SeqCst);
        assert!(store.publish(1, Some(settings.clone()), RefreshStatus::Loaded { at: Utc::now() }));

        store.latest.store(2, Ordering::SeqCst);
        let failed = RefreshStatus::Failed {
            kind: ErrorKind::RemoteRead,
            message: "boom".to_string(),
            at: Utc::now(),
        };
        assert!(store.publish(2, None, failed.clone()));
        assert_eq!(store.current(), settings);
        assert_eq!(store.status(), failed);
    }

    #[tokio::test]
    async fn test_empty_string_value_is_unset() {
        let store = store(Some(""));

        let settings = store.refresh(Some(&credential())).await.unwrap();
        assert!(settings.is_empty());
        assert_eq!(store.status(), RefreshStatus::Unset);
    }

    #[tokio::test]
    async fn test_refresh_logs_no_values() {
        let store = store(Some(r#"{"db_password":"hunter2"}"#));

        let (logs, _guard) = capture_logs();
        store.refresh(Some(&credential())).await.unwrap();

        let logged = logs.contents();
        assert!(logged.contains("Settings loaded"));
        assert!(!logged.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_non_object_value_is_malformed() {
        let store = store(Some("[1,2,3]"));

        let err = store.refresh(Some(&credential())).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedValue);
    }
}
