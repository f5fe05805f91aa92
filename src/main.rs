//! CLI entry point for reading settings from SSM Parameter Store.
//!
//! `show` fetches the settings parameter once and prints it. `watch` keeps
//! re-resolving AWS credentials and refreshes the settings whenever they change.

use anyhow::Result;
use aws_config::Region;
use aws_config::default_provider::credentials::DefaultCredentialsChain;
use aws_credential_types::provider::ProvideCredentials;
use aws_sdk_ssm::error::DisplayErrorContext;
use clap::{Args, Parser, Subcommand};
use ssm_settings::{
    Credential, RefreshStatus, SettingsConfig, SettingsState, SettingsStore, SsmParameterStore,
    output::{render, write_json},
};
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "ssm_settings")]
#[command(about = "Read a JSON settings object from SSM Parameter Store", long_about = None)]
struct Cli {
    #[command(flatten)]
    target: TargetArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct TargetArgs {
    /// Parameter name, overrides SETTINGS_PARAMETER
    #[arg(short, long, global = true)]
    parameter: Option<String>,

    /// AWS region, overrides AWS_REGION
    #[arg(long, global = true)]
    region: Option<String>,

    /// Custom SSM endpoint (e.g. "http://localhost:4566"), overrides SSM_ENDPOINT_URL
    #[arg(long, global = true)]
    endpoint_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the settings once and print them as JSON
    Show {
        /// Indent the JSON output
        #[arg(long, default_value_t = false)]
        pretty: bool,

        /// Write the JSON to this file instead of stdout
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Refresh the settings whenever the AWS credentials change
    Watch {
        /// Seconds between credential checks
        #[arg(short, long, default_value_t = 60)]
        interval: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let _file_guard = init_logging()?;

    let cli = Cli::parse();
    let config = load_config(cli.target)?;
    info!(
        parameter = %config.parameter_name,
        region = %config.region,
        "Settings configuration loaded"
    );

    match cli.command {
        Commands::Show { pretty, output } => show(config, pretty, output).await?,
        Commands::Watch { interval } => watch_settings(config, interval).await?,
    }

    Ok(())
}

/// Colored stderr plus a JSON daily-rolling log file.
fn init_logging() -> Result<WorkerGuard> {
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/ssm_settings.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("ssm_settings.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    Ok(file_guard)
}

fn load_config(target: TargetArgs) -> Result<SettingsConfig> {
    let mut config = SettingsConfig::from_env_with_parameter(target.parameter)?;
    if let Some(region) = target.region {
        config.region = region;
    }
    if let Some(endpoint_url) = target.endpoint_url {
        config.endpoint_url = Some(endpoint_url);
    }
    Ok(config)
}

async fn credentials_chain(region: &str) -> DefaultCredentialsChain {
    DefaultCredentialsChain::builder()
        .region(Region::new(region.to_string()))
        .build()
        .await
}

/// Resolves the ambient AWS credentials. Absence is not an error: the settings
/// are simply empty.
async fn resolve_credential(chain: &DefaultCredentialsChain) -> Option<Credential> {
    match chain.provide_credentials().await {
        Ok(credential) => {
            debug!(access_key_id = %credential.access_key_id(), "AWS credentials resolved");
            Some(credential)
        }
        Err(e) => {
            info!(error = %DisplayErrorContext(&e), "No AWS credentials available");
            None
        }
    }
}

fn same_identity(a: &Option<Credential>, b: &Option<Credential>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => {
            a.access_key_id() == b.access_key_id()
                && a.secret_access_key() == b.secret_access_key()
                && a.session_token() == b.session_token()
        }
        _ => false,
    }
}

#[tracing::instrument(skip(config), fields(parameter = %config.parameter_name))]
async fn show(config: SettingsConfig, pretty: bool, output: Option<String>) -> Result<()> {
    let credential = resolve_credential(&credentials_chain(&config.region).await).await;
    let store = SettingsStore::new(SsmParameterStore::new(&config), config);

    let settings = store.refresh(credential.as_ref()).await?;
    debug!(keys = ?settings.keys().collect::<Vec<_>>(), "Settings keys");

    match output {
        Some(path) => write_json(&path, &settings, pretty)?,
        None => println!("{}", render(&settings, pretty)?),
    }

    info!(status = ?store.status(), keys = settings.len(), "Settings refreshed");
    Ok(())
}

#[tracing::instrument(skip(config), fields(parameter = %config.parameter_name))]
async fn watch_settings(config: SettingsConfig, interval: u64) -> Result<()> {
    let chain = credentials_chain(&config.region).await;
    let (credential_tx, credential_rx) = watch::channel(resolve_credential(&chain).await);

    let store = Arc::new(SettingsStore::new(SsmParameterStore::new(&config), config));
    let mut states = store.subscribe();
    let watcher = store.watch(credential_rx);

    let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
    ticker.tick().await;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(interval, "Watching settings. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutting down settings watch");
                break;
            }
            _ = ticker.tick() => {
                let credential = resolve_credential(&chain).await;
                let changed = credential_tx.send_if_modified(|current| {
                    if same_identity(current, &credential) {
                        return false;
                    }
                    *current = credential;
                    true
                });
                if changed {
                    info!("AWS credentials changed, refreshing settings");
                }
            }
            changed = states.changed() => {
                if changed.is_err() {
                    warn!("Settings store closed");
                    break;
                }
                let state = states.borrow_and_update().clone();
                report(&state)?;
            }
        }
    }

    watcher.shutdown().await;
    Ok(())
}

fn report(state: &SettingsState) -> Result<()> {
    match &state.status {
        RefreshStatus::Failed { kind, message, .. } => {
            error!(?kind, generation = state.generation, %message, "Settings refresh failed, keeping previous settings");
        }
        status => {
            info!(?status, generation = state.generation, keys = state.settings.len(), "Settings published");
            println!("{}", render(&state.settings, false)?);
        }
    }
    Ok(())
}
