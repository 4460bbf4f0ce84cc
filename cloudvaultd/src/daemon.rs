use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use crate::sync::engine::{SyncEngine, SyncSnapshot};
use crate::sync::events::TracingObserver;
use crate::sync::triggers::TriggerConfig;

const DEFAULT_SYNC_DIR_NAME: &str = "CloudVault";
const DEFAULT_POLL_SECS: u64 = 5 * 60;
const DEFAULT_DEBOUNCE_MS: u64 = 2_000;

#[derive(Clone)]
pub struct DaemonConfig {
    pub sync_root: PathBuf,
    pub api_base: String,
    pub token: String,
    pub poll_interval: Duration,
    pub debounce: Duration,
    pub enable_local_watcher: bool,
}

impl fmt::Debug for DaemonConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DaemonConfig")
            .field("sync_root", &self.sync_root)
            .field("api_base", &self.api_base)
            .field("token", &"<redacted>")
            .field("poll_interval", &self.poll_interval)
            .field("debounce", &self.debounce)
            .field("enable_local_watcher", &self.enable_local_watcher)
            .finish()
    }
}

impl DaemonConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("home directory is unavailable")?;
        Self::from_lookup(|name| std::env::var(name).ok(), &home)
    }

    pub fn from_lookup<F>(lookup: F, home: &Path) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let sync_root = lookup("CLOUDVAULT_SYNC_DIR")
            .filter(|value| !value.trim().is_empty())
            .map(|value| expand_with_home(&value, home))
            .unwrap_or_else(|| home.join(DEFAULT_SYNC_DIR_NAME));
        let api_base = read_required(&lookup, "CLOUDVAULT_API_BASE")?;
        let token = read_required(&lookup, "CLOUDVAULT_TOKEN")?;
        let poll_interval = Duration::from_secs(read_u64_env(
            &lookup,
            "CLOUDVAULT_POLL_SECS",
            DEFAULT_POLL_SECS,
        ));
        let debounce = Duration::from_millis(read_u64_env(
            &lookup,
            "CLOUDVAULT_DEBOUNCE_MS",
            DEFAULT_DEBOUNCE_MS,
        ));
        let enable_local_watcher = read_bool_env(&lookup, "CLOUDVAULT_ENABLE_WATCHER", true);

        Ok(Self {
            sync_root,
            api_base,
            token,
            poll_interval,
            debounce,
            enable_local_watcher,
        })
    }

    pub fn triggers(&self) -> TriggerConfig {
        TriggerConfig {
            debounce: self.debounce,
            poll_interval: self.poll_interval,
            watch_local: self.enable_local_watcher,
        }
    }
}

pub struct DaemonRuntime {
    config: DaemonConfig,
    engine: Arc<SyncEngine>,
}

impl DaemonRuntime {
    pub async fn bootstrap(config: DaemonConfig) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&config.sync_root)
            .await
            .with_context(|| format!("failed to create sync root at {:?}", config.sync_root))?;
        let engine = Arc::new(SyncEngine::new(config.triggers()));
        Ok(Self { config, engine })
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Runs until Ctrl-C, then stops the session and returns its last state.
    pub async fn run(self) -> anyhow::Result<SyncSnapshot> {
        tracing::info!(
            sync_root = %self.config.sync_root.display(),
            api_base = %self.config.api_base,
            local_watcher = self.config.enable_local_watcher,
            poll_secs = self.config.poll_interval.as_secs(),
            "daemon started"
        );
        self.start_session().await?;

        let manual = tokio::spawn(forward_sync_requests(Arc::clone(&self.engine)));
        let shutdown = tokio::signal::ctrl_c()
            .await
            .context("failed waiting for shutdown signal");
        manual.abort();

        let snapshot = self.engine.status();
        self.engine.stop();
        shutdown?;
        tracing::info!("daemon stopped");
        Ok(snapshot)
    }

    /// Runs the initial pass only.
    pub async fn run_once(self) -> anyhow::Result<SyncSnapshot> {
        self.start_session().await?;
        let snapshot = self.engine.status();
        self.engine.stop();
        Ok(snapshot)
    }

    async fn start_session(&self) -> anyhow::Result<()> {
        self.engine
            .start(
                Arc::new(TracingObserver),
                self.config.sync_root.clone(),
                &self.config.token,
                &self.config.api_base,
            )
            .await
            .context("failed to start sync session")
    }
}

// SIGUSR1 asks for an immediate pass.
#[cfg(unix)]
async fn forward_sync_requests(engine: Arc<SyncEngine>) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut requests = match signal(SignalKind::user_defined1()) {
        Ok(requests) => requests,
        Err(err) => {
            tracing::warn!(%err, "manual sync signal unavailable");
            return;
        }
    };
    while requests.recv().await.is_some() {
        tracing::info!("manual sync requested");
        let outcome = engine.sync_now().await;
        tracing::debug!(?outcome, "manual sync handled");
    }
}

#[cfg(not(unix))]
async fn forward_sync_requests(_engine: Arc<SyncEngine>) {
    std::future::pending::<()>().await;
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn read_required<F>(lookup: &F, name: &str) -> anyhow::Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .with_context(|| format!("{name} is not set"))
}

fn read_u64_env<F>(lookup: &F, name: &str, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn read_bool_env<F>(lookup: &F, name: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
