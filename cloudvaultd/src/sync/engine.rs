use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cloudvault_core::{ApiErrorClass, CloudVaultClient, CloudVaultError, RemoteStore};
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;

use super::events::{Progress, SyncEvent, SyncObserver, SyncStatus};
use super::paths::PathError;
use super::reconcile::Reconciler;
use super::triggers::{self, TriggerConfig, Triggers};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("api error: {0}")]
    Api(#[from] CloudVaultError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("path error: {0}")]
    Path(#[from] PathError),
    #[error("local walk failed: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),
    #[error("invalid session: {0}")]
    InvalidSession(&'static str),
}

impl EngineError {
    /// How the server rejected the request, for API failures.
    pub fn api_class(&self) -> Option<ApiErrorClass> {
        match self {
            EngineError::Api(err) => err.classification(),
            _ => None,
        }
    }
}

/// Point-in-time view of the session, as returned by [`SyncEngine::status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncSnapshot {
    pub active: bool,
    pub local_root: Option<PathBuf>,
    pub status: SyncStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_sync_at: Option<OffsetDateTime>,
    pub last_error: Option<String>,
    pub progress: Progress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// The caller ran the pass (and any follow-up requested meanwhile).
    Completed,
    /// A pass was already running; it will run once more after finishing.
    Coalesced,
    Inactive,
}

#[derive(Debug, Default)]
struct SyncSession {
    active: bool,
    local_root: Option<PathBuf>,
    credential: Option<String>,
    remote_endpoint: Option<String>,
    status: SyncStatus,
    last_sync_at: Option<OffsetDateTime>,
    last_error: Option<String>,
    progress: Progress,
}

impl SyncSession {
    fn status_event(&self) -> SyncEvent {
        SyncEvent::Status {
            status: self.status,
            error: self.last_error.clone(),
            last_sync_at: self.last_sync_at,
        }
    }
}

#[derive(Default)]
struct EngineState {
    session: SyncSession,
    store: Option<Arc<dyn RemoteStore>>,
    observer: Option<Arc<dyn SyncObserver>>,
    // Bumped on every start and stop; passes started under an older value
    // no longer touch the session.
    generation: u64,
}

struct PassContext {
    generation: u64,
    store: Arc<dyn RemoteStore>,
    root: PathBuf,
}

pub struct SyncEngine {
    config: TriggerConfig,
    state: Mutex<EngineState>,
    triggers: Mutex<Option<Triggers>>,
    pass_lock: tokio::sync::Mutex<()>,
    pass_requested: AtomicBool,
}

impl SyncEngine {
    pub fn new(config: TriggerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(EngineState::default()),
            triggers: Mutex::new(None),
            pass_lock: tokio::sync::Mutex::new(()),
            pass_requested: AtomicBool::new(false),
        }
    }

    /// Starts a session against the CloudVault API, runs the initial pass to
    /// completion and then arms the watch and poll triggers.
    ///
    /// A session that is already running is replaced.
    pub async fn start(
        self: &Arc<Self>,
        observer: Arc<dyn SyncObserver>,
        local_root: impl Into<PathBuf>,
        credential: &str,
        remote_endpoint: &str,
    ) -> Result<(), EngineError> {
        let credential = credential.trim();
        if credential.is_empty() {
            return Err(EngineError::InvalidSession("credential is empty"));
        }
        let remote_endpoint = remote_endpoint.trim();
        if remote_endpoint.is_empty() {
            return Err(EngineError::InvalidSession("remote endpoint is empty"));
        }
        let local_root = validated_root(local_root.into())?;
        let client = CloudVaultClient::new(remote_endpoint, credential)?;
        self.begin_session(
            observer,
            local_root,
            Arc::new(client),
            Some(credential.to_string()),
            Some(remote_endpoint.to_string()),
        )
        .await;
        Ok(())
    }

    /// Like [`SyncEngine::start`], with an already constructed store.
    pub async fn start_with_store(
        self: &Arc<Self>,
        observer: Arc<dyn SyncObserver>,
        local_root: impl Into<PathBuf>,
        store: Arc<dyn RemoteStore>,
    ) -> Result<(), EngineError> {
        let local_root = validated_root(local_root.into())?;
        self.begin_session(observer, local_root, store, None, None)
            .await;
        Ok(())
    }

    async fn begin_session(
        self: &Arc<Self>,
        observer: Arc<dyn SyncObserver>,
        local_root: PathBuf,
        store: Arc<dyn RemoteStore>,
        credential: Option<String>,
        remote_endpoint: Option<String>,
    ) {
        let (previous, generation) = {
            let mut state = self.lock_state();
            let previous = self.lock_triggers().take();
            state.generation += 1;
            state.session = SyncSession {
                active: true,
                local_root: Some(local_root.clone()),
                credential,
                remote_endpoint,
                ..SyncSession::default()
            };
            state.store = Some(store);
            state.observer = Some(observer);
            (previous, state.generation)
        };
        drop(previous);
        tracing::info!(root = %local_root.display(), "sync session started");

        let guard = self.pass_lock.lock().await;
        self.drive_passes(guard).await;

        let armed = triggers::arm(Arc::downgrade(self), &local_root, &self.config);
        // Same lock order as `stop`, so a concurrent stop either sees these
        // triggers in the slot or has already bumped the generation.
        let state = self.lock_state();
        if state.session.active && state.generation == generation {
            *self.lock_triggers() = Some(armed);
        } else {
            drop(state);
            drop(armed);
        }
    }

    /// Ends the session and disarms its triggers. A pass already running is
    /// left to finish but no longer reports. Calling this while inactive is a
    /// no-op.
    pub fn stop(&self) {
        let (disarmed, notification) = {
            let mut state = self.lock_state();
            if !state.session.active {
                return;
            }
            let disarmed = self.lock_triggers().take();
            state.generation += 1;
            state.session = SyncSession {
                last_sync_at: state.session.last_sync_at,
                ..SyncSession::default()
            };
            state.store = None;
            let event = state.session.status_event();
            (disarmed, state.observer.take().map(|observer| (observer, event)))
        };
        drop(disarmed);
        if let Some((observer, event)) = notification {
            observer.notify(event);
        }
        tracing::info!("sync session stopped");
    }

    /// Requests an immediate pass. Never runs two passes at once: while one
    /// is in flight the request folds into a single follow-up pass.
    pub async fn sync_now(&self) -> PassOutcome {
        if !self.lock_state().session.active {
            return PassOutcome::Inactive;
        }
        self.request_pass().await
    }

    pub fn status(&self) -> SyncSnapshot {
        let state = self.lock_state();
        let session = &state.session;
        SyncSnapshot {
            active: session.active,
            local_root: session.local_root.clone(),
            status: session.status,
            last_sync_at: session.last_sync_at,
            last_error: session.last_error.clone(),
            progress: session.progress.clone(),
        }
    }

    pub fn remote_endpoint(&self) -> Option<String> {
        self.lock_state().session.remote_endpoint.clone()
    }

    pub fn has_credential(&self) -> bool {
        self.lock_state().session.credential.is_some()
    }

    pub(crate) async fn request_pass(&self) -> PassOutcome {
        // Flag first so a holder that is about to release sees the request.
        self.pass_requested.store(true, Ordering::SeqCst);
        match self.pass_lock.try_lock() {
            Ok(guard) => {
                self.drive_passes(guard).await;
                PassOutcome::Completed
            }
            Err(_) => {
                tracing::debug!("pass in flight, coalescing request");
                PassOutcome::Coalesced
            }
        }
    }

    async fn drive_passes(&self, guard: tokio::sync::MutexGuard<'_, ()>) {
        let mut held = Some(guard);
        while let Some(guard) = held.take() {
            self.pass_requested.store(false, Ordering::SeqCst);
            self.run_full_sync().await;
            drop(guard);
            if self.pass_requested.load(Ordering::SeqCst) {
                held = self.pass_lock.try_lock().ok();
            }
        }
    }

    async fn run_full_sync(&self) {
        let Some(context) = self.pass_context() else {
            tracing::debug!("no active session, skipping pass");
            return;
        };
        let generation = context.generation;
        self.transition(generation, SyncStatus::Syncing, None);

        let report = |progress: Progress| self.report_progress(generation, progress);
        let reconciler = Reconciler::new(context.store.as_ref(), &context.root, &report);
        match reconciler.run().await {
            Ok(stats) => {
                tracing::info!(
                    downloaded = stats.pull.downloaded,
                    uploaded = stats.push.uploaded,
                    unchanged = stats.push.unchanged,
                    failed = stats.pull.failed + stats.push.failed,
                    "sync pass finished"
                );
                self.transition(generation, SyncStatus::Idle, None);
            }
            Err(err) => {
                tracing::error!(%err, class = ?err.api_class(), "sync pass aborted");
                self.transition(generation, SyncStatus::Error, Some(err.to_string()));
            }
        }
    }

    fn pass_context(&self) -> Option<PassContext> {
        let state = self.lock_state();
        if !state.session.active {
            return None;
        }
        Some(PassContext {
            generation: state.generation,
            store: state.store.clone()?,
            root: state.session.local_root.clone()?,
        })
    }

    fn transition(&self, generation: u64, status: SyncStatus, error: Option<String>) {
        let (observer, events) = {
            let mut state = self.lock_state();
            if state.generation != generation || !state.session.active {
                return;
            }
            let session = &mut state.session;
            if status == SyncStatus::Syncing && session.status == SyncStatus::Syncing {
                return;
            }
            session.status = status;
            let mut events = Vec::with_capacity(2);
            match status {
                SyncStatus::Idle => {
                    session.last_sync_at = Some(OffsetDateTime::now_utc());
                    session.last_error = None;
                }
                SyncStatus::Error => session.last_error = error.clone(),
                SyncStatus::Syncing => {}
            }
            events.push(session.status_event());
            if let Some(message) = error {
                events.push(SyncEvent::Error { message });
            }
            (state.observer.clone(), events)
        };
        if let Some(observer) = observer {
            for event in events {
                observer.notify(event);
            }
        }
    }

    fn report_progress(&self, generation: u64, progress: Progress) {
        let observer = {
            let mut state = self.lock_state();
            if state.generation != generation || !state.session.active {
                return;
            }
            state.session.progress = progress.clone();
            state.observer.clone()
        };
        if let Some(observer) = observer {
            observer.notify(SyncEvent::Progress(progress));
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_triggers(&self) -> MutexGuard<'_, Option<Triggers>> {
        self.triggers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    fn triggers_armed(&self) -> bool {
        self.lock_triggers().is_some()
    }
}

fn validated_root(root: PathBuf) -> Result<PathBuf, EngineError> {
    if root.as_os_str().is_empty() {
        return Err(EngineError::InvalidSession("local root is empty"));
    }
    Ok(root)
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
