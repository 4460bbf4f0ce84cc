use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::{broadcast, mpsc};

pub const PHASE_DOWNLOADING: &str = "Downloading...";
pub const PHASE_UPLOADING: &str = "Uploading...";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
    pub phase: String,
}

impl Progress {
    pub fn new(completed: usize, total: usize, phase: &str) -> Self {
        Self {
            completed,
            total,
            phase: phase.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SyncEvent {
    Status {
        status: SyncStatus,
        error: Option<String>,
        #[serde(with = "time::serde::rfc3339::option")]
        last_sync_at: Option<OffsetDateTime>,
    },
    Progress(Progress),
    Error {
        message: String,
    },
}

/// Receives engine events. Implementations must not block; they are called
/// from inside a reconciliation pass.
pub trait SyncObserver: Send + Sync {
    fn notify(&self, event: SyncEvent);
}

impl SyncObserver for mpsc::UnboundedSender<SyncEvent> {
    fn notify(&self, event: SyncEvent) {
        let _ = self.send(event);
    }
}

impl SyncObserver for mpsc::Sender<SyncEvent> {
    fn notify(&self, event: SyncEvent) {
        // A slow host loses progress ticks, not the pass.
        let _ = self.try_send(event);
    }
}

impl SyncObserver for broadcast::Sender<SyncEvent> {
    fn notify(&self, event: SyncEvent) {
        let _ = self.send(event);
    }
}

/// Writes events to the log; used by the daemon when no UI is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl SyncObserver for TracingObserver {
    fn notify(&self, event: SyncEvent) {
        match event {
            SyncEvent::Status {
                status,
                error,
                last_sync_at,
            } => {
                tracing::info!(?status, ?error, ?last_sync_at, "sync status changed");
            }
            SyncEvent::Progress(progress) => {
                tracing::debug!(
                    completed = progress.completed,
                    total = progress.total,
                    phase = %progress.phase,
                    "sync progress"
                );
            }
            SyncEvent::Error { message } => {
                tracing::error!(%message, "sync pass failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_event_serializes_with_kind_tag() {
        let event = SyncEvent::Status {
            status: SyncStatus::Idle,
            error: None,
            last_sync_at: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "kind": "status",
                "status": "idle",
                "error": null,
                "last_sync_at": null
            })
        );
    }

    #[test]
    fn progress_event_flattens_counters() {
        let event = SyncEvent::Progress(Progress::new(1, 3, PHASE_UPLOADING));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "progress");
        assert_eq!(json["completed"], 1);
        assert_eq!(json["phase"], "Uploading...");
    }

    #[tokio::test]
    async fn channel_observers_forward_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.notify(SyncEvent::Error {
            message: "boom".into(),
        });
        assert_eq!(
            rx.recv().await,
            Some(SyncEvent::Error {
                message: "boom".into()
            })
        );

        let (btx, mut brx) = broadcast::channel(4);
        btx.notify(SyncEvent::Progress(Progress::default()));
        assert!(matches!(brx.recv().await, Ok(SyncEvent::Progress(_))));
    }
}
