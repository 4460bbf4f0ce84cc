use std::future::Future;
use std::path::Path;
use std::sync::Weak;
use std::time::Duration;

use notify::RecommendedWatcher;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::engine::SyncEngine;
use super::local_watcher::start_notify_watcher;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(2);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerConfig {
    /// Quiet period after the last local change before a pass runs.
    pub debounce: Duration,
    pub poll_interval: Duration,
    pub watch_local: bool,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            watch_local: true,
        }
    }
}

/// Armed watch and poll triggers; dropping this disarms them.
pub(crate) struct Triggers {
    _watcher: Option<RecommendedWatcher>,
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for Triggers {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

pub(crate) fn arm(engine: Weak<SyncEngine>, root: &Path, config: &TriggerConfig) -> Triggers {
    let mut tasks = Vec::new();
    let mut watcher = None;

    if config.watch_local {
        match start_notify_watcher(root) {
            Ok((active, rx)) => {
                watcher = Some(active);
                let engine = engine.clone();
                tasks.push(tokio::spawn(debounce_loop(
                    rx,
                    config.debounce,
                    move |collapsed| {
                        let engine = engine.clone();
                        async move {
                            tracing::debug!(collapsed, "local changes settled");
                            fire(engine).await
                        }
                    },
                )));
            }
            Err(err) => {
                tracing::warn!(root = %root.display(), %err, "filesystem watcher unavailable, relying on polling");
            }
        }
    }

    tasks.push(tokio::spawn(poll_loop(config.poll_interval, move || {
        let engine = engine.clone();
        async move {
            tracing::debug!("poll interval elapsed");
            fire(engine).await
        }
    })));

    Triggers {
        _watcher: watcher,
        tasks,
    }
}

// The pass runs in its own task so that disarming the trigger never cancels
// a pass that is already under way.
async fn fire(engine: Weak<SyncEngine>) -> bool {
    let Some(engine) = engine.upgrade() else {
        return false;
    };
    let pass = tokio::spawn(async move {
        engine.request_pass().await;
    });
    if let Err(err) = pass.await {
        tracing::error!(%err, "sync pass task failed");
    }
    true
}

/// Collapses bursts of events: `fire` runs once `quiet` has elapsed without a
/// new event, receiving the number of events collapsed. Stops when the
/// channel closes or `fire` returns false.
pub async fn debounce_loop<T, F, Fut>(
    mut rx: mpsc::UnboundedReceiver<T>,
    quiet: Duration,
    mut fire: F,
) where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = bool>,
{
    while rx.recv().await.is_some() {
        let mut collapsed = 1usize;
        loop {
            match tokio::time::timeout(quiet, rx.recv()).await {
                Ok(Some(_)) => collapsed += 1,
                Ok(None) => return,
                Err(_) => break,
            }
        }
        if !fire(collapsed).await {
            return;
        }
    }
}

/// Calls `fire` every `interval`, first after one full interval.
pub async fn poll_loop<F, Fut>(interval: Duration, mut fire: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if !fire().await {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Arc<Mutex<Vec<(Instant, usize)>>>, impl FnMut(usize) -> std::future::Ready<bool>) {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&fired);
        let fire = move |collapsed| {
            sink.lock().unwrap().push((Instant::now(), collapsed));
            std::future::ready(true)
        };
        (fired, fire)
    }

    #[tokio::test(start_paused = true)]
    async fn five_rapid_changes_fire_once_after_quiet_period() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (fired, fire) = recorder();
        let start = Instant::now();
        let task = tokio::spawn(debounce_loop(rx, DEFAULT_DEBOUNCE, fire));

        for _ in 0..5 {
            tx.send(()).unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        let last_change = start + Duration::from_millis(400);
        tokio::time::sleep(Duration::from_secs(10)).await;

        let fired = fired.lock().unwrap().clone();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].1, 5);
        let delay = fired[0].0 - last_change;
        assert!(delay >= DEFAULT_DEBOUNCE, "fired too early: {delay:?}");
        assert!(delay < DEFAULT_DEBOUNCE + Duration::from_millis(50), "fired late: {delay:?}");

        drop(tx);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn separated_bursts_fire_separately() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (fired, fire) = recorder();
        let task = tokio::spawn(debounce_loop(rx, DEFAULT_DEBOUNCE, fire));

        tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        tx.send(()).unwrap();
        tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        let counts: Vec<_> = fired.lock().unwrap().iter().map(|(_, n)| *n).collect();
        assert_eq!(counts, vec![1, 2]);

        drop(tx);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn closing_channel_mid_burst_does_not_fire() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (fired, fire) = recorder();
        let task = tokio::spawn(debounce_loop(rx, DEFAULT_DEBOUNCE, fire));

        tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(tx);
        task.await.unwrap();

        assert!(fired.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn poll_fires_every_interval_until_told_to_stop() {
        let ticks = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&ticks);
        let start = Instant::now();
        poll_loop(DEFAULT_POLL_INTERVAL, move || {
            let mut ticks = sink.lock().unwrap();
            ticks.push(Instant::now());
            std::future::ready(ticks.len() < 3)
        })
        .await;

        let ticks = ticks.lock().unwrap();
        assert_eq!(ticks.len(), 3);
        let slack = Duration::from_millis(10);
        let first = ticks[0] - start;
        let third = ticks[2] - start;
        assert!(first >= DEFAULT_POLL_INTERVAL && first < DEFAULT_POLL_INTERVAL + slack);
        assert!(third >= DEFAULT_POLL_INTERVAL * 3 && third < DEFAULT_POLL_INTERVAL * 3 + slack);
    }
}
