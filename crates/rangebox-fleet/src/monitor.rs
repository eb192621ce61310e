//! Background lifecycle monitor.
//!
//! A single loop polls the runtime for every watched container name,
//! publishes status transitions (and only transitions) and reaps pooled
//! instances that have outlived their lifespan. Reaps are dispatched as
//! detached tasks through the engine's own serialized stop command, and an
//! outstanding-reap set keyed by name keeps a slow reap from piling up
//! duplicates.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use rangebox_constants::{labels, status};
use rangebox_core::runtime::{ContainerInfo, ContainerRuntime};
use rangebox_core::OperationResult;
use rangebox_events::{Audience, EventSink, StatusEvent};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

/// Dispatches a reap for one expired instance.
///
/// Implemented by the command server: a reap is the engine's own stop-one
/// command, serialized with every client command so it can never race a
/// concurrent start or stop on the same port.
#[async_trait]
pub trait ReapHandle: Send + Sync {
    /// Stops and removes one pooled instance by name.
    async fn reap(&self, container: &str) -> OperationResult;
}

/// Names the monitor watches, pushed by the command server after every
/// controller (re)build.
#[derive(Debug, Clone, Default)]
pub struct WatchList {
    /// Derived names of every exercise pool slot.
    pub exercises: Vec<String>,
    /// The two platform container names.
    pub platform: Vec<String>,
    /// Lifespan applied to instances missing the lifespan label.
    pub default_lifespan_minutes: u32,
}

/// Background monitor over both fleets.
pub struct LifecycleMonitor {
    runtime: Arc<dyn ContainerRuntime>,
    events: Arc<dyn EventSink>,
    reaper: Arc<dyn ReapHandle>,
    watch_list: Arc<RwLock<WatchList>>,
    poll_interval: Duration,
    last_status: HashMap<String, String>,
    pending_reaps: Arc<Mutex<HashSet<String>>>,
}

impl LifecycleMonitor {
    /// Creates a monitor; it does nothing until [`spawn`](Self::spawn)ed.
    #[must_use]
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        events: Arc<dyn EventSink>,
        reaper: Arc<dyn ReapHandle>,
        watch_list: Arc<RwLock<WatchList>>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            runtime,
            events,
            reaper,
            watch_list,
            poll_interval,
            last_status: HashMap::new(),
            pending_reaps: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Starts the poll loop on its own task.
    #[must_use]
    pub fn spawn(self) -> MonitorHandle {
        let poll_interval = self.poll_interval;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(self.run(shutdown_rx));
        MonitorHandle {
            shutdown: shutdown_tx,
            handle,
            poll_interval,
        }
    }

    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(
            interval_secs = self.poll_interval.as_secs(),
            "lifecycle monitor started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("lifecycle monitor stopped");
    }

    /// Runs one poll cycle.
    pub async fn tick(&mut self) {
        let watched = self.watch_list.read().await.clone();
        for name in &watched.exercises {
            self.observe(name, true, watched.default_lifespan_minutes)
                .await;
        }
        for name in &watched.platform {
            self.observe(name, false, 0).await;
        }
    }

    async fn observe(&mut self, name: &str, is_exercise: bool, default_lifespan: u32) {
        let info = match self.runtime.inspect(name).await {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(container = %name, error = %e, "failed to poll container");
                return;
            }
        };

        let current = info
            .as_ref()
            .map_or_else(|| status::NOT_FOUND.to_string(), |info| info.status.clone());

        if self.is_transition(name, &current) {
            tracing::info!(container = %name, from = ?self.last_status.get(name), to = %current, "status transition");
            let event = StatusEvent::now(name, current.as_str());
            self.events.publish(Audience::Admin, &event).await;
            if is_exercise {
                self.events.publish(Audience::Client, &event).await;
            }
        }
        self.last_status.insert(name.to_string(), current);

        if is_exercise {
            if let Some(info) = info {
                self.reap_if_expired(name, &info, default_lifespan);
            }
        }
    }

    /// A change counts as a transition when the name was seen before with a
    /// different status, or appears for the first time already existing.
    fn is_transition(&self, name: &str, current: &str) -> bool {
        match self.last_status.get(name) {
            Some(previous) => previous != current,
            None => current != status::NOT_FOUND,
        }
    }

    fn reap_if_expired(&self, name: &str, info: &ContainerInfo, default_lifespan: u32) {
        let Some(created_at) = info.created_at else {
            return;
        };
        let lifespan_minutes = info
            .labels
            .get(labels::LIFESPAN_MINUTES)
            .and_then(|raw| raw.parse::<u32>().ok())
            .unwrap_or(default_lifespan);
        if lifespan_minutes == 0 {
            return;
        }

        let deadline = created_at + ChronoDuration::minutes(i64::from(lifespan_minutes));
        if Utc::now() <= deadline {
            return;
        }

        {
            let mut pending = lock_pending(&self.pending_reaps);
            if !pending.insert(name.to_string()) {
                return;
            }
        }

        tracing::info!(
            container = %name,
            lifespan_minutes,
            created_at = %created_at,
            "instance exceeded lifespan, reaping"
        );

        let reaper = Arc::clone(&self.reaper);
        let pending = Arc::clone(&self.pending_reaps);
        let container = name.to_string();
        tokio::spawn(async move {
            let result = reaper.reap(&container).await;
            if !result.success {
                tracing::warn!(
                    container = %container,
                    error = ?result.error,
                    "failed to reap expired instance"
                );
            }
            lock_pending(&pending).remove(&container);
        });
    }
}

// The set only sees insert/remove under this lock, so a poisoned mutex
// still holds a usable value.
fn lock_pending(
    pending: &Mutex<HashSet<String>>,
) -> std::sync::MutexGuard<'_, HashSet<String>> {
    pending
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Handle for stopping a spawned monitor.
pub struct MonitorHandle {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
    poll_interval: Duration,
}

impl MonitorHandle {
    /// Signals the loop to exit and joins it, bounded by one poll
    /// interval. A timed-out join is reported, not fatal.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if tokio::time::timeout(self.poll_interval, self.handle)
            .await
            .is_err()
        {
            tracing::warn!("lifecycle monitor did not stop within the poll interval");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{MockRuntime, RecordingSink};

    struct GatedReaper {
        calls: Mutex<Vec<String>>,
        release: tokio::sync::Semaphore,
    }

    impl GatedReaper {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                release: tokio::sync::Semaphore::new(0),
            }
        }
    }

    #[async_trait]
    impl ReapHandle for GatedReaper {
        async fn reap(&self, container: &str) -> OperationResult {
            self.calls.lock().unwrap().push(container.to_string());
            let _permit = self.release.acquire().await.unwrap();
            OperationResult::ok("reaped")
        }
    }

    fn watch_list(names: &[&str]) -> Arc<RwLock<WatchList>> {
        Arc::new(RwLock::new(WatchList {
            exercises: names.iter().map(ToString::to_string).collect(),
            platform: vec!["rtb_web".to_string(), "rtb_cache".to_string()],
            default_lifespan_minutes: 120,
        }))
    }

    fn monitor_with(
        runtime: Arc<MockRuntime>,
        sink: Arc<RecordingSink>,
        reaper: Arc<GatedReaper>,
        names: &[&str],
    ) -> LifecycleMonitor {
        LifecycleMonitor::new(
            runtime,
            sink,
            reaper,
            watch_list(names),
            Duration::from_millis(20),
        )
    }

    #[tokio::test]
    async fn test_transition_published_once() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.insert_running("js_3000", Some(3000));
        let sink = Arc::new(RecordingSink::new());
        let reaper = Arc::new(GatedReaper::new());
        let mut monitor = monitor_with(
            Arc::clone(&runtime),
            Arc::clone(&sink),
            reaper,
            &["js_3000"],
        );

        monitor.tick().await;
        monitor.tick().await;

        // One admin + one client event for the first observation, silence after.
        let events = sink.published();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].0, Audience::Admin);
        assert_eq!(events[1].0, Audience::Client);
        assert_eq!(events[0].1.status, "running");
    }

    #[tokio::test]
    async fn test_disappearance_becomes_not_found() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.insert_running("js_3000", Some(3000));
        let sink = Arc::new(RecordingSink::new());
        let reaper = Arc::new(GatedReaper::new());
        let mut monitor = monitor_with(
            Arc::clone(&runtime),
            Arc::clone(&sink),
            reaper,
            &["js_3000"],
        );

        monitor.tick().await;
        runtime.containers.lock().unwrap().clear();
        monitor.tick().await;
        monitor.tick().await;

        let events = sink.published();
        // running (admin+client), then not_found (admin+client), then silence.
        assert_eq!(events.len(), 4);
        assert_eq!(events[2].1.status, "not_found");
    }

    #[tokio::test]
    async fn test_absent_slots_never_publish() {
        let runtime = Arc::new(MockRuntime::new());
        let sink = Arc::new(RecordingSink::new());
        let reaper = Arc::new(GatedReaper::new());
        let mut monitor = monitor_with(
            Arc::clone(&runtime),
            Arc::clone(&sink),
            reaper,
            &["js_3000", "js_3001"],
        );

        monitor.tick().await;
        assert!(sink.published().is_empty());
    }

    #[tokio::test]
    async fn test_platform_events_skip_client_audience() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.insert_running("rtb_web", Some(8888));
        let sink = Arc::new(RecordingSink::new());
        let reaper = Arc::new(GatedReaper::new());
        let mut monitor = monitor_with(Arc::clone(&runtime), Arc::clone(&sink), reaper, &[]);

        monitor.tick().await;
        let events = sink.published();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, Audience::Admin);
        assert_eq!(events[0].1.container, "rtb_web");
    }

    #[tokio::test]
    async fn test_expired_instance_reaped_once() {
        let runtime = Arc::new(MockRuntime::new());
        let mut container_labels = HashMap::new();
        container_labels.insert(labels::LIFESPAN_MINUTES.to_string(), "30".to_string());
        runtime.insert_with(
            "js_3000",
            "running",
            Utc::now() - ChronoDuration::minutes(90),
            container_labels,
            Some(3000),
        );
        let sink = Arc::new(RecordingSink::new());
        let reaper = Arc::new(GatedReaper::new());
        let mut monitor = monitor_with(
            Arc::clone(&runtime),
            Arc::clone(&sink),
            Arc::clone(&reaper),
            &["js_3000"],
        );

        // Two consecutive ticks observe the expired instance while the reap
        // is still outstanding; only one reap command is dispatched.
        monitor.tick().await;
        monitor.tick().await;
        tokio::task::yield_now().await;

        assert_eq!(reaper.calls.lock().unwrap().as_slice(), ["js_3000"]);
        reaper.release.add_permits(1);
    }

    #[tokio::test]
    async fn test_fresh_instance_not_reaped() {
        let runtime = Arc::new(MockRuntime::new());
        let mut container_labels = HashMap::new();
        container_labels.insert(labels::LIFESPAN_MINUTES.to_string(), "30".to_string());
        runtime.insert_with(
            "js_3000",
            "running",
            Utc::now() - ChronoDuration::minutes(5),
            container_labels,
            Some(3000),
        );
        let sink = Arc::new(RecordingSink::new());
        let reaper = Arc::new(GatedReaper::new());
        let mut monitor = monitor_with(
            Arc::clone(&runtime),
            Arc::clone(&sink),
            Arc::clone(&reaper),
            &["js_3000"],
        );

        monitor.tick().await;
        assert!(reaper.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_spawn_and_graceful_stop() {
        let runtime = Arc::new(MockRuntime::new());
        let sink = Arc::new(RecordingSink::new());
        let reaper = Arc::new(GatedReaper::new());
        let monitor = monitor_with(Arc::clone(&runtime), Arc::clone(&sink), reaper, &[]);

        let handle = monitor.spawn();
        tokio::time::sleep(Duration::from_millis(5)).await;
        handle.stop().await;
    }
}
