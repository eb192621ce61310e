//! Command dispatch.
//!
//! The single worker drains the queue and runs one command at a time end to
//! end: parse → validate → controller call → event side effects → reply.
//! Controller replacement happens here too, which makes it just another
//! serialized command — the command after a `RESTART` or `SET_CONFIG` is
//! guaranteed to observe the fresh controller.

use crate::protocol::{self, ExerciseCommand, PlatformCommand, Request, ResultEnvelope};
use crate::registry::ManagerRegistry;
use crate::server::{CommandSender, WorkItem};
use async_trait::async_trait;
use rangebox_constants::wire;
use rangebox_core::runtime::ContainerRuntime;
use rangebox_core::OperationResult;
use rangebox_events::{Audience, EventSink, StatusEvent};
use rangebox_fleet::{
    ExerciseController, LifecycleMonitor, MonitorHandle, PlatformController, ReapHandle, WatchList,
};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};

/// The engine's command processor; owns the registry and the monitor's
/// watch list.
pub struct Dispatcher {
    registry: ManagerRegistry,
    runtime: Arc<dyn ContainerRuntime>,
    events: Arc<dyn EventSink>,
    watch_list: Arc<RwLock<WatchList>>,
    data_dir: PathBuf,
}

impl Dispatcher {
    /// Builds the dispatcher and loads both controllers from the persisted
    /// configs in `data_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if either controller config fails to load.
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        events: Arc<dyn EventSink>,
        data_dir: PathBuf,
    ) -> rangebox_core::Result<Self> {
        let exercises = Arc::new(ExerciseController::load(&data_dir, Arc::clone(&runtime))?);
        let platform = Arc::new(PlatformController::load(&data_dir, Arc::clone(&runtime))?);
        let watch_list = Arc::new(RwLock::new(WatchList::default()));
        Ok(Self {
            registry: ManagerRegistry::new(exercises, platform),
            runtime,
            events,
            watch_list,
            data_dir,
        })
    }

    /// Shared watch list handed to the lifecycle monitor.
    #[must_use]
    pub fn watch_list(&self) -> Arc<RwLock<WatchList>> {
        Arc::clone(&self.watch_list)
    }

    /// Spawns the lifecycle monitor against the current watch list.
    #[must_use]
    pub fn spawn_monitor(&self, queue: CommandSender, poll_interval: Duration) -> MonitorHandle {
        let monitor = LifecycleMonitor::new(
            Arc::clone(&self.runtime),
            Arc::clone(&self.events),
            Arc::new(QueueReaper { queue }),
            self.watch_list(),
            poll_interval,
        );
        monitor.spawn()
    }

    /// Processes one raw request line into a reply envelope.
    pub async fn handle_line(&self, line: &str) -> ResultEnvelope {
        match protocol::parse_line(line) {
            Ok(request) => self.dispatch(request).await,
            Err(e) => ResultEnvelope::error(e.to_string()),
        }
    }

    /// Publishes the monitor's initial name list.
    pub async fn push_watch_list(&self) {
        let exercises = self.registry.exercises();
        let platform = self.registry.platform();
        let mut watch = self.watch_list.write().await;
        *watch = WatchList {
            exercises: exercises.instance_names(),
            platform: platform.container_names(),
            default_lifespan_minutes: exercises.config().lifespan_minutes,
        };
    }

    async fn dispatch(&self, request: Request) -> ResultEnvelope {
        let (result, exercise_fleet) = match request {
            Request::Exercises(command) => (self.dispatch_exercises(command).await, true),
            Request::Platform(command) => (self.dispatch_platform(command).await, false),
        };
        self.publish_statuses(&result, exercise_fleet).await;
        ResultEnvelope::from_operation(result)
    }

    async fn dispatch_exercises(&self, command: ExerciseCommand) -> OperationResult {
        let controller = self.registry.exercises();
        match command {
            ExerciseCommand::Start => controller.start().await,
            ExerciseCommand::Stop => controller.stop_all().await,
            ExerciseCommand::StopOne(target) => controller.stop_instance(&target).await,
            ExerciseCommand::Status => controller.status().await,
            ExerciseCommand::StatusOne(target) => controller.status_instance(&target).await,
            ExerciseCommand::Config => controller.show_config(),
            ExerciseCommand::PortsRange => controller.ports_range(),
            ExerciseCommand::GenerateMissions => controller.generate_missions_export().await,
            ExerciseCommand::SetConfig(patch) => {
                let result = controller.set_config(&patch);
                if result.success {
                    self.rebuild_exercises(result).await
                } else {
                    result
                }
            }
            ExerciseCommand::Restart => {
                self.rebuild_exercises(OperationResult::ok("Exercise controller restarted"))
                    .await
            }
        }
    }

    async fn dispatch_platform(&self, command: PlatformCommand) -> OperationResult {
        let controller = self.registry.platform();
        match command {
            PlatformCommand::Start => controller.start().await,
            PlatformCommand::Stop => controller.stop().await,
            PlatformCommand::Status => controller.status().await,
            PlatformCommand::Config => controller.show_config(),
            PlatformCommand::SetConfig(patch) => {
                let result = controller.set_config(&patch);
                if result.success {
                    self.rebuild_platform(result).await
                } else {
                    result
                }
            }
            PlatformCommand::Restart => {
                self.rebuild_platform(OperationResult::ok("Platform controller restarted"))
                    .await
            }
        }
    }

    /// Builds a fresh exercise controller from the persisted config and
    /// swaps it in, then refreshes the monitor's names.
    async fn rebuild_exercises(&self, on_success: OperationResult) -> OperationResult {
        match ExerciseController::load(&self.data_dir, Arc::clone(&self.runtime)) {
            Ok(controller) => {
                self.registry.replace_exercises(Arc::new(controller));
                self.push_watch_list().await;
                tracing::info!("exercise controller replaced");
                on_success
            }
            Err(e) => OperationResult::failed(
                "Failed to rebuild exercise controller",
                e.to_string(),
            ),
        }
    }

    async fn rebuild_platform(&self, on_success: OperationResult) -> OperationResult {
        match PlatformController::load(&self.data_dir, Arc::clone(&self.runtime)) {
            Ok(controller) => {
                self.registry.replace_platform(Arc::new(controller));
                self.push_watch_list().await;
                tracing::info!("platform controller replaced");
                on_success
            }
            Err(e) => OperationResult::failed(
                "Failed to rebuild platform controller",
                e.to_string(),
            ),
        }
    }

    /// Fans out one event per status-bearing container in the result —
    /// admin always, client as well for the exercise fleet.
    async fn publish_statuses(&self, result: &OperationResult, exercise_fleet: bool) {
        let Some(data) = &result.data else { return };
        for (container, current) in status_pairs(data) {
            let event = StatusEvent::now(container, current);
            self.events.publish(Audience::Admin, &event).await;
            if exercise_fleet {
                self.events.publish(Audience::Client, &event).await;
            }
        }
    }
}

fn status_pairs(data: &Value) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    collect_pair(data, &mut pairs);
    if let Some(entries) = data.get("containers").and_then(Value::as_array) {
        for entry in entries {
            collect_pair(entry, &mut pairs);
        }
    }
    pairs
}

fn collect_pair(value: &Value, pairs: &mut Vec<(String, String)>) {
    if let (Some(container), Some(current)) = (
        value.get("container").and_then(Value::as_str),
        value.get("status").and_then(Value::as_str),
    ) {
        pairs.push((container.to_string(), current.to_string()));
    }
}

/// Runs the single worker until the queue closes.
pub async fn run_worker(mut queue: mpsc::Receiver<WorkItem>, dispatcher: Arc<Dispatcher>) {
    while let Some(item) = queue.recv().await {
        let envelope = dispatcher.handle_line(&item.line).await;
        if item.reply.send(envelope).is_err() {
            tracing::debug!("requester went away before the reply was ready");
        }
    }
    tracing::info!("command worker stopped");
}

/// Reaps expired instances by enqueueing the engine's own stop command,
/// serialized with every client command.
struct QueueReaper {
    queue: CommandSender,
}

#[async_trait]
impl ReapHandle for QueueReaper {
    async fn reap(&self, container: &str) -> OperationResult {
        let line = json!({
            "prog": wire::PROG_EXERCISES,
            "command": "STOP_ONE",
            "args": { "container": container },
        })
        .to_string();

        let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
        if self
            .queue
            .send(WorkItem {
                line,
                reply: reply_tx,
            })
            .await
            .is_err()
        {
            return OperationResult::failed("Failed to enqueue reap", "command queue closed");
        }

        match reply_rx.await {
            Ok(envelope) if envelope.is_ok() => OperationResult::ok(envelope.message),
            Ok(envelope) => OperationResult::failed("Reap rejected", envelope.message),
            Err(_) => OperationResult::failed("Reap reply dropped", "worker stopped"),
        }
    }
}
