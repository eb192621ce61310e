//! Pooled exercise fleet controller.
//!
//! The pool's extent is the configured port range; membership is derived
//! from the runtime on demand, never persisted. Instance names are
//! `<prefix><port>`.

use rangebox_constants::{labels, status};
use rangebox_core::runtime::{ContainerRuntime, ContainerSpec};
use rangebox_core::{ExerciseConfig, ExercisePatch, OperationResult, Result};
use serde_json::json;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Reference to one pool instance: a slot port or a literal name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceRef {
    /// A port inside the pool range.
    Port(u16),
    /// A full container name.
    Name(String),
}

impl InstanceRef {
    /// Resolves the reference to a container name.
    #[must_use]
    pub fn resolve(&self, config: &ExerciseConfig) -> String {
        match self {
            Self::Port(port) => config.instance_name(*port),
            Self::Name(name) => name
                .parse::<u16>()
                .map_or_else(|_| name.clone(), |port| config.instance_name(port)),
        }
    }
}

/// Controller of the pooled exercise fleet.
pub struct ExerciseController {
    config: ExerciseConfig,
    data_dir: PathBuf,
    runtime: Arc<dyn ContainerRuntime>,
}

impl ExerciseController {
    /// Builds a controller from the persisted config in `data_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be loaded or validated.
    pub fn load(data_dir: &Path, runtime: Arc<dyn ContainerRuntime>) -> Result<Self> {
        let config = ExerciseConfig::load(data_dir)?;
        Ok(Self {
            config,
            data_dir: data_dir.to_path_buf(),
            runtime,
        })
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> &ExerciseConfig {
        &self.config
    }

    pub(crate) fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub(crate) fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    /// Derived container name of every slot in the range.
    #[must_use]
    pub fn instance_names(&self) -> Vec<String> {
        self.config
            .ports()
            .map(|port| self.config.instance_name(port))
            .collect()
    }

    /// Starts one instance on the first free port of the range.
    ///
    /// Pool exhaustion is a normal outcome: a successful result carrying
    /// the message `"No available ports"` and no container.
    pub async fn start(&self) -> OperationResult {
        let port = match self.find_free_port().await {
            Ok(Some(port)) => port,
            Ok(None) => return OperationResult::ok("No available ports"),
            Err(e) => {
                return OperationResult::failed("Failed to scan port range", e.to_string())
            }
        };

        let name = self.config.instance_name(port);
        let mut spec = ContainerSpec::new(&name, &self.config.image);
        spec.env = self.config.env.clone();
        spec.container_port = Some(self.config.container_port);
        spec.host_port = Some(port);
        spec.labels.insert(
            labels::PROGRAM.to_string(),
            labels::PROGRAM_EXERCISE.to_string(),
        );
        spec.labels.insert(
            labels::LIFESPAN_MINUTES.to_string(),
            self.config.lifespan_minutes.to_string(),
        );

        match self.runtime.create_and_start(&spec).await {
            Ok(_) => {
                tracing::info!(container = %name, port, "started exercise instance");
                OperationResult::ok_with(
                    format!("Started {name}"),
                    json!({
                        "container": name,
                        "port": port,
                        "status": status::RUNNING,
                    }),
                )
            }
            Err(e) => {
                tracing::error!(container = %name, port, error = %e, "failed to start exercise instance");
                OperationResult::failed_with(
                    format!("Failed to start {name}"),
                    e.to_string(),
                    json!({ "container": name, "port": port }),
                )
            }
        }
    }

    /// Stops and removes one instance. Absence is a success (`not_found`),
    /// which makes repeated stop calls idempotent.
    pub async fn stop_instance(&self, target: &InstanceRef) -> OperationResult {
        let name = target.resolve(&self.config);
        match self.runtime.inspect(&name).await {
            Ok(None) => OperationResult::not_found(&name),
            Ok(Some(_)) => match self.runtime.stop_and_remove(&name).await {
                Ok(()) => {
                    tracing::info!(container = %name, "removed exercise instance");
                    OperationResult::ok_with(
                        format!("Removed {name}"),
                        json!({ "container": name, "status": status::REMOVED }),
                    )
                }
                Err(e) => OperationResult::failed_with(
                    format!("Failed to remove {name}"),
                    e.to_string(),
                    json!({ "container": name, "status": status::ERROR }),
                ),
            },
            Err(e) => OperationResult::failed_with(
                format!("Failed to inspect {name}"),
                e.to_string(),
                json!({ "container": name, "status": status::ERROR }),
            ),
        }
    }

    /// Stops every slot in the range. `data.containers` holds one entry per
    /// slot regardless of individual outcomes; overall success is their AND.
    pub async fn stop_all(&self) -> OperationResult {
        let mut entries = Vec::with_capacity(self.config.pool_size());
        let mut all_ok = true;

        for port in self.config.ports() {
            let result = self.stop_instance(&InstanceRef::Port(port)).await;
            all_ok &= result.success;
            entries.push(entry_from(&result, &self.config.instance_name(port)));
        }

        let data = json!({ "containers": entries });
        if all_ok {
            OperationResult::ok_with("Stopped exercise pool", data)
        } else {
            OperationResult::failed_with(
                "Failed to stop some exercise instances",
                "one or more stop operations failed",
                data,
            )
        }
    }

    /// Reports one entry per slot, including unallocated slots
    /// (`not_found`, host port −1).
    pub async fn status(&self) -> OperationResult {
        let existing = match self.runtime.list(&self.config.name_prefix).await {
            Ok(infos) => infos,
            Err(e) => {
                return OperationResult::failed("Failed to list exercise instances", e.to_string())
            }
        };

        let by_name: std::collections::HashMap<_, _> =
            existing.into_iter().map(|info| (info.name.clone(), info)).collect();

        let mut entries = Vec::with_capacity(self.config.pool_size());
        for port in self.config.ports() {
            let name = self.config.instance_name(port);
            let entry = match by_name.get(&name) {
                Some(info) => json!({
                    "container": name,
                    "port": port,
                    "status": info.status,
                    "host_port": info.host_port.map_or(status::NO_HOST_PORT, i64::from),
                }),
                None => json!({
                    "container": name,
                    "port": port,
                    "status": status::NOT_FOUND,
                    "host_port": status::NO_HOST_PORT,
                }),
            };
            entries.push(entry);
        }

        OperationResult::ok_with("Exercise pool status", json!({ "containers": entries }))
    }

    /// Status of a single instance.
    pub async fn status_instance(&self, target: &InstanceRef) -> OperationResult {
        let name = target.resolve(&self.config);
        match self.runtime.inspect(&name).await {
            Ok(Some(info)) => OperationResult::ok_with(
                format!("Status of {name}"),
                json!({
                    "container": name,
                    "status": info.status,
                    "host_port": info.host_port.map_or(status::NO_HOST_PORT, i64::from),
                }),
            ),
            Ok(None) => OperationResult::ok_with(
                format!("Container {name} not found"),
                json!({
                    "container": name,
                    "status": status::NOT_FOUND,
                    "host_port": status::NO_HOST_PORT,
                }),
            ),
            Err(e) => OperationResult::failed_with(
                format!("Failed to inspect {name}"),
                e.to_string(),
                json!({ "container": name, "status": status::ERROR }),
            ),
        }
    }

    /// Read-only projection of the configuration.
    #[must_use]
    pub fn show_config(&self) -> OperationResult {
        match serde_json::to_value(&self.config) {
            Ok(value) => OperationResult::ok_with("Exercise configuration", value),
            Err(e) => OperationResult::failed("Failed to render configuration", e.to_string()),
        }
    }

    /// Validates, merges and persists a partial config update. On success
    /// the caller is expected to rebuild the controller so the new range
    /// and lifespan take effect atomically.
    #[must_use]
    pub fn set_config(&self, patch: &ExercisePatch) -> OperationResult {
        let merged = match self.config.apply_patch(patch) {
            Ok(merged) => merged,
            Err(e) => return OperationResult::failed("Invalid configuration", e.to_string()),
        };
        if let Err(e) = merged.save(&self.data_dir) {
            return OperationResult::failed("Failed to persist configuration", e.to_string());
        }
        match serde_json::to_value(&merged) {
            Ok(value) => OperationResult::ok_with("Configuration updated", value),
            Err(e) => OperationResult::failed("Failed to render configuration", e.to_string()),
        }
    }

    /// The configured pool port range.
    #[must_use]
    pub fn ports_range(&self) -> OperationResult {
        OperationResult::ok_with(
            "Exercise port range",
            json!({
                "start": self.config.port_start,
                "end": self.config.port_end,
            }),
        )
    }

    async fn find_free_port(&self) -> Result<Option<u16>> {
        let taken: HashSet<String> = self
            .runtime
            .list(&self.config.name_prefix)
            .await?
            .into_iter()
            .map(|info| info.name)
            .collect();

        Ok(self
            .config
            .ports()
            .find(|port| !taken.contains(&self.config.instance_name(*port))))
    }
}

fn entry_from(result: &OperationResult, name: &str) -> serde_json::Value {
    result.data.clone().unwrap_or_else(|| {
        json!({
            "container": name,
            "status": status::ERROR,
            "error": result.error,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockRuntime;
    use tempfile::TempDir;

    fn controller_with(
        dir: &TempDir,
        runtime: Arc<MockRuntime>,
        config: ExerciseConfig,
    ) -> ExerciseController {
        config.save(dir.path()).unwrap();
        ExerciseController::load(dir.path(), runtime).unwrap()
    }

    fn small_pool() -> ExerciseConfig {
        ExerciseConfig {
            port_start: 3000,
            port_end: 3002,
            ..ExerciseConfig::default()
        }
    }

    #[tokio::test]
    async fn test_start_allocates_ascending() {
        let dir = TempDir::new().unwrap();
        let runtime = Arc::new(MockRuntime::new());
        let controller = controller_with(&dir, Arc::clone(&runtime), small_pool());

        for expected in ["js_3000", "js_3001", "js_3002"] {
            let result = controller.start().await;
            assert!(result.success);
            assert_eq!(result.data.unwrap()["container"], expected);
        }
        assert_eq!(runtime.created_names(), ["js_3000", "js_3001", "js_3002"]);
    }

    #[tokio::test]
    async fn test_start_skips_occupied_port() {
        let dir = TempDir::new().unwrap();
        let runtime = Arc::new(MockRuntime::new());
        runtime.insert_running("js_3000", Some(3000));
        let controller = controller_with(&dir, Arc::clone(&runtime), small_pool());

        let result = controller.start().await;
        assert!(result.success);
        assert_eq!(result.data.unwrap()["port"], 3001);
    }

    #[tokio::test]
    async fn test_exhausted_pool_is_success_without_container() {
        let dir = TempDir::new().unwrap();
        let runtime = Arc::new(MockRuntime::new());
        for port in 3000..=3002 {
            runtime.insert_running(&format!("js_{port}"), Some(port));
        }
        let controller = controller_with(&dir, Arc::clone(&runtime), small_pool());

        let result = controller.start().await;
        assert!(result.success);
        assert_eq!(result.message, "No available ports");
        assert!(runtime.created_names().is_empty());
    }

    #[tokio::test]
    async fn test_start_failure_keeps_diagnostics() {
        let dir = TempDir::new().unwrap();
        let runtime = Arc::new(MockRuntime::new());
        *runtime.fail_create.lock().unwrap() = Some("image missing".to_string());
        let controller = controller_with(&dir, Arc::clone(&runtime), small_pool());

        let result = controller.start().await;
        assert!(!result.success);
        let data = result.data.unwrap();
        assert_eq!(data["container"], "js_3000");
        assert_eq!(data["port"], 3000);
        assert!(result.error.unwrap().contains("image missing"));
    }

    #[tokio::test]
    async fn test_stop_instance_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let runtime = Arc::new(MockRuntime::new());
        runtime.insert_running("js_3001", Some(3001));
        let controller = controller_with(&dir, Arc::clone(&runtime), small_pool());

        let first = controller.stop_instance(&InstanceRef::Port(3001)).await;
        assert!(first.success);
        assert_eq!(first.status_marker(), Some("removed"));

        let second = controller.stop_instance(&InstanceRef::Port(3001)).await;
        assert!(second.success);
        assert_eq!(second.status_marker(), Some("not_found"));
    }

    #[tokio::test]
    async fn test_stop_instance_accepts_port_shaped_name() {
        let dir = TempDir::new().unwrap();
        let runtime = Arc::new(MockRuntime::new());
        runtime.insert_running("js_3002", Some(3002));
        let controller = controller_with(&dir, Arc::clone(&runtime), small_pool());

        let result = controller
            .stop_instance(&InstanceRef::Name("3002".to_string()))
            .await;
        assert!(result.success);
        assert_eq!(result.status_marker(), Some("removed"));
    }

    #[tokio::test]
    async fn test_stop_all_reports_every_slot() {
        let dir = TempDir::new().unwrap();
        let runtime = Arc::new(MockRuntime::new());
        runtime.insert_running("js_3001", Some(3001));
        let controller = controller_with(&dir, Arc::clone(&runtime), small_pool());

        let result = controller.stop_all().await;
        assert!(result.success);
        let containers = result.data.unwrap()["containers"].clone();
        assert_eq!(containers.as_array().unwrap().len(), 3);
        assert_eq!(containers[0]["status"], "not_found");
        assert_eq!(containers[1]["status"], "removed");
        assert_eq!(containers[2]["status"], "not_found");
    }

    #[tokio::test]
    async fn test_status_covers_unallocated_slots() {
        let dir = TempDir::new().unwrap();
        let runtime = Arc::new(MockRuntime::new());
        runtime.insert_running("js_3000", Some(3000));
        let controller = controller_with(&dir, Arc::clone(&runtime), small_pool());

        let result = controller.status().await;
        assert!(result.success);
        let containers = result.data.unwrap()["containers"].clone();
        assert_eq!(containers.as_array().unwrap().len(), 3);
        assert_eq!(containers[0]["status"], "running");
        assert_eq!(containers[0]["host_port"], 3000);
        assert_eq!(containers[1]["status"], "not_found");
        assert_eq!(containers[1]["host_port"], -1);
    }

    #[tokio::test]
    async fn test_set_config_persists_merge() {
        let dir = TempDir::new().unwrap();
        let runtime = Arc::new(MockRuntime::new());
        let controller = controller_with(&dir, Arc::clone(&runtime), small_pool());

        let patch = ExercisePatch {
            lifespan_minutes: Some(15),
            ..ExercisePatch::default()
        };
        let result = controller.set_config(&patch);
        assert!(result.success);

        let reloaded = ExerciseConfig::load(dir.path()).unwrap();
        assert_eq!(reloaded.lifespan_minutes, 15);
        assert_eq!(reloaded.port_end, 3002);
    }

    #[tokio::test]
    async fn test_set_config_rejects_and_keeps_file() {
        let dir = TempDir::new().unwrap();
        let runtime = Arc::new(MockRuntime::new());
        let controller = controller_with(&dir, Arc::clone(&runtime), small_pool());

        let patch = ExercisePatch {
            port_end: Some(100),
            ..ExercisePatch::default()
        };
        let result = controller.set_config(&patch);
        assert!(!result.success);

        let reloaded = ExerciseConfig::load(dir.path()).unwrap();
        assert_eq!(reloaded.port_end, 3002);
    }
}
