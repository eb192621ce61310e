//! Fixed-pair platform controller.
//!
//! The platform is exactly two named containers (scoreboard web app and
//! its cache) managed as one unit. `start` is tear-down-then-recreate: it
//! stops any prior pair, regenerates the deployment spec from the current
//! config and hands it to the external deployment tool.

use rangebox_constants::{labels, status};
use rangebox_core::runtime::ContainerRuntime;
use rangebox_core::{OperationResult, PlatformConfig, PlatformPatch, Result};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Controller of the fixed platform pair.
pub struct PlatformController {
    config: PlatformConfig,
    data_dir: PathBuf,
    runtime: Arc<dyn ContainerRuntime>,
}

impl PlatformController {
    /// Builds a controller from the persisted config in `data_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be loaded or validated.
    pub fn load(data_dir: &Path, runtime: Arc<dyn ContainerRuntime>) -> Result<Self> {
        let config = PlatformConfig::load(data_dir)?;
        Ok(Self {
            config,
            data_dir: data_dir.to_path_buf(),
            runtime,
        })
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    /// Both managed container names.
    #[must_use]
    pub fn container_names(&self) -> Vec<String> {
        self.config.names().to_vec()
    }

    /// Tears down any prior pair, rewrites the deployment spec and invokes
    /// the deployment tool.
    pub async fn start(&self) -> OperationResult {
        let teardown = self.stop().await;
        if !teardown.success {
            return OperationResult::failed_with(
                "Failed to tear down previous platform pair",
                teardown
                    .error
                    .unwrap_or_else(|| "teardown failed".to_string()),
                teardown.data.unwrap_or_default(),
            );
        }

        let spec_path = self.config.spec_path(&self.data_dir);
        if let Err(e) = self.write_deploy_spec(&spec_path) {
            return OperationResult::failed("Failed to write deployment spec", e.to_string());
        }

        match self.run_deploy_tool(&spec_path).await {
            Ok(()) => {
                tracing::info!(spec = %spec_path.display(), "platform pair started");
                OperationResult::ok_with(
                    "Platform pair started",
                    json!({
                        "containers": self.config.names(),
                        "spec": spec_path.display().to_string(),
                    }),
                )
            }
            Err(output) => OperationResult::failed("Deployment tool failed", output),
        }
    }

    /// Stops both containers; an absent container is a `not_found` success.
    pub async fn stop(&self) -> OperationResult {
        let mut entries = Vec::with_capacity(2);
        let mut all_ok = true;

        for name in self.config.names() {
            let entry = match self.runtime.inspect(&name).await {
                Ok(None) => json!({ "container": name, "status": status::NOT_FOUND }),
                Ok(Some(_)) => match self.runtime.stop_and_remove(&name).await {
                    Ok(()) => {
                        tracing::info!(container = %name, "removed platform container");
                        json!({ "container": name, "status": status::REMOVED })
                    }
                    Err(e) => {
                        all_ok = false;
                        json!({
                            "container": name,
                            "status": status::ERROR,
                            "error": e.to_string(),
                        })
                    }
                },
                Err(e) => {
                    all_ok = false;
                    json!({
                        "container": name,
                        "status": status::ERROR,
                        "error": e.to_string(),
                    })
                }
            };
            entries.push(entry);
        }

        let data = json!({ "containers": entries });
        if all_ok {
            OperationResult::ok_with("Platform pair stopped", data)
        } else {
            OperationResult::failed_with(
                "Failed to stop platform pair",
                "one or more stop operations failed",
                data,
            )
        }
    }

    /// Reports status of both containers.
    pub async fn status(&self) -> OperationResult {
        let mut entries = Vec::with_capacity(2);
        let mut all_ok = true;

        for name in self.config.names() {
            let entry = match self.runtime.inspect(&name).await {
                Ok(Some(info)) => json!({ "container": name, "status": info.status }),
                Ok(None) => json!({ "container": name, "status": status::NOT_FOUND }),
                Err(e) => {
                    all_ok = false;
                    json!({
                        "container": name,
                        "status": status::ERROR,
                        "error": e.to_string(),
                    })
                }
            };
            entries.push(entry);
        }

        let data = json!({ "containers": entries });
        if all_ok {
            OperationResult::ok_with("Platform status", data)
        } else {
            OperationResult::failed_with(
                "Failed to resolve platform status",
                "one or more status lookups failed",
                data,
            )
        }
    }

    /// Read-only projection of the configuration.
    #[must_use]
    pub fn show_config(&self) -> OperationResult {
        match serde_json::to_value(&self.config) {
            Ok(value) => OperationResult::ok_with("Platform configuration", value),
            Err(e) => OperationResult::failed("Failed to render configuration", e.to_string()),
        }
    }

    /// Validates, merges and persists a partial config update; the caller
    /// rebuilds the controller on success.
    #[must_use]
    pub fn set_config(&self, patch: &PlatformPatch) -> OperationResult {
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

    fn write_deploy_spec(&self, path: &Path) -> Result<()> {
        let spec = DeploySpec::from_config(&self.config);
        let yaml = serde_yaml::to_string(&spec)
            .map_err(|e| rangebox_core::CoreError::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, yaml)?;
        Ok(())
    }

    async fn run_deploy_tool(&self, spec_path: &Path) -> std::result::Result<(), String> {
        let mut argv = self.config.deploy_command.clone();
        argv.push(spec_path.display().to_string());
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| "deploy command is empty".to_string())?;

        let timeout = Duration::from_secs(self.config.deploy_timeout_secs);
        let output = tokio::process::Command::new(program).args(args).output();

        match tokio::time::timeout(timeout, output).await {
            Err(_) => Err(format!(
                "{program} did not finish within {}s",
                timeout.as_secs()
            )),
            Ok(Err(e)) => Err(format!("failed to launch {program}: {e}")),
            Ok(Ok(output)) if output.status.success() => Ok(()),
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let stdout = String::from_utf8_lossy(&output.stdout);
                Err(format!(
                    "{program} exited with {}: {}{}",
                    output.status,
                    stdout.trim(),
                    stderr.trim(),
                ))
            }
        }
    }
}

/// Generated deployment spec handed to the external tool.
#[derive(Debug, Serialize)]
struct DeploySpec {
    version: String,
    processes: BTreeMap<String, DeployProcess>,
}

#[derive(Debug, Serialize)]
struct DeployProcess {
    command: String,
    availability: Availability,
}

#[derive(Debug, Serialize)]
struct Availability {
    restart: String,
}

impl DeploySpec {
    fn from_config(config: &PlatformConfig) -> Self {
        let mut processes = BTreeMap::new();
        processes.insert(
            config.web_name.clone(),
            DeployProcess::container(&config.web_name, &config.web_image, config.web_port),
        );
        processes.insert(
            config.cache_name.clone(),
            DeployProcess::container(&config.cache_name, &config.cache_image, config.cache_port),
        );
        Self {
            version: "0.5".to_string(),
            processes,
        }
    }
}

impl DeployProcess {
    fn container(name: &str, image: &str, port: u16) -> Self {
        Self {
            command: format!(
                "docker run --rm --name {name} -p {port}:{port} -l {}={} {image}",
                labels::PROGRAM,
                labels::PROGRAM_PLATFORM,
            ),
            availability: Availability {
                restart: "on_failure".to_string(),
            },
        }
    }
}
