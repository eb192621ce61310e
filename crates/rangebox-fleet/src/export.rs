//! Missions export.
//!
//! Peripheral automation: provision a helper container that runs the
//! external content-export tool against the mission descriptor, wait for it
//! with a bound, then move the produced archive into the export directory.
//! The helper is removed on every exit path.

use crate::exercises::ExerciseController;
use chrono::Utc;
use rangebox_constants::labels;
use rangebox_core::runtime::ContainerSpec;
use rangebox_core::OperationResult;
use serde_json::json;
use std::path::Path;
use std::time::Duration;

/// Mount point of the data directory inside the helper container.
const EXPORT_MOUNT: &str = "/export";

/// Archive name the export tool writes under the mount.
const EXPORT_ARCHIVE: &str = "missions.zip";

impl ExerciseController {
    /// Runs the missions export through a helper container.
    pub async fn generate_missions_export(&self) -> OperationResult {
        let missions = &self.config().missions;
        let descriptor = self.data_dir().join(&missions.descriptor);
        if !descriptor.exists() {
            return OperationResult::failed(
                "Mission descriptor not found",
                descriptor.display().to_string(),
            );
        }

        let output_dir = self.data_dir().join(&missions.output_dir);
        if let Err(e) = std::fs::create_dir_all(&output_dir) {
            return OperationResult::failed("Failed to create export directory", e.to_string());
        }

        let helper_name = format!("{}export", self.config().name_prefix);
        let mut spec = ContainerSpec::new(&helper_name, &missions.export_image);
        spec.labels.insert(
            labels::PROGRAM.to_string(),
            labels::PROGRAM_HELPER.to_string(),
        );
        spec.binds = vec![format!("{}:{EXPORT_MOUNT}", self.data_dir().display())];
        spec.cmd = Some(vec![
            format!("{EXPORT_MOUNT}/{}", missions.descriptor),
            format!("{EXPORT_MOUNT}/{EXPORT_ARCHIVE}"),
        ]);

        let run = self
            .run_export_helper(&spec, Duration::from_secs(missions.timeout_secs))
            .await;

        // The helper is removed whatever happened above.
        if let Err(e) = self.runtime().stop_and_remove(&helper_name).await {
            tracing::warn!(container = %helper_name, error = %e, "failed to remove export helper");
        }

        if let Err(reason) = run {
            return OperationResult::failed("Missions export failed", reason);
        }

        match relocate_archive(self.data_dir(), &output_dir) {
            Ok(destination) => {
                tracing::info!(archive = %destination, "missions export finished");
                OperationResult::ok_with(
                    "Missions export finished",
                    json!({ "archive": destination }),
                )
            }
            Err(reason) => OperationResult::failed("Failed to relocate export archive", reason),
        }
    }

    async fn run_export_helper(
        &self,
        spec: &ContainerSpec,
        timeout: Duration,
    ) -> Result<(), String> {
        self.runtime()
            .create_and_start(spec)
            .await
            .map_err(|e| format!("failed to start export helper: {e}"))?;

        match self.runtime().wait_exit(&spec.name, timeout).await {
            Ok(0) => Ok(()),
            Ok(code) => Err(format!("export tool exited with status {code}")),
            Err(e) => Err(e.to_string()),
        }
    }
}

fn relocate_archive(data_dir: &Path, output_dir: &Path) -> Result<String, String> {
    let source = data_dir.join(EXPORT_ARCHIVE);
    if !source.exists() {
        return Err(format!("export tool produced no {EXPORT_ARCHIVE}"));
    }
    let destination = output_dir.join(format!(
        "missions-{}.zip",
        Utc::now().format("%Y%m%d-%H%M%S")
    ));
    std::fs::rename(&source, &destination).map_err(|e| e.to_string())?;
    Ok(destination.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockRuntime;
    use rangebox_core::ExerciseConfig;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn controller(dir: &TempDir, runtime: Arc<MockRuntime>) -> ExerciseController {
        ExerciseConfig::default().save(dir.path()).unwrap();
        ExerciseController::load(dir.path(), runtime).unwrap()
    }

    #[tokio::test]
    async fn test_export_relocates_archive_and_cleans_up() {
        let dir = TempDir::new().unwrap();
        let runtime = Arc::new(MockRuntime::new());
        let controller = controller(&dir, Arc::clone(&runtime));

        std::fs::write(dir.path().join("missions.yaml"), "missions: []\n").unwrap();
        // Pretend the helper produced its archive under the mount.
        std::fs::write(dir.path().join(EXPORT_ARCHIVE), b"zip").unwrap();

        let result = controller.generate_missions_export().await;
        assert!(result.success, "{result:?}");
        assert!(!dir.path().join(EXPORT_ARCHIVE).exists());
        assert!(runtime
            .removed
            .lock()
            .unwrap()
            .contains(&"js_export".to_string()));
    }

    #[tokio::test]
    async fn test_export_failure_still_removes_helper() {
        let dir = TempDir::new().unwrap();
        let runtime = Arc::new(MockRuntime::new());
        *runtime.exit_code.lock().unwrap() = 2;
        let controller = controller(&dir, Arc::clone(&runtime));

        std::fs::write(dir.path().join("missions.yaml"), "missions: []\n").unwrap();

        let result = controller.generate_missions_export().await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("status 2"));
        assert!(runtime
            .removed
            .lock()
            .unwrap()
            .contains(&"js_export".to_string()));
    }

    #[tokio::test]
    async fn test_missing_descriptor_short_circuits() {
        let dir = TempDir::new().unwrap();
        let runtime = Arc::new(MockRuntime::new());
        let controller = controller(&dir, Arc::clone(&runtime));

        let result = controller.generate_missions_export().await;
        assert!(!result.success);
        assert!(runtime.created_names().is_empty());
    }
}
