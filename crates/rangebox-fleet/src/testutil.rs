//! In-memory test doubles shared by the fleet tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rangebox_core::runtime::{ContainerInfo, ContainerRuntime, ContainerSpec};
use rangebox_core::{CoreError, Result};
use rangebox_events::{Audience, EventSink, StatusEvent};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// In-memory [`ContainerRuntime`] tracking created/removed containers.
#[derive(Default)]
pub struct MockRuntime {
    pub containers: Mutex<HashMap<String, ContainerInfo>>,
    pub created: Mutex<Vec<ContainerSpec>>,
    pub removed: Mutex<Vec<String>>,
    pub fail_create: Mutex<Option<String>>,
    pub exit_code: Mutex<i64>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a running container as if the engine already knew it.
    pub fn insert_running(&self, name: &str, host_port: Option<u16>) {
        self.insert_with(name, "running", Utc::now(), HashMap::new(), host_port);
    }

    pub fn insert_with(
        &self,
        name: &str,
        status: &str,
        created_at: DateTime<Utc>,
        labels: HashMap<String, String>,
        host_port: Option<u16>,
    ) {
        self.containers.lock().unwrap().insert(
            name.to_string(),
            ContainerInfo {
                name: name.to_string(),
                status: status.to_string(),
                created_at: Some(created_at),
                host_port,
                labels,
            },
        );
    }

    pub fn created_names(&self) -> Vec<String> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .map(|spec| spec.name.clone())
            .collect()
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<String> {
        if let Some(reason) = self.fail_create.lock().unwrap().clone() {
            return Err(CoreError::Runtime(reason));
        }
        self.created.lock().unwrap().push(spec.clone());
        self.containers.lock().unwrap().insert(
            spec.name.clone(),
            ContainerInfo {
                name: spec.name.clone(),
                status: "running".to_string(),
                created_at: Some(Utc::now()),
                host_port: spec.host_port,
                labels: spec.labels.clone(),
            },
        );
        Ok(format!("id-{}", spec.name))
    }

    async fn stop_and_remove(&self, name: &str) -> Result<()> {
        self.removed.lock().unwrap().push(name.to_string());
        if self.containers.lock().unwrap().remove(name).is_none() {
            return Err(CoreError::Runtime(format!("no such container: {name}")));
        }
        Ok(())
    }

    async fn inspect(&self, name: &str) -> Result<Option<ContainerInfo>> {
        Ok(self.containers.lock().unwrap().get(name).cloned())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ContainerInfo>> {
        Ok(self
            .containers
            .lock()
            .unwrap()
            .values()
            .filter(|info| info.name.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn wait_exit(&self, _name: &str, _timeout: Duration) -> Result<i64> {
        Ok(*self.exit_code.lock().unwrap())
    }
}

/// [`EventSink`] recording every published event.
#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<(Audience, StatusEvent)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<(Audience, StatusEvent)> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn publish(&self, audience: Audience, event: &StatusEvent) {
        self.events.lock().unwrap().push((audience, event.clone()));
    }
}
