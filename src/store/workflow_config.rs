//! Active workflow configuration
//!
//! Two stores: a TOML file holding a history of `[[workflow]]` records, and a
//! static in-memory value for deployments that never switch backends.
//!
//! ```toml
//! [[workflow]]
//! id = 1
//! workflow_type = "n8n"
//! is_active = false
//! updated_at = "2025-01-10T08:00:00Z"
//!
//! [[workflow]]
//! id = 2
//! workflow_type = "flowise"
//! is_active = true
//! updated_at = "2025-02-01T08:00:00Z"
//! ```

use super::StoreError;
use crate::protocol::{WorkflowConfig, WorkflowType};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};
use tracing::info;

/// Source of the active workflow type
#[async_trait]
pub trait WorkflowConfigStore: Send + Sync {
    /// The record currently in force
    async fn get_active_config(&self) -> Result<WorkflowConfig, StoreError>;

    /// Raw workflow type string of the active record
    async fn get_active_workflow_type(&self) -> Result<String, StoreError> {
        Ok(self.get_active_config().await?.workflow_type)
    }

    /// Make `workflow_type` the active record
    async fn set_active_workflow_type(
        &self,
        workflow_type: WorkflowType,
    ) -> Result<WorkflowConfig, StoreError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WorkflowConfigFile {
    #[serde(default)]
    workflow: Vec<WorkflowConfig>,
}

/// Latest active record wins (pure function)
fn select_active(records: &[WorkflowConfig]) -> Option<&WorkflowConfig> {
    records
        .iter()
        .filter(|record| record.is_active)
        .max_by_key(|record| (record.updated_at, record.id))
}

/// TOML-file backed store
pub struct FileWorkflowConfigStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileWorkflowConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_file(&self) -> Result<WorkflowConfigFile, StoreError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })?;

        toml::from_str(&content).map_err(|e| StoreError::Parse {
            path: self.path.clone(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl WorkflowConfigStore for FileWorkflowConfigStore {
    async fn get_active_config(&self) -> Result<WorkflowConfig, StoreError> {
        let file = self.read_file().await?;
        select_active(&file.workflow)
            .cloned()
            .ok_or(StoreError::NoActiveConfig)
    }

    async fn set_active_workflow_type(
        &self,
        workflow_type: WorkflowType,
    ) -> Result<WorkflowConfig, StoreError> {
        let _guard = self.write_lock.lock().await;

        let mut file = match self.read_file().await {
            Ok(file) => file,
            Err(StoreError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
                WorkflowConfigFile::default()
            }
            Err(e) => return Err(e),
        };

        for record in &mut file.workflow {
            record.is_active = false;
        }
        let record = WorkflowConfig {
            id: file.workflow.iter().map(|r| r.id).max().unwrap_or(0) + 1,
            workflow_type: workflow_type.to_string(),
            is_active: true,
            updated_at: Utc::now(),
        };
        file.workflow.push(record.clone());

        let content = toml::to_string(&file).map_err(|e| StoreError::Serialize {
            message: e.to_string(),
        })?;
        tokio::fs::write(&self.path, content)
            .await
            .map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })?;

        info!(
            workflow_type = %workflow_type,
            id = record.id,
            path = %self.path.display(),
            "Active workflow type updated"
        );
        Ok(record)
    }
}

/// Fixed in-memory value, still switchable at runtime through the admin API
pub struct StaticWorkflowConfigStore {
    current: RwLock<WorkflowConfig>,
}

impl StaticWorkflowConfigStore {
    /// Accepts any string so misconfiguration surfaces as a routing fallback
    pub fn new(workflow_type: impl Into<String>) -> Self {
        Self {
            current: RwLock::new(WorkflowConfig {
                id: 1,
                workflow_type: workflow_type.into(),
                is_active: true,
                updated_at: Utc::now(),
            }),
        }
    }
}

#[async_trait]
impl WorkflowConfigStore for StaticWorkflowConfigStore {
    async fn get_active_config(&self) -> Result<WorkflowConfig, StoreError> {
        Ok(self.current.read().await.clone())
    }

    async fn set_active_workflow_type(
        &self,
        workflow_type: WorkflowType,
    ) -> Result<WorkflowConfig, StoreError> {
        let mut current = self.current.write().await;
        current.id += 1;
        current.workflow_type = workflow_type.to_string();
        current.updated_at = Utc::now();
        Ok(current.clone())
    }
}
