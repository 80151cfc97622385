//! Persistence collaborators: workflow configuration and the user directory

pub mod users;
pub mod workflow_config;

use std::path::PathBuf;
use thiserror::Error;

pub use users::{InMemoryUserDirectory, UserDirectory};
pub use workflow_config::{
    FileWorkflowConfigStore, StaticWorkflowConfigStore, WorkflowConfigStore,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Failed to serialize store contents: {message}")]
    Serialize { message: String },

    #[error("No active workflow configuration")]
    NoActiveConfig,
}
