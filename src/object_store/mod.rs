pub mod filesystem;
pub mod gcs;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, sync::Arc};
use strum::{Display, EnumString};

/// Represents different object store failure possibilities.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ObjectStoreError {
    #[error("could not establish connection to object store; {0}")]
    Connection(String),

    #[error("requested entity not found")]
    NotFound,

    #[error("entity already exists")]
    Exists,

    #[error("unexpected storage error occurred; {0}")]
    Internal(String),

    /// Failed to start due to misconfigured settings, usually from a misconfigured settings file.
    #[error("could not init object store; {0}")]
    FailedPrecondition(String),
}

impl From<object_store::Error> for ObjectStoreError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { .. } => ObjectStoreError::NotFound,
            _ => ObjectStoreError::Internal(err.to_string()),
        }
    }
}

/// The interface between shipwright and whatever is holding staged source
/// archives for the remote build service to pull from.
#[async_trait]
pub trait ObjectStore: Debug + Send + Sync + 'static {
    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError>;
    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError>;
    async fn put(&self, key: &str, content: Bytes, force: bool) -> Result<(), ObjectStoreError>;
    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError>;
}

#[derive(
    Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Display, EnumString,
)]
#[serde(rename_all = "snake_case")] // This handles case insensitivity during deserialization
pub enum Engine {
    #[default]
    Gcs,
    Filesystem,
}

pub async fn new(
    config: &crate::conf::ObjectStore,
    bucket: &str,
) -> Result<Arc<dyn ObjectStore>, ObjectStoreError> {
    match config.engine {
        Engine::Gcs => {
            let engine = gcs::Engine::new(bucket)?;
            Ok(Arc::new(engine))
        }
        Engine::Filesystem => {
            let Some(filesystem) = &config.filesystem else {
                return Err(ObjectStoreError::FailedPrecondition(
                    "filesystem engine settings not found in config".into(),
                ));
            };

            let engine = filesystem::Engine::new(&filesystem.path)?;
            Ok(Arc::new(engine))
        }
    }
}
