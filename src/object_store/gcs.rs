use super::{ObjectStore, ObjectStoreError};
use async_trait::async_trait;
use bytes::Bytes;
use object_store::{
    gcp::{GoogleCloudStorage, GoogleCloudStorageBuilder},
    ObjectStore as ObjStore,
};

/// Google Cloud Storage backed object store. Credentials come from the
/// ambient environment (service account file or metadata server); resolving
/// them is the deployment's problem, not ours.
#[derive(Debug)]
pub struct Engine(GoogleCloudStorage);

impl Engine {
    pub fn new(bucket: &str) -> Result<Self, ObjectStoreError> {
        let store = GoogleCloudStorageBuilder::from_env()
            .with_bucket_name(bucket)
            .build()
            .map_err(|e| ObjectStoreError::FailedPrecondition(e.to_string()))?;

        Ok(Engine(store))
    }
}

#[async_trait]
impl ObjectStore for Engine {
    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError> {
        let path = object_store::path::Path::from(key);

        match self.0.head(&path).await {
            Ok(_) => Ok(true),
            Err(e) => {
                if let object_store::Error::NotFound { path: _, source: _ } = e {
                    Ok(false)
                } else {
                    Err(ObjectStoreError::from(e))
                }
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError> {
        let path = object_store::path::Path::from(key);

        let result = self.0.get(&path).await.map_err(ObjectStoreError::from)?;

        let object = result.bytes().await.map_err(ObjectStoreError::from)?;

        Ok(object)
    }

    async fn put(&self, key: &str, content: Bytes, force: bool) -> Result<(), ObjectStoreError> {
        let path = object_store::path::Path::from(key);

        let meta = self.0.head(&path).await;

        if meta.is_ok() && !force {
            return Err(ObjectStoreError::Exists);
        }

        let payload = object_store::PutPayload::from_bytes(content);

        self.0
            .put(&path, payload)
            .await
            .map_err(ObjectStoreError::from)?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        let path = object_store::path::Path::from(key);

        self.0.delete(&path).await.map_err(ObjectStoreError::from)?;

        Ok(())
    }
}
