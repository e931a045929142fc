use super::{ObjectStore, ObjectStoreError};
use async_trait::async_trait;
use bytes::Bytes;
use object_store::{local::LocalFileSystem, ObjectStore as ObjStore};

/// On-disk object store, used for local development and tests.
#[derive(Debug)]
pub struct Engine(LocalFileSystem);

impl Engine {
    pub fn new(path: &str) -> Result<Self, ObjectStoreError> {
        std::fs::create_dir_all(path)
            .map_err(|e| ObjectStoreError::FailedPrecondition(e.to_string()))?;

        let store = LocalFileSystem::new_with_prefix(path)
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

        // We've found an object, but the user did not pass force, return an error.
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

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::ops::Deref;
    use tempfile::TempDir;

    pub struct TestHarness {
        pub store: Engine,
        _dir: TempDir,
    }

    impl TestHarness {
        pub fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let store = Engine::new(dir.path().to_str().unwrap()).unwrap();

            Self { store, _dir: dir }
        }
    }

    impl Deref for TestHarness {
        type Target = Engine;

        fn deref(&self) -> &Self::Target {
            &self.store
        }
    }

    #[tokio::test]
    /// Basic CRUD can be accomplished.
    async fn crud() {
        let harness = TestHarness::new();

        let test_key = "source/test_key.tar.gz";
        let test_value = Bytes::from("test_value");

        harness
            .put(test_key, test_value.clone(), false)
            .await
            .unwrap();

        assert!(harness.exists(test_key).await.unwrap());

        let returned_value = harness.get(test_key).await.unwrap();
        assert_eq!(test_value, returned_value);

        let test_value_2 = Bytes::from("test_value_2");

        harness
            .store
            .put(test_key, test_value_2.clone(), true)
            .await
            .unwrap();

        let returned_value = harness.get(test_key).await.unwrap();
        assert_eq!(test_value_2, returned_value);

        harness.delete(test_key).await.unwrap();

        assert!(!harness.exists(test_key).await.unwrap());

        let returned_err = harness.get(test_key).await.unwrap_err();
        assert_eq!(super::ObjectStoreError::NotFound, returned_err);
    }

    #[tokio::test]
    /// Writing over an existing object requires the force flag.
    async fn put_without_force_does_not_overwrite() {
        let harness = TestHarness::new();

        let test_key = "source/test_key.tar.gz";

        harness
            .put(test_key, Bytes::from("original"), false)
            .await
            .unwrap();

        let returned_err = harness
            .put(test_key, Bytes::from("clobber"), false)
            .await
            .unwrap_err();

        assert_eq!(super::ObjectStoreError::Exists, returned_err);

        let returned_value = harness.get(test_key).await.unwrap();
        assert_eq!(Bytes::from("original"), returned_value);
    }
}
