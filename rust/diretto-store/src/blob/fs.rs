use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use super::{BlobStore, resolve};
use crate::DirettoStoreError;

/// A [BlobStore] that keeps blobs as files below a root directory, at the
/// same relative path they were written under.
#[derive(Clone, Debug)]
pub struct FileSystemBlobStore {
    root_dir: PathBuf,
}

impl FileSystemBlobStore {
    /// Creates a new [`FileSystemBlobStore`] that stores files in
    /// `root_dir`.
    pub async fn new<Pathlike>(root_dir: Pathlike) -> Result<Self, DirettoStoreError>
    where
        Pathlike: AsRef<Path>,
    {
        let root_dir = root_dir.as_ref().to_owned();
        tokio::fs::create_dir_all(&root_dir)
            .await
            .map_err(|error| DirettoStoreError::Backend(format!("{error}")))?;
        Ok(Self { root_dir })
    }

    /// The directory blobs are stored in
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    fn make_path(&self, path: &str) -> Result<(String, PathBuf), DirettoStoreError> {
        let relative = resolve(path)?;
        let full = relative
            .split('/')
            .fold(self.root_dir.clone(), |full, segment| full.join(segment));
        Ok((relative, full))
    }
}

#[async_trait]
impl BlobStore for FileSystemBlobStore {
    async fn exists(&self, path: &str) -> Result<bool, DirettoStoreError> {
        let (_, full) = self.make_path(path)?;
        tokio::fs::try_exists(&full)
            .await
            .map_err(|error| DirettoStoreError::Backend(format!("{error}")))
    }

    async fn write(&self, path: &str, body: Bytes) -> Result<(), DirettoStoreError> {
        let (relative, full) = self.make_path(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|error| DirettoStoreError::Backend(format!("{error}")))?;
        }
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&full)
            .await
        {
            Ok(file) => file,
            Err(error) if error.kind() == ErrorKind::AlreadyExists => {
                return Err(DirettoStoreError::Conflict(relative));
            }
            Err(error) => return Err(DirettoStoreError::Backend(format!("{error}"))),
        };

        let written = async {
            file.write_all(&body).await?;
            file.sync_all().await
        }
        .await;
        if let Err(error) = written {
            // Leave no partial blob behind
            let _ = tokio::fs::remove_file(&full).await;
            return Err(DirettoStoreError::Backend(format!("{error}")));
        }
        Ok(())
    }

    async fn read(&self, path: &str) -> Result<Bytes, DirettoStoreError> {
        let (relative, full) = self.make_path(path)?;
        if !self.exists(&relative).await? {
            return Err(DirettoStoreError::NotFound(relative));
        }

        tokio::fs::read(full)
            .await
            .map(Bytes::from)
            .map_err(|error| DirettoStoreError::Backend(format!("{error}")))
    }

    async fn len(&self, path: &str) -> Result<u64, DirettoStoreError> {
        let (relative, full) = self.make_path(path)?;
        if !self.exists(&relative).await? {
            return Err(DirettoStoreError::NotFound(relative));
        }

        tokio::fs::metadata(full)
            .await
            .map(|metadata| metadata.len())
            .map_err(|error| DirettoStoreError::Backend(format!("{error}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[tokio::test]
    async fn it_writes_blobs_below_the_root() -> Result<()> {
        let root = tempfile::tempdir()?;
        let store = FileSystemBlobStore::new(root.path()).await?;

        store
            .write("/doc1/att1.png", Bytes::from_static(b"png bytes"))
            .await?;

        assert!(root.path().join("doc1").join("att1.png").exists());
        assert!(store.exists("doc1/att1.png").await?);
        assert_eq!(store.read("/doc1/att1.png").await?, Bytes::from_static(b"png bytes"));
        assert_eq!(store.len("/doc1/att1.png").await?, 9);
        Ok(())
    }

    #[tokio::test]
    async fn it_reports_missing_blobs() -> Result<()> {
        let root = tempfile::tempdir()?;
        let store = FileSystemBlobStore::new(root.path()).await?;

        assert!(!store.exists("/doc1/att1.png").await?);
        assert!(matches!(
            store.read("/doc1/att1.png").await,
            Err(DirettoStoreError::NotFound(_))
        ));
        assert!(matches!(
            store.len("/doc1/att1.png").await,
            Err(DirettoStoreError::NotFound(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn it_never_overwrites_a_blob() -> Result<()> {
        let root = tempfile::tempdir()?;
        let store = FileSystemBlobStore::new(root.path()).await?;

        store
            .write("/doc1/att1.png", Bytes::from_static(b"first"))
            .await?;
        let second = store
            .write("doc1/att1.png", Bytes::from_static(b"second"))
            .await;

        assert_eq!(
            second,
            Err(DirettoStoreError::Conflict("doc1/att1.png".into()))
        );
        assert_eq!(store.read("doc1/att1.png").await?, Bytes::from_static(b"first"));
        Ok(())
    }

    #[tokio::test]
    async fn it_never_writes_outside_the_root() -> Result<()> {
        let parent = tempfile::tempdir()?;
        let root = parent.path().join("media");
        let store = FileSystemBlobStore::new(&root).await?;

        let result = store
            .write("/doc1/../../escaped.png", Bytes::from_static(b"x"))
            .await;

        assert!(matches!(result, Err(DirettoStoreError::InvalidPath(_))));
        assert!(!parent.path().join("escaped.png").exists());
        Ok(())
    }
}
