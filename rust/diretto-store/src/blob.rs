use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::DirettoStoreError;

mod fs;
pub use fs::*;

mod memory;
pub use memory::*;

/// Persistence for uploaded attachment bytes.
///
/// Paths are slash-separated and relative to the store's root. Every
/// implementation passes them through [normalize_path] first and reports
/// [DirettoStoreError::InvalidPath] for paths that would escape the root.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Whether a blob is stored at `path`
    async fn exists(&self, path: &str) -> Result<bool, DirettoStoreError>;

    /// Store `body` at a new `path`. A blob already stored there is left
    /// untouched and reported as [DirettoStoreError::Conflict].
    async fn write(&self, path: &str, body: Bytes) -> Result<(), DirettoStoreError>;

    /// Read the blob stored at `path`
    async fn read(&self, path: &str) -> Result<Bytes, DirettoStoreError>;

    /// The size in bytes of the blob stored at `path`
    async fn len(&self, path: &str) -> Result<u64, DirettoStoreError>;
}

#[async_trait]
impl<T> BlobStore for Arc<T>
where
    T: BlobStore + ?Sized,
{
    async fn exists(&self, path: &str) -> Result<bool, DirettoStoreError> {
        self.as_ref().exists(path).await
    }

    async fn write(&self, path: &str, body: Bytes) -> Result<(), DirettoStoreError> {
        self.as_ref().write(path, body).await
    }

    async fn read(&self, path: &str) -> Result<Bytes, DirettoStoreError> {
        self.as_ref().read(path).await
    }

    async fn len(&self, path: &str) -> Result<u64, DirettoStoreError> {
        self.as_ref().len(path).await
    }
}

/// Lexically resolve `.` and `..` segments of a slash-separated path.
///
/// Leading, trailing and repeated slashes are dropped. Returns `None` when
/// the path is empty after resolution or climbs above its root.
pub fn normalize_path(path: &str) -> Option<String> {
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            segment if segment.contains('\\') || segment.contains('\0') => return None,
            segment => segments.push(segment),
        }
    }

    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

pub(crate) fn resolve(path: &str) -> Result<String, DirettoStoreError> {
    normalize_path(path).ok_or_else(|| DirettoStoreError::InvalidPath(path.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_strips_redundant_segments() {
        assert_eq!(
            normalize_path("/doc1//./att1.png"),
            Some("doc1/att1.png".to_string())
        );
        assert_eq!(
            normalize_path("doc1/sub/../att1.png"),
            Some("doc1/att1.png".to_string())
        );
    }

    #[test]
    fn it_rejects_paths_escaping_the_root() {
        assert_eq!(normalize_path("../secret"), None);
        assert_eq!(normalize_path("/doc1/../../secret"), None);
        assert_eq!(normalize_path("doc1\\..\\secret"), None);
    }

    #[test]
    fn it_rejects_empty_paths() {
        assert_eq!(normalize_path(""), None);
        assert_eq!(normalize_path("/"), None);
        assert_eq!(normalize_path("doc1/.."), None);
    }
}
