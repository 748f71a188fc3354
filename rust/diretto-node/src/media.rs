//! The storage service.
//!
//! Accepts attachment bytes written directly by clients. A write is
//! authorized by the upload token the metadata service minted, recomputed
//! here from what the request actually carries; the answer carries a publish
//! token the client hands back to the metadata service. The two services
//! share only the signing secret.

use std::sync::Arc;

use bytes::Bytes;
use diretto_store::{BlobStore, Connection, DirettoStoreError, normalize_path};
use serde::{Deserialize, Serialize};

use crate::{ApiError, Context, UPLOAD_ACCEPTED};

/// An upload as received by the storage service.
#[derive(Debug, Clone, Default)]
pub struct PutRequest {
    /// The `Authorization` header
    pub authorization: Option<String>,
    /// Request path, as received
    pub path: String,
    /// The `key` query parameter: the upload token
    pub key: Option<String>,
    /// The declared `Content-Length`
    pub content_length: Option<u64>,
    /// The declared `Content-Type`
    pub content_type: Option<String>,
    /// The bytes
    pub body: Bytes,
}

/// The answer to an accepted upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    /// The publish token
    pub key: String,
}

/// The storage service of a node.
pub struct StorageService<C: Connection, B> {
    context: Arc<Context<C>>,
    blobs: B,
}

impl<C, B> StorageService<C, B>
where
    C: Connection,
    B: BlobStore,
{
    /// Serve requests with `context`, keeping bytes in `blobs`.
    pub fn new(context: Arc<Context<C>>, blobs: B) -> Self {
        Self { context, blobs }
    }

    /// The blob store
    pub fn blobs(&self) -> &B {
        &self.blobs
    }

    /// Store an attachment.
    ///
    /// The upload token is checked against the verb, path, declared length
    /// and declared type of this request, so a token only authorizes the
    /// exact write it was minted for. Blobs are never overwritten: of two
    /// concurrent uploads to one path, only the first write is accepted.
    #[tracing::instrument(level = "debug", skip_all, fields(path = %request.path))]
    pub async fn put(&self, request: PutRequest) -> Result<PublishReceipt, ApiError> {
        let principal = self
            .context
            .authenticate(request.authorization.as_deref())
            .await?;
        let path = self.resolve(&request.path)?;

        if self.blobs.exists(&path).await? {
            return Err(ApiError::Conflict(request.path));
        }

        let length = request.content_length.ok_or(ApiError::LengthRequired)?;
        let content_type = request
            .content_type
            .as_deref()
            .ok_or_else(|| ApiError::UnsupportedMediaType("missing content type".into()))?;

        let signer = self.context.signer();
        let authorized = request.key.as_deref().is_some_and(|key| {
            signer.verify_upload(
                key,
                "PUT",
                principal.as_str(),
                &request.path,
                length,
                content_type,
            )
        });
        if !authorized {
            tracing::debug!(principal = %principal, "Rejected upload token");
            return Err(ApiError::forbidden("upload token does not match"));
        }

        let max_size = self.context.config().media.max_size;
        if request.body.len() as u64 > max_size {
            return Err(ApiError::PayloadTooLarge(format!(
                "uploads are limited to {max_size} bytes"
            )));
        }

        let received = request.body.len();
        match self.blobs.write(&path, request.body).await {
            Err(DirettoStoreError::Conflict(_)) => return Err(ApiError::Conflict(request.path)),
            written => written?,
        }
        tracing::debug!(principal = %principal, received, "Stored upload");

        let key = signer.sign_publish(UPLOAD_ACCEPTED, principal.as_str(), &request.path);
        Ok(PublishReceipt {
            key: key.into_string(),
        })
    }

    /// Read a stored attachment.
    pub async fn get(&self, path: &str) -> Result<Bytes, ApiError> {
        let path = self.resolve(path)?;
        Ok(self.blobs.read(&path).await?)
    }

    /// The length of a stored attachment.
    pub async fn head(&self, path: &str) -> Result<u64, ApiError> {
        let path = self.resolve(path)?;
        Ok(self.blobs.len(&path).await?)
    }

    fn resolve(&self, path: &str) -> Result<String, ApiError> {
        normalize_path(path).ok_or_else(|| ApiError::forbidden("path escapes the storage root"))
    }
}
