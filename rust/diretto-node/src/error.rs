use diretto_common::JoinAbandoned;
use diretto_credentials::AuthenticationError;
use diretto_store::DirettoStoreError;
use thiserror::Error;
use tokio::task::JoinHandle;

/// The outcome of a failed service operation, one variant per
/// client-visible status.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The addressed record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// A record with the same identifier already exists
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The request is malformed or incomplete
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Credentials are missing or were not accepted
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Signature or principal mismatch, or an action on someone else's
    /// behalf
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The content type is not one this deployment accepts
    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// The declared or received body exceeds the configured maximum
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// An upload arrived without a declared length
    #[error("Length required")]
    LengthRequired,

    /// A backend failed
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// The HTTP status this error is answered with.
    pub fn status(&self) -> u16 {
        match self {
            ApiError::Validation(_) => 400,
            ApiError::Unauthorized(_) => 401,
            ApiError::Forbidden(_) => 403,
            ApiError::NotFound(_) => 404,
            ApiError::Conflict(_) => 409,
            ApiError::LengthRequired => 411,
            ApiError::PayloadTooLarge(_) => 413,
            ApiError::UnsupportedMediaType(_) => 415,
            ApiError::Internal(_) => 500,
        }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        ApiError::Internal(message.into())
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation(message.into())
    }

    pub(crate) fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden(message.into())
    }
}

impl From<DirettoStoreError> for ApiError {
    fn from(error: DirettoStoreError) -> Self {
        match error {
            DirettoStoreError::NotFound(id) => ApiError::NotFound(id),
            DirettoStoreError::Conflict(id) => ApiError::Conflict(id),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<AuthenticationError> for ApiError {
    fn from(error: AuthenticationError) -> Self {
        match error {
            AuthenticationError::Unavailable(_) => ApiError::Internal(error.to_string()),
            other => ApiError::Unauthorized(other.to_string()),
        }
    }
}

impl From<JoinAbandoned> for ApiError {
    fn from(error: JoinAbandoned) -> Self {
        ApiError::Internal(error.to_string())
    }
}

/// Collect the value of a barrier party once its barrier has completed.
pub(crate) async fn joined<T>(party: JoinHandle<Option<T>>) -> Result<T, ApiError> {
    match party.await {
        Ok(Some(value)) => Ok(value),
        Ok(None) => Err(ApiError::internal("Barrier party failed after completion")),
        Err(error) => Err(ApiError::internal(error.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_maps_store_errors() {
        assert_eq!(
            ApiError::from(DirettoStoreError::NotFound("d-1".into())),
            ApiError::NotFound("d-1".into())
        );
        assert_eq!(
            ApiError::from(DirettoStoreError::Conflict("d-1".into())).status(),
            409
        );
        assert_eq!(
            ApiError::from(DirettoStoreError::Backend("down".into())).status(),
            500
        );
    }

    #[test]
    fn it_maps_authentication_errors() {
        assert_eq!(ApiError::from(AuthenticationError::Missing).status(), 401);
        assert_eq!(ApiError::from(AuthenticationError::Rejected).status(), 401);
        assert_eq!(
            ApiError::from(AuthenticationError::Unavailable("down".into())).status(),
            500
        );
    }

    #[test]
    fn it_answers_supplemental_statuses() {
        assert_eq!(ApiError::LengthRequired.status(), 411);
        assert_eq!(ApiError::PayloadTooLarge("big".into()).status(), 413);
        assert_eq!(ApiError::UnsupportedMediaType("x/y".into()).status(), 415);
        assert_eq!(ApiError::from(JoinAbandoned).status(), 500);
    }
}
