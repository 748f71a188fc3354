use thiserror::Error;

/// Reasons a request could not be attributed to a [crate::Principal]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationError {
    /// The request carried no `Authorization` header
    #[error("Missing credentials")]
    Missing,

    /// The `Authorization` header is not a well-formed Basic credential
    #[error("Malformed credentials")]
    Malformed,

    /// No such user, or the password does not match
    #[error("Invalid credentials")]
    Rejected,

    /// The credential store could not be consulted
    #[error("Credential store unavailable: {0}")]
    Unavailable(String),
}

/// The shared secret handed to [crate::Signer::new] cannot be used as a key
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid signing secret: {0}")]
pub struct InvalidSecret(pub String);
