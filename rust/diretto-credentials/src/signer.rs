use std::fmt::{Debug, Display, Formatter};

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha1::Sha1;

use crate::InvalidSecret;

const DELIMITER: &str = ":";

/// Length of a token in hex characters
pub const TOKEN_LENGTH: usize = 40;

/// A lowercase hex HMAC-SHA1 digest over a [Claim].
///
/// Tokens are never stored. Whoever needs to check one recomputes it from
/// the values it observed itself and compares.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityToken(String);

impl CapabilityToken {
    /// The token as presented on the wire
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Unwrap the token
    pub fn into_string(self) -> String {
        self.0
    }
}

impl Display for CapabilityToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Debug for CapabilityToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CapabilityToken").field(&self.0).finish()
    }
}

impl AsRef<str> for CapabilityToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<CapabilityToken> for String {
    fn from(token: CapabilityToken) -> Self {
        token.0
    }
}

impl PartialEq<str> for CapabilityToken {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for CapabilityToken {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// A tuple of fields a token is minted over.
pub trait Claim {
    /// The exact bytes fed to the keyed hash
    fn message(&self) -> String;
}

/// Authorizes a single write to the storage service:
/// `VERB:PRINCIPAL:PATH:LENGTH:CONTENTTYPE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadClaim<'a> {
    /// Request method, `PUT` for uploads
    pub verb: &'a str,
    /// The principal performing the upload
    pub principal: &'a str,
    /// Storage path, with a leading slash
    pub path: &'a str,
    /// Declared body length in bytes
    pub length: u64,
    /// Declared MIME type of the body
    pub content_type: &'a str,
}

impl Claim for UploadClaim<'_> {
    fn message(&self) -> String {
        let length = self.length.to_string();
        [
            self.verb,
            self.principal,
            self.path,
            length.as_str(),
            self.content_type,
        ]
        .join(DELIMITER)
    }
}

/// Proves the storage service accepted a write: `STATUSCODE:PRINCIPAL:PATH`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishClaim<'a> {
    /// The status the storage service answered with
    pub status: u16,
    /// The principal that performed the upload
    pub principal: &'a str,
    /// Storage path, with a leading slash
    pub path: &'a str,
}

impl Claim for PublishClaim<'_> {
    fn message(&self) -> String {
        let status = self.status.to_string();
        [status.as_str(), self.principal, self.path].join(DELIMITER)
    }
}

/// Mints and checks [CapabilityToken]s with a shared secret.
///
/// The secret is the only state. Two signers built from the same secret
/// produce identical tokens for identical claims, which is what lets the
/// metadata and storage services trust each other without talking.
#[derive(Clone)]
pub struct Signer {
    key: Hmac<Sha1>,
}

impl Signer {
    /// Build a signer around `secret`. Empty secrets are refused.
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, InvalidSecret> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(InvalidSecret("the secret is empty".into()));
        }

        let key = Hmac::<Sha1>::new_from_slice(secret)
            .map_err(|error| InvalidSecret(error.to_string()))?;
        Ok(Self { key })
    }

    /// Mint a token over `claim`.
    pub fn sign<C: Claim>(&self, claim: &C) -> CapabilityToken {
        let mut mac = self.key.clone();
        mac.update(claim.message().as_bytes());
        CapabilityToken(hex::encode(mac.finalize().into_bytes()))
    }

    /// Whether `token` is exactly the token for `claim`.
    ///
    /// Anything but 40 lowercase hex characters is rejected outright; the
    /// digest itself is compared in constant time.
    pub fn verify<C: Claim>(&self, claim: &C, token: &str) -> bool {
        let well_formed = token.len() == TOKEN_LENGTH
            && token
                .bytes()
                .all(|byte| byte.is_ascii_digit() || (b'a'..=b'f').contains(&byte));
        if !well_formed {
            return false;
        }

        let Ok(digest) = hex::decode(token) else {
            return false;
        };

        let mut mac = self.key.clone();
        mac.update(claim.message().as_bytes());
        mac.verify_slice(&digest).is_ok()
    }

    /// `signUpload`: authorize `principal` to write `length` bytes of
    /// `content_type` to `path`.
    pub fn sign_upload(
        &self,
        verb: &str,
        principal: &str,
        path: &str,
        length: u64,
        content_type: &str,
    ) -> CapabilityToken {
        self.sign(&UploadClaim {
            verb,
            principal,
            path,
            length,
            content_type,
        })
    }

    /// `signPublish`: attest that a write to `path` by `principal` was
    /// answered with `status`.
    pub fn sign_publish(&self, status: u16, principal: &str, path: &str) -> CapabilityToken {
        self.sign(&PublishClaim {
            status,
            principal,
            path,
        })
    }

    /// Check an upload token against the values observed on the request.
    pub fn verify_upload(
        &self,
        token: &str,
        verb: &str,
        principal: &str,
        path: &str,
        length: u64,
        content_type: &str,
    ) -> bool {
        self.verify(
            &UploadClaim {
                verb,
                principal,
                path,
                length,
                content_type,
            },
            token,
        )
    }

    /// Check a publish token against the values the metadata service holds.
    pub fn verify_publish(&self, token: &str, status: u16, principal: &str, path: &str) -> bool {
        self.verify(
            &PublishClaim {
                status,
                principal,
                path,
            },
            token,
        )
    }
}

impl Debug for Signer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").finish_non_exhaustive()
    }
}
