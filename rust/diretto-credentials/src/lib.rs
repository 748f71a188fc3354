#![warn(missing_docs)]

//! Everything a diretto node needs to decide who is asking and what they
//! may do.
//!
//! The [Signer] mints and checks capability tokens: keyed digests over a
//! request or response tuple that the storage and metadata services each
//! recompute on their own, so neither has to ask the other whether a write
//! was authorized. The [Authenticator] resolves a Basic `Authorization`
//! header to a [Principal], keeping recent successes in a lease cache.
//!
//! ```rust
//! use diretto_credentials::Signer;
//!
//! # fn example() -> Result<(), diretto_credentials::InvalidSecret> {
//! let signer = Signer::new("s3cr3t")?;
//!
//! let token = signer.sign_upload("PUT", "alice", "/doc1/att1.png", 1024, "image/png");
//! assert!(signer.verify_upload(token.as_str(), "PUT", "alice", "/doc1/att1.png", 1024, "image/png"));
//! assert!(!signer.verify_upload(token.as_str(), "PUT", "alice", "/doc1/att1.png", 1025, "image/png"));
//! # Ok(())
//! # }
//! ```

mod error;
pub use error::*;

mod signer;
pub use signer::*;

mod basic;
pub use basic::*;

mod authenticator;
pub use authenticator::*;
