#![warn(missing_docs)]

//! This crate isolates everything a diretto node needs from its backends
//! behind small traits:
//!
//! - [DocumentStore] is the six-operation document store every metadata
//!   record lives in. [MemoryStoreProvider] is an in-memory implementation
//!   with map-style views, used for tests and local development.
//! - [ConnectionPool] spreads calls for a logical table over a fixed set of
//!   pooled connections in round-robin order.
//! - [BlobStore] persists attachment bytes for the storage service, either
//!   in memory ([MemoryBlobStore]) or on disk ([FileSystemBlobStore]).
//!
//! ```rust
//! # async fn example() -> Result<(), diretto_store::DirettoStoreError> {
//! use diretto_store::{ConnectionPool, DocumentStore, MemoryStoreProvider, SlotConfig};
//! use serde_json::json;
//!
//! let provider = MemoryStoreProvider::new();
//! let pool = ConnectionPool::open(&provider, [("entries", SlotConfig::new("entries", 2))]).await?;
//!
//! let entries = pool.handle("entries").expect("configured alias");
//! let mut record = serde_json::Map::new();
//! record.insert("type".into(), json!("document"));
//! entries.insert("d-1", record).await?;
//! # Ok(())
//! # }
//! ```

mod error;
pub use error::*;

mod store;
pub use store::*;

mod memory;
pub use memory::*;

mod pool;
pub use pool::*;

mod blob;
pub use blob::*;
