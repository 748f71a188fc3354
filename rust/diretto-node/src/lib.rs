#![warn(missing_docs)]

//! The services of a diretto node.
//!
//! A node runs three services over one injected [Context]:
//!
//! - [MetadataService] manages documents, attachments, claims, comments,
//!   tags, votes and users in the `entries` and `users` tables, and mints
//!   upload tickets.
//! - [StorageService] accepts the attachment bytes a ticket authorizes and
//!   answers with a publish token.
//! - [FeedService] pages through published records, newest first.
//!
//! An attachment moves through the services like this:
//!
//! ```rust
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use bytes::Bytes;
//! use diretto_credentials::BasicCredentials;
//! use diretto_node::{
//!     AttachmentSpec, Config, Context, MetadataService, NewDocument, PutRequest,
//!     SecurityConfig, StorageService,
//! };
//! use diretto_store::{MemoryBlobStore, MemoryStoreProvider};
//!
//! let provider = MemoryStoreProvider::new();
//! diretto_node::views::install(&provider);
//! let config = Config {
//!     security: SecurityConfig { key: "s3cr3t".into() },
//!     ..Config::default()
//! };
//! let context = Context::open(config, &provider).await?;
//! let api = MetadataService::new(context.clone());
//! let media = StorageService::new(context, MemoryBlobStore::new());
//!
//! let alice = BasicCredentials::new("alice", "wonderland");
//! # api.create_user(diretto_node::NewUser {
//! #     username: "alice".into(),
//! #     email: "alice@example.com".into(),
//! #     password: "wonderland".into(),
//! # }).await?;
//! let principal = api.authenticate(Some(&alice.to_header())).await?;
//!
//! let spec = AttachmentSpec { content_type: "image/png".into(), content_length: 4 };
//! let ticket = api
//!     .create_document(&principal, "doc1", NewDocument { attachment: spec, position: None, date: None })
//!     .await?;
//!
//! let receipt = media
//!     .put(PutRequest {
//!         authorization: Some(alice.to_header()),
//!         path: "/doc1/doc1.png".into(),
//!         key: Some(ticket.key),
//!         content_length: Some(4),
//!         content_type: Some("image/png".into()),
//!         body: Bytes::from_static(b"\x89PNG"),
//!     })
//!     .await?;
//!
//! let published = api.publish_attachment(&principal, "doc1", "doc1", &receipt.key).await?;
//! assert!(published.record.published);
//! # Ok(())
//! # }
//! ```

mod error;
pub use error::*;

mod config;
pub use config::*;

mod context;
pub use context::*;

pub mod entry;
pub mod views;

mod api;
pub use api::*;

mod media;
pub use media::*;

mod feed;
pub use feed::*;
