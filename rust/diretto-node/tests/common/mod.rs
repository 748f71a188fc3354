#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use diretto_credentials::{BasicCredentials, Principal};
use diretto_node::{
    AttachmentSpec, Config, Context, FeedService, MetadataService, NewDocument, PutRequest,
    SecurityConfig, StorageService, USERS,
};
use diretto_store::{
    Connection, Connector, DocumentStore, MemoryBlobStore, MemoryConnection, MemoryDatabase,
    MemoryStoreProvider, encode,
};
use serde_json::json;

pub const SECRET: &str = "s3cr3t";

pub const ALICE: (&str, &str) = ("alice", "wonderland");
pub const BOB: (&str, &str) = ("bob", "builder");

pub fn config() -> Config {
    Config {
        security: SecurityConfig { key: SECRET.into() },
        ..Config::default()
    }
}

pub fn credentials((username, password): (&str, &str)) -> BasicCredentials {
    BasicCredentials::new(username, password)
}

pub fn header(user: (&str, &str)) -> String {
    credentials(user).to_header()
}

/// A node on an in-memory store, with alice and bob registered.
pub struct Node {
    pub provider: MemoryStoreProvider,
    pub context: Arc<Context<MemoryConnection>>,
    pub api: MetadataService<MemoryConnection>,
    pub media: StorageService<MemoryConnection, MemoryBlobStore>,
    pub feed: FeedService<MemoryConnection>,
}

impl Node {
    pub async fn start() -> Result<Self> {
        Self::with_config(config()).await
    }

    pub async fn with_config(config: Config) -> Result<Self> {
        let provider = MemoryStoreProvider::new();
        diretto_node::views::install(&provider);

        let users = provider.connect().await?.database(USERS);
        for (username, password) in [ALICE, BOB] {
            let record = encode(&json!({
                "username": username,
                "email": format!("{username}@example.com"),
                "password": password,
            }))?;
            users.insert(username, record).await?;
        }

        let context = Context::open(config, &provider).await?;
        Ok(Self {
            api: MetadataService::new(context.clone()),
            media: StorageService::new(context.clone(), MemoryBlobStore::new()),
            feed: FeedService::new(context.clone()),
            provider,
            context,
        })
    }

    pub async fn login(&self, user: (&str, &str)) -> Result<Principal> {
        Ok(self.api.authenticate(Some(&header(user))).await?)
    }

    /// A handle on the `entries` table that bypasses the pool.
    pub async fn entries(&self) -> Result<MemoryDatabase> {
        Ok(self
            .provider
            .connect()
            .await?
            .database(diretto_node::ENTRIES))
    }

    /// Create `doc_id` for `user`, upload its text attachment and publish
    /// it.
    pub async fn publish_document(&self, user: (&str, &str), doc_id: &str) -> Result<()> {
        let principal = self.login(user).await?;
        let ticket = self
            .api
            .create_document(
                &principal,
                doc_id,
                NewDocument {
                    attachment: AttachmentSpec {
                        content_type: "text/plain".into(),
                        content_length: 5,
                    },
                    position: None,
                    date: None,
                },
            )
            .await?;

        let receipt = self
            .media
            .put(PutRequest {
                authorization: Some(header(user)),
                path: format!("/{doc_id}/{doc_id}.txt"),
                key: Some(ticket.key),
                content_length: Some(5),
                content_type: Some("text/plain".into()),
                body: Bytes::from_static(b"hello"),
            })
            .await?;

        self.api
            .publish_attachment(&principal, doc_id, doc_id, &receipt.key)
            .await?;
        Ok(())
    }
}
