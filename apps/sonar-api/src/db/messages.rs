//! Durable message storage.
//!
//! The realtime layer only ever talks to the [`MessageStore`] trait. PostgreSQL
//! backs it in production; the in-memory store is used in tests and when no
//! `DATABASE_URL` is configured.

use std::sync::Arc;

use async_trait::async_trait;
use diesel::prelude::*;
use parking_lot::Mutex;
use sonar_common::snowflake::snowflake_datetime;
use sonar_common::SnowflakeGenerator;

use crate::db::pool::DbPool;
use crate::db::schema::messages;
use crate::models::message::{Message, NewMessage};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database unavailable: {0}")]
    Pool(#[from] diesel_async::pooled_connection::deadpool::PoolError),
    #[error("query failed: {0}")]
    Query(#[from] diesel::result::Error),
    #[error("message store unavailable")]
    Unavailable,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a new message, assigning its id and creation time.
    async fn create(
        &self,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
    ) -> Result<Message, StoreError>;

    /// All messages exchanged between `a` and `b`, oldest first.
    async fn history(&self, a: &str, b: &str) -> Result<Vec<Message>, StoreError>;
}

// ---------------------------------------------------------------------------
// PostgreSQL implementation
// ---------------------------------------------------------------------------

pub struct PgMessageStore {
    db: DbPool,
    snowflake: Arc<SnowflakeGenerator>,
}

impl PgMessageStore {
    pub fn new(db: DbPool, snowflake: Arc<SnowflakeGenerator>) -> Self {
        Self { db, snowflake }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn create(
        &self,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
    ) -> Result<Message, StoreError> {
        let mut conn = self.db.get().await?;

        let id = self.snowflake.generate();
        let message: Message = diesel_async::RunQueryDsl::get_result(
            diesel::insert_into(messages::table)
                .values(NewMessage {
                    id,
                    sender_id,
                    receiver_id,
                    content,
                    created_at: snowflake_datetime(id),
                })
                .returning(Message::as_returning()),
            &mut conn,
        )
        .await?;

        Ok(message)
    }

    async fn history(&self, a: &str, b: &str) -> Result<Vec<Message>, StoreError> {
        let mut conn = self.db.get().await?;

        let rows: Vec<Message> = diesel_async::RunQueryDsl::load(
            messages::table
                .filter(
                    messages::sender_id
                        .eq(a)
                        .and(messages::receiver_id.eq(b))
                        .or(messages::sender_id.eq(b).and(messages::receiver_id.eq(a))),
                )
                .order((messages::created_at.asc(), messages::id.asc()))
                .select(Message::as_select()),
            &mut conn,
        )
        .await?;

        Ok(rows)
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation (tests / database-less local runs)
// ---------------------------------------------------------------------------

pub struct MemoryMessageStore {
    snowflake: SnowflakeGenerator,
    data: Mutex<Vec<Message>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self {
            snowflake: SnowflakeGenerator::new(0),
            data: Mutex::new(Vec::new()),
        }
    }

    /// Number of stored messages.
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }

    /// Copy of every stored message in insertion order.
    pub fn all(&self) -> Vec<Message> {
        self.data.lock().clone()
    }
}

impl Default for MemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn create(
        &self,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
    ) -> Result<Message, StoreError> {
        let id = self.snowflake.generate();
        let message = Message {
            id,
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            content: content.to_string(),
            created_at: snowflake_datetime(id),
        };
        self.data.lock().push(message.clone());
        Ok(message)
    }

    async fn history(&self, a: &str, b: &str) -> Result<Vec<Message>, StoreError> {
        let mut rows: Vec<Message> = self
            .data
            .lock()
            .iter()
            .filter(|m| m.is_between(a, b))
            .cloned()
            .collect();
        rows.sort_by(|x, y| x.created_at.cmp(&y.created_at).then(x.id.cmp(&y.id)));
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_assigns_ids_and_timestamps() {
        let store = MemoryMessageStore::new();
        let a = store.create("u1", "u2", "hi").await.unwrap();
        let b = store.create("u1", "u2", "again").await.unwrap();

        assert!(b.id > a.id);
        assert!(b.created_at >= a.created_at);
        assert_eq!(a.created_at, snowflake_datetime(a.id));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn history_covers_both_directions_only() {
        let store = MemoryMessageStore::new();
        store.create("u1", "u2", "one").await.unwrap();
        store.create("u2", "u1", "two").await.unwrap();
        store.create("u1", "u3", "elsewhere").await.unwrap();
        store.create("u2", "u1", "three").await.unwrap();

        let history = store.history("u1", "u2").await.unwrap();
        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two", "three"]);

        // Argument order does not matter.
        let reversed = store.history("u2", "u1").await.unwrap();
        assert_eq!(history, reversed);
    }

    #[tokio::test]
    async fn history_is_empty_for_strangers() {
        let store = MemoryMessageStore::new();
        store.create("u1", "u2", "hi").await.unwrap();
        assert!(store.history("u3", "u4").await.unwrap().is_empty());
    }
}
