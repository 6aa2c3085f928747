//! Session store: a conversation transcript keyed by id, with a sliding TTL
//! enforced by the store itself (see DESIGN.md Open Question 3). Two backends share
//! one trait: `RedisSessionStore` for production, `InMemorySessionStore` (a
//! `DashMap`-backed cache, mirroring the reference crate's connection-pool idiom) for
//! tests and single-process deployments.

use crate::types::Session;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SessionError(pub String);

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session store error: {}", self.0)
    }
}

impl std::error::Error for SessionError {}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, ttl: Duration, initial_context: Value) -> Result<Session, SessionError>;
    async fn get(&self, id: &str) -> Result<Option<Session>, SessionError>;
    /// Replaces the stored session wholesale and slides its TTL forward (the
    /// transcript is replaced, never appended to, since the caller already holds the
    /// full working transcript after an orchestration round).
    async fn save(&self, session: Session, ttl: Duration) -> Result<(), SessionError>;
    async fn delete(&self, id: &str) -> Result<(), SessionError>;
    async fn exists(&self, id: &str) -> Result<bool, SessionError>;
    /// Liveness probe for `/health/ready`; cheap enough to call on every readiness check.
    async fn ping(&self) -> Result<(), SessionError>;
}

fn new_session(ttl: Duration, initial_context: Value) -> Session {
    let now = Utc::now();
    let context = match initial_context {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    Session {
        id: Uuid::new_v4().to_string(),
        messages: Vec::new(),
        context,
        created_at: now,
        expires_at: now + ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::seconds(3600)),
    }
}

/// Redis-backed store. Each session is a single JSON value under key
/// `session:{id}`; the TTL is enforced by Redis's own expiry (`SET ... EX`), reset on
/// every `save` to implement the sliding window.
pub struct RedisSessionStore {
    connection: ConnectionManager,
}

impl RedisSessionStore {
    pub async fn connect(redis_url: &str) -> Result<Self, SessionError> {
        let client = redis::Client::open(redis_url).map_err(|e| SessionError(e.to_string()))?;
        let connection = ConnectionManager::new(client).await.map_err(|e| SessionError(e.to_string()))?;
        Ok(RedisSessionStore { connection })
    }

    fn key(id: &str) -> String {
        format!("session:{id}")
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn create(&self, ttl: Duration, initial_context: Value) -> Result<Session, SessionError> {
        let session = new_session(ttl, initial_context);
        self.save(session.clone(), ttl).await?;
        Ok(session)
    }

    async fn get(&self, id: &str) -> Result<Option<Session>, SessionError> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = conn.get(Self::key(id)).await.map_err(|e| SessionError(e.to_string()))?;
        match raw {
            Some(body) => {
                let session: Session = serde_json::from_str(&body).map_err(|e| SessionError(e.to_string()))?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, session: Session, ttl: Duration) -> Result<(), SessionError> {
        let mut conn = self.connection.clone();
        let body = serde_json::to_string(&session).map_err(|e| SessionError(e.to_string()))?;
        let seconds = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(Self::key(&session.id), body, seconds)
            .await
            .map_err(|e| SessionError(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), SessionError> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(Self::key(id)).await.map_err(|e| SessionError(e.to_string()))?;
        Ok(())
    }

    async fn exists(&self, id: &str) -> Result<bool, SessionError> {
        let mut conn = self.connection.clone();
        let exists: bool = conn.exists(Self::key(id)).await.map_err(|e| SessionError(e.to_string()))?;
        Ok(exists)
    }

    async fn ping(&self) -> Result<(), SessionError> {
        let mut conn = self.connection.clone();
        redis::cmd("PING").query_async::<()>(&mut conn).await.map_err(|e| SessionError(e.to_string()))
    }
}

/// In-memory store for tests and single-process deployments. Expiry is checked
/// lazily on read (`get`/`exists`), same sliding-TTL contract as the Redis backend.
pub struct InMemorySessionStore {
    sessions: DashMap<String, Session>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        InMemorySessionStore { sessions: DashMap::new() }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, ttl: Duration, initial_context: Value) -> Result<Session, SessionError> {
        let session = new_session(ttl, initial_context);
        self.sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn get(&self, id: &str) -> Result<Option<Session>, SessionError> {
        match self.sessions.get(id) {
            Some(entry) if entry.expires_at > Utc::now() => Ok(Some(entry.clone())),
            Some(_) => {
                drop(self.sessions.remove(id));
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn save(&self, mut session: Session, ttl: Duration) -> Result<(), SessionError> {
        session.expires_at = Utc::now() + ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::seconds(3600));
        self.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), SessionError> {
        self.sessions.remove(id);
        Ok(())
    }

    async fn exists(&self, id: &str) -> Result<bool, SessionError> {
        Ok(self.get(id).await?.is_some())
    }

    async fn ping(&self) -> Result<(), SessionError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = InMemorySessionStore::new();
        let session = store.create(Duration::from_secs(60), json!({"topic": "rust"})).await.unwrap();
        let fetched = store.get(&session.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, session.id);
        assert_eq!(fetched.context.get("topic").unwrap(), "rust");
    }

    #[tokio::test]
    async fn save_replaces_messages_wholesale() {
        let store = InMemorySessionStore::new();
        let mut session = store.create(Duration::from_secs(60), json!({})).await.unwrap();
        session.messages.push(crate::types::Message::user("hello"));
        store.save(session.clone(), Duration::from_secs(60)).await.unwrap();

        let mut replacement = store.get(&session.id).await.unwrap().unwrap();
        replacement.messages = vec![crate::types::Message::user("only this one")];
        store.save(replacement, Duration::from_secs(60)).await.unwrap();

        let fetched = store.get(&session.id).await.unwrap().unwrap();
        assert_eq!(fetched.messages.len(), 1);
        assert_eq!(fetched.messages[0].content, "only this one");
    }

    #[tokio::test]
    async fn expired_session_is_not_returned() {
        let store = InMemorySessionStore::new();
        let session = store.create(Duration::from_millis(1), json!({})).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(store.get(&session.id).await.unwrap().is_none());
        assert!(!store.exists(&session.id).await.unwrap());
    }

    #[tokio::test]
    async fn save_slides_ttl_forward() {
        let store = InMemorySessionStore::new();
        let session = store.create(Duration::from_millis(10), json!({})).await.unwrap();
        store.save(session.clone(), Duration::from_secs(60)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(store.get(&session.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_removes_session() {
        let store = InMemorySessionStore::new();
        let session = store.create(Duration::from_secs(60), json!({})).await.unwrap();
        store.delete(&session.id).await.unwrap();
        assert!(store.get(&session.id).await.unwrap().is_none());
    }
}
