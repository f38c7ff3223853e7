use crate::error::GenerationError;
use crate::logic::state::{apply, DesignEvent, DesignState};
use crate::model::{generate_id, Id};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// One user's design in progress
#[derive(Debug, Clone)]
pub struct DesignSession {
    pub id: Id,
    pub user: String,
    pub state: DesignState,
    pub created_at: String,
}

impl DesignSession {
    pub fn new(user: impl Into<String>, state: DesignState) -> Self {
        Self {
            id: generate_id(),
            user: user.into(),
            state,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Clone, Debug)]
struct CacheEntry {
    session: DesignSession,
    last_accessed: Instant,
}

/// In-memory design sessions with idle expiry
#[derive(Debug)]
pub struct SessionCache {
    entries: Arc<RwLock<HashMap<Id, CacheEntry>>>,
    ttl: Duration,
}

impl SessionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Session by id if present and not expired
    pub async fn get(&self, id: &str) -> Option<DesignSession> {
        let mut entries = self.entries.write().await;

        if let Some(entry) = entries.get_mut(id) {
            if entry.last_accessed.elapsed() > self.ttl {
                entries.remove(id);
                return None;
            }
            entry.last_accessed = Instant::now();
            Some(entry.session.clone())
        } else {
            None
        }
    }

    pub async fn put(&self, session: DesignSession) {
        let mut entries = self.entries.write().await;
        entries.insert(
            session.id.clone(),
            CacheEntry {
                session,
                last_accessed: Instant::now(),
            },
        );
    }

    /// Apply an event under the write lock; the stored state only changes on success.
    ///
    /// `None` if the session does not exist.
    pub async fn apply(&self, id: &str, event: DesignEvent) -> Option<Result<DesignSession, GenerationError>> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(id)?;
        if entry.last_accessed.elapsed() > self.ttl {
            entries.remove(id);
            return None;
        }
        entry.last_accessed = Instant::now();
        Some(apply(&entry.session.state, event).map(|state| {
            entry.session.state = state;
            entry.session.clone()
        }))
    }

    pub async fn remove(&self, id: &str) -> bool {
        self.entries.write().await.remove(id).is_some()
    }

    pub async fn clear_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        let ttl = self.ttl;
        entries.retain(|_, entry| entry.last_accessed.elapsed() <= ttl);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}
