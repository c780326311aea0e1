use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;

use bridge_api::util::now_ms;

/// Public description of a live session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub id: u64,
    pub client_id: String,
    pub topic: String,
    pub started_at_ms: i64,
}

/// Registry of live sessions, for operational listing only.
///
/// Keyed by a process-unique session id, so two sessions sharing a client id
/// never overwrite each other. Holds descriptions, not connections or locks.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    next_id: AtomicU64,
    sessions: RwLock<HashMap<u64, SessionInfo>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session. The entry lives as long as the returned guard.
    pub fn register(self: &Arc<Self>, client_id: &str, topic: &str) -> SessionGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let info = SessionInfo {
            id,
            client_id: client_id.to_string(),
            topic: topic.to_string(),
            started_at_ms: now_ms(),
        };
        self.write().insert(id, info);
        SessionGuard {
            id,
            registry: self.clone(),
        }
    }

    /// Live sessions, oldest first.
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self.read().values().cloned().collect();
        sessions.sort_by_key(|s| s.id);
        sessions
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<u64, SessionInfo>> {
        match self.sessions.read() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("session registry read lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<u64, SessionInfo>> {
        match self.sessions.write() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("session registry write lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

/// Removes its session from the registry on drop.
#[derive(Debug)]
pub struct SessionGuard {
    id: u64,
    registry: Arc<SessionRegistry>,
}

impl SessionGuard {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.write().remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_client_id_gets_distinct_entries() {
        let registry = Arc::new(SessionRegistry::new());
        let a = registry.register("alice", "orders");
        let b = registry.register("alice", "orders");
        assert_ne!(a.id(), b.id());
        assert_eq!(registry.len(), 2);

        drop(a);
        let live = registry.list();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, b.id());
        assert_eq!(live[0].client_id, "alice");

        drop(b);
        assert!(registry.is_empty());
    }

    #[test]
    fn list_is_ordered_by_id() {
        let registry = Arc::new(SessionRegistry::new());
        let _guards: Vec<_> = ["alice", "bob", "carol"]
            .iter()
            .map(|c| registry.register(c, "orders"))
            .collect();
        let names: Vec<_> = registry.list().into_iter().map(|s| s.client_id).collect();
        assert_eq!(names, vec!["alice", "bob", "carol"]);
    }
}
