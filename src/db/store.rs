use super::{ConnectionDescriptor, SavedConnection};
use crate::engine::ConnectionSource;
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

/// A connection owned by one session.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredConnection {
    pub id: Uuid,
    pub name: String,
    pub descriptor: ConnectionDescriptor,
}

#[derive(Debug, Default)]
struct SessionConnections {
    connections: Vec<StoredConnection>,
    active: Option<Uuid>,
}

/// Per-session connection lists, seeded from the configured presets.
///
/// Every session starts with its own copies of the presets, so removing or
/// activating one never affects another session.
#[derive(Debug, Default)]
pub struct ConnectionStore {
    presets: Vec<SavedConnection>,
    sessions: DashMap<String, SessionConnections>,
}

impl ConnectionStore {
    pub fn new(presets: Vec<SavedConnection>) -> Self {
        Self {
            presets,
            sessions: DashMap::new(),
        }
    }

    fn seeded(&self) -> SessionConnections {
        SessionConnections {
            connections: self
                .presets
                .iter()
                .map(|preset| StoredConnection {
                    id: Uuid::new_v4(),
                    name: preset.name.clone(),
                    descriptor: preset.descriptor.clone(),
                })
                .collect(),
            active: None,
        }
    }

    fn with_session<R>(&self, session_id: &str, f: impl FnOnce(&mut SessionConnections) -> R) -> R {
        let mut entry = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| self.seeded());
        f(entry.value_mut())
    }

    pub fn add(&self, session_id: &str, name: &str, descriptor: ConnectionDescriptor) -> Uuid {
        let id = Uuid::new_v4();
        debug!("session {}: adding connection '{}'", session_id, name);
        self.with_session(session_id, |s| {
            s.connections.push(StoredConnection {
                id,
                name: name.to_string(),
                descriptor,
            })
        });
        id
    }

    pub fn get(&self, session_id: &str, id: Uuid) -> Option<StoredConnection> {
        self.with_session(session_id, |s| {
            s.connections.iter().find(|c| c.id == id).cloned()
        })
    }

    pub fn find_by_name(&self, session_id: &str, name: &str) -> Option<StoredConnection> {
        self.with_session(session_id, |s| {
            s.connections.iter().find(|c| c.name == name).cloned()
        })
    }

    pub fn list(&self, session_id: &str) -> Vec<StoredConnection> {
        self.with_session(session_id, |s| s.connections.clone())
    }

    /// Returns false if `id` is unknown. Removing the active connection
    /// leaves the session without one.
    pub fn remove(&self, session_id: &str, id: Uuid) -> bool {
        self.with_session(session_id, |s| {
            let before = s.connections.len();
            s.connections.retain(|c| c.id != id);
            if s.active == Some(id) {
                s.active = None;
            }
            s.connections.len() != before
        })
    }

    /// Forget everything about the session. It is reseeded on next use.
    pub fn clear_session(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    pub fn set_active(&self, session_id: &str, id: Uuid) -> bool {
        self.with_session(session_id, |s| {
            if s.connections.iter().any(|c| c.id == id) {
                s.active = Some(id);
                true
            } else {
                false
            }
        })
    }

    pub fn get_active(&self, session_id: &str) -> Option<StoredConnection> {
        self.with_session(session_id, |s| {
            let active = s.active?;
            s.connections.iter().find(|c| c.id == active).cloned()
        })
    }
}

impl ConnectionSource for ConnectionStore {
    fn active_connection(&self, session_id: &str) -> Option<ConnectionDescriptor> {
        self.get_active(session_id).map(|c| c.descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{GraphNativeEndpoint, RelationalEndpoint};

    fn neo4j() -> ConnectionDescriptor {
        ConnectionDescriptor::GraphNative(GraphNativeEndpoint {
            uri: "bolt://localhost:7687".into(),
            username: "neo4j".into(),
            password: String::new(),
            database: "neo4j".into(),
        })
    }

    fn age() -> ConnectionDescriptor {
        ConnectionDescriptor::RelationalGraph(RelationalEndpoint {
            graph_name: "social".into(),
            ..RelationalEndpoint::default()
        })
    }

    fn store() -> ConnectionStore {
        ConnectionStore::new(vec![SavedConnection {
            name: "local".into(),
            descriptor: neo4j(),
        }])
    }

    #[test]
    fn test_sessions_get_their_own_preset_copies() {
        let store = store();
        let a = store.list("a");
        let b = store.list("b");
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        assert_eq!(a[0].name, "local");
        assert_ne!(a[0].id, b[0].id);

        assert!(store.remove("a", a[0].id));
        assert!(store.list("a").is_empty());
        assert_eq!(store.list("b").len(), 1);
    }

    #[test]
    fn test_add_get_remove() {
        let store = store();
        let id = store.add("s", "graph", age());
        assert_eq!(store.get("s", id).map(|c| c.descriptor), Some(age()));
        assert_eq!(store.list("s").len(), 2);
        assert!(store.remove("s", id));
        assert!(!store.remove("s", id));
        assert!(store.get("s", id).is_none());
    }

    #[test]
    fn test_active_connection() {
        let store = store();
        assert!(store.get_active("s").is_none());
        assert!(store.active_connection("s").is_none());

        let id = store.add("s", "graph", age());
        assert!(store.set_active("s", id));
        assert_eq!(store.active_connection("s"), Some(age()));

        assert!(!store.set_active("s", Uuid::new_v4()));
        assert_eq!(store.get_active("s").map(|c| c.id), Some(id));

        store.remove("s", id);
        assert!(store.get_active("s").is_none());
    }

    #[test]
    fn test_clear_session_reseeds() {
        let store = store();
        let id = store.add("s", "graph", age());
        store.set_active("s", id);
        store.clear_session("s");
        assert!(store.get_active("s").is_none());
        let list = store.list("s");
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].name, "local");
    }

    #[test]
    fn test_find_by_name() {
        let store = store();
        assert!(store.find_by_name("s", "local").is_some());
        assert!(store.find_by_name("s", "missing").is_none());
    }
}
