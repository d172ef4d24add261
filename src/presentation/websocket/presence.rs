//! Presence registry
//!
//! Tracks live connections per user, crew and remote address. A user is
//! online while at least one of their connections is registered.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

use serde::Serialize;

use crate::domain::{ConnectionId, Identity, Role};

/// An online user as reported by presence queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUser {
    pub user_id: String,
    pub role: Role,
    pub crew_id: Option<String>,
    pub connections: usize,
}

/// Result of removing a connection from presence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub identity: Identity,
    /// Connections the user still holds
    pub remaining: usize,
}

impl Departure {
    /// The removed connection was the user's last one.
    pub fn went_offline(&self) -> bool {
        self.remaining == 0
    }
}

#[derive(Debug, Clone)]
struct Entry {
    identity: Identity,
    address: IpAddr,
}

#[derive(Debug, Default)]
pub struct PresenceRegistry {
    entries: HashMap<ConnectionId, Entry>,
    by_user: HashMap<String, HashSet<ConnectionId>>,
    by_crew: HashMap<String, HashSet<ConnectionId>>,
    by_address: HashMap<IpAddr, HashSet<ConnectionId>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection, returning the user's live connection count.
    pub fn insert(&mut self, connection_id: ConnectionId, identity: &Identity, address: IpAddr) -> usize {
        self.entries.insert(
            connection_id,
            Entry {
                identity: identity.clone(),
                address,
            },
        );
        if let Some(crew_id) = &identity.crew_id {
            self.by_crew
                .entry(crew_id.clone())
                .or_default()
                .insert(connection_id);
        }
        self.by_address
            .entry(address)
            .or_default()
            .insert(connection_id);

        let user = self.by_user.entry(identity.user_id.clone()).or_default();
        user.insert(connection_id);
        user.len()
    }

    /// Unregister a connection. `None` if it was not registered.
    pub fn remove(&mut self, connection_id: &ConnectionId) -> Option<Departure> {
        let entry = self.entries.remove(connection_id)?;

        let remaining = remove_from(&mut self.by_user, &entry.identity.user_id, connection_id);
        if let Some(crew_id) = &entry.identity.crew_id {
            remove_from(&mut self.by_crew, crew_id, connection_id);
        }
        remove_from(&mut self.by_address, &entry.address, connection_id);

        Some(Departure {
            identity: entry.identity,
            remaining,
        })
    }

    pub fn user_connection_count(&self, user_id: &str) -> usize {
        self.by_user.get(user_id).map(HashSet::len).unwrap_or(0)
    }

    pub fn address_connection_count(&self, address: &IpAddr) -> usize {
        self.by_address.get(address).map(HashSet::len).unwrap_or(0)
    }

    #[cfg(test)]
    fn is_online(&self, user_id: &str) -> bool {
        self.by_user.contains_key(user_id)
    }

    /// Online users ordered by user id
    pub fn online_users(&self) -> Vec<OnlineUser> {
        let mut users: Vec<OnlineUser> = self
            .by_user
            .iter()
            .filter_map(|(_, connections)| self.describe(connections))
            .collect();
        users.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        users
    }

    /// Online members of a crew ordered by user id
    pub fn crew_members(&self, crew_id: &str) -> Vec<OnlineUser> {
        let Some(connections) = self.by_crew.get(crew_id) else {
            return Vec::new();
        };

        let user_ids: HashSet<&str> = connections
            .iter()
            .filter_map(|id| self.entries.get(id))
            .map(|entry| entry.identity.user_id.as_str())
            .collect();

        let mut users: Vec<OnlineUser> = user_ids
            .into_iter()
            .filter_map(|user_id| self.by_user.get(user_id))
            .filter_map(|connections| self.describe(connections))
            .collect();
        users.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        users
    }

    fn describe(&self, connections: &HashSet<ConnectionId>) -> Option<OnlineUser> {
        let entry = connections.iter().find_map(|id| self.entries.get(id))?;
        Some(OnlineUser {
            user_id: entry.identity.user_id.clone(),
            role: entry.identity.role,
            crew_id: entry.identity.crew_id.clone(),
            connections: connections.len(),
        })
    }

    #[cfg(test)]
    fn connection_count(&self) -> usize {
        self.entries.len()
    }

    pub fn user_count(&self) -> usize {
        self.by_user.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_user.clear();
        self.by_crew.clear();
        self.by_address.clear();
    }
}

/// Remove `id` from the set under `key`, dropping the set when it empties.
/// Returns the remaining size.
fn remove_from<K, Q>(index: &mut HashMap<K, HashSet<ConnectionId>>, key: &Q, id: &ConnectionId) -> usize
where
    K: std::borrow::Borrow<Q> + std::hash::Hash + Eq,
    Q: std::hash::Hash + Eq + ?Sized,
{
    let Some(set) = index.get_mut(key) else {
        return 0;
    };
    set.remove(id);
    let remaining = set.len();
    if remaining == 0 {
        index.remove(key);
    }
    remaining
}
