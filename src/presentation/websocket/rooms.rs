//! Room membership tracking
//!
//! Two indexes kept in step: room to members and connection to rooms.
//! A room or connection whose set becomes empty is removed from its index,
//! so the tracker holds nothing for departed connections.

use std::collections::{HashMap, HashSet};

use crate::domain::{ConnectionId, Room};

#[derive(Debug, Default)]
pub struct RoomTracker {
    members: HashMap<Room, HashSet<ConnectionId>>,
    memberships: HashMap<ConnectionId, HashSet<Room>>,
}

impl RoomTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a room. Returns `false` if it was already a member.
    pub fn join(&mut self, connection_id: ConnectionId, room: Room) -> bool {
        let added = self
            .members
            .entry(room.clone())
            .or_default()
            .insert(connection_id);
        self.memberships
            .entry(connection_id)
            .or_default()
            .insert(room);
        added
    }

    /// Remove a connection from a room. Returns `false` if it was not a member.
    pub fn leave(&mut self, connection_id: &ConnectionId, room: &Room) -> bool {
        let removed = match self.members.get_mut(room) {
            Some(set) => {
                let removed = set.remove(connection_id);
                if set.is_empty() {
                    self.members.remove(room);
                }
                removed
            }
            None => false,
        };

        if let Some(rooms) = self.memberships.get_mut(connection_id) {
            rooms.remove(room);
            if rooms.is_empty() {
                self.memberships.remove(connection_id);
            }
        }

        removed
    }

    /// Remove a connection from every room it belongs to.
    pub fn leave_all(&mut self, connection_id: &ConnectionId) -> Vec<Room> {
        let rooms = match self.memberships.remove(connection_id) {
            Some(rooms) => rooms,
            None => return Vec::new(),
        };

        for room in &rooms {
            if let Some(set) = self.members.get_mut(room) {
                set.remove(connection_id);
                if set.is_empty() {
                    self.members.remove(room);
                }
            }
        }

        rooms.into_iter().collect()
    }

    pub fn is_member(&self, connection_id: &ConnectionId, room: &Room) -> bool {
        self.members
            .get(room)
            .map(|set| set.contains(connection_id))
            .unwrap_or(false)
    }

    pub fn members(&self, room: &Room) -> impl Iterator<Item = &ConnectionId> {
        self.members.get(room).into_iter().flatten()
    }

    #[cfg(test)]
    fn member_count(&self, room: &Room) -> usize {
        self.members.get(room).map(HashSet::len).unwrap_or(0)
    }

    #[cfg(test)]
    pub(crate) fn rooms_of(&self, connection_id: &ConnectionId) -> Vec<Room> {
        let mut rooms: Vec<Room> = self
            .memberships
            .get(connection_id)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default();
        rooms.sort();
        rooms
    }

    /// Number of non-empty rooms
    pub fn room_count(&self) -> usize {
        self.members.len()
    }

    /// Total (room, connection) pairs
    pub fn membership_count(&self) -> usize {
        self.members.values().map(HashSet::len).sum()
    }

    /// Connections with at least one membership
    #[cfg(test)]
    fn tracked_connections(&self) -> usize {
        self.memberships.len()
    }

    pub fn clear(&mut self) {
        self.members.clear();
        self.memberships.clear();
    }
}
