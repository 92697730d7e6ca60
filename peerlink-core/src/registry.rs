//! Local view of the other signed-in peers.

use std::collections::BTreeMap;

use crate::protocol::PeerId;

/// Peer id → display name. Only the session engine mutates it.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PeerRegistry {
    peers: BTreeMap<PeerId, String>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or rename. Returns true if the peer was not known before.
    pub(crate) fn insert(&mut self, id: PeerId, name: String) -> bool {
        self.peers.insert(id, name).is_none()
    }

    pub(crate) fn remove(&mut self, id: PeerId) -> Option<String> {
        self.peers.remove(&id)
    }

    pub(crate) fn clear(&mut self) {
        self.peers.clear();
    }

    pub fn get(&self, id: PeerId) -> Option<&str> {
        self.peers.get(&id).map(String::as_str)
    }

    pub fn contains(&self, id: PeerId) -> bool {
        self.peers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Peers in id order.
    pub fn iter(&self) -> impl Iterator<Item = (PeerId, &str)> {
        self.peers.iter().map(|(id, name)| (*id, name.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_remove() {
        let mut r = PeerRegistry::new();
        assert!(r.insert(PeerId(2), "alice".into()));
        assert!(!r.insert(PeerId(2), "alice2".into()));
        assert_eq!(r.get(PeerId(2)), Some("alice2"));
        assert!(r.contains(PeerId(2)));
        assert_eq!(r.remove(PeerId(2)).as_deref(), Some("alice2"));
        assert!(r.is_empty());
        assert_eq!(r.remove(PeerId(2)), None);
    }

    #[test]
    fn iter_is_ordered_and_clear_empties() {
        let mut r = PeerRegistry::new();
        r.insert(PeerId(9), "z".into());
        r.insert(PeerId(1), "a".into());
        let ids: Vec<PeerId> = r.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![PeerId(1), PeerId(9)]);
        assert_eq!(r.len(), 2);
        r.clear();
        assert!(r.is_empty());
    }
}
