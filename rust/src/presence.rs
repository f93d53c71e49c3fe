use std::collections::BTreeSet;

/// Peers currently reported online by the relay. Each update is the latest
/// word for that peer, so repeated events are harmless.
#[derive(Debug, Default, Clone)]
pub struct PresenceTracker {
    online: BTreeSet<String>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the set changed.
    pub fn set_online(&mut self, peer: &str) -> bool {
        self.online.insert(peer.to_string())
    }

    pub fn set_offline(&mut self, peer: &str) -> bool {
        self.online.remove(peer)
    }

    pub fn is_online(&self, peer: &str) -> bool {
        self.online.contains(peer)
    }

    pub fn clear(&mut self) {
        self.online.clear();
    }

    pub fn online(&self) -> Vec<String> {
        self.online.iter().cloned().collect()
    }
}
