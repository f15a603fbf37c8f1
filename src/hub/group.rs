//! Named sets of clients.
//!
//! A group is created on first use (adding a member to an unknown group
//! creates it); removing the last member does not delete the group since
//! groups are explicit, application-managed resources.

use dashmap::{DashMap, DashSet};

use super::client::ClientId;

#[derive(Default)]
pub(crate) struct GroupRegistry {
    groups: DashMap<String, DashSet<ClientId>>,
}

impl GroupRegistry {
    pub fn create(&self, name: &str) {
        self.groups.entry(name.to_string()).or_default();
    }

    pub fn add(&self, name: &str, client: ClientId) {
        self.groups.entry(name.to_string()).or_default().insert(client);
    }

    pub fn remove(&self, name: &str, client: ClientId) {
        if let Some(set) = self.groups.get(name) {
            set.remove(&client);
        }
    }

    /// Remove a client from every group it belongs to (called on disconnect).
    pub fn remove_from_all(&self, client: ClientId) {
        for set in self.groups.iter() {
            set.remove(&client);
        }
    }

    pub fn members(&self, name: &str) -> Vec<ClientId> {
        self.groups
            .get(name)
            .map(|set| set.iter().map(|e| *e).collect())
            .unwrap_or_default()
    }

    pub fn names(&self) -> Vec<String> {
        self.groups.iter().map(|e| e.key().clone()).collect()
    }
}
