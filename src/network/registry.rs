use std::collections::HashMap;

use tokio::sync::mpsc;

use crate::core::BlobPolicy;
use crate::protocol::Message;

use super::flow::FlowController;

/// Opaque identifier for one attached connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub(crate) u64);

/// Which side of the protocol a connection speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Device,
}

/// A client's enableBLOB directives, most specific match wins
#[derive(Debug, Default)]
pub struct BlobPolicyMap {
    entries: HashMap<(String, Option<String>), BlobPolicy>,
}

impl BlobPolicyMap {
    /// Records a directive for a device or one property of it
    pub fn set(&mut self, device: &str, name: Option<&str>, policy: BlobPolicy) {
        self.entries
            .insert((device.to_string(), name.map(String::from)), policy);
    }

    /// Effective policy for a property; the default is Never
    pub fn resolve(&self, device: &str, name: &str) -> BlobPolicy {
        self.entries
            .get(&(device.to_string(), Some(name.to_string())))
            .or_else(|| self.entries.get(&(device.to_string(), None)))
            .copied()
            .unwrap_or_default()
    }

    /// Whether any directive for this device is Only, which suppresses the
    /// device's non-BLOB traffic on that connection
    pub fn only_for(&self, device: &str) -> bool {
        self.entries
            .iter()
            .any(|((d, _), policy)| d == device && *policy == BlobPolicy::Only)
    }
}

/// Book-keeping for one attached connection
#[derive(Debug)]
pub struct ConnectionEntry {
    pub role: Role,
    /// Queue drained by the connection's writer task
    pub outbound: mpsc::Sender<Message>,
    pub blob_policy: BlobPolicyMap,
    pub flow: FlowController,
}

/// All live connections plus the device-name ownership index
#[derive(Debug, Default)]
pub struct Registry {
    entries: HashMap<ConnId, ConnectionEntry>,
    // device name -> connection that publishes it
    owners: HashMap<String, ConnId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: ConnId, entry: ConnectionEntry) {
        self.entries.insert(id, entry);
    }

    /// Removes a connection, returning the device names it owned
    pub fn remove(&mut self, id: ConnId) -> Vec<String> {
        self.entries.remove(&id);
        let owned: Vec<String> = self
            .owners
            .iter()
            .filter(|(_, owner)| **owner == id)
            .map(|(device, _)| device.clone())
            .collect();
        for device in &owned {
            self.owners.remove(device);
        }
        owned
    }

    pub fn get(&self, id: ConnId) -> Option<&ConnectionEntry> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnId) -> Option<&mut ConnectionEntry> {
        self.entries.get_mut(&id)
    }

    /// Learns that a device name is published by a connection. First writer
    /// wins; a rename of ownership never happens silently.
    pub fn claim_device(&mut self, device: &str, id: ConnId) {
        self.owners.entry(device.to_string()).or_insert(id);
    }

    /// Connection that publishes a device, if any is known yet
    pub fn owner_of(&self, device: &str) -> Option<ConnId> {
        self.owners.get(device).copied()
    }

    /// Identifiers of every connection with the given role
    pub fn with_role(&self, role: Role) -> Vec<ConnId> {
        let mut ids: Vec<ConnId> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.role == role)
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(role: Role) -> ConnectionEntry {
        let (tx, _rx) = mpsc::channel(4);
        ConnectionEntry {
            role,
            outbound: tx,
            blob_policy: BlobPolicyMap::default(),
            flow: FlowController::new(4),
        }
    }

    #[test]
    fn test_policy_resolution_specificity() {
        let mut map = BlobPolicyMap::default();
        assert_eq!(map.resolve("CCD Simulator", "CCD1"), BlobPolicy::Never);

        map.set("CCD Simulator", None, BlobPolicy::Also);
        assert_eq!(map.resolve("CCD Simulator", "CCD1"), BlobPolicy::Also);

        map.set("CCD Simulator", Some("CCD1"), BlobPolicy::Only);
        assert_eq!(map.resolve("CCD Simulator", "CCD1"), BlobPolicy::Only);
        assert_eq!(map.resolve("CCD Simulator", "CCD2"), BlobPolicy::Also);
        assert!(map.only_for("CCD Simulator"));
        assert!(!map.only_for("Telescope Simulator"));
    }

    #[test]
    fn test_ownership_lifecycle() {
        let mut registry = Registry::new();
        registry.insert(ConnId(1), entry(Role::Device));
        registry.insert(ConnId(2), entry(Role::Client));

        registry.claim_device("CCD Simulator", ConnId(1));
        registry.claim_device("CCD Simulator", ConnId(2));
        assert_eq!(registry.owner_of("CCD Simulator"), Some(ConnId(1)));

        let orphaned = registry.remove(ConnId(1));
        assert_eq!(orphaned, vec!["CCD Simulator".to_string()]);
        assert_eq!(registry.owner_of("CCD Simulator"), None);
        assert!(registry.get(ConnId(1)).is_none());
    }

    #[test]
    fn test_role_filter() {
        let mut registry = Registry::new();
        registry.insert(ConnId(1), entry(Role::Device));
        registry.insert(ConnId(2), entry(Role::Client));
        registry.insert(ConnId(3), entry(Role::Client));
        assert_eq!(registry.with_role(Role::Client), vec![ConnId(2), ConnId(3)]);
        assert_eq!(registry.with_role(Role::Device), vec![ConnId(1)]);
    }
}
