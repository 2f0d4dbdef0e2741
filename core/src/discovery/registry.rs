//! Per-session device registry
//!
//! Keeps the first record seen for every identifier, in discovery order.

use super::device::Device;
use std::collections::HashSet;

/// Deduplicating, insertion-ordered device store
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    entries: Vec<Device>,
    ids: HashSet<String>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard every entry
    pub fn reset(&mut self) {
        self.entries.clear();
        self.ids.clear();
    }

    /// Insert `device` unless its id is already present.
    ///
    /// Returns `true` when the device was inserted. Existing entries are
    /// never modified.
    pub fn upsert_if_absent(&mut self, device: Device) -> bool {
        if self.ids.contains(&device.id) {
            return false;
        }
        self.ids.insert(device.id.clone());
        self.entries.push(device);
        true
    }

    /// Owned copy of all entries in insertion order
    pub fn snapshot(&self) -> Vec<Device> {
        self.entries.clone()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
