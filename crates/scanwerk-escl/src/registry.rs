// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-memory catalogue of discovered scanners and their negotiated
// capabilities.
//
// The device list is replaced wholesale at the end of each discovery pass and
// is read-only in between.  Capabilities are cached per device and survive a
// new pass only if the device is still advertised at the same URL.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info};

use scanwerk_core::types::{CapabilitySet, Device, DeviceId};

#[derive(Debug, Default)]
struct RegistryState {
    /// Devices in first-seen order.
    devices: Vec<Device>,
    capabilities: HashMap<DeviceId, Arc<CapabilitySet>>,
}

/// Thread-safe device catalogue shared by discovery and the session layer.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    state: RwLock<RegistryState>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the catalogue with the result of a discovery pass.
    pub fn publish(&self, snapshot: Vec<Device>) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        let previous: HashMap<DeviceId, Device> = state
            .devices
            .drain(..)
            .map(|d| (d.id.clone(), d))
            .collect();
        // Keep manually added devices; mDNS never reports them.
        let mut devices: Vec<Device> = previous
            .values()
            .filter(|d| d.manually_added && !snapshot.iter().any(|s| s.id == d.id))
            .cloned()
            .collect();
        devices.extend(snapshot);

        state.capabilities.retain(|id, _| {
            let kept = devices.iter().find(|d| &d.id == id);
            match (kept, previous.get(id)) {
                (Some(now), Some(before)) => now.base_url == before.base_url,
                _ => false,
            }
        });

        info!(devices = devices.len(), "device registry updated");
        state.devices = devices;
    }

    /// Add a single device (e.g. entered by URL).  Re-adding replaces the
    /// record in place.
    pub fn add(&self, device: Device) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        match state.devices.iter_mut().find(|d| d.id == device.id) {
            Some(existing) => *existing = device,
            None => {
                debug!(id = %device.id, "device added to registry");
                state.devices.push(device);
            }
        }
    }

    pub fn devices(&self) -> Vec<Device> {
        self.read(|s| s.devices.clone())
    }

    pub fn get(&self, id: &DeviceId) -> Option<Device> {
        self.read(|s| s.devices.iter().find(|d| &d.id == id).cloned())
    }

    pub fn len(&self) -> usize {
        self.read(|s| s.devices.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capabilities(&self, id: &DeviceId) -> Option<Arc<CapabilitySet>> {
        self.read(|s| s.capabilities.get(id).cloned())
    }

    pub fn store_capabilities(&self, id: &DeviceId, caps: Arc<CapabilitySet>) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.capabilities.insert(id.clone(), caps);
    }

    /// Drop cached capabilities so the next lookup re-fetches them.
    pub fn invalidate(&self, id: &DeviceId) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.capabilities.remove(id);
    }

    pub fn clear(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.devices.clear();
        state.capabilities.clear();
    }

    fn read<R>(&self, f: impl FnOnce(&RegistryState) -> R) -> R {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }
}
