//! Device registry with a derived token index
//!
//! Holds two views of the same devices: ID → device and token → device ID.
//! Both are updated under a single write lock so lookups never observe a
//! device without its three tokens.

use crate::error::RegistryError;
use crate::model::{token_base, Device, DeviceId, TokenId, TokenOffset};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Default)]
struct RegistryIndex {
    devices: HashMap<DeviceId, Device>,
    tokens: HashMap<TokenId, DeviceId>,
}

/// Thread-safe device registry
#[derive(Default)]
pub struct DeviceRegistry {
    index: RwLock<RegistryIndex>,
}

impl DeviceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device, deriving its token base and indexing its tokens
    ///
    /// Returns the stored record with `token_base` filled in.
    pub fn register(&self, mut device: Device) -> Result<Device, RegistryError> {
        let base = token_base(device.id).ok_or(RegistryError::TokenOutOfRange(device.id))?;

        let mut index = self.index.write();
        if index.devices.contains_key(&device.id) {
            return Err(RegistryError::AlreadyRegistered(device.id));
        }

        device.token_base = base;
        for offset in TokenOffset::ALL {
            index.tokens.insert(base + offset.value(), device.id);
        }
        index.devices.insert(device.id, device.clone());

        info!(
            device_id = device.id,
            name = %device.name,
            layer = %device.layer,
            token_base = format_args!("0x{:04X}", base),
            "Device registered"
        );

        Ok(device)
    }

    /// Look up a device by ID
    pub fn get_by_id(&self, id: DeviceId) -> Result<Device, RegistryError> {
        self.index
            .read()
            .devices
            .get(&id)
            .cloned()
            .ok_or(RegistryError::DeviceNotFound(id))
    }

    /// Resolve a token to its owning device and channel offset
    pub fn get_by_token(&self, token: TokenId) -> Result<(Device, TokenOffset), RegistryError> {
        let index = self.index.read();
        let device = index
            .tokens
            .get(&token)
            .and_then(|id| index.devices.get(id))
            .ok_or(RegistryError::TokenNotFound(token))?;

        let offset = TokenOffset::from_delta(token - device.token_base);
        debug!(token, device_id = device.id, ?offset, "Token resolved");

        Ok((device.clone(), offset))
    }

    /// Snapshot of all registered devices, in no particular order
    pub fn list(&self) -> Vec<Device> {
        self.index.read().devices.values().cloned().collect()
    }

    pub fn contains(&self, id: DeviceId) -> bool {
        self.index.read().devices.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.index.read().devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
