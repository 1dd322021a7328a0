use crate::interface::DeviceReply;
use crate::prelude::{FusionError, FusionResult};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

struct Connection {
    generation: u64,
    outbound: UnboundedSender<DeviceReply>,
}

/// Live device connections keyed by device id.
///
/// Every `add` hands out a fresh generation. `remove` only succeeds for the
/// generation that is currently registered, so a worker that is shutting
/// down after its device reconnected leaves the new connection alone.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<Uuid, Connection>,
    next_generation: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection, replacing any previous one for the device.
    pub fn add(&self, device_id: Uuid, outbound: UnboundedSender<DeviceReply>) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        self.connections.insert(device_id, Connection { generation, outbound });
        generation
    }

    pub fn remove(&self, device_id: Uuid, generation: u64) -> bool {
        self.connections
            .remove_if(&device_id, |_, conn| conn.generation == generation)
            .is_some()
    }

    /// Current generation of the device's connection.
    pub fn lookup(&self, device_id: Uuid) -> Option<u64> {
        self.connections.get(&device_id).map(|conn| conn.generation)
    }

    pub fn is_connected(&self, device_id: Uuid) -> bool {
        self.connections.contains_key(&device_id)
    }

    pub fn send(&self, device_id: Uuid, reply: DeviceReply) -> FusionResult<()> {
        let outbound = self
            .connections
            .get(&device_id)
            .map(|conn| conn.outbound.clone())
            .ok_or_else(|| FusionError::not_found("connection", device_id))?;
        outbound
            .send(reply)
            .map_err(|_| FusionError::not_found("connection", device_id))
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
