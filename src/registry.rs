use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rand::Rng;
use tokio::sync::{broadcast, mpsc};

use crate::game::{GameEvent, RoomCommand};
use crate::types::RoomMode;

fn create_room_code() -> String {
    let mut rng = rand::rng();
    rng.random_range(100_000..1_000_000u32).to_string()
}

/// Registry holds all live rooms.
pub struct Registry {
    /// room code -> room handle
    rooms: DashMap<String, RoomHandle>,
    /// connection id -> room code
    connections: DashMap<String, String>,
}

/// What a socket needs to talk to a room task.
#[derive(Clone)]
pub struct RoomHandle {
    pub code: String,
    pub mode: RoomMode,
    pub cmd_tx: mpsc::Sender<RoomCommand>,
    pub event_tx: broadcast::Sender<GameEvent>,
}

impl Registry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rooms: DashMap::new(),
            connections: DashMap::new(),
        })
    }

    /// Reserve a fresh code and register the room under it.
    ///
    /// Codes are drawn until one is free; the vacancy check and the
    /// insert happen under the same shard lock.
    pub fn create_room(
        &self,
        mode: RoomMode,
        cmd_tx: mpsc::Sender<RoomCommand>,
        event_tx: broadcast::Sender<GameEvent>,
    ) -> RoomHandle {
        loop {
            let code = create_room_code();
            if let Entry::Vacant(slot) = self.rooms.entry(code.clone()) {
                let handle = RoomHandle {
                    code,
                    mode,
                    cmd_tx,
                    event_tx,
                };
                slot.insert(handle.clone());
                return handle;
            }
            tracing::debug!("room code {} in use, drawing another", code);
        }
    }

    pub fn get_room(&self, code: &str) -> Option<RoomHandle> {
        self.rooms.get(code).map(|h| h.clone())
    }

    /// Drop a room and every connection still pointing at it.
    pub fn delete_room(&self, code: &str) {
        self.rooms.remove(code);
        self.connections.retain(|_, room| room != code);
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Attach a connection to a room. Fails if it already belongs to one.
    pub fn bind_connection(&self, connection_id: &str, code: &str) -> bool {
        match self.connections.entry(connection_id.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(code.to_string());
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    pub fn unbind_connection(&self, connection_id: &str) {
        self.connections.remove(connection_id);
    }

    pub fn room_of(&self, connection_id: &str) -> Option<String> {
        self.connections.get(connection_id).map(|c| c.clone())
    }
}
