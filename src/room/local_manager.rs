use crate::address::{Address, AddressManager};
use crate::errors::{RoomError, RoomResult};
use crate::events::EventEmitter;
use crate::models::{Connection, Info};
use crate::room::basic::{BasicManager, ManagerRoom};
use crate::room::local::LocalRoom;
use std::collections::HashMap;
use std::sync::Arc;

/// Owner-side container of the rooms this instance hosts.
pub struct LocalRoomManager {
    rooms: Arc<BasicManager<LocalRoom>>,
    emitter: Arc<EventEmitter>,
    addresses: Arc<AddressManager>,
    max_rooms: usize,
}

impl LocalRoomManager {
    pub fn new(
        emitter: Arc<EventEmitter>,
        addresses: Arc<AddressManager>,
        max_rooms: usize,
    ) -> Arc<LocalRoomManager> {
        Arc::new(LocalRoomManager {
            rooms: Arc::new(BasicManager::new()),
            emitter,
            addresses,
            max_rooms,
        })
    }

    pub fn start(&self) {
        self.rooms.start_reaper("local");
        println!("🏠 local room manager started");
    }

    pub fn create_connection(&self) -> Connection {
        Connection::new(self.addresses.generate_address())
    }

    pub fn get_rooms(&self) -> Vec<Arc<LocalRoom>> {
        self.rooms.list()
    }

    pub fn get_rooms_by_tags(&self, tags: &HashMap<String, String>) -> Vec<Arc<LocalRoom>> {
        self.rooms.list_by_tags(tags)
    }

    fn is_full(&self) -> bool {
        self.rooms.len() >= self.max_rooms
    }

    /// Idempotent create: an existing room with the same address is returned
    /// as-is. Rooms for foreign machine ids are refused; ownership is by
    /// address.
    pub async fn create_room(&self, info: Info) -> RoomResult<Arc<LocalRoom>> {
        if !self.addresses.is_local(&info.address) {
            return Err(RoomError::serve(format!(
                "room {} belongs to machine {}, not this instance",
                info.address.id, info.address.machine_id
            )));
        }

        if let Some(existing) = self.rooms.get(&info.address) {
            return Ok(existing);
        }

        if self.is_full() {
            return Err(RoomError::client(
                "the maximum number of rooms has been reached",
            ));
        }

        let room = LocalRoom::new(info, Arc::clone(&self.emitter))?;
        room.start().await;
        self.rooms.add(Arc::clone(&room));
        Ok(room)
    }

    pub fn get_room(&self, address: &Address) -> RoomResult<Arc<LocalRoom>> {
        self.rooms
            .get(address)
            .ok_or_else(|| RoomError::room_not_found(format!("room {} not found", address.id)))
    }

    pub async fn remove_room(&self, address: &Address) -> RoomResult<()> {
        if let Some(room) = self.rooms.remove(address) {
            room.close_with_code("remove").await;
        }
        Ok(())
    }

    pub async fn join_room(&self, opt: &Info, connection: Connection) -> RoomResult<()> {
        let room = self.get_room(&opt.address)?;
        if room.is_closed() {
            return Err(RoomError::room_close(format!(
                "room {} had been closed, join failed",
                opt.address.id
            )));
        }
        room.join(connection, opt).await
    }

    /// Leaving an absent or closed room succeeds; the terminal paths stay
    /// idempotent. A leave that empties the room lets the reaper predicates
    /// run eagerly instead of waiting for the next tick.
    pub async fn leave_room(&self, opt: &Info, connection: &Connection) -> RoomResult<()> {
        let Ok(room) = self.get_room(&opt.address) else {
            return Ok(());
        };
        if room.is_closed() {
            return Ok(());
        }

        if let Err(e) = room.leave(connection, opt).await {
            eprintln!("room manager leave room {} error: {e}", opt.address.id);
        }

        if room.should_remove() {
            self.rooms.remove(&opt.address);
            let code = room.close_code();
            room.close_with_code(&code).await;
        }

        Ok(())
    }

    pub async fn update_room_info(&self, info: &Info) -> RoomResult<Info> {
        let room = self.get_room(&info.address)?;
        Ok(room.update_info(info).await)
    }
}
