use crate::address::AddressManager;
use crate::errors::RoomResult;
use crate::events::EventEmitter;
use crate::models::{Connection, Info};
use crate::room::basic::BasicManager;
use crate::room::remote::RemoteRoom;
use crate::room::rpc_service::{RoomManagerRequest, RoomManagerResponse};
use crate::rpc::RpcManager;
use std::collections::HashMap;
use std::sync::Arc;

/// Cross-instance orchestration: routes single-room operations to the
/// owning peer, fans list queries out over the whole mesh, and owns the
/// remote proxies for the clients connected to this instance.
pub struct ClusterRoomManager {
    proxies: Arc<BasicManager<RemoteRoom>>,
    addresses: Arc<AddressManager>,
    rpc: Arc<RpcManager>,
    emitter: Arc<EventEmitter>,
}

impl ClusterRoomManager {
    pub fn new(
        addresses: Arc<AddressManager>,
        rpc: Arc<RpcManager>,
        emitter: Arc<EventEmitter>,
    ) -> Arc<ClusterRoomManager> {
        Arc::new(ClusterRoomManager {
            proxies: Arc::new(BasicManager::new()),
            addresses,
            rpc,
            emitter,
        })
    }

    pub fn start(&self) {
        self.proxies.start_reaper("remote");
        println!("🌐 cluster room manager started");
    }

    pub fn addresses(&self) -> &Arc<AddressManager> {
        &self.addresses
    }

    pub fn create_connection(&self) -> Connection {
        Connection::new(self.addresses.generate_address())
    }

    pub fn proxy_count(&self) -> usize {
        self.proxies.len()
    }

    /// Aggregate the whole mesh and present newest rooms first.
    pub async fn list_rooms(&self, tags: HashMap<String, String>) -> RoomResult<Vec<Info>> {
        let res: RoomManagerResponse = self
            .rpc
            .call_all(
                "LocalRpcRoomManager.GetRoomsByGroup",
                &RoomManagerRequest::with_tags(tags),
            )
            .await?;

        let mut rooms = res.rooms;
        rooms.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rooms)
    }

    /// Create on the owning instance (resolved from the address machine id).
    /// Creation is idempotent; an existing room is returned as-is.
    pub async fn create_local_room(&self, info: Info) -> RoomResult<Info> {
        let owner = info.address.clone();
        let res: RoomManagerResponse = self
            .rpc
            .call_by_address(
                &owner,
                "LocalRpcRoomManager.CreateRoom",
                &RoomManagerRequest::with_info(info),
            )
            .await?;
        res.take_room()
    }

    pub async fn get_room(&self, info: &Info) -> RoomResult<Info> {
        let res: RoomManagerResponse = self
            .rpc
            .call_by_address(
                &info.address,
                "LocalRpcRoomManager.GetRoom",
                &RoomManagerRequest::with_info(info.clone()),
            )
            .await?;
        res.take_room()
    }

    pub async fn get_room_users(&self, info: &Info) -> RoomResult<Vec<Connection>> {
        Ok(self.get_room(info).await?.connections)
    }

    pub async fn remove_room(&self, info: &Info) -> RoomResult<()> {
        let _res: RoomManagerResponse = self
            .rpc
            .call_by_address(
                &info.address,
                "LocalRpcRoomManager.RemoveRoom",
                &RoomManagerRequest::with_info(info.clone()),
            )
            .await?;
        Ok(())
    }

    pub async fn update_room_info(&self, info: &Info) -> RoomResult<Info> {
        let res: RoomManagerResponse = self
            .rpc
            .call_by_address(
                &info.address,
                "LocalRpcRoomManager.UpdateRoomInfo",
                &RoomManagerRequest::with_info(info.clone()),
            )
            .await?;
        res.take_room()
    }

    /// Join: confirm the room with its owner, stand up the proxy on this
    /// instance, then register the membership with the owner. A failed
    /// owner-side join rolls the proxy back.
    pub async fn join_room(
        &self,
        connection: Connection,
        opt: &Info,
    ) -> RoomResult<Arc<RemoteRoom>> {
        let room_info = self.get_room(opt).await?;

        let proxy = RemoteRoom::new(connection.clone(), room_info, Arc::clone(&self.emitter));
        proxy.start();
        self.proxies.add(Arc::clone(&proxy));

        let joined: RoomResult<RoomManagerResponse> = self
            .rpc
            .call_by_address(
                &opt.address,
                "LocalRpcRoomManager.JoinRoom",
                &RoomManagerRequest::with_info_and_connection(opt.clone(), connection.clone()),
            )
            .await;

        match joined {
            Ok(_) => Ok(proxy),
            Err(e) => {
                self.proxies.remove(&connection.address);
                proxy.close();
                Err(e)
            }
        }
    }

    /// Create-on-absent convenience for `forceCreate` joins.
    pub async fn force_join_room(
        &self,
        connection: Connection,
        join_opt: &Info,
        create_opt: Info,
    ) -> RoomResult<Arc<RemoteRoom>> {
        self.create_local_room(create_opt).await?;
        self.join_room(connection, join_opt).await
    }

    /// Tear down the local proxy first, then tell the owner. Both halves
    /// are idempotent.
    pub async fn leave_room(&self, opt: &Info, connection: &Connection) -> RoomResult<()> {
        if let Some(proxy) = self.proxies.remove(&connection.address) {
            proxy.close();
        }

        let _res: RoomManagerResponse = self
            .rpc
            .call_by_address(
                &opt.address,
                "LocalRpcRoomManager.LeaveRoom",
                &RoomManagerRequest::with_info_and_connection(opt.clone(), connection.clone()),
            )
            .await?;
        Ok(())
    }
}
