use crate::errors::{RoomError, RoomResult};
use crate::models::{Connection, Info};
use crate::room::local_manager::LocalRoomManager;
use crate::rpc::{Mergeable, RpcManager, RpcResponse};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Request envelope shared by every `LocalRpcRoomManager` method; each
/// method reads the fields it needs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoomManagerRequest {
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default)]
    pub info: Option<Info>,
    #[serde(default)]
    pub connection: Option<Connection>,
}

impl RoomManagerRequest {
    pub fn with_info(info: Info) -> Self {
        RoomManagerRequest {
            info: Some(info),
            ..Default::default()
        }
    }

    pub fn with_info_and_connection(info: Info, connection: Connection) -> Self {
        RoomManagerRequest {
            info: Some(info),
            connection: Some(connection),
            ..Default::default()
        }
    }

    pub fn with_tags(tags: HashMap<String, String>) -> Self {
        RoomManagerRequest {
            tags,
            ..Default::default()
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RoomManagerResponse {
    #[serde(default)]
    pub error: Option<RoomError>,
    #[serde(default)]
    pub connection: Option<Connection>,
    #[serde(default)]
    pub rooms: Vec<Info>,
    #[serde(default)]
    pub room: Option<Info>,
}

impl RoomManagerResponse {
    fn ok() -> Self {
        RoomManagerResponse::default()
    }

    fn with_room(info: Info) -> Self {
        RoomManagerResponse {
            room: Some(info),
            ..Default::default()
        }
    }

    fn with_rooms(rooms: Vec<Info>) -> Self {
        RoomManagerResponse {
            rooms,
            ..Default::default()
        }
    }

    fn failed(err: RoomError) -> Self {
        RoomManagerResponse {
            error: Some(err),
            ..Default::default()
        }
    }

    fn from_result(result: RoomResult<RoomManagerResponse>) -> Self {
        match result {
            Ok(res) => res,
            Err(err) => Self::failed(err),
        }
    }

    /// The room returned by a single-room method; absence is a server bug
    /// surfaced as an unknown error, not a panic.
    pub fn take_room(self) -> RoomResult<Info> {
        self.room
            .ok_or_else(|| RoomError::unknown("rpc response is missing the room field"))
    }
}

impl RpcResponse for RoomManagerResponse {
    fn rpc_error(&self) -> Option<&RoomError> {
        self.error.as_ref()
    }
}

impl Mergeable for RoomManagerResponse {
    fn merge(&mut self, other: Self) {
        self.rooms.extend(other.rooms);
        if self.room.is_none() {
            self.room = other.room;
        }
        if self.connection.is_none() {
            self.connection = other.connection;
        }
    }
}

fn require_info(req: &RoomManagerRequest) -> RoomResult<Info> {
    req.info
        .clone()
        .ok_or_else(|| RoomError::message_content("request is missing the room info"))
}

fn require_connection(req: &RoomManagerRequest) -> RoomResult<Connection> {
    req.connection
        .clone()
        .ok_or_else(|| RoomError::message_content("request is missing the connection"))
}

/// Expose the owner-side manager to the mesh under `LocalRpcRoomManager.*`.
pub fn register_local_rpc_room_manager(manager: &Arc<LocalRoomManager>, rpc: &RpcManager) {
    let m = Arc::clone(manager);
    rpc.register(
        "LocalRpcRoomManager.GetRooms",
        move |_req: RoomManagerRequest| {
            let m = Arc::clone(&m);
            async move {
                RoomManagerResponse::with_rooms(m.get_rooms().iter().map(|r| r.info()).collect())
            }
        },
    );

    let m = Arc::clone(manager);
    rpc.register(
        "LocalRpcRoomManager.GetRoomsByGroup",
        move |req: RoomManagerRequest| {
            let m = Arc::clone(&m);
            async move {
                let rooms = m.get_rooms_by_tags(&req.tags);
                RoomManagerResponse::with_rooms(rooms.iter().map(|r| r.info()).collect())
            }
        },
    );

    let m = Arc::clone(manager);
    rpc.register(
        "LocalRpcRoomManager.CreateConnection",
        move |_req: RoomManagerRequest| {
            let m = Arc::clone(&m);
            async move {
                let mut res = RoomManagerResponse::ok();
                res.connection = Some(m.create_connection());
                res
            }
        },
    );

    let m = Arc::clone(manager);
    rpc.register(
        "LocalRpcRoomManager.CreateRoom",
        move |req: RoomManagerRequest| {
            let m = Arc::clone(&m);
            async move {
                RoomManagerResponse::from_result(async {
                    let info = require_info(&req)?;
                    let room = m.create_room(info).await?;
                    Ok(RoomManagerResponse::with_room(room.info()))
                }.await)
            }
        },
    );

    let m = Arc::clone(manager);
    rpc.register(
        "LocalRpcRoomManager.GetRoom",
        move |req: RoomManagerRequest| {
            let m = Arc::clone(&m);
            async move {
                RoomManagerResponse::from_result(async {
                    let info = require_info(&req)?;
                    let room = m.get_room(&info.address)?;
                    Ok(RoomManagerResponse::with_room(room.info()))
                }.await)
            }
        },
    );

    let m = Arc::clone(manager);
    rpc.register(
        "LocalRpcRoomManager.RemoveRoom",
        move |req: RoomManagerRequest| {
            let m = Arc::clone(&m);
            async move {
                RoomManagerResponse::from_result(async {
                    let info = require_info(&req)?;
                    m.remove_room(&info.address).await?;
                    Ok(RoomManagerResponse::ok())
                }.await)
            }
        },
    );

    let m = Arc::clone(manager);
    rpc.register(
        "LocalRpcRoomManager.JoinRoom",
        move |req: RoomManagerRequest| {
            let m = Arc::clone(&m);
            async move {
                RoomManagerResponse::from_result(async {
                    let info = require_info(&req)?;
                    let connection = require_connection(&req)?;
                    m.join_room(&info, connection).await?;
                    Ok(RoomManagerResponse::ok())
                }.await)
            }
        },
    );

    let m = Arc::clone(manager);
    rpc.register(
        "LocalRpcRoomManager.LeaveRoom",
        move |req: RoomManagerRequest| {
            let m = Arc::clone(&m);
            async move {
                RoomManagerResponse::from_result(async {
                    let info = require_info(&req)?;
                    let connection = require_connection(&req)?;
                    m.leave_room(&info, &connection).await?;
                    Ok(RoomManagerResponse::ok())
                }.await)
            }
        },
    );

    let m = Arc::clone(manager);
    rpc.register(
        "LocalRpcRoomManager.UpdateRoomInfo",
        move |req: RoomManagerRequest| {
            let m = Arc::clone(&m);
            async move {
                RoomManagerResponse::from_result(async {
                    let info = require_info(&req)?;
                    let updated = m.update_room_info(&info).await?;
                    Ok(RoomManagerResponse::with_room(updated))
                }.await)
            }
        },
    );
}
