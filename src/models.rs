use crate::address::Address;
use crate::errors::{RoomError, RoomResult};
use crate::events::Package;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Unix milliseconds, the stamp used on messages and packages.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

// --- Connections ---

/// One client participating in a room for the lifetime of one socket session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub address: Address,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub name: String,
}

impl Connection {
    pub fn new(address: Address) -> Self {
        Connection {
            address,
            created_at: Utc::now(),
            user_id: String::new(),
            name: String::new(),
        }
    }
}

// --- Room descriptor ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Info {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    pub address: Address,
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub use_secret: bool,
    pub created_at: DateTime<Utc>,
    pub active_at: DateTime<Utc>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl Info {
    pub fn new(name: String, group: String, address: Address) -> Self {
        Info {
            name,
            group,
            tags: HashMap::new(),
            address,
            secret: String::new(),
            use_secret: false,
            created_at: Utc::now(),
            active_at: Utc::now(),
            connections: Vec::new(),
        }
    }

    /// Join options: only the fields admission cares about.
    pub fn join_options(address: Address, secret: String, use_secret: bool, group: String) -> Self {
        let mut info = Info::new(String::new(), group, address);
        info.secret = secret;
        info.use_secret = use_secret;
        info
    }

    /// Copy the mutable descriptor fields; empty values leave the target alone.
    pub fn update(&mut self, other: &Info) {
        if !other.name.is_empty() {
            self.name = other.name.clone();
        }
        if !other.group.is_empty() {
            self.group = other.group.clone();
        }
        if !other.tags.is_empty() {
            self.tags = other.tags.clone();
        }
    }

    /// Tag filter: every key present in the query must exist on the room and
    /// the room's value must contain the queried value as a substring.
    pub fn matches_tags(&self, query: &HashMap<String, String>) -> bool {
        query.iter().all(|(k, v)| {
            self.tags
                .get(k)
                .map(|have| have.contains(v.as_str()))
                .unwrap_or(false)
        })
    }
}

// --- Messages ---

pub const BROADCAST_TYPE: &str = "broadcast";
pub const MESSAGE_TYPE: &str = "message";
pub const PING_TYPE: &str = "ping";
pub const PONG_TYPE: &str = "pong";
pub const UPDATE_ROOM_INFO_TYPE: &str = "updateRoomInfo";
pub const START_TYPE: &str = "start";
pub const CLOSE_TYPE: &str = "close";
pub const JOIN_TYPE: &str = "join";
pub const LEAVE_TYPE: &str = "leave";
pub const CONNECT_TYPE: &str = "connect";
pub const ERROR_TYPE: &str = "error";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastContent {
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub from: Option<Connection>,
    #[serde(default)]
    pub include_self: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnicastContent {
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub from: Option<Connection>,
    #[serde(default)]
    pub to: Option<Connection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingContent {
    pub from: Address,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PongContent {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRoomInfoContent {
    pub info: Info,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartOrCloseContent {
    pub room_address: Address,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinOrLeaveContent {
    pub connection: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectContent {
    pub self_connection: Connection,
    pub room_connections: Vec<Connection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContent {
    pub message: String,
    pub code: String,
}

/// Typed message body. The wire tag is the message type name, the payload
/// sits under `content`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "content")]
pub enum MessageContent {
    #[serde(rename = "broadcast")]
    Broadcast(BroadcastContent),
    #[serde(rename = "message")]
    Unicast(UnicastContent),
    #[serde(rename = "ping")]
    Ping(PingContent),
    #[serde(rename = "pong")]
    Pong(PongContent),
    #[serde(rename = "updateRoomInfo")]
    UpdateRoomInfo(UpdateRoomInfoContent),
    #[serde(rename = "start")]
    Start(StartOrCloseContent),
    #[serde(rename = "close")]
    Close(StartOrCloseContent),
    #[serde(rename = "join")]
    Join(JoinOrLeaveContent),
    #[serde(rename = "leave")]
    Leave(JoinOrLeaveContent),
    #[serde(rename = "connect")]
    Connect(ConnectContent),
    #[serde(rename = "error")]
    Error(ErrorContent),
}

impl MessageContent {
    pub fn type_name(&self) -> &'static str {
        match self {
            MessageContent::Broadcast(_) => BROADCAST_TYPE,
            MessageContent::Unicast(_) => MESSAGE_TYPE,
            MessageContent::Ping(_) => PING_TYPE,
            MessageContent::Pong(_) => PONG_TYPE,
            MessageContent::UpdateRoomInfo(_) => UPDATE_ROOM_INFO_TYPE,
            MessageContent::Start(_) => START_TYPE,
            MessageContent::Close(_) => CLOSE_TYPE,
            MessageContent::Join(_) => JOIN_TYPE,
            MessageContent::Leave(_) => LEAVE_TYPE,
            MessageContent::Connect(_) => CONNECT_TYPE,
            MessageContent::Error(_) => ERROR_TYPE,
        }
    }

    /// Payload only, without the type tag. This is what crosses the emitter.
    pub fn payload(&self) -> RoomResult<serde_json::Value> {
        let value = match self {
            MessageContent::Broadcast(c) => serde_json::to_value(c)?,
            MessageContent::Unicast(c) => serde_json::to_value(c)?,
            MessageContent::Ping(c) => serde_json::to_value(c)?,
            MessageContent::Pong(c) => serde_json::to_value(c)?,
            MessageContent::UpdateRoomInfo(c) => serde_json::to_value(c)?,
            MessageContent::Start(c) => serde_json::to_value(c)?,
            MessageContent::Close(c) => serde_json::to_value(c)?,
            MessageContent::Join(c) => serde_json::to_value(c)?,
            MessageContent::Leave(c) => serde_json::to_value(c)?,
            MessageContent::Connect(c) => serde_json::to_value(c)?,
            MessageContent::Error(c) => serde_json::to_value(c)?,
        };
        Ok(value)
    }

    /// Rebuild a typed payload from a routing key and a raw value.
    pub fn from_parts(routing_key: &str, content: serde_json::Value) -> RoomResult<MessageContent> {
        let content = match routing_key {
            BROADCAST_TYPE => MessageContent::Broadcast(serde_json::from_value(content)?),
            MESSAGE_TYPE => MessageContent::Unicast(serde_json::from_value(content)?),
            PING_TYPE => MessageContent::Ping(serde_json::from_value(content)?),
            PONG_TYPE => MessageContent::Pong(serde_json::from_value(content)?),
            UPDATE_ROOM_INFO_TYPE => {
                MessageContent::UpdateRoomInfo(serde_json::from_value(content)?)
            }
            START_TYPE => MessageContent::Start(serde_json::from_value(content)?),
            CLOSE_TYPE => MessageContent::Close(serde_json::from_value(content)?),
            JOIN_TYPE => MessageContent::Join(serde_json::from_value(content)?),
            LEAVE_TYPE => MessageContent::Leave(serde_json::from_value(content)?),
            CONNECT_TYPE => MessageContent::Connect(serde_json::from_value(content)?),
            ERROR_TYPE => MessageContent::Error(serde_json::from_value(content)?),
            other => {
                return Err(RoomError::message_content(format!(
                    "unknown message type {other}"
                )));
            }
        };
        Ok(content)
    }

    /// Types a client is allowed to push into the broker.
    pub fn is_client_sendable(type_name: &str) -> bool {
        matches!(
            type_name,
            BROADCAST_TYPE | MESSAGE_TYPE | PING_TYPE | UPDATE_ROOM_INFO_TYPE
        )
    }
}

/// The semantic unit crossing the client socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(flatten)]
    pub content: MessageContent,
    #[serde(rename = "createdAt", default)]
    pub created_at: i64,
    #[serde(rename = "requestId", default)]
    pub request_id: String,
}

impl Message {
    pub fn new(content: MessageContent) -> Self {
        Message {
            content,
            created_at: now_millis(),
            request_id: String::new(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.content.type_name()
    }

    pub fn new_start(room_address: Address) -> Message {
        Message::new(MessageContent::Start(StartOrCloseContent {
            room_address,
            reason: String::new(),
        }))
    }

    pub fn new_close(room_address: Address, reason: String) -> Message {
        Message::new(MessageContent::Close(StartOrCloseContent {
            room_address,
            reason,
        }))
    }

    pub fn new_join(connection: Connection) -> Message {
        Message::new(MessageContent::Join(JoinOrLeaveContent { connection }))
    }

    pub fn new_leave(connection: Connection) -> Message {
        Message::new(MessageContent::Leave(JoinOrLeaveContent { connection }))
    }

    pub fn new_connect(self_connection: Connection, room_connections: Vec<Connection>) -> Message {
        Message::new(MessageContent::Connect(ConnectContent {
            self_connection,
            room_connections,
        }))
    }

    pub fn new_ping(from: Address) -> Message {
        Message::new(MessageContent::Ping(PingContent { from }))
    }

    pub fn new_update_room_info(info: Info) -> Message {
        Message::new(MessageContent::UpdateRoomInfo(UpdateRoomInfoContent {
            info,
        }))
    }

    pub fn new_error(err: &RoomError) -> Message {
        Message::new(MessageContent::Error(ErrorContent {
            message: err.message.clone(),
            code: err.code.as_str().to_string(),
        }))
    }

    /// Pong reply mirroring the ping's request id.
    pub fn pong(&self) -> Message {
        Message {
            content: MessageContent::Pong(PongContent {}),
            created_at: now_millis(),
            request_id: self.request_id.clone(),
        }
    }
}

/// Socket frame as received: the type resolves the content shape lazily so a
/// bad payload can be answered with an `error` frame instead of a hangup.
#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(rename = "createdAt", default)]
    pub created_at: i64,
    #[serde(rename = "requestId", default)]
    pub request_id: String,
    #[serde(default)]
    pub content: serde_json::Value,
}

impl RawMessage {
    pub fn into_message(self) -> RoomResult<Message> {
        let content = MessageContent::from_parts(&self.type_name, self.content)?;
        Ok(Message {
            content,
            created_at: self.created_at,
            request_id: self.request_id,
        })
    }
}

// --- Package conversion ---

pub fn message_to_package(msg: &Message, from: Address) -> RoomResult<Package> {
    Ok(Package {
        from,
        created_at: msg.created_at,
        request_id: msg.request_id.clone(),
        routing_key: msg.type_name().to_string(),
        content: msg.content.payload()?,
    })
}

pub fn package_to_message(pkg: &Package) -> RoomResult<Message> {
    let content = MessageContent::from_parts(&pkg.routing_key, pkg.content.clone())?;
    Ok(Message {
        content,
        created_at: pkg.created_at,
        request_id: pkg.request_id.clone(),
    })
}
