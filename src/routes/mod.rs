// Public HTTP surface: the room endpoints plus the success/error envelope
// shared with the socket layer. The WebSocket serve loop lives in socket.rs.

pub mod socket;

use crate::Broker;
use crate::errors::{RoomError, RoomResult};
use crate::metric;
use crate::models::Info;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};
use rocket::serde::json::Json;
use rocket::{State, get, post};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Uniform response envelope: HTTP 200 with `code="success"`, HTTP 400 with
/// `code="error"` and the typed error code in `message`.
#[derive(Debug, serde::Serialize)]
pub struct ApiResponse {
    pub code: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub message: String,
}

impl ApiResponse {
    pub fn success(data: impl serde::Serialize) -> Json<ApiResponse> {
        Json(ApiResponse {
            code: "success".to_string(),
            success: true,
            data: serde_json::to_value(data).ok(),
            message: String::new(),
        })
    }

    pub fn error(err: &RoomError) -> (Status, Json<ApiResponse>) {
        (
            Status::BadRequest,
            Json(ApiResponse {
                code: "error".to_string(),
                success: false,
                data: None,
                message: err.to_string(),
            }),
        )
    }
}

pub type ApiResult = Result<Json<ApiResponse>, (Status, Json<ApiResponse>)>;

fn reply(result: RoomResult<impl serde::Serialize>) -> ApiResult {
    match result {
        Ok(data) => Ok(ApiResponse::success(data)),
        Err(err) => Err(ApiResponse::error(&err)),
    }
}

// --- Tag query extraction ---

/// Reserved query keys that never become room tags.
const RESERVED_KEYS: &[&str] = &[
    "name",
    "group",
    "address",
    "secret",
    "useSecret",
    "forceCreate",
    "userId",
];

/// Collects every non-reserved query pair as a room tag, so callers can
/// attach and filter by arbitrary labels.
pub struct TagQuery(pub HashMap<String, String>);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for TagQuery {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let mut tags = HashMap::new();
        for field in req.query_fields() {
            let key = field.name.to_string();
            if RESERVED_KEYS.contains(&key.as_str()) {
                continue;
            }
            tags.insert(key, field.value.to_string());
        }
        Outcome::Success(TagQuery(tags))
    }
}

// --- Health ---

#[get("/api/v1/health")]
pub fn health(broker: &State<Arc<Broker>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "tunnel-broker",
        "machineId": broker.addresses.machine_id(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

// --- Rooms ---

#[derive(Debug, Default, Deserialize)]
pub struct CreateRoomBody {
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default, rename = "useSecret")]
    pub use_secret: Option<bool>,
}

#[post("/api/v1/room/create?<name>&<group>", data = "<body>")]
pub async fn create_room(
    broker: &State<Arc<Broker>>,
    name: Option<&str>,
    group: Option<&str>,
    tags: TagQuery,
    body: Option<Json<CreateRoomBody>>,
) -> ApiResult {
    let name = name.unwrap_or_default().trim();
    let group = group.unwrap_or_default().trim();
    if name.is_empty() || group.is_empty() {
        return Err(ApiResponse::error(&RoomError::client(
            "name and group parameters are required",
        )));
    }

    let body = body.map(|b| b.into_inner()).unwrap_or_default();
    let address = broker.addresses.generate_address();
    let mut info = Info::new(name.to_string(), group.to_string(), address);
    info.tags = tags.0;
    info.secret = body.secret.unwrap_or_default();
    info.use_secret = body.use_secret.unwrap_or(false);

    let created = broker.cluster.create_local_room(info).await;
    if created.is_ok() {
        metric::count("tunnel_room", &[("action", "create"), ("code", "success")], 1.0);
        println!("🚪 created room in group {group}");
    }
    reply(created)
}

#[get("/api/v1/room/list")]
pub async fn list_rooms(broker: &State<Arc<Broker>>, tags: TagQuery) -> ApiResult {
    reply(broker.cluster.list_rooms(tags.0).await)
}

/// Admission probe: 200 when the address exists and the secret matches.
#[get("/api/v1/room/check?<address>&<secret>")]
pub async fn check_room(
    broker: &State<Arc<Broker>>,
    address: Option<&str>,
    secret: Option<&str>,
) -> ApiResult {
    let address = match address.map(crate::address::Address::parse) {
        Some(Ok(a)) => a,
        _ => {
            return Err(ApiResponse::error(&RoomError::client(
                "address parameter is missing or malformed",
            )));
        }
    };

    let probe = Info::new(String::new(), String::new(), address);
    let room = match broker.cluster.get_room(&probe).await {
        Ok(room) => room,
        Err(err) => return Err(ApiResponse::error(&err)),
    };

    if room.use_secret && room.secret != secret.unwrap_or_default() {
        return Err(ApiResponse::error(&RoomError::client("secret mismatch")));
    }

    reply(Ok(true))
}

// --- Catchers ---

#[rocket::catch(404)]
pub fn not_found() -> Json<serde_json::Value> {
    Json(serde_json::json!({"code": "error", "success": false, "message": "Not found"}))
}
