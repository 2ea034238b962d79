use crate::address::{Address, AddressManager};
use crate::errors::{RoomError, RoomResult};
use rocket::serde::json::Json;
use rocket::{State, post};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::time::{Duration, timeout};

pub const RPC_TIMEOUT_SECS: u64 = 5;

// --- Wire envelope ---

/// JSON-RPC style request: `{method, params:[req], id}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    pub params: Vec<serde_json::Value>,
    pub id: i64,
}

/// Transport reply: `{result, error, id}`. `error` carries transport and
/// dispatch failures; business errors ride inside `result` as the
/// `{code, message}` envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct RpcResult {
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub id: i64,
}

/// Every service response embeds an optional business error envelope.
pub trait RpcResponse: DeserializeOwned {
    fn rpc_error(&self) -> Option<&RoomError>;
}

/// Responses that can be accumulated across an all-peers fan-out.
pub trait Mergeable {
    fn merge(&mut self, other: Self);
}

// --- Service registry (server side) ---

type HandlerFuture = Pin<Box<dyn Future<Output = Result<serde_json::Value, String>> + Send>>;
type Handler = Box<dyn Fn(serde_json::Value) -> HandlerFuture + Send + Sync>;

/// Method table for the `/rpc` endpoint. Methods are registered once at
/// wiring time under `Service.Method` names.
pub struct RpcRegistry {
    handlers: RwLock<HashMap<String, Handler>>,
}

impl Default for RpcRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RpcRegistry {
    pub fn new() -> Self {
        RpcRegistry {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    pub fn register<Req, Res, F, Fut>(&self, method: &str, handler: F)
    where
        Req: DeserializeOwned + Send + 'static,
        Res: Serialize + 'static,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Res> + Send + 'static,
    {
        let name = method.to_string();
        let wrapped: Handler = Box::new(move |value| {
            let req = serde_json::from_value::<Req>(value);
            match req {
                Ok(req) => {
                    let fut = handler(req);
                    Box::pin(async move {
                        let res = fut.await;
                        serde_json::to_value(res).map_err(|e| e.to_string())
                    })
                }
                Err(e) => {
                    let msg = format!("decode request params error: {e}");
                    Box::pin(async move { Err(msg) })
                }
            }
        });
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name, wrapped);
    }

    /// Run a registered method under the request-scoped timeout.
    pub async fn dispatch(
        &self,
        method: &str,
        param: serde_json::Value,
    ) -> Result<serde_json::Value, String> {
        let fut = {
            let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
            let handler = handlers
                .get(method)
                .ok_or_else(|| format!("rpc method {method} not found"))?;
            handler(param)
        };

        match timeout(Duration::from_secs(RPC_TIMEOUT_SECS), fut).await {
            Ok(result) => result,
            Err(_) => Err(format!("rpc method {method} timed out")),
        }
    }
}

// --- /rpc route ---

#[post("/rpc", format = "json", data = "<body>")]
pub async fn rpc_endpoint(
    registry: &State<Arc<RpcRegistry>>,
    body: Json<RpcRequest>,
) -> Json<RpcResult> {
    let RpcRequest {
        method,
        mut params,
        id,
    } = body.into_inner();
    let param = if params.is_empty() {
        serde_json::Value::Null
    } else {
        params.remove(0)
    };

    match registry.dispatch(&method, param).await {
        Ok(result) => Json(RpcResult {
            result: Some(result),
            error: None,
            id,
        }),
        Err(e) => Json(RpcResult {
            result: None,
            error: Some(e),
            id,
        }),
    }
}

// --- Per-peer client ---

pub struct RpcClient {
    http: reqwest::Client,
    endpoint: String,
    next_id: AtomicI64,
}

impl RpcClient {
    pub fn new(endpoint: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(RPC_TIMEOUT_SECS))
            .build()
            .expect("failed to create rpc http client");
        RpcClient {
            http,
            endpoint,
            next_id: AtomicI64::new(0),
        }
    }

    pub async fn call<Req, Res>(&self, method: &str, req: &Req) -> RoomResult<Res>
    where
        Req: Serialize,
        Res: RpcResponse,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let body = RpcRequest {
            method: method.to_string(),
            params: vec![serde_json::to_value(req)?],
            id,
        };

        let resp = self
            .http
            .post(format!("http://{}/rpc", self.endpoint))
            .json(&body)
            .send()
            .await?;
        let result: RpcResult = resp.json().await?;

        if let Some(err) = result.error {
            return Err(RoomError::unknown(err));
        }

        let res: Res = serde_json::from_value(result.result.unwrap_or(serde_json::Value::Null))?;
        if let Some(err) = res.rpc_error() {
            return Err(err.clone());
        }

        Ok(res)
    }
}

// --- Mesh ---

/// Peer table plus the local service registry. Calls addressed to the self
/// machine id short-circuit through the registry on the same JSON path, so
/// single-instance deployments never touch the network.
pub struct RpcManager {
    addresses: Arc<AddressManager>,
    clients: HashMap<String, RpcClient>,
    registry: Arc<RpcRegistry>,
}

impl RpcManager {
    pub fn new(addresses: Arc<AddressManager>) -> Self {
        let mut clients = HashMap::new();
        for (machine_id, peer) in addresses.peers() {
            clients.insert(machine_id.clone(), RpcClient::new(peer.endpoint()));
        }
        RpcManager {
            addresses,
            clients,
            registry: Arc::new(RpcRegistry::new()),
        }
    }

    pub fn registry(&self) -> Arc<RpcRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn register<Req, Res, F, Fut>(&self, method: &str, handler: F)
    where
        Req: DeserializeOwned + Send + 'static,
        Res: Serialize + 'static,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Res> + Send + 'static,
    {
        self.registry.register(method, handler);
    }

    pub async fn call<Req, Res>(&self, machine_id: &str, method: &str, req: &Req) -> RoomResult<Res>
    where
        Req: Serialize,
        Res: RpcResponse,
    {
        if machine_id == self.addresses.machine_id() {
            let param = serde_json::to_value(req)?;
            let result = self
                .registry
                .dispatch(method, param)
                .await
                .map_err(RoomError::unknown)?;
            let res: Res = serde_json::from_value(result)?;
            if let Some(err) = res.rpc_error() {
                return Err(err.clone());
            }
            return Ok(res);
        }

        let client = self.clients.get(machine_id).ok_or_else(|| {
            RoomError::unknown(format!("no rpc client for machine {machine_id}"))
        })?;
        client.call(method, req).await
    }

    pub async fn call_by_address<Req, Res>(
        &self,
        address: &Address,
        method: &str,
        req: &Req,
    ) -> RoomResult<Res>
    where
        Req: Serialize,
        Res: RpcResponse,
    {
        self.call(&address.machine_id, method, req).await
    }

    /// Invoke every peer (self included) in stable machine-id order and fold
    /// the responses together. The first failing peer aborts the fan-out.
    pub async fn call_all<Req, Res>(&self, method: &str, req: &Req) -> RoomResult<Res>
    where
        Req: Serialize,
        Res: RpcResponse + Mergeable + Default,
    {
        let mut merged = Res::default();
        for machine_id in self.addresses.peers().keys() {
            let res: Res = self.call(machine_id, method, req).await?;
            merged.merge(res);
        }
        Ok(merged)
    }
}
