use crate::address::{Address, AddressManager};
use crate::errors::{RoomError, RoomResult};
use crate::rpc::{RpcManager, RpcResponse};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Opaque routed envelope crossing the emitter. `routingKey` names the
/// message type, `content` the serialized variant payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    pub from: Address,
    pub created_at: i64,
    pub request_id: String,
    pub routing_key: String,
    pub content: serde_json::Value,
}

/// Delivery capability registered under an address. Implementations own
/// their mailbox; `listen` must bound its own wait and drop on overflow.
#[async_trait]
pub trait Listener: Send + Sync {
    async fn listen(&self, pkg: Package);
    fn is_closed(&self) -> bool;
}

/// Address-keyed listener registry with a transparent cross-instance
/// overlay: local addresses deliver in-process, remote ones ride the RPC
/// mesh into the owning peer's local emitter.
pub struct EventEmitter {
    listeners: RwLock<HashMap<String, Vec<Arc<dyn Listener>>>>,
    addresses: Arc<AddressManager>,
    rpc: Arc<RpcManager>,
}

impl EventEmitter {
    pub fn new(addresses: Arc<AddressManager>, rpc: Arc<RpcManager>) -> Arc<EventEmitter> {
        Arc::new(EventEmitter {
            listeners: RwLock::new(HashMap::new()),
            addresses,
            rpc,
        })
    }

    pub fn listen(&self, address: &Address, listener: Arc<dyn Listener>) {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let list = listeners.entry(address.id.clone()).or_default();
        if !list.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            list.push(listener);
        }
    }

    pub fn remove_listener(&self, address: &Address, listener: &Arc<dyn Listener>) {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        if let Some(list) = listeners.get_mut(&address.id) {
            list.retain(|l| !Arc::ptr_eq(l, listener));
            if list.is_empty() {
                listeners.remove(&address.id);
            }
        }
    }

    fn snapshot(&self, address: &Address) -> Vec<Arc<dyn Listener>> {
        let listeners = self.listeners.read().unwrap_or_else(|e| e.into_inner());
        listeners.get(&address.id).cloned().unwrap_or_default()
    }

    pub async fn emit(&self, address: &Address, pkg: Package) -> RoomResult<()> {
        if self.addresses.is_local(address) {
            self.emit_local(address, pkg).await
        } else {
            self.emit_remote(address, pkg).await
        }
    }

    /// Deliver to every live listener under the address. Closed listeners
    /// are pruned lazily here rather than eagerly at close time.
    pub async fn emit_local(&self, address: &Address, pkg: Package) -> RoomResult<()> {
        let list = self.snapshot(address);
        if list.is_empty() {
            return Err(RoomError::unknown(format!(
                "emit package has no listeners for {}",
                address.id
            )));
        }

        let mut stale = Vec::new();
        for listener in list {
            if listener.is_closed() {
                stale.push(listener);
            } else {
                listener.listen(pkg.clone()).await;
            }
        }
        for listener in stale {
            self.remove_listener(address, &listener);
        }

        Ok(())
    }

    async fn emit_remote(&self, address: &Address, pkg: Package) -> RoomResult<()> {
        let req = RpcEmitRequest {
            address: address.clone(),
            package: pkg,
        };
        let _res: RpcEmitResponse = self
            .rpc
            .call_by_address(address, "RpcEventEmitter.Emit", &req)
            .await?;
        Ok(())
    }
}

// --- RpcEventEmitter service ---

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcEmitRequest {
    pub address: Address,
    pub package: Package,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RpcEmitResponse {
    #[serde(default)]
    pub error: Option<RoomError>,
}

impl RpcResponse for RpcEmitResponse {
    fn rpc_error(&self) -> Option<&RoomError> {
        self.error.as_ref()
    }
}

/// Expose `emit_local` to the mesh so peers can deliver into this instance.
pub fn register_rpc_event_emitter(emitter: &Arc<EventEmitter>, rpc: &RpcManager) {
    let target = Arc::clone(emitter);
    rpc.register("RpcEventEmitter.Emit", move |req: RpcEmitRequest| {
        let target = Arc::clone(&target);
        async move {
            match target.emit_local(&req.address, req.package).await {
                Ok(()) => RpcEmitResponse { error: None },
                Err(err) => RpcEmitResponse { error: Some(err) },
            }
        }
    });
}
