use crate::config::{Config, MachineAddress};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::net::TcpListener;

pub const LOCAL_MACHINE_ID: &str = "local";

/// Globally unique routing address: `{localId}.{machineId}`.
///
/// `machineId` names the owning instance, `localId` is a fresh v4 token.
/// Equality is by the composed `id`; the string form round-trips losslessly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    pub id: String,
    pub local_id: String,
    pub machine_id: String,
}

impl Address {
    pub fn new(local_id: String, machine_id: String) -> Self {
        Address {
            id: format!("{local_id}.{machine_id}"),
            local_id,
            machine_id,
        }
    }

    /// Parse `X.Y` back into an address. Anything else is rejected.
    pub fn parse(id: &str) -> Result<Address, String> {
        let mut parts = id.split('.');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(local), Some(machine), None) if !local.is_empty() && !machine.is_empty() => {
                Ok(Address {
                    id: id.to_string(),
                    local_id: local.to_string(),
                    machine_id: machine.to_string(),
                })
            }
            _ => Err(format!("address id {id} is an invalid format")),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

// Wire form is the bare id string.
impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.id)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let id = String::deserialize(deserializer)?;
        Address::parse(&id).map_err(D::Error::custom)
    }
}

/// Instance registry: derives this process's stable machine id from the
/// sorted cluster list and mints routable addresses.
#[derive(Debug)]
pub struct AddressManager {
    machine_id: String,
    machines: BTreeMap<String, MachineAddress>,
}

impl AddressManager {
    /// Build from config, resolving the local IP from the host interfaces.
    pub fn new(config: &Config) -> Result<AddressManager, String> {
        if config.machines.is_empty() {
            return Self::local_mode();
        }

        let local_ip = local_ip_address::local_ip()
            .map_err(|e| format!("resolve local ip error: {e}"))?
            .to_string();
        Self::from_cluster(&config.machines, &local_ip, config.self_port)
    }

    /// Deterministic machine ids: sort entries by `ip:port` ascending and
    /// label them A0, A1, … The entry matching the local IP (and the
    /// configured self port, if any) is this instance; a local IP absent
    /// from the list is a configuration error.
    pub fn from_cluster(
        machines: &[MachineAddress],
        local_ip: &str,
        self_port: Option<u16>,
    ) -> Result<AddressManager, String> {
        let mut sorted: Vec<MachineAddress> = machines.to_vec();
        sorted.sort_by_key(|m| m.endpoint());

        let mut table = BTreeMap::new();
        let mut machine_id = None;
        for (i, m) in sorted.iter().enumerate() {
            let id = format!("A{i}");
            if m.ip == local_ip && self_port.map(|p| p == m.port).unwrap_or(true) {
                machine_id.get_or_insert(id.clone());
            }
            table.insert(id, m.clone());
        }

        match machine_id {
            Some(machine_id) => Ok(AddressManager {
                machine_id,
                machines: table,
            }),
            None => Err(format!(
                "local ip {local_ip} is not in the configured machine list"
            )),
        }
    }

    /// Single-instance mode: machine id `local`, RPC on a random free port.
    pub fn local_mode() -> Result<AddressManager, String> {
        let port = available_port(5)?;
        let mut machines = BTreeMap::new();
        machines.insert(
            LOCAL_MACHINE_ID.to_string(),
            MachineAddress {
                ip: "127.0.0.1".to_string(),
                port,
            },
        );
        Ok(AddressManager {
            machine_id: LOCAL_MACHINE_ID.to_string(),
            machines,
        })
    }

    pub fn generate_address(&self) -> Address {
        Address::new(uuid::Uuid::new_v4().to_string(), self.machine_id.clone())
    }

    pub fn is_local(&self, address: &Address) -> bool {
        address.machine_id == self.machine_id
    }

    pub fn machine_id(&self) -> &str {
        &self.machine_id
    }

    /// All cluster peers (self included), keyed by machine id. BTreeMap so
    /// iteration order is stable for fan-out calls.
    pub fn peers(&self) -> &BTreeMap<String, MachineAddress> {
        &self.machines
    }

    pub fn peer(&self, machine_id: &str) -> Option<&MachineAddress> {
        self.machines.get(machine_id)
    }

    pub fn self_endpoint(&self) -> &MachineAddress {
        // The self machine id always resolves; it came from the same table.
        &self.machines[&self.machine_id]
    }
}

fn available_port(tries: u32) -> Result<u16, String> {
    if tries == 0 {
        return Err("get available port tried more times than the limit".to_string());
    }

    let min = 1024u32;
    let max = 65535u32;
    let span = max - min;
    let pick = min + (uuid::Uuid::new_v4().as_u128() % span as u128) as u32;
    let port = pick as u16;

    match TcpListener::bind(("127.0.0.1", port)) {
        Ok(_) => Ok(port),
        Err(_) => available_port(tries - 1),
    }
}
