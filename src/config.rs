use serde::{Deserialize, Serialize};
use std::env;
use std::fs;

const CONFIG_FILE_NAME: &str = "config.json";

/// One cluster peer endpoint (internal RPC listener).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineAddress {
    pub ip: String,
    pub port: u16,
}

impl MachineAddress {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// Broker configuration, decoded from a JSON file with env overrides.
///
/// `machines` is the full cluster list (every instance's internal RPC
/// endpoint). An empty list means single-instance mode. `self_port`
/// disambiguates when several cluster entries share this host's IP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub machines: Vec<MachineAddress>,
    #[serde(default)]
    pub self_port: Option<u16>,
    #[serde(default = "default_max_rooms")]
    pub max_rooms: usize,
}

fn default_port() -> u16 {
    6752
}

fn default_max_rooms() -> usize {
    500
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: default_port(),
            machines: Vec::new(),
            self_port: None,
            max_rooms: default_max_rooms(),
        }
    }
}

impl Config {
    /// Load from `CONFIG_PATH` (default `config.json`). A missing file is
    /// not an error; the defaults describe a single-instance deployment.
    /// `PORT` overrides the public API port.
    pub fn load() -> Result<Config, String> {
        let path = env::var("CONFIG_PATH").unwrap_or_else(|_| CONFIG_FILE_NAME.to_string());
        let mut config = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str::<Config>(&raw)
                .map_err(|e| format!("decode {path} error: {e}"))?,
            Err(_) => {
                eprintln!("⚠️  config file {path} not found, using defaults (single-instance mode)");
                Config::default()
            }
        };

        if let Ok(val) = env::var("PORT")
            && let Ok(n) = val.parse::<u16>()
        {
            config.port = n;
        }
        if let Ok(val) = env::var("MAX_ROOMS")
            && let Ok(n) = val.parse::<usize>()
        {
            config.max_rooms = n;
        }

        Ok(config)
    }
}
