//! Maintenance of files inside the node home directory.

use crate::error::{Result, SupervisorError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Textual overrides applied to `config.toml` after `init`.
pub const CONFIG_OVERRIDES: &[(&str, &str)] = &[
    ("fast_sync = true", "fast_sync = false"),
    ("max_num_outbound_peers = 10", "max_num_outbound_peers = 0"),
    ("pex = true", "pex = false"),
];

/// Replacement for loopback peer hostnames; peers on the same machine run in
/// sibling containers.
pub const DOCKER_INTERNAL_HOST: &str = "host.docker.internal";

const DEFAULT_INITIAL_HEIGHT: &str = "1";

#[derive(Debug, Clone)]
pub struct NodeHome {
    root: PathBuf,
}

/// Body of `POST /params`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ParamsUpdate {
    pub genesis_config: GenesisConfig,
    pub validators: Vec<Validator>,
    #[serde(default)]
    pub external_address: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenesisConfig {
    pub genesis_time: String,
    pub chain_id: String,
    pub consensus_params: Value,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Validator {
    pub address: String,
    pub pub_key: Value,
    pub power: Value,
    pub name: String,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub peer_id: Option<String>,
    #[serde(default)]
    pub p2p_port: Option<u16>,
}

impl NodeHome {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_toml(&self) -> PathBuf {
        self.root.join("config").join("config.toml")
    }

    pub fn genesis_json(&self) -> PathBuf {
        self.root.join("config").join("genesis.json")
    }

    pub fn priv_validator_key(&self) -> PathBuf {
        self.root.join("config").join("priv_validator_key.json")
    }

    pub fn apply_config_overrides(&self) -> Result<()> {
        let path = self.config_toml();
        let mut config = fs::read_to_string(&path)?;
        for (old, new) in CONFIG_OVERRIDES {
            config = config.replace(old, new);
        }
        fs::write(&path, config)?;
        debug!(path = %path.display(), "Applied config.toml overrides");
        Ok(())
    }

    pub fn load_genesis(&self) -> Result<Value> {
        let content = fs::read_to_string(self.genesis_json())?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Current genesis time, used when a hard reset does not supply one.
    pub fn default_genesis_time(&self) -> Result<String> {
        self.load_genesis()?
            .get("genesis_time")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| SupervisorError::Genesis("genesis_time missing".to_string()))
    }

    /// Rewrites `genesis_time` and `initial_height`, keeping every other key.
    pub fn reset_genesis(&self, genesis_time: &str, initial_height: Option<&str>) -> Result<()> {
        let mut genesis = self.load_genesis()?;
        let obj = genesis
            .as_object_mut()
            .ok_or_else(|| SupervisorError::Genesis("genesis is not an object".to_string()))?;
        obj.insert("genesis_time".into(), json!(genesis_time));
        obj.insert(
            "initial_height".into(),
            json!(initial_height.unwrap_or(DEFAULT_INITIAL_HEIGHT)),
        );
        self.write_genesis(&genesis)?;
        info!(genesis_time, "Genesis reset");
        Ok(())
    }

    /// Replaces the genesis file with one built from `update`.
    pub fn update_genesis(&self, update: &ParamsUpdate) -> Result<()> {
        let validators: Vec<Value> = update
            .validators
            .iter()
            .map(|v| {
                json!({
                    "address": v.address,
                    "pub_key": v.pub_key,
                    "power": v.power,
                    "name": v.name,
                })
            })
            .collect();

        let mut genesis = Map::new();
        genesis.insert("genesis_time".into(), json!(update.genesis_config.genesis_time));
        genesis.insert("chain_id".into(), json!(update.genesis_config.chain_id));
        genesis.insert("initial_height".into(), json!("0"));
        genesis.insert(
            "consensus_params".into(),
            update.genesis_config.consensus_params.clone(),
        );
        genesis.insert("validators".into(), Value::Array(validators));
        genesis.insert("app_hash".into(), json!(""));

        self.write_genesis(&Value::Object(genesis))
    }

    fn write_genesis(&self, genesis: &Value) -> Result<()> {
        fs::write(self.genesis_json(), serde_json::to_string_pretty(genesis)?)?;
        Ok(())
    }

    /// Rewrites `persistent_peers` from validators that carry peer info.
    pub fn update_peers(&self, validators: &[Validator]) -> Result<()> {
        let peers: Vec<String> = validators
            .iter()
            .filter_map(|v| {
                let peer_id = v.peer_id.as_deref()?;
                let hostname = v.hostname.as_deref()?;
                let port = v.p2p_port?;
                let hostname = match hostname {
                    "localhost" | "0.0.0.0" => DOCKER_INTERNAL_HOST,
                    other => other,
                };
                Some(format!("{peer_id}@{hostname}:{port}"))
            })
            .collect();

        self.replace_config_key("persistent_peers", &peers.join(","))
    }

    pub fn update_external_address(&self, external_address: &str) -> Result<()> {
        self.replace_config_key("external_address", external_address)
    }

    /// Replaces the first `key = "..."` line in `config.toml`.
    fn replace_config_key(&self, key: &str, value: &str) -> Result<()> {
        let path = self.config_toml();
        let content = fs::read_to_string(&path)?;
        let prefix = format!("{key} = \"");
        let mut replaced = false;
        let mut out = String::with_capacity(content.len());
        for line in content.split_inclusive('\n') {
            if !replaced && line.starts_with(&prefix) {
                out.push_str(&format!("{key} = \"{value}\"\n"));
                replaced = true;
            } else {
                out.push_str(line);
            }
        }
        if !replaced {
            return Err(SupervisorError::Config(format!(
                "`{key}` not found in {}",
                path.display()
            )));
        }
        fs::write(&path, out)?;
        Ok(())
    }

    /// Validator key material with the private key removed.
    pub fn validator_params(&self) -> Result<Value> {
        let content = fs::read_to_string(self.priv_validator_key())?;
        let mut key: Value = serde_json::from_str(&content)?;
        if let Some(obj) = key.as_object_mut() {
            obj.remove("priv_key");
        }
        Ok(key)
    }
}
