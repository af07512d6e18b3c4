use std::path::PathBuf;

/// Environment variables consumed by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvVar {
    ProxyApp,
    CreateEmptyBlocks,
    TmHome,
    NodeId,
    UseGrpc,
    TmBinary,
    TmDebug,
    P2pSeeds,
    DevMode,
    TmDumpDir,
    TmControlAddr,
}

impl EnvVar {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProxyApp => "PROXY_APP",
            Self::CreateEmptyBlocks => "CREATE_EMPTY_BLOCKS",
            Self::TmHome => "TMHOME",
            Self::NodeId => "ID",
            Self::UseGrpc => "USE_GRPC",
            Self::TmBinary => "TM_BINARY",
            Self::TmDebug => "TM_DEBUG",
            Self::P2pSeeds => "P2P_SEEDS",
            Self::DevMode => "DEV_MODE",
            Self::TmDumpDir => "TM_DUMP_DIR",
            Self::TmControlAddr => "TM_CONTROL_ADDR",
        }
    }
}

const FALLBACK_HOME_DIR: &str = "~";
const TENDERMINT_SUBDIR: &str = ".tendermint";
const DEFAULT_BINARY: &str = "tendermint";
const DEFAULT_DUMP_DIR: &str = "/tm_state";
const DEFAULT_CONTROL_ADDR: &str = "0.0.0.0:8080";

/// Non-empty value of an environment variable.
pub fn env_opt(var: EnvVar) -> Option<String> {
    std::env::var(var.as_str()).ok().filter(|v| !v.is_empty())
}

/// Boolean flag: only the exact string `"true"` enables it. An empty value
/// is set (and false); `default` applies only when the variable is absent.
fn env_flag(var: EnvVar, default: bool) -> bool {
    parse_flag(std::env::var(var.as_str()).ok().as_deref(), default)
}

fn parse_flag(raw: Option<&str>, default: bool) -> bool {
    match raw {
        Some(v) => v == "true",
        None => default,
    }
}

/// Proxy application (ABCI) address ($PROXY_APP)
pub fn proxy_app() -> Option<String> {
    let val = env_opt(EnvVar::ProxyApp);
    tracing::trace!(value = ?val, "PROXY_APP env var");
    val
}

/// Whether the node creates empty blocks ($CREATE_EMPTY_BLOCKS, default true)
pub fn create_empty_blocks() -> bool {
    env_flag(EnvVar::CreateEmptyBlocks, true)
}

/// Node home directory ($TMHOME or ~/.tendermint)
pub fn tm_home() -> PathBuf {
    let dir = env_opt(EnvVar::TmHome)
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from(FALLBACK_HOME_DIR))
                .join(TENDERMINT_SUBDIR)
        });
    tracing::trace!(dir = %dir.display(), "Resolved node home directory");
    dir
}

/// Numeric node identity ($ID)
pub fn node_id() -> Option<u16> {
    let val = env_opt(EnvVar::NodeId).and_then(|v| match v.trim().parse() {
        Ok(id) => Some(id),
        Err(_) => {
            tracing::warn!(value = %v, "Ignoring non-numeric ID env var");
            None
        }
    });
    tracing::trace!(value = ?val, "ID env var");
    val
}

/// gRPC ABCI transport ($USE_GRPC)
pub fn use_grpc() -> bool {
    env_flag(EnvVar::UseGrpc, false)
}

/// Consensus binary ($TM_BINARY or `tendermint` on PATH)
pub fn tm_binary() -> String {
    env_opt(EnvVar::TmBinary).unwrap_or_else(|| DEFAULT_BINARY.to_string())
}

/// Debug log level for the node ($TM_DEBUG)
pub fn tm_debug() -> bool {
    env_flag(EnvVar::TmDebug, false)
}

/// Comma-separated persistent seeds ($P2P_SEEDS)
pub fn p2p_seeds() -> Vec<String> {
    env_opt(EnvVar::P2pSeeds)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

/// Dev mode enables period dumps on hard reset ($DEV_MODE == "1")
pub fn dev_mode() -> bool {
    env_opt(EnvVar::DevMode).as_deref() == Some("1")
}

/// Where period dumps go ($TM_DUMP_DIR or /tm_state)
pub fn dump_dir() -> PathBuf {
    env_opt(EnvVar::TmDumpDir)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DUMP_DIR))
}

/// Control server listen address ($TM_CONTROL_ADDR or 0.0.0.0:8080)
pub fn control_addr() -> String {
    env_opt(EnvVar::TmControlAddr).unwrap_or_else(|| DEFAULT_CONTROL_ADDR.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_var_names() {
        assert_eq!(EnvVar::TmHome.as_str(), "TMHOME");
        assert_eq!(EnvVar::NodeId.as_str(), "ID");
        assert_eq!(EnvVar::CreateEmptyBlocks.as_str(), "CREATE_EMPTY_BLOCKS");
    }

    #[test]
    fn flags_match_exact_true_only() {
        assert!(parse_flag(Some("true"), false));
        assert!(!parse_flag(Some("True"), true));
        assert!(!parse_flag(Some("TRUE"), true));
        assert!(!parse_flag(Some(""), true));
        assert!(!parse_flag(Some("1"), true));
        assert!(parse_flag(None, true));
        assert!(!parse_flag(None, false));
    }
}
