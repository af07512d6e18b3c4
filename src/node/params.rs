use crate::clienv;
use std::fmt;
use std::path::PathBuf;

const TCP: &str = "tcp://";
const LOCAL_ADDRESS: &str = "0.0.0.0";
const LOOPBACK: &str = "127.0.0.1";

pub const STARTING_ABCI_PORT: u16 = 26658;
pub const STARTING_RPC_PORT: u16 = 26657;
pub const STARTING_P2P_PORT: u16 = 26656;
/// Port stride between node instances on the same host.
const PORT_STRIDE: u16 = 10;

pub const DEFAULT_RPC_LISTEN_ADDRESS: &str = "tcp://0.0.0.0:26657";
pub const DEFAULT_P2P_LISTEN_ADDRESS: &str = "tcp://0.0.0.0:26656";
pub const DEFAULT_PROXY_APP: &str = "tcp://127.0.0.1:26658";

/// Configuration for one consensus node instance. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeParams {
    /// Consensus binary to invoke.
    pub binary: String,
    /// ABCI application address.
    pub proxy_app: String,
    pub rpc_laddr: String,
    pub p2p_laddr: String,
    pub p2p_seeds: Vec<String>,
    pub create_empty_blocks: bool,
    /// Use the gRPC ABCI transport instead of the socket one.
    pub use_grpc: bool,
    /// Run the node with `--log_level=debug`.
    pub debug: bool,
    pub home: Option<PathBuf>,
}

impl Default for NodeParams {
    fn default() -> Self {
        Self {
            binary: "tendermint".to_string(),
            proxy_app: DEFAULT_PROXY_APP.to_string(),
            rpc_laddr: DEFAULT_RPC_LISTEN_ADDRESS.to_string(),
            p2p_laddr: DEFAULT_P2P_LISTEN_ADDRESS.to_string(),
            p2p_seeds: Vec::new(),
            create_empty_blocks: true,
            use_grpc: false,
            debug: false,
            home: None,
        }
    }
}

impl NodeParams {
    /// Create params for a single node talking to `proxy_app`.
    pub fn new(proxy_app: impl Into<String>) -> Self {
        Self {
            proxy_app: proxy_app.into(),
            ..Default::default()
        }
    }

    /// Params for the `id`-th node on a host: every port is offset by `10 * id`.
    pub fn for_instance(id: u16) -> Self {
        let offset = id.saturating_mul(PORT_STRIDE);
        Self {
            proxy_app: format!("{TCP}{LOOPBACK}:{}", STARTING_ABCI_PORT.saturating_add(offset)),
            rpc_laddr: format!("{TCP}{LOCAL_ADDRESS}:{}", STARTING_RPC_PORT.saturating_add(offset)),
            p2p_laddr: format!("{TCP}{LOCAL_ADDRESS}:{}", STARTING_P2P_PORT.saturating_add(offset)),
            ..Default::default()
        }
    }

    /// Reads PROXY_APP, CREATE_EMPTY_BLOCKS, TMHOME, ID and friends from the environment.
    pub fn from_env() -> Self {
        let base = clienv::node_id()
            .map(Self::for_instance)
            .unwrap_or_default();

        Self {
            binary: clienv::tm_binary(),
            proxy_app: clienv::proxy_app().unwrap_or(base.proxy_app),
            p2p_seeds: clienv::p2p_seeds(),
            create_empty_blocks: clienv::create_empty_blocks(),
            use_grpc: clienv::use_grpc(),
            debug: clienv::tm_debug(),
            home: Some(clienv::tm_home()),
            ..base
        }
    }

    /// Set the consensus binary to execute.
    pub fn binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Set the home directory passed as `--home`.
    pub fn home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    /// Set the RPC listen address.
    pub fn rpc_laddr(mut self, addr: impl Into<String>) -> Self {
        self.rpc_laddr = addr.into();
        self
    }

    /// Set whether blocks are produced without transactions.
    pub fn create_empty_blocks(mut self, enabled: bool) -> Self {
        self.create_empty_blocks = enabled;
        self
    }

    /// Arguments for `<binary> init`.
    pub fn init_args(&self) -> Vec<String> {
        let mut args = vec!["init".to_string()];
        self.push_home(&mut args);
        args
    }

    /// Arguments for `<binary> node`.
    pub fn node_args(&self) -> Vec<String> {
        let mut args = vec![
            "node".to_string(),
            format!("--proxy_app={}", self.proxy_app),
            format!("--rpc.laddr={}", self.rpc_laddr),
            format!("--p2p.laddr={}", self.p2p_laddr),
            format!("--p2p.seeds={}", self.p2p_seeds.join(",")),
            format!("--consensus.create_empty_blocks={}", self.create_empty_blocks),
            format!("--abci={}", if self.use_grpc { "grpc" } else { "socket" }),
        ];
        if self.debug {
            args.push("--log_level=debug".to_string());
        }
        self.push_home(&mut args);
        args
    }

    /// Arguments for the unsafe full-state reset. `--home` goes first here.
    pub fn prune_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        self.push_home(&mut args);
        args.push("unsafe-reset-all".to_string());
        args
    }

    fn push_home(&self, args: &mut Vec<String>) {
        if let Some(ref home) = self.home {
            args.push("--home".to_string());
            args.push(home.display().to_string());
        }
    }

    /// HTTP base URL of the RPC listener, reachable from this host.
    pub fn rpc_http_url(&self) -> String {
        let addr = self.rpc_laddr.strip_prefix(TCP).unwrap_or(&self.rpc_laddr);
        let addr = addr.replace(LOCAL_ADDRESS, LOOPBACK);
        if addr.starts_with("http://") || addr.starts_with("https://") {
            addr
        } else {
            format!("http://{addr}")
        }
    }
}

impl fmt::Display for NodeParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NodeParams(proxy_app={}, rpc_laddr={}, p2p_laddr={}, p2p_seeds={:?}, create_empty_blocks={}, home={})",
            self.proxy_app,
            self.rpc_laddr,
            self.p2p_laddr,
            self.p2p_seeds,
            self.create_empty_blocks,
            self.home
                .as_ref()
                .map(|h| h.display().to_string())
                .unwrap_or_else(|| "-".to_string()),
        )
    }
}
