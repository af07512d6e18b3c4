use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tmsup")]
#[command(version)]
#[command(about = "Supervisor and control plane for a Tendermint node", long_about = None)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Start the node and serve the HTTP control API
    Serve {
        /// Address to listen on (default: $TM_CONTROL_ADDR or 0.0.0.0:8080)
        #[arg(short, long)]
        listen: Option<String>,

        /// Skip `init` before the first start
        #[arg(long)]
        no_init: bool,

        /// Do not relay node output or restart on dropped connections
        #[arg(long)]
        no_monitor: bool,

        /// Also watch this directory and restart the node when it changes
        #[arg(long)]
        watch_config: Option<PathBuf>,

        /// Poll interval for --watch-config, in seconds
        #[arg(long, default_value = "1")]
        watch_interval: f64,
    },

    /// Initialize the node home directory
    Init,

    /// Wipe the node's blocks and state (node must be stopped)
    Prune,

    /// Watch a config directory and force a restart on change
    Watch {
        /// Directory to monitor
        #[arg(short, long, default_value = "/configs")]
        dir: PathBuf,

        /// Destination directory (accepted for compatibility, unused)
        #[arg(long, default_value = "/home/ubuntu/packages")]
        dest: PathBuf,

        /// Poll interval in seconds
        #[arg(short, long, default_value = "1")]
        interval: f64,

        /// How to restart when a change is detected
        #[arg(long, value_enum, default_value_t = RestartMode::InterruptAll)]
        restart: RestartMode,

        /// Control server URL for the gentle-reset and hard-reset modes
        #[arg(long, default_value = "http://localhost:8080")]
        control_url: String,
    },

    /// Wait until a node answers 200 on <url>/health
    Health {
        /// Node RPC URL (e.g. http://localhost:26657)
        url: String,

        #[arg(long, default_value = "5")]
        max_retries: u32,

        /// Seconds between attempts
        #[arg(long, default_value = "1")]
        sleep_interval: f64,

        /// Per-request timeout in seconds
        #[arg(long, default_value = "3")]
        timeout: f64,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum RestartMode {
    /// SIGINT every process on the host except the watcher
    InterruptAll,
    /// GET <control-url>/gentle_reset
    GentleReset,
    /// GET <control-url>/hard_reset
    HardReset,
}
