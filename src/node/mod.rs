//! Consensus node process management
//!
//! Owns one external node process and the files in its home directory:
//! - Process lifecycle (init, start, stop, prune)
//! - Output relay with restart on dropped connections
//! - Genesis and `config.toml` maintenance
//! - Period dumps of the home directory in dev mode

pub mod dumper;
pub mod home;
pub mod monitor;
pub mod params;
pub mod supervisor;

pub use dumper::PeriodDumper;
pub use home::NodeHome;
pub use monitor::{handle_restart_requests, OutputMonitor, RestartRequest};
pub use params::NodeParams;
pub use supervisor::{NodeHandle, NodeSupervisor, SharedSupervisor};
