pub mod clienv;
pub mod error;
pub mod health;
pub mod http_server;
pub mod node;
pub mod watcher;

pub use error::{Result, SupervisorError};
pub use health::{HealthCheckResult, HealthChecker};
pub use http_server::{ControlServer, ControlServerConfig};
pub use node::{NodeParams, NodeSupervisor, SharedSupervisor};
pub use watcher::{ConfigWatcher, RestartAction};
