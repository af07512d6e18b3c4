use super::secs;
use anyhow::Context;
use std::path::PathBuf;
use tm_supervisor::clienv;
use tm_supervisor::node::{handle_restart_requests, NodeHome, OutputMonitor, PeriodDumper};
use tm_supervisor::watcher::SupervisorRestart;
use tm_supervisor::{
    ConfigWatcher, ControlServer, ControlServerConfig, NodeParams, NodeSupervisor, SupervisorError,
};
use tracing::{info, warn};

pub(crate) struct ServeOptions {
    pub listen: Option<String>,
    pub init: bool,
    pub monitor: bool,
    pub watch_config: Option<PathBuf>,
    pub watch_interval: f64,
}

pub(crate) async fn cmd_serve(opts: ServeOptions) -> anyhow::Result<()> {
    let params = NodeParams::from_env();
    info!("{}", params);
    let home = params.home.clone().map(NodeHome::new);

    let (monitor, restart_rx) = OutputMonitor::channel();
    let mut supervisor = NodeSupervisor::new(params);
    if opts.monitor {
        supervisor = supervisor.with_monitor(monitor);
    }

    if opts.init {
        match supervisor.init().await {
            Ok(()) => {}
            // some binaries refuse to init an existing home
            Err(e @ SupervisorError::CommandFailed { .. }) => {
                warn!("Node init failed, continuing with existing home: {}", e)
            }
            Err(e) => return Err(e).context("Failed to initialize node home"),
        }
    }

    if let Some(ref home) = home {
        if let Err(e) = home.apply_config_overrides() {
            warn!("Failed to apply config.toml overrides: {}", e);
        }
    }

    let dumper = if clienv::dev_mode() {
        Some(
            PeriodDumper::new(clienv::dump_dir(), clienv::node_id())
                .context("Failed to prepare dump directory")?,
        )
    } else {
        None
    };

    supervisor.start().await.context("Failed to start node")?;
    let supervisor = supervisor.into_shared();

    if opts.monitor {
        tokio::spawn(handle_restart_requests(supervisor.clone(), restart_rx));
    }

    if let Some(dir) = opts.watch_config {
        let watcher = ConfigWatcher::new(dir, Box::new(SupervisorRestart::new(supervisor.clone())))
            .with_interval(secs(opts.watch_interval, "watch-interval")?);
        tokio::spawn(watcher.run());
    }

    let config = ControlServerConfig {
        listen: opts.listen.unwrap_or_else(clienv::control_addr),
    };
    let mut server = ControlServer::new(config, supervisor.clone());
    if let Some(home) = home {
        server = server.with_home(home);
    }
    if let Some(dumper) = dumper {
        server = server.with_dumper(dumper);
    }

    let served = server.run(shutdown_signal()).await;

    info!("Stopping node...");
    if let Err(e) = supervisor.lock().await.stop().await {
        warn!("Failed to stop node: {}", e);
    }
    served
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (Ok(mut sigterm), Ok(mut sigint)) = (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) else {
            warn!("Failed to install signal handlers, falling back to Ctrl+C");
            tokio::signal::ctrl_c().await.ok();
            return;
        };
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C");
    }
}
