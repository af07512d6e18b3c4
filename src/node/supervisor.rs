use super::monitor::OutputMonitor;
use super::params::NodeParams;
use crate::error::{Result, SupervisorError};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Supervisor shared between the control server, the output monitor and the
/// config watcher. Every composite operation holds the lock end to end.
pub type SharedSupervisor = Arc<Mutex<NodeSupervisor>>;

/// Ownership record of a live node process and the group it leads.
///
/// The process is spawned as the leader of its own group, so the group id
/// equals its pid and signalling the group reaches everything it forked.
pub struct NodeHandle {
    child: Option<Child>,
    pid: u32,
    pgid: i32,
    started_at: Instant,
    released: bool,
}

impl NodeHandle {
    fn new(child: Child) -> Option<Self> {
        let pid = child.id()?;
        Some(Self {
            child: Some(child),
            pid,
            pgid: pid as i32,
            started_at: Instant::now(),
            released: false,
        })
    }

    /// Process id of the group leader.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Process group id; equal to the pid.
    pub fn pgid(&self) -> i32 {
        self.pgid
    }

    /// Seconds since the process was spawned.
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Exit status of the group leader if it has already exited.
    fn exit_status(&mut self) -> Option<std::process::ExitStatus> {
        let child = self.child.as_mut()?;
        match child.try_wait() {
            Ok(status) => status,
            Err(e) => {
                warn!("Failed to poll node process {}: {}", self.pid, e);
                None
            }
        }
    }

    /// Sends SIGTERM to the whole group and gives up ownership.
    ///
    /// Exit is not awaited here; the child is reaped by a detached task.
    pub fn terminate(mut self) -> Result<()> {
        self.released = true;
        self.signal_group()
    }

    #[cfg(unix)]
    fn signal_group(&mut self) -> Result<()> {
        // SAFETY: killpg has no memory-safety preconditions.
        let rc = unsafe { libc::killpg(self.pgid, libc::SIGTERM) };
        if rc == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            debug!("Process group {} already gone", self.pgid);
            return Ok(());
        }
        Err(SupervisorError::Signal {
            pgid: self.pgid,
            source: err,
        })
    }

    #[cfg(not(unix))]
    fn signal_group(&mut self) -> Result<()> {
        if let Some(ref mut child) = self.child {
            child.start_kill()?;
        }
        Ok(())
    }
}

impl Drop for NodeHandle {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            if let Err(e) = self.signal_group() {
                warn!("Failed to release node process group on drop: {}", e);
            }
        }
        if let Some(child) = self.child.take() {
            reap(child);
        }
    }
}

fn reap(mut child: Child) {
    if let Ok(rt) = tokio::runtime::Handle::try_current() {
        rt.spawn(async move {
            match child.wait().await {
                Ok(status) => debug!("Node process exited: {}", status),
                Err(e) => debug!("Failed to reap node process: {}", e),
            }
        });
    }
}

/// Owns at most one consensus node process.
pub struct NodeSupervisor {
    params: NodeParams,
    handle: Option<NodeHandle>,
    monitor: Option<OutputMonitor>,
}

impl NodeSupervisor {
    /// Create a supervisor that owns no process yet.
    pub fn new(params: NodeParams) -> Self {
        Self {
            params,
            handle: None,
            monitor: None,
        }
    }

    /// Relay node output through the given monitor on every start.
    pub fn with_monitor(mut self, monitor: OutputMonitor) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Wrap for sharing between the control server and watchers.
    pub fn into_shared(self) -> SharedSupervisor {
        Arc::new(Mutex::new(self))
    }

    /// Parameters every start is launched with.
    pub fn params(&self) -> &NodeParams {
        &self.params
    }

    /// Whether a live node process is owned. A process that exited on its
    /// own is dropped here, releasing whatever is left of its group.
    pub fn is_running(&mut self) -> bool {
        self.forget_exited();
        self.handle.is_some()
    }

    fn forget_exited(&mut self) {
        let Some(handle) = self.handle.as_mut() else {
            return;
        };
        if let Some(status) = handle.exit_status() {
            warn!("Node process {} exited on its own: {}", handle.pid(), status);
            self.handle = None;
        }
    }

    /// Pid of the owned process, if any.
    pub fn pid(&self) -> Option<u32> {
        self.handle.as_ref().map(NodeHandle::pid)
    }

    /// Uptime of the owned process, if any.
    pub fn uptime_secs(&self) -> Option<u64> {
        self.handle.as_ref().map(NodeHandle::uptime_secs)
    }

    /// Runs `<binary> init`, writing identity and config files into the home directory.
    pub async fn init(&self) -> Result<()> {
        info!("Initializing node home");
        self.run_to_completion(self.params.init_args()).await
    }

    /// Launches the node in its own process group. No-op if one is already owned.
    pub async fn start(&mut self) -> Result<()> {
        self.forget_exited();
        if self.handle.is_some() {
            debug!("Node already running, start is a no-op");
            return Ok(());
        }

        let args = self.params.node_args();
        let mut cmd = Command::new(&self.params.binary);
        cmd.args(&args);

        #[cfg(unix)]
        cmd.process_group(0);

        if self.monitor.is_some() {
            cmd.stdout(Stdio::piped());
            cmd.stderr(Stdio::piped());
        } else {
            cmd.stdout(Stdio::inherit());
            cmd.stderr(Stdio::inherit());
        }

        let mut child = cmd.spawn().map_err(|e| SupervisorError::Spawn {
            command: self.describe(&args),
            source: e,
        })?;

        if let Some(ref monitor) = self.monitor {
            monitor.attach(&mut child);
        }

        let handle = NodeHandle::new(child).ok_or_else(|| SupervisorError::Spawn {
            command: self.describe(&args),
            source: std::io::Error::other("process exited before its pid was read"),
        })?;

        info!("Node process started with PID {}", handle.pid());
        self.handle = Some(handle);
        Ok(())
    }

    /// Signals the node's process group with SIGTERM. No-op if nothing is owned.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            debug!("Node not running, stop is a no-op");
            return Ok(());
        };

        let pid = handle.pid();
        handle.terminate()?;
        info!("Node process {} stopped", pid);
        Ok(())
    }

    /// Stop followed by start; on-disk state is untouched.
    pub async fn restart(&mut self) -> Result<()> {
        self.stop().await?;
        self.start().await
    }

    /// Runs the unsafe full-state reset. Only meaningful while stopped.
    pub async fn prune_blocks(&self) -> Result<()> {
        if self.handle.is_some() {
            warn!("Pruning blocks while the node process is still owned");
        }
        info!("Pruning node state");
        self.run_to_completion(self.params.prune_args()).await
    }

    async fn run_to_completion(&self, args: Vec<String>) -> Result<()> {
        let command = self.describe(&args);
        debug!("Running {}", command);

        let output = Command::new(&self.params.binary)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| SupervisorError::Spawn {
                command: command.clone(),
                source: e,
            })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stderr.lines() {
            debug!(target: "tendermint", "{}", line);
        }
        Err(SupervisorError::CommandFailed {
            command,
            code: output.status.code(),
        })
    }

    fn describe(&self, args: &[String]) -> String {
        format!("{} {}", self.params.binary, args.join(" "))
    }
}


#[cfg(all(test, unix))]
mod tests {
    use super::test_support::*;
    use super::*;
    use std::time::Duration;

    async fn wait_for_exit(pid: u32) -> bool {
        for _ in 0..50 {
            if !process_alive(pid) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        false
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut supervisor = NodeSupervisor::new(fake_params(dir.path()));

        assert!(!supervisor.is_running());
        supervisor.stop().await.unwrap();
        assert!(!supervisor.is_running());

        supervisor.start().await.unwrap();
        let pid = supervisor.pid().unwrap();
        supervisor.start().await.unwrap();
        assert_eq!(supervisor.pid(), Some(pid));

        supervisor.stop().await.unwrap();
        assert!(!supervisor.is_running());
        supervisor.stop().await.unwrap();
        assert!(wait_for_exit(pid).await);
    }

    #[tokio::test]
    async fn handle_tracks_start_stop_balance() {
        let dir = tempfile::tempdir().unwrap();
        let mut supervisor = NodeSupervisor::new(fake_params(dir.path()));

        // (is_start, expected running afterwards)
        let sequence = [
            (true, true),
            (true, true),
            (false, false),
            (false, false),
            (true, true),
            (false, false),
        ];
        for (is_start, expected) in sequence {
            if is_start {
                supervisor.start().await.unwrap();
            } else {
                supervisor.stop().await.unwrap();
            }
            assert_eq!(supervisor.is_running(), expected);
        }
    }

    #[tokio::test]
    async fn init_then_prune_wipes_data() {
        let dir = tempfile::tempdir().unwrap();
        let params = fake_params(dir.path());
        let home = params.home.clone().unwrap();
        let supervisor = NodeSupervisor::new(params);

        supervisor.init().await.unwrap();
        assert!(home.join("data/marker").exists());

        // a second init is rejected by the binary
        let err = supervisor.init().await.unwrap_err();
        assert!(matches!(err, SupervisorError::CommandFailed { code: Some(1), .. }));

        supervisor.prune_blocks().await.unwrap();
        assert!(!home.join("data/marker").exists());
        assert!(home.join("data").is_dir());
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let mut supervisor =
            NodeSupervisor::new(NodeParams::default().binary("/nonexistent/tendermint"));

        let err = supervisor.start().await.unwrap_err();
        assert!(matches!(err, SupervisorError::Spawn { .. }));
        assert!(!supervisor.is_running());

        let err = supervisor.init().await.unwrap_err();
        assert!(matches!(err, SupervisorError::Spawn { .. }));
    }

    #[tokio::test]
    async fn crashed_node_is_forgotten_and_restartable() {
        let dir = tempfile::tempdir().unwrap();
        let mut supervisor = NodeSupervisor::new(fake_params(dir.path()));
        supervisor.start().await.unwrap();
        let pid = supervisor.pid().unwrap();

        // SAFETY: plain signal delivery to our own child.
        assert_eq!(unsafe { libc::kill(pid as i32, libc::SIGKILL) }, 0);

        let mut gone = false;
        for _ in 0..50 {
            if !supervisor.is_running() {
                gone = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(gone, "exited node still reported as running");
        assert_eq!(supervisor.pid(), None);

        supervisor.start().await.unwrap();
        let new_pid = supervisor.pid().unwrap();
        assert_ne!(new_pid, pid);
        assert!(process_alive(new_pid));
        supervisor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn dropping_supervisor_releases_group() {
        let dir = tempfile::tempdir().unwrap();
        let mut supervisor = NodeSupervisor::new(fake_params(dir.path()));
        supervisor.start().await.unwrap();
        let pid = supervisor.pid().unwrap();

        drop(supervisor);
        assert!(wait_for_exit(pid).await);
    }
}
