//! Node output relay.
//!
//! Every stdout/stderr line of the node is re-emitted through `tracing` under
//! the `tendermint` target. Lines signalling a dropped RPC or ABCI connection
//! request a gentle restart of the process that printed them.

use super::supervisor::SharedSupervisor;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Output lines after which the node is restarted.
pub const RESTART_TRIGGERS: &[&str] = &[
    // connection lost on the node side
    "RPC HTTP server stopped",
    // connection lost on the application side
    "Stopping abci.socketClient for error: read message: EOF",
];

/// A restart requested by the process with the given pid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartRequest {
    pub pid: u32,
}

pub type RestartRx = mpsc::UnboundedReceiver<RestartRequest>;

#[derive(Clone)]
pub struct OutputMonitor {
    restart_tx: mpsc::UnboundedSender<RestartRequest>,
}

impl OutputMonitor {
    pub fn channel() -> (Self, RestartRx) {
        let (restart_tx, restart_rx) = mpsc::unbounded_channel();
        (Self { restart_tx }, restart_rx)
    }

    /// Takes the child's piped stdout/stderr and spawns a reader task for each.
    pub fn attach(&self, child: &mut Child) {
        let Some(pid) = child.id() else {
            return;
        };
        if let Some(stdout) = child.stdout.take() {
            self.spawn_reader(pid, stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            self.spawn_reader(pid, stderr);
        }
    }

    fn spawn_reader<R>(&self, pid: u32, stream: R)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let tx = self.restart_tx.clone();
        tokio::spawn(async move {
            // the node's pipe must be drained until EOF; closing it early
            // gets the node killed by SIGPIPE on its next write
            let mut reader = BufReader::new(stream);
            let mut buf = Vec::new();
            let mut forward = true;
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(pid, "Failed to read node output: {}", e);
                        break;
                    }
                }
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                debug!(target: "tendermint", pid, "{}", line);
                if forward && is_restart_trigger(line) && tx.send(RestartRequest { pid }).is_err() {
                    forward = false;
                }
            }
        });
    }
}

pub fn is_restart_trigger(line: &str) -> bool {
    RESTART_TRIGGERS.iter().any(|trigger| line.contains(trigger))
}

/// Consumes restart requests until every monitor is dropped.
///
/// Requests from a pid that is no longer the owned process are ignored, so a
/// node printing several trigger lines while dying restarts once.
pub async fn handle_restart_requests(supervisor: SharedSupervisor, mut rx: RestartRx) {
    while let Some(request) = rx.recv().await {
        let mut node = supervisor.lock().await;
        if node.pid() != Some(request.pid) {
            debug!("Ignoring restart request from stale PID {}", request.pid);
            continue;
        }
        info!("Connection dropped, restarting node (PID {})", request.pid);
        if let Err(e) = node.restart().await {
            error!("Failed to restart node after dropped connection: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_detection() {
        assert!(is_restart_trigger(
            "I[2022-01-01] RPC HTTP server stopped module=rpc-server"
        ));
        assert!(is_restart_trigger(
            "E Stopping abci.socketClient for error: read message: EOF module=abci-client connection=consensus"
        ));
        assert!(!is_restart_trigger("I Executed block height=10"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn invalid_utf8_output_keeps_node_alive_and_monitored() {
        use crate::node::supervisor::test_support::{process_alive, write_script};
        use crate::node::{NodeParams, NodeSupervisor};
        use std::time::Duration;

        let dir = tempfile::tempdir().unwrap();
        let binary = write_script(
            dir.path(),
            "noisy-node",
            "#!/bin/sh\nprintf 'height \\377 ok\\n'\necho 'RPC HTTP server stopped'\nwhile true; do echo tick; sleep 0.1; done\n",
        );
        let (monitor, mut rx) = OutputMonitor::channel();
        let mut supervisor =
            NodeSupervisor::new(NodeParams::default().binary(binary.display().to_string()))
                .with_monitor(monitor);
        supervisor.start().await.unwrap();
        let pid = supervisor.pid().unwrap();

        let request = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no restart request after a non-UTF-8 line")
            .unwrap();
        assert_eq!(request, RestartRequest { pid });

        // the node keeps writing; a closed pipe would kill it
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(process_alive(pid));
        assert!(supervisor.is_running());

        supervisor.stop().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn trigger_restarts_current_process_once() {
        use crate::node::supervisor::test_support::fake_params;
        use crate::node::NodeSupervisor;

        let dir = tempfile::tempdir().unwrap();
        let (monitor, rx) = OutputMonitor::channel();
        let supervisor = NodeSupervisor::new(fake_params(dir.path()))
            .with_monitor(monitor.clone())
            .into_shared();
        supervisor.lock().await.start().await.unwrap();
        let first_pid = supervisor.lock().await.pid().unwrap();

        let consumer = tokio::spawn(handle_restart_requests(supervisor.clone(), rx));

        monitor.restart_tx.send(RestartRequest { pid: first_pid }).unwrap();
        monitor.restart_tx.send(RestartRequest { pid: first_pid }).unwrap();
        drop(monitor);

        let mut second_pid = None;
        for _ in 0..50 {
            let pid = supervisor.lock().await.pid();
            if pid.is_some() && pid != Some(first_pid) {
                second_pid = pid;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        let second_pid = second_pid.expect("node was not restarted");

        // the stale duplicate must not cause another restart
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert_eq!(supervisor.lock().await.pid(), Some(second_pid));

        supervisor.lock().await.stop().await.unwrap();
        consumer.abort();
    }
}
