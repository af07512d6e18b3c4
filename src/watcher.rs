//! Config directory watcher
//!
//! Polls a directory, fingerprints the content of every file directly inside
//! it and fires a [`RestartAction`] once per poll cycle in which the
//! fingerprint differs from the previous one. There is no debounce: a single
//! changed byte and a rewritten directory both cause exactly one restart.

use crate::error::Result;
use crate::http_server::ResetResponse;
use crate::node::SharedSupervisor;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Concatenated per-file SHA-256 digests, in file-name order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprints the regular files directly inside `dir` (no recursion).
pub async fn fingerprint_dir(dir: &Path) -> Result<Fingerprint> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();

    let mut fingerprint = String::with_capacity(files.len() * 64);
    for path in files {
        let content = tokio::fs::read(&path).await?;
        fingerprint.push_str(&hex::encode(Sha256::digest(&content)));
    }
    Ok(Fingerprint(fingerprint))
}

/// What the watcher does when the configuration changes.
#[async_trait]
pub trait RestartAction: Send + Sync {
    fn name(&self) -> &'static str;

    async fn restart(&self) -> Result<()>;
}

/// Sends SIGINT to every process on the host except the watcher itself.
///
/// This is a host-wide broadcast, not a restart of one tracked node. It only
/// makes sense inside a container where the node is the other tenant.
pub struct InterruptAll;

#[async_trait]
impl RestartAction for InterruptAll {
    fn name(&self) -> &'static str {
        "interrupt-all"
    }

    async fn restart(&self) -> Result<()> {
        let own_pid = std::process::id();
        let signalled = tokio::task::spawn_blocking(move || {
            let mut system = sysinfo::System::new();
            system.refresh_processes();
            let mut signalled = 0usize;
            for (pid, process) in system.processes() {
                if pid.as_u32() == own_pid {
                    continue;
                }
                if process.kill_with(sysinfo::Signal::Interrupt) == Some(true) {
                    signalled += 1;
                }
            }
            signalled
        })
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))?;

        info!("Sent SIGINT to {} processes", signalled);
        Ok(())
    }
}

/// Stop + start on the supervisor owned by this process.
pub struct SupervisorRestart {
    supervisor: SharedSupervisor,
}

impl SupervisorRestart {
    pub fn new(supervisor: SharedSupervisor) -> Self {
        Self { supervisor }
    }
}

#[async_trait]
impl RestartAction for SupervisorRestart {
    fn name(&self) -> &'static str {
        "supervisor"
    }

    async fn restart(&self) -> Result<()> {
        self.supervisor.lock().await.restart().await
    }
}

/// Asks a remote control server to reset its node.
pub struct HttpReset {
    client: reqwest::Client,
    url: String,
}

impl HttpReset {
    pub fn gentle(control_url: &str) -> Self {
        Self::with_path(control_url, "gentle_reset")
    }

    pub fn hard(control_url: &str) -> Self {
        Self::with_path(control_url, "hard_reset")
    }

    fn with_path(control_url: &str, path: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("{}/{}", control_url.trim_end_matches('/'), path),
        }
    }
}

#[async_trait]
impl RestartAction for HttpReset {
    fn name(&self) -> &'static str {
        "http-reset"
    }

    async fn restart(&self) -> Result<()> {
        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            warn!("Control server not yet available ({})", response.status());
            return Ok(());
        }
        let body: ResetResponse = response.json().await?;
        if !body.status {
            warn!("Remote reset reported failure: {}", body.message);
        }
        Ok(())
    }
}

pub struct ConfigWatcher {
    dir: PathBuf,
    interval: Duration,
    action: Box<dyn RestartAction>,
    last: Option<Fingerprint>,
}

impl ConfigWatcher {
    pub fn new(dir: impl Into<PathBuf>, action: Box<dyn RestartAction>) -> Self {
        Self {
            dir: dir.into(),
            interval: DEFAULT_POLL_INTERVAL,
            action,
            last: None,
        }
    }

    /// Set the poll interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Fingerprint seen by the last poll.
    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        self.last.as_ref()
    }

    /// Records the starting fingerprint without firing.
    pub async fn prime(&mut self) -> Result<()> {
        self.last = Some(fingerprint_dir(&self.dir).await?);
        Ok(())
    }

    /// One poll cycle. Returns whether a change was detected.
    pub async fn poll_once(&mut self) -> Result<bool> {
        let current = fingerprint_dir(&self.dir).await?;
        if self.last.as_ref() == Some(&current) {
            return Ok(false);
        }
        if self.last.is_none() {
            self.last = Some(current);
            return Ok(false);
        }

        info!("New configuration detected in {}", self.dir.display());
        // the new fingerprint is recorded even if the restart fails, so a
        // single change never fires twice
        self.last = Some(current);
        if let Err(e) = self.action.restart().await {
            error!("Restart via {} failed: {}", self.action.name(), e);
        }
        Ok(true)
    }

    /// Polls forever.
    pub async fn run(mut self) {
        info!(
            "Watching {} every {:?} (restart: {})",
            self.dir.display(),
            self.interval,
            self.action.name()
        );
        if let Err(e) = self.prime().await {
            warn!("Failed to fingerprint {}: {}", self.dir.display(), e);
        }

        loop {
            tokio::time::sleep(self.interval).await;
            match self.poll_once().await {
                Ok(changed) => debug!(changed, "Config poll"),
                Err(e) => warn!("Failed to fingerprint {}: {}", self.dir.display(), e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct CountingRestart(Arc<AtomicU32>);

    #[async_trait]
    impl RestartAction for CountingRestart {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn restart(&self) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn config_dir(files: usize) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..files {
            std::fs::write(dir.path().join(format!("file{i}.yaml")), format!("value: {i}\n")).unwrap();
        }
        dir
    }

    fn counting_watcher(dir: &Path) -> (ConfigWatcher, Arc<AtomicU32>) {
        let count = Arc::new(AtomicU32::new(0));
        let watcher = ConfigWatcher::new(dir, Box::new(CountingRestart(Arc::clone(&count))));
        (watcher, count)
    }

    fn flip_first_byte(path: &Path) {
        let mut content = std::fs::read(path).unwrap();
        content[0] ^= 0x01;
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn fingerprint_is_per_file_digest_concatenation() {
        let dir = config_dir(3);
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/ignored"), "x").unwrap();

        let fingerprint = fingerprint_dir(dir.path()).await.unwrap();
        assert_eq!(fingerprint.as_str().len(), 3 * 64);

        let first = hex::encode(Sha256::digest(b"value: 0\n"));
        assert!(fingerprint.as_str().starts_with(&first));

        // nested content does not participate
        std::fs::write(dir.path().join("nested/ignored"), "y").unwrap();
        assert_eq!(fingerprint_dir(dir.path()).await.unwrap(), fingerprint);
    }

    #[tokio::test]
    async fn untouched_directory_never_restarts() {
        let dir = config_dir(4);
        let (mut watcher, count) = counting_watcher(dir.path());
        watcher.prime().await.unwrap();

        for _ in 0..5 {
            assert!(!watcher.poll_once().await.unwrap());
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn one_byte_change_restarts_exactly_once() {
        let dir = config_dir(4);
        let (mut watcher, count) = counting_watcher(dir.path());
        watcher.prime().await.unwrap();
        let before = watcher.fingerprint().cloned().unwrap();

        flip_first_byte(&dir.path().join("file2.yaml"));

        assert!(watcher.poll_once().await.unwrap());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_ne!(watcher.fingerprint(), Some(&before));

        assert!(!watcher.poll_once().await.unwrap());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn added_and_removed_files_count_as_changes() {
        let dir = config_dir(2);
        let (mut watcher, count) = counting_watcher(dir.path());
        watcher.prime().await.unwrap();

        std::fs::write(dir.path().join("extra.yaml"), "x: 1\n").unwrap();
        assert!(watcher.poll_once().await.unwrap());
        std::fs::remove_file(dir.path().join("file0.yaml")).unwrap();
        assert!(watcher.poll_once().await.unwrap());
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn run_loop_detects_within_interval() {
        let dir = config_dir(2);
        let (watcher, count) = counting_watcher(dir.path());
        let task = tokio::spawn(watcher.with_interval(Duration::from_millis(50)).run());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        flip_first_byte(&dir.path().join("file1.yaml"));
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        task.abort();
    }

    #[tokio::test]
    async fn http_reset_hits_control_server() {
        use axum::{routing::get, Json, Router};

        let hits = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&hits);
        let app = Router::new().route(
            "/hard_reset",
            get(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Json(ResetResponse::success())
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        HttpReset::hard(&format!("http://{addr}/"))
            .restart()
            .await
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn supervisor_restart_replaces_process() {
        use crate::node::supervisor::test_support::fake_params;
        use crate::node::NodeSupervisor;

        let dir = tempfile::tempdir().unwrap();
        let supervisor = NodeSupervisor::new(fake_params(dir.path())).into_shared();
        supervisor.lock().await.start().await.unwrap();
        let before = supervisor.lock().await.pid();

        SupervisorRestart::new(supervisor.clone())
            .restart()
            .await
            .unwrap();

        let after = supervisor.lock().await.pid();
        assert!(after.is_some());
        assert_ne!(before, after);
        supervisor.lock().await.stop().await.unwrap();
    }
}
