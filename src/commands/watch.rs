use super::secs;
use crate::args::RestartMode;
use std::path::PathBuf;
use tm_supervisor::watcher::{HttpReset, InterruptAll};
use tm_supervisor::{ConfigWatcher, RestartAction};
use tracing::{debug, warn};

pub(crate) async fn cmd_watch(
    dir: PathBuf,
    dest: PathBuf,
    interval: f64,
    restart: RestartMode,
    control_url: &str,
) -> anyhow::Result<()> {
    debug!(dest = %dest.display(), "Destination path is not used");

    let action: Box<dyn RestartAction> = match restart {
        RestartMode::InterruptAll => {
            warn!("Restart mode interrupts every process on this host");
            Box::new(InterruptAll)
        }
        RestartMode::GentleReset => Box::new(HttpReset::gentle(control_url)),
        RestartMode::HardReset => Box::new(HttpReset::hard(control_url)),
    };

    ConfigWatcher::new(dir, action)
        .with_interval(secs(interval, "interval")?)
        .run()
        .await;
    Ok(())
}
