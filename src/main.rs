mod args;
mod commands;

use args::{Cli, Commands};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            listen,
            no_init,
            no_monitor,
            watch_config,
            watch_interval,
        } => {
            commands::serve::cmd_serve(commands::serve::ServeOptions {
                listen,
                init: !no_init,
                monitor: !no_monitor,
                watch_config,
                watch_interval,
            })
            .await?
        }
        Commands::Init => commands::node::cmd_init().await?,
        Commands::Prune => commands::node::cmd_prune().await?,
        Commands::Watch {
            dir,
            dest,
            interval,
            restart,
            control_url,
        } => commands::watch::cmd_watch(dir, dest, interval, restart, &control_url).await?,
        Commands::Health {
            url,
            max_retries,
            sleep_interval,
            timeout,
        } => commands::health::cmd_health(&url, max_retries, sleep_interval, timeout).await?,
    }

    Ok(())
}
