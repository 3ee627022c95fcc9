//! Job queue coordinator process.
//!
//! Reads one inbound message per line on stdin, applies it to the shared
//! store and writes outbound messages (job assignments) one per line on
//! stdout. Logs go to stderr as JSON.

mod config;
mod serve;

use actors::{Dispatcher, start_coordinator};
use db::RedisStore;
use queue_core::Clock;
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

use crate::config::Settings;
use crate::serve::serve;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let settings = Settings::from_env();
    tracing::info!(
        "Starting job queue coordinator (namespace {:?}, tick {}ms)",
        settings.namespace,
        settings.queue.tick_interval_ms
    );
    let template = settings.load_template()?;

    let store = RedisStore::connect(settings.store.clone()).await?;
    let handle = start_coordinator(store.clone(), settings.queue.clone(), Clock::System).await?;
    let dispatcher =
        Dispatcher::new(handle.client(), &settings.namespace).with_config(settings.queue.clone());

    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let served = serve(
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        &dispatcher,
        template.as_ref(),
        interrupt,
    )
    .await;

    handle.shutdown().await;
    store.close().await;
    tracing::info!("Job queue coordinator stopped");

    served?;
    Ok(())
}
