//! Process wiring: configuration, logging, signal handling and the
//! standalone binary entry point, which reads ingestion lines from stdin.

mod service;
mod shutdown;

pub use service::{Service, ServiceError};
pub use shutdown::shutdown_token;

use crate::config::Config;
use crate::domain::TagCatalog;
use crate::source::{self, SampleHandle};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const INGEST_CHANNEL_CAPACITY: usize = 1024;

/// Install the global subscriber. `RUST_LOG` overrides the configured
/// level when set.
pub fn init_logging(config: &Config) {
    let level: tracing::Level = config.log_level.into();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Read ingestion lines from stdin and feed them into the pipeline until
/// EOF. Unparseable lines are logged and skipped.
async fn feed_from_stdin(catalog: TagCatalog, handle: SampleHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("Input stream ended");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read input stream");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match source::parse_sample(&catalog, &line) {
            Ok(sample) => {
                if handle.send(sample).await.is_err() {
                    return;
                }
            }
            Err(e) => warn!(error = %e, "Dropping unparseable input line"),
        }
    }
}

pub async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    init_logging(&config);
    info!(
        version = crate::VERSION,
        protocol = ?config.protocol,
        server = %config.server_url,
        "Historian forwarder starting"
    );

    let cancel = shutdown_token();
    let (handle, source) = source::channel(INGEST_CHANNEL_CAPACITY);
    let service = Service::new(config, source)?;

    tokio::spawn(feed_from_stdin(service.catalog().clone(), handle));

    service.run(cancel).await?;
    Ok(())
}
