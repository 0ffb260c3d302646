//! The `scaleway-provider` plugin binary.
//!
//! Without arguments it serves the plugin protocol. `sweep [prefix]`
//! deletes leftover acceptance-test resources in the default zone and
//! region instead.

use scaleway_provider::config::{ConfigSources, ProviderConfig};
use scaleway_provider::sweeper::{SweepLocalities, TEST_PREFIX};
use scaleway_provider::{init_logging, serve, ProviderError, ProviderService, ScalewayProvider};
use serde_json::Value;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), ProviderError> {
    init_logging();

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        None => serve(ScalewayProvider::new()).await,
        Some("sweep") => {
            let prefix = args.next().unwrap_or_else(|| TEST_PREFIX.to_string());
            sweep(&prefix).await
        },
        Some(other) => Err(ProviderError::Validation(format!(
            "unknown command {:?}, expected no arguments or `sweep [prefix]`",
            other
        ))),
    }
}

async fn sweep(prefix: &str) -> Result<(), ProviderError> {
    let provider = ScalewayProvider::new();
    let diagnostics = provider.configure(Value::Null).await?;
    if !diagnostics.is_empty() {
        for diagnostic in &diagnostics {
            error!(summary = %diagnostic.summary, detail = ?diagnostic.detail, "configuration");
        }
        return Err(ProviderError::from_diagnostics(&diagnostics));
    }

    let config = ProviderConfig::from_value(&Value::Null, &ConfigSources::system())
        .map_err(|d| ProviderError::from_diagnostics(&d))?;
    match provider.sweep(&SweepLocalities::from_config(&config), prefix).await {
        Ok(summary) => {
            info!(deleted = summary.deleted.len(), skipped = summary.skipped, "sweep done");
            Ok(())
        },
        Err(err) => {
            if let Some(summary) = err.sweep_summary() {
                error!(deleted = summary.deleted.len(), skipped = summary.skipped, "sweep incomplete");
            }
            Err(err)
        },
    }
}
