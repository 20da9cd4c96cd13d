use crate::config::ReportConfig;
use crate::http_client::build_async_client;
use crate::market_api::MarketApiClient;
use crate::scheduler::{CycleOutcome, Scheduler};
use anyhow::Result;
use log::{info, warn};

pub async fn run(config: &ReportConfig) -> Result<()> {
    let http = build_async_client(Some(config.http_timeout))?;
    let scheduler = Scheduler::new(MarketApiClient::new(http, config), config);

    match scheduler.run_cycle().await {
        CycleOutcome::Written => info!("Report updated at {}", config.output_path.display()),
        outcome => warn!(
            "Single cycle finished without updating {} ({:?})",
            config.output_path.display(),
            outcome
        ),
    }
    Ok(())
}
