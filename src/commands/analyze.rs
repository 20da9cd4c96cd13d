use crate::analysis;
use crate::config::ReportConfig;
use crate::http_client::build_async_client;
use crate::market_api::MarketApiClient;
use anyhow::Result;
use log::{error, info, warn};

/// Fetches one snapshot and logs the summary without writing a report.
pub async fn run(config: &ReportConfig) -> Result<()> {
    let http = build_async_client(Some(config.http_timeout))?;
    let client = MarketApiClient::new(http, config);

    let snapshot = match client.fetch().await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            error!("Error fetching data: {}", err);
            return Ok(());
        }
    };
    if snapshot.is_empty() {
        warn!("No data fetched; nothing to analyze");
        return Ok(());
    }

    let result = analysis::analyze(&snapshot, config.top_n)?;
    for line in result.summary_lines() {
        info!("{}", line);
    }
    Ok(())
}
