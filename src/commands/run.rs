use crate::commands::shutdown_on_ctrl_c;
use crate::config::ReportConfig;
use crate::http_client::build_async_client;
use crate::market_api::MarketApiClient;
use crate::scheduler::Scheduler;
use anyhow::Result;
use log::info;

pub async fn run(config: &ReportConfig, max_cycles: Option<u64>) -> Result<()> {
    let http = build_async_client(Some(config.http_timeout))?;
    let client = MarketApiClient::new(http, config);
    info!(
        "Reporting top {} markets in {} from {}",
        config.page_size,
        config.vs_currency.to_uppercase(),
        client.api_url()
    );

    let scheduler = Scheduler::new(client, config).with_max_cycles(max_cycles);
    scheduler.run(shutdown_on_ctrl_c()).await;
    Ok(())
}
