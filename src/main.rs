use anyhow::Result;
use clap::{Parser, Subcommand};
use crypto_report::{
    commands::{analyze, once, run},
    config::{ConfigOverrides, ReportConfig},
};
use log::{info, warn};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "crypto-report")]
#[command(about = "Keeps a spreadsheet report of the top cryptocurrency markets up to date")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Markets endpoint to query
    #[arg(long, global = true, value_name = "URL")]
    api_url: Option<String>,
    /// Quote currency for prices, caps and volumes
    #[arg(long, global = true, value_name = "CODE")]
    vs_currency: Option<String>,
    /// Number of markets to fetch per cycle (1-250)
    #[arg(long, global = true)]
    page_size: Option<u32>,
    /// Result page to fetch
    #[arg(long, global = true)]
    page: Option<u32>,
    /// Destination workbook
    #[arg(short, long = "output", global = true, value_name = "PATH")]
    output: Option<PathBuf>,
    /// Seconds to wait between cycles
    #[arg(long, global = true, value_name = "SECS")]
    interval_secs: Option<u64>,
    /// HTTP request timeout in seconds
    #[arg(long, global = true, value_name = "SECS")]
    timeout_secs: Option<u64>,
    /// How many markets to list in the market cap summary
    #[arg(long = "top", global = true, value_name = "N")]
    top_n: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, analyze and write the report on a fixed interval until interrupted
    Run {
        /// Stop after this many cycles
        #[arg(long)]
        cycles: Option<u64>,
    },
    /// Run a single cycle and exit
    Once,
    /// Fetch and print the market summary without writing a report
    Analyze,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            api_url: self.api_url.clone(),
            vs_currency: self.vs_currency.clone(),
            page_size: self.page_size,
            page: self.page,
            output_path: self.output.clone(),
            interval_secs: self.interval_secs,
            http_timeout_secs: self.timeout_secs,
            top_n: self.top_n,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let dotenv = dotenvy::dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(err) = dotenv {
        if !err.not_found() {
            warn!("Ignoring unreadable .env file: {err}");
        }
    }

    let config = ReportConfig::from_env()?.apply_overrides(cli.overrides())?;
    info!("Starting crypto-report. Market data is informational only.");

    match cli.command.unwrap_or(Commands::Run { cycles: None }) {
        Commands::Run { cycles } => run::run(&config, cycles).await?,
        Commands::Once => once::run(&config).await?,
        Commands::Analyze => analyze::run(&config).await?,
    }

    Ok(())
}
