use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://api.coingecko.com/api/v3/coins/markets";
pub const DEFAULT_VS_CURRENCY: &str = "usd";
pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_OUTPUT_PATH: &str = "crypto_data.xlsx";
pub const DEFAULT_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_TOP_N: usize = 5;

/// Largest page the markets endpoint will serve.
pub const MAX_PAGE_SIZE: u32 = 250;

const SETTING_PREFIX: &str = "REPORT_";

pub const API_URL_KEY: &str = "REPORT_API_URL";
pub const VS_CURRENCY_KEY: &str = "REPORT_VS_CURRENCY";
pub const PAGE_SIZE_KEY: &str = "REPORT_PAGE_SIZE";
pub const PAGE_KEY: &str = "REPORT_PAGE";
pub const OUTPUT_PATH_KEY: &str = "REPORT_OUTPUT_PATH";
pub const INTERVAL_SECS_KEY: &str = "REPORT_INTERVAL_SECS";
pub const HTTP_TIMEOUT_SECS_KEY: &str = "REPORT_HTTP_TIMEOUT_SECS";
pub const TOP_N_KEY: &str = "REPORT_TOP_N";

/// Runtime configuration shared by the fetcher, the report writer and the
/// scheduler. Built once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportConfig {
    pub api_url: String,
    pub vs_currency: String,
    pub page_size: u32,
    pub page: u32,
    pub output_path: PathBuf,
    pub interval: Duration,
    pub http_timeout: Duration,
    pub top_n: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            vs_currency: DEFAULT_VS_CURRENCY.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            page: DEFAULT_PAGE,
            output_path: PathBuf::from(DEFAULT_OUTPUT_PATH),
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            top_n: DEFAULT_TOP_N,
        }
    }
}

/// Values given on the command line. `None` falls through to the
/// environment, then to the defaults.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub api_url: Option<String>,
    pub vs_currency: Option<String>,
    pub page_size: Option<u32>,
    pub page: Option<u32>,
    pub output_path: Option<PathBuf>,
    pub interval_secs: Option<u64>,
    pub http_timeout_secs: Option<u64>,
    pub top_n: Option<usize>,
}

impl ReportConfig {
    pub fn from_env() -> Result<Self> {
        let settings: HashMap<String, String> = env::vars()
            .filter(|(key, _)| key.starts_with(SETTING_PREFIX))
            .collect();
        Self::from_settings_map(&settings)
    }

    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let defaults = Self::default();

        let api_url = optional_setting(settings, API_URL_KEY)
            .map(str::to_string)
            .unwrap_or(defaults.api_url);
        let vs_currency = optional_setting(settings, VS_CURRENCY_KEY)
            .map(|value| value.to_ascii_lowercase())
            .unwrap_or(defaults.vs_currency);
        let page_size = setting_u64(settings, PAGE_SIZE_KEY, 1, MAX_PAGE_SIZE as u64)?
            .map(|value| value as u32)
            .unwrap_or(defaults.page_size);
        let page = setting_u64(settings, PAGE_KEY, 1, u32::MAX as u64)?
            .map(|value| value as u32)
            .unwrap_or(defaults.page);
        let output_path = optional_setting(settings, OUTPUT_PATH_KEY)
            .map(PathBuf::from)
            .unwrap_or(defaults.output_path);
        let interval = setting_u64(settings, INTERVAL_SECS_KEY, 1, u64::MAX)?
            .map(Duration::from_secs)
            .unwrap_or(defaults.interval);
        let http_timeout = setting_u64(settings, HTTP_TIMEOUT_SECS_KEY, 1, u64::MAX)?
            .map(Duration::from_secs)
            .unwrap_or(defaults.http_timeout);
        let top_n = setting_u64(settings, TOP_N_KEY, 1, MAX_PAGE_SIZE as u64)?
            .map(|value| value as usize)
            .unwrap_or(defaults.top_n);

        Ok(Self {
            api_url,
            vs_currency,
            page_size,
            page,
            output_path,
            interval,
            http_timeout,
            top_n,
        })
    }

    pub fn apply_overrides(mut self, overrides: ConfigOverrides) -> Result<Self> {
        if let Some(api_url) = overrides.api_url {
            self.api_url = api_url;
        }
        if let Some(vs_currency) = overrides.vs_currency {
            self.vs_currency = vs_currency.trim().to_ascii_lowercase();
        }
        if let Some(page_size) = overrides.page_size {
            self.page_size = page_size;
        }
        if let Some(page) = overrides.page {
            self.page = page;
        }
        if let Some(output_path) = overrides.output_path {
            self.output_path = output_path;
        }
        if let Some(interval_secs) = overrides.interval_secs {
            self.interval = Duration::from_secs(interval_secs);
        }
        if let Some(http_timeout_secs) = overrides.http_timeout_secs {
            self.http_timeout = Duration::from_secs(http_timeout_secs);
        }
        if let Some(top_n) = overrides.top_n {
            self.top_n = top_n;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_url.trim().is_empty() {
            return Err(anyhow!("API URL must not be empty"));
        }
        if self.vs_currency.trim().is_empty() {
            return Err(anyhow!("Quote currency must not be empty"));
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(anyhow!(
                "Page size must be between 1 and {} (value: {})",
                MAX_PAGE_SIZE,
                self.page_size
            ));
        }
        if self.page == 0 {
            return Err(anyhow!("Page must be >= 1"));
        }
        if self.output_path.as_os_str().is_empty() {
            return Err(anyhow!("Output path must not be empty"));
        }
        if self.interval.is_zero() {
            return Err(anyhow!("Interval must be at least one second"));
        }
        if self.http_timeout.is_zero() {
            return Err(anyhow!("HTTP timeout must be at least one second"));
        }
        if self.top_n == 0 {
            return Err(anyhow!("Top-N count must be >= 1"));
        }
        Ok(())
    }
}

fn optional_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn setting_u64(
    settings: &HashMap<String, String>,
    key: &str,
    min: u64,
    max: u64,
) -> Result<Option<u64>> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(None);
    };
    let value = raw
        .parse::<u64>()
        .map_err(|_| anyhow!("Setting {} must be a whole number (value: {})", key, raw))?;
    if value < min {
        return Err(anyhow!(
            "Setting {} must be >= {} (value: {})",
            key,
            min,
            raw
        ));
    }
    if value > max {
        return Err(anyhow!(
            "Setting {} must be <= {} (value: {})",
            key,
            max,
            raw
        ));
    }
    Ok(Some(value))
}
