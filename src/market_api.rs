use crate::config::ReportConfig;
use crate::models::{round_to_cents, MarketRecord, MarketSnapshot, MARKET_CAP_DESC};
use log::{debug, info};
use reqwest::{Client, StatusCode};
use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("GET {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("GET {url} returned status {status}")]
    Status { url: String, status: StatusCode },
    #[error("failed to decode market payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("market entry {index} has a missing or invalid `{field}`")]
    Malformed { index: usize, field: &'static str },
}

/// Anything the scheduler can pull a snapshot from.
#[allow(async_fn_in_trait)]
pub trait SnapshotSource {
    async fn fetch_snapshot(&self) -> Result<MarketSnapshot, FetchError>;
}

pub struct MarketApiClient {
    http: Client,
    api_url: String,
    vs_currency: String,
    page_size: u32,
    page: u32,
}

impl MarketApiClient {
    pub fn new(http: Client, config: &ReportConfig) -> Self {
        Self {
            http,
            api_url: config.api_url.trim().to_string(),
            vs_currency: config.vs_currency.clone(),
            page_size: config.page_size,
            page: config.page,
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn query_params(&self) -> Vec<(&'static str, String)> {
        vec![
            ("vs_currency", self.vs_currency.clone()),
            ("order", MARKET_CAP_DESC.to_string()),
            ("per_page", self.page_size.to_string()),
            ("page", self.page.to_string()),
            ("sparkline", "false".to_string()),
        ]
    }

    pub async fn fetch(&self) -> Result<MarketSnapshot, FetchError> {
        info!("Fetching live market data from {}", self.api_url);
        let response = self
            .http
            .get(&self.api_url)
            .query(&self.query_params())
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                url: self.api_url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: self.api_url.clone(),
                status,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| FetchError::Transport {
                url: self.api_url.clone(),
                source,
            })?;
        debug!("Market payload is {} bytes", body.len());

        let records = parse_market_payload(&body, self.page_size as usize)?;
        Ok(MarketSnapshot::new(records, self.page))
    }
}

impl SnapshotSource for MarketApiClient {
    async fn fetch_snapshot(&self) -> Result<MarketSnapshot, FetchError> {
        self.fetch().await
    }
}

/// Projects a markets payload onto [`MarketRecord`]s, keeping provider order
/// and at most `limit` entries.
pub fn parse_market_payload(body: &[u8], limit: usize) -> Result<Vec<MarketRecord>, FetchError> {
    let entries: Vec<CoinMarketEntry> = serde_json::from_slice(body)?;
    entries
        .into_iter()
        .take(limit)
        .enumerate()
        .map(|(index, entry)| entry.into_record(index))
        .collect()
}

#[derive(Debug, Deserialize)]
struct CoinMarketEntry {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default, deserialize_with = "deserialize_f64_opt")]
    current_price: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_f64_opt")]
    market_cap: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_f64_opt")]
    total_volume: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_f64_opt")]
    price_change_percentage_24h: Option<f64>,
}

impl CoinMarketEntry {
    fn into_record(self, index: usize) -> Result<MarketRecord, FetchError> {
        let name = self
            .name
            .ok_or(FetchError::Malformed { index, field: "name" })?;
        let symbol = self
            .symbol
            .ok_or(FetchError::Malformed { index, field: "symbol" })?;
        let current_price = self
            .current_price
            .filter(|price| price.is_finite())
            .ok_or(FetchError::Malformed {
                index,
                field: "current_price",
            })?;

        Ok(MarketRecord {
            name,
            symbol,
            current_price,
            market_cap: whole_usd(self.market_cap),
            total_volume: whole_usd(self.total_volume),
            price_change_percentage_24h: self
                .price_change_percentage_24h
                .filter(|value| value.is_finite())
                .map(round_to_cents),
        })
    }
}

// Unranked assets come back with null caps and volumes.
fn whole_usd(value: Option<f64>) -> u64 {
    match value {
        Some(value) if value.is_finite() && value > 0.0 => value.round() as u64,
        _ => 0,
    }
}

fn deserialize_f64_opt<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    struct F64OptVisitor;

    impl<'de> Visitor<'de> for F64OptVisitor {
        type Value = Option<f64>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a finite number, numeric string or null")
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(value))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(value as f64))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(value as f64))
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            match value.trim().parse::<f64>() {
                Ok(parsed) if parsed.is_finite() => Ok(Some(parsed)),
                _ => Err(E::invalid_value(de::Unexpected::Str(value), &self)),
            }
        }
    }

    deserializer.deserialize_any(F64OptVisitor)
}
