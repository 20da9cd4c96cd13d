use chrono::{DateTime, Utc};

/// Provider ordering for a snapshot page.
pub const MARKET_CAP_DESC: &str = "market_cap_desc";

#[derive(Debug, Clone, PartialEq)]
pub struct MarketRecord {
    pub name: String,
    pub symbol: String,
    pub current_price: f64,
    pub market_cap: u64,
    pub total_volume: u64,
    /// Rounded to two decimal places when fetched.
    pub price_change_percentage_24h: Option<f64>,
}

/// One fetch cycle's records, in the order the provider delivered them
/// (descending market cap).
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub fetched_at: DateTime<Utc>,
    pub page: u32,
    pub records: Vec<MarketRecord>,
}

impl MarketSnapshot {
    pub fn new(records: Vec<MarketRecord>, page: u32) -> Self {
        Self {
            fetched_at: Utc::now(),
            page,
            records,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

/// Two decimal places, halves to even.
pub fn round_to_cents(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}
