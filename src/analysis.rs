use crate::models::{MarketRecord, MarketSnapshot};
use std::cmp::Ordering;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("cannot analyze an empty snapshot")]
    EmptyInput,
    #[error("no records carry a 24h change value")]
    NoComparableRecords,
}

#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub record_count: usize,
    pub top_by_market_cap: Vec<MarketRecord>,
    pub average_price: f64,
    pub highest_change: Option<MarketRecord>,
    pub lowest_change: Option<MarketRecord>,
}

/// Largest `n` records by market cap. Equal caps keep snapshot order.
pub fn top_by_market_cap(records: &[MarketRecord], n: usize) -> Vec<&MarketRecord> {
    let mut ranked: Vec<&MarketRecord> = records.iter().collect();
    ranked.sort_by(|a, b| b.market_cap.cmp(&a.market_cap));
    ranked.truncate(n);
    ranked
}

pub fn average_price(records: &[MarketRecord]) -> Result<f64, AnalysisError> {
    if records.is_empty() {
        return Err(AnalysisError::EmptyInput);
    }
    let total: f64 = records.iter().map(|record| record.current_price).sum();
    Ok(total / records.len() as f64)
}

pub fn highest_change(records: &[MarketRecord]) -> Result<&MarketRecord, AnalysisError> {
    change_extremum(records, Ordering::Greater)
}

pub fn lowest_change(records: &[MarketRecord]) -> Result<&MarketRecord, AnalysisError> {
    change_extremum(records, Ordering::Less)
}

// Records without a change value never win. The first record wins a tie.
fn change_extremum(
    records: &[MarketRecord],
    wanted: Ordering,
) -> Result<&MarketRecord, AnalysisError> {
    let mut best: Option<(&MarketRecord, f64)> = None;
    for record in records {
        let Some(change) = record.price_change_percentage_24h else {
            continue;
        };
        if change.is_nan() {
            continue;
        }
        match best {
            Some((_, current)) if change.partial_cmp(&current) != Some(wanted) => {}
            _ => best = Some((record, change)),
        }
    }
    best.map(|(record, _)| record)
        .ok_or(AnalysisError::NoComparableRecords)
}

pub fn analyze(snapshot: &MarketSnapshot, top_n: usize) -> Result<AnalysisResult, AnalysisError> {
    let records = snapshot.records.as_slice();
    let average_price = average_price(records)?;

    Ok(AnalysisResult {
        record_count: records.len(),
        top_by_market_cap: top_by_market_cap(records, top_n)
            .into_iter()
            .cloned()
            .collect(),
        average_price,
        highest_change: highest_change(records).ok().cloned(),
        lowest_change: lowest_change(records).ok().cloned(),
    })
}

impl AnalysisResult {
    /// Human-readable summary, one line per entry.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        lines.push(format!(
            "Top {} cryptocurrencies by market cap:",
            self.top_by_market_cap.len()
        ));
        lines.push(table_header());
        for record in &self.top_by_market_cap {
            lines.push(table_row(record));
        }
        lines.push(format!(
            "Average price of top {} cryptocurrencies: ${:.2}",
            self.record_count, self.average_price
        ));
        lines.push(extremum_line("Highest", self.highest_change.as_ref()));
        lines.push(extremum_line("Lowest", self.lowest_change.as_ref()));
        lines
    }
}

fn table_header() -> String {
    format!(
        "  {:<20} {:<8} {:>16} {:>20} {:>20} {:>10}",
        "Name", "Symbol", "Current Price", "Market Cap", "Total Volume", "24h %"
    )
}

fn table_row(record: &MarketRecord) -> String {
    format!(
        "  {:<20} {:<8} {:>16.2} {:>20} {:>20} {:>10}",
        record.name,
        record.symbol,
        record.current_price,
        record.market_cap,
        record.total_volume,
        format_change(record.price_change_percentage_24h)
    )
}

fn extremum_line(label: &str, record: Option<&MarketRecord>) -> String {
    match record {
        Some(record) => format!(
            "{} 24h change: {} ({}) {}%",
            label,
            record.name,
            record.symbol,
            format_change(record.price_change_percentage_24h)
        ),
        None => format!("{} 24h change: no comparable records", label),
    }
}

fn format_change(change: Option<f64>) -> String {
    match change {
        Some(value) => format!("{:.2}", value),
        None => "n/a".to_string(),
    }
}
