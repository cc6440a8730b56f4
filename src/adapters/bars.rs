//! Bar files and ledger export
//!
//! Historical bars come in as CSV with a header row
//! (`time,open,high,low,close,volume`). The time column accepts RFC 3339 or
//! unix seconds / milliseconds. Replay ledgers go out as JSON or CSV.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use thiserror::Error;

use crate::application::replay::ReplayReport;
use crate::domain::trade::ExitEventKind;
use crate::strategy::indicators::Candle;

#[derive(Debug, Error)]
pub enum BarFileError {
    #[error("Failed to read bar file: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Invalid timestamp on row {row}: {value}")]
    Timestamp { row: usize, value: String },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CSV output was not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

#[derive(Debug, Deserialize)]
struct BarRow {
    #[serde(alias = "timestamp", alias = "date", alias = "open_time")]
    time: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: f64,
}

/// Parse a bar timestamp: RFC 3339, or unix seconds / milliseconds
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(time) = DateTime::parse_from_rfc3339(value) {
        return Some(time.with_timezone(&Utc));
    }
    let raw: i64 = value.parse().ok()?;
    // Anything past ~2286 in seconds is taken as milliseconds
    if raw.abs() >= 10_000_000_000 {
        Utc.timestamp_millis_opt(raw).single()
    } else {
        Utc.timestamp_opt(raw, 0).single()
    }
}

/// Read bars from any CSV source
pub fn read_bars<R: Read>(reader: R) -> Result<Vec<Candle>, BarFileError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut bars = Vec::new();
    for (index, row) in csv_reader.deserialize::<BarRow>().enumerate() {
        let row = row?;
        let time = parse_timestamp(&row.time).ok_or_else(|| BarFileError::Timestamp {
            row: index + 1,
            value: row.time.clone(),
        })?;
        bars.push(Candle::new(time, row.open, row.high, row.low, row.close, row.volume));
    }
    Ok(bars)
}

/// Load bars from a CSV file
pub fn load_bars<P: AsRef<Path>>(path: P) -> Result<Vec<Candle>, BarFileError> {
    let file = File::open(path)?;
    read_bars(BufReader::new(file))
}

/// Full replay report as pretty JSON
pub fn export_json(report: &ReplayReport) -> Result<String, BarFileError> {
    Ok(serde_json::to_string_pretty(report)?)
}

/// One CSV row per exit event, so partial closes show up on their own line
pub fn export_csv(report: &ReplayReport) -> Result<String, BarFileError> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record([
        "position_id",
        "symbol",
        "tier",
        "entry_time",
        "entry_price",
        "quantity",
        "exit_time",
        "exit_type",
        "exit_price",
        "exit_quantity",
        "reason",
        "trailing",
        "realized_pnl",
    ])?;

    for record in &report.ledger.records {
        for event in &record.exit_events {
            let kind = match event.kind {
                ExitEventKind::PartialClose => "PARTIAL_CLOSE",
                ExitEventKind::FullClose => "FULL_CLOSE",
            };
            writer.write_record([
                record.position_id.clone(),
                record.symbol.clone(),
                record.tier.to_string(),
                record.entry_time.to_rfc3339(),
                format!("{:.8}", record.entry_price),
                format!("{:.8}", record.quantity),
                event.time.to_rfc3339(),
                kind.to_string(),
                format!("{:.8}", event.price),
                format!("{:.8}", event.quantity),
                event.reason.as_str().to_string(),
                event.trailing.to_string(),
                format!("{:.8}", record.realized_pnl),
            ])?;
        }
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| BarFileError::Io(e.into_error()))?;
    Ok(String::from_utf8(bytes)?)
}
