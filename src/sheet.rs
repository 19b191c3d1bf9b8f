//! Ticker source: the alert sheet's CSV export.

use crate::config::SheetConfig;
use crate::http::{USER_AGENT, now_ms};
use crate::symbols::{CanonicalSymbol, normalize, uniq_by};
use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// One sheet row: the raw ticker cell and its date cell.
#[derive(Debug, Clone, PartialEq)]
pub struct TickerRow {
    pub raw: String,
    pub date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertedSymbol {
    #[serde(flatten)]
    pub canonical: CanonicalSymbol,
    /// `YYYY-MM-DD`
    pub alert_date: Option<String>,
}

/// Downloads the CSV, retrying with a growing pause. Failing every attempt is
/// fatal for the batch.
pub async fn fetch_csv(client: &Client, config: &SheetConfig) -> Result<String> {
    let attempts = config.max_attempts.max(1);
    for attempt in 1..=attempts {
        // cache buster so the export is not served stale
        let result = client
            .get(&config.csv_url)
            .query(&[("rand", now_ms().to_string())])
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send()
            .await;

        match result {
            Ok(response) => {
                let status = response.status();
                match response.text().await {
                    Ok(text) if status.is_success() && !text.is_empty() => return Ok(text),
                    Ok(_) => warn!(attempt, status = status.as_u16(), "sheet download rejected"),
                    Err(e) => warn!(attempt, error = %e, "sheet body unreadable"),
                }
            }
            Err(e) => warn!(attempt, error = %e, "sheet download failed"),
        }
        if attempt < attempts {
            tokio::time::sleep(Duration::from_millis(800 * u64::from(attempt))).await;
        }
    }
    Err(anyhow!("sheet CSV unreachable after {attempts} attempts"))
}

/// Extracts `(asset, date)` pairs using the configured header names.
pub fn parse_rows(csv_text: &str, config: &SheetConfig) -> Result<Vec<TickerRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(csv_text.as_bytes());
    let mut records = reader.records();

    let header = match records.next() {
        Some(record) => record.context("reading sheet header")?,
        None => return Ok(Vec::new()),
    };
    let columns: Vec<&str> = header.iter().map(str::trim).collect();
    let asset_idx = columns
        .iter()
        .position(|h| h.eq_ignore_ascii_case(&config.asset_column))
        .ok_or_else(|| anyhow!("column \"{}\" not found", config.asset_column))?;
    let Some(date_idx) = columns.iter().position(|h| *h == config.date_column) else {
        bail!("column \"{}\" not found", config.date_column);
    };

    let mut rows = Vec::new();
    for record in records {
        let record = record.context("reading sheet row")?;
        let raw = record.get(asset_idx).unwrap_or("").trim();
        if raw.is_empty() {
            continue;
        }
        let date = record
            .get(date_idx)
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);
        rows.push(TickerRow {
            raw: raw.to_string(),
            date,
        });
    }
    Ok(rows)
}

/// The leading `YYYY-MM-DD` of a date cell.
fn date_key(cell: &str) -> Option<NaiveDate> {
    let prefix: String = cell.trim().chars().take(10).collect();
    NaiveDate::parse_from_str(&prefix, "%Y-%m-%d").ok()
}

pub fn is_recent(cell: Option<&str>, days: f64, now: DateTime<Utc>) -> bool {
    let Some(date) = cell.and_then(date_key) else {
        return false;
    };
    let midnight = date.and_hms_opt(0, 0, 0).map(|d| d.and_utc());
    midnight.is_some_and(|d| (now - d).num_milliseconds() as f64 / 86_400_000.0 <= days)
}

fn collect_within(rows: &[TickerRow], days: f64, now: DateTime<Utc>) -> Vec<AlertedSymbol> {
    let recent = rows
        .iter()
        .filter(|row| is_recent(row.date.as_deref(), days, now))
        .filter_map(|row| {
            let canonical = normalize(&row.raw)?;
            Some(AlertedSymbol {
                canonical,
                alert_date: row.date.as_deref().and_then(date_key).map(|d| d.to_string()),
            })
        })
        .collect();
    uniq_by(recent, |a| a.canonical.key())
}

/// Recent window first, wider window when the recent one is empty.
/// Deduplicated by `symbol|venue`, first row wins, sheet order kept.
pub fn collect_alerts(rows: &[TickerRow], config: &SheetConfig, now: DateTime<Utc>) -> Vec<AlertedSymbol> {
    let recent = collect_within(rows, config.recent_days, now);
    if !recent.is_empty() {
        return recent;
    }
    info!(days = config.fallback_days, "no recent alerts, widening window");
    collect_within(rows, config.fallback_days, now)
}

pub async fn read_alerts(client: &Client, config: &SheetConfig, now: DateTime<Utc>) -> Result<Vec<AlertedSymbol>> {
    let csv_text = fetch_csv(client, config).await?;
    let rows = parse_rows(&csv_text, config)?;
    let alerts = collect_alerts(&rows, config, now);
    info!(rows = rows.len(), alerts = alerts.len(), "sheet parsed");
    Ok(alerts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap()
    }

    const CSV: &str = "Timestamp,Asset,DateKey,Note\n\
        x,BINANCE:AVAXUSDT,2024-05-10 08:00,\"quoted, note\"\n\
        x,MEXC:CRVUSDT,2024-05-09,\n\
        x,BINANCE:AVAXUSDT,2024-05-09,dup\n\
        x,USDT,2024-05-10,quote only\n\
        x,,2024-05-10,empty asset\n\
        x,BYBIT:OPUSDT,2024-05-04,old\n\
        x,SOL/USDT,not a date,\n";

    #[test]
    fn rows_use_header_names() {
        let rows = parse_rows(CSV, &SheetConfig::default()).unwrap();
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[0].raw, "BINANCE:AVAXUSDT");
        assert_eq!(rows[0].date.as_deref(), Some("2024-05-10 08:00"));
    }

    #[test]
    fn missing_columns_are_errors() {
        let config = SheetConfig::default();
        assert!(parse_rows("Asset,Date\nAVAX,2024-05-10\n", &config).is_err());
        assert!(parse_rows("Ticker,DateKey\nAVAX,2024-05-10\n", &config).is_err());
        assert!(parse_rows("", &config).unwrap().is_empty());
    }

    #[test]
    fn recency_is_measured_from_utc_midnight() {
        assert!(!is_recent(Some("2024-05-08"), 2.0, now()));
        assert!(is_recent(Some("2024-05-09T23:00"), 2.0, now()));
        assert!(is_recent(Some("2024-05-08"), 2.5, now()));
        assert!(!is_recent(Some("garbage"), 2.0, now()));
        assert!(!is_recent(None, 2.0, now()));
    }

    #[test]
    fn recent_alerts_are_normalized_and_deduped() {
        let rows = parse_rows(CSV, &SheetConfig::default()).unwrap();
        let alerts = collect_alerts(&rows, &SheetConfig::default(), now());
        let keys: Vec<String> = alerts.iter().map(|a| a.canonical.key()).collect();
        assert_eq!(keys, vec!["AVAX|BINANCE", "CRV|MEXC"]);
        assert_eq!(alerts[0].alert_date.as_deref(), Some("2024-05-10"));
    }

    #[test]
    fn empty_recent_window_falls_back() {
        let rows = vec![
            TickerRow {
                raw: "BYBIT:OPUSDT".into(),
                date: Some("2024-05-05".into()),
            },
            TickerRow {
                raw: "ARB".into(),
                date: Some("2024-04-01".into()),
            },
        ];
        let alerts = collect_alerts(&rows, &SheetConfig::default(), now());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].canonical.symbol, "OP");
        assert_eq!(alerts[0].canonical.venue, "BYBIT");
    }
}
