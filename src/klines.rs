//! Venue adapters: one `CandleProvider` per exchange kline endpoint.

use crate::error::{FetchError, FetchResult};
use crate::http::HttpFetcher;
use crate::symbols::split_pair;
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Open time, ms since epoch.
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Quote-currency volume.
    pub volume: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    Daily,
    Hourly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Venue {
    Binance,
    Bybit,
    Okx,
    Mexc,
}

impl Venue {
    pub const FALLBACK_ORDER: [Venue; 4] = [Venue::Binance, Venue::Bybit, Venue::Okx, Venue::Mexc];

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "BINANCE" => Some(Venue::Binance),
            "BYBIT" => Some(Venue::Bybit),
            "OKX" | "OKEX" => Some(Venue::Okx),
            "MEXC" => Some(Venue::Mexc),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Venue::Binance => "BINANCE",
            Venue::Bybit => "BYBIT",
            Venue::Okx => "OKX",
            Venue::Mexc => "MEXC",
        }
    }

    fn max_limit(&self) -> u32 {
        match self {
            Venue::Okx => 300,
            _ => 1000,
        }
    }

    fn interval_param(&self, interval: Interval) -> &'static str {
        match (self, interval) {
            (Venue::Binance, Interval::Daily) | (Venue::Mexc, Interval::Daily) => "1d",
            (Venue::Binance, Interval::Hourly) => "1h",
            (Venue::Mexc, Interval::Hourly) => "60m",
            (Venue::Bybit, Interval::Daily) => "D",
            (Venue::Bybit, Interval::Hourly) => "60",
            (Venue::Okx, Interval::Daily) => "1Dutc",
            (Venue::Okx, Interval::Hourly) => "1H",
        }
    }

    fn path(&self) -> &'static str {
        match self {
            Venue::Binance | Venue::Mexc => "/api/v3/klines",
            Venue::Bybit => "/v5/market/kline",
            Venue::Okx => "/api/v5/market/candles",
        }
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A source of candles for one venue. An empty vector means the venue has
/// no data for that pair; `Err` means the attempt itself failed.
#[async_trait]
pub trait CandleProvider: Send + Sync {
    fn venue(&self) -> Venue;

    async fn fetch_candles(&self, pair: &str, interval: Interval, limit: u32) -> FetchResult<Vec<Candle>>;
}

// --- Wire format ---

/// A kline cell: venues send numbers or numeric strings.
#[derive(Debug, Clone, Copy)]
struct Lenient(Option<f64>);

struct LenientF64Visitor;

impl<'de> Visitor<'de> for LenientF64Visitor {
    type Value = Lenient;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a float, an integer, or a string representing a number")
    }

    fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E> {
        Ok(Lenient(Some(v)))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
        Ok(Lenient(Some(v as f64)))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
        Ok(Lenient(Some(v as f64)))
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        if v.trim().is_empty() {
            Ok(Lenient(None))
        } else {
            v.trim().parse::<f64>().map(|n| Lenient(Some(n))).map_err(E::custom)
        }
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E> {
        Ok(Lenient(None))
    }

    fn visit_none<E>(self) -> Result<Self::Value, E> {
        Ok(Lenient(None))
    }
}

impl<'de> Deserialize<'de> for Lenient {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(LenientF64Visitor)
    }
}

type RawRow = Vec<Lenient>;

#[derive(Deserialize)]
struct BybitResponse {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg", default)]
    ret_msg: String,
    result: Option<BybitResult>,
}

#[derive(Deserialize)]
struct BybitResult {
    #[serde(default)]
    list: Vec<RawRow>,
}

#[derive(Deserialize)]
struct OkxResponse {
    code: String,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Vec<RawRow>,
}

/// Column of the quote-currency volume in each venue's row layout.
fn quote_volume_index(venue: Venue) -> usize {
    match venue {
        Venue::Bybit => 6,
        _ => 7,
    }
}

fn row_to_candle(venue: Venue, row: &[Lenient]) -> Option<Candle> {
    let cell = |i: usize| row.get(i).and_then(|c| c.0);
    Some(Candle {
        timestamp: cell(0)? as i64,
        open: cell(1)?,
        high: cell(2)?,
        low: cell(3)?,
        close: cell(4)?,
        volume: cell(quote_volume_index(venue)).or_else(|| cell(5))?,
    })
}

/// Sorted ascending, one candle per timestamp.
fn into_series(venue: Venue, rows: Vec<RawRow>) -> Vec<Candle> {
    let mut candles: Vec<Candle> = rows.iter().filter_map(|r| row_to_candle(venue, r)).collect();
    candles.sort_by_key(|c| c.timestamp);
    candles.dedup_by_key(|c| c.timestamp);
    candles
}

pub fn parse_klines(venue: Venue, body: &str) -> FetchResult<Vec<Candle>> {
    let rows = match venue {
        Venue::Binance | Venue::Mexc => serde_json::from_str::<Vec<RawRow>>(body)?,
        Venue::Bybit => {
            let resp: BybitResponse = serde_json::from_str(body)?;
            if resp.ret_code != 0 {
                return Err(FetchError::Api(format!("bybit {}: {}", resp.ret_code, resp.ret_msg)));
            }
            resp.result.map(|r| r.list).unwrap_or_default()
        }
        Venue::Okx => {
            let resp: OkxResponse = serde_json::from_str(body)?;
            if resp.code != "0" {
                return Err(FetchError::Api(format!("okx {}: {}", resp.code, resp.msg)));
            }
            resp.data
        }
    };
    Ok(into_series(venue, rows))
}

// --- HTTP adapter ---

pub struct VenueClient {
    venue: Venue,
    base_url: String,
    http: HttpFetcher,
}

impl VenueClient {
    pub fn new(venue: Venue, base_url: &str, http: HttpFetcher) -> Self {
        Self {
            venue,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            http,
        }
    }

    fn query(&self, pair: &str, interval: Interval, limit: u32) -> Vec<(&'static str, String)> {
        let limit = limit.min(self.venue.max_limit()).to_string();
        let interval = self.venue.interval_param(interval).to_string();
        match self.venue {
            Venue::Binance | Venue::Mexc => vec![
                ("symbol", pair.to_string()),
                ("interval", interval),
                ("limit", limit),
            ],
            Venue::Bybit => vec![
                ("category", "spot".to_string()),
                ("symbol", pair.to_string()),
                ("interval", interval),
                ("limit", limit),
            ],
            Venue::Okx => {
                let inst_id = match split_pair(pair) {
                    Some((base, quote)) => format!("{base}-{quote}"),
                    None => pair.to_string(),
                };
                vec![("instId", inst_id), ("bar", interval), ("limit", limit)]
            }
        }
    }
}

#[async_trait]
impl CandleProvider for VenueClient {
    fn venue(&self) -> Venue {
        self.venue
    }

    async fn fetch_candles(&self, pair: &str, interval: Interval, limit: u32) -> FetchResult<Vec<Candle>> {
        let url = format!("{}{}", self.base_url, self.venue.path());
        let query = self.query(pair, interval, limit);
        let body = self.http.get_text(&url, &query, &HeaderMap::new()).await?;
        parse_klines(self.venue, &body)
    }
}
