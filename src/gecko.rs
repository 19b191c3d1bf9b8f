//! CoinGecko fallback for volumes and ATH when no venue had candles.

use crate::error::FetchResult;
use crate::http::HttpFetcher;
use chrono::DateTime;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    coins: Vec<SearchCoin>,
}

#[derive(Deserialize)]
struct SearchCoin {
    id: Option<String>,
    symbol: Option<String>,
    market_cap_rank: Option<u32>,
}

#[derive(Deserialize)]
struct MarketChart {
    #[serde(default)]
    total_volumes: Vec<Vec<Option<f64>>>,
}

#[derive(Deserialize)]
struct MarketRow {
    ath: Option<f64>,
    ath_date: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GeckoAth {
    pub price: Option<f64>,
    pub timestamp: Option<i64>,
}

pub struct GeckoClient {
    base_url: String,
    overrides: HashMap<String, String>,
    http: HttpFetcher,
}

impl GeckoClient {
    pub fn new(base_url: &str, overrides: HashMap<String, String>, http: HttpFetcher) -> Self {
        Self {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            overrides,
            http,
        }
    }

    /// Configured override, else the search hit with this exact symbol and
    /// the best market-cap rank.
    pub async fn find_id(&self, symbol: &str) -> FetchResult<Option<String>> {
        if let Some(id) = self.overrides.get(symbol) {
            return Ok(Some(id.clone()));
        }
        let url = format!("{}/search", self.base_url);
        let resp: SearchResponse = self
            .http
            .get_json(&url, &[("query", symbol.to_string())], &HeaderMap::new())
            .await?;
        let mut hits: Vec<SearchCoin> = resp
            .coins
            .into_iter()
            .filter(|c| c.symbol.as_deref().is_some_and(|s| s.eq_ignore_ascii_case(symbol)))
            .collect();
        hits.sort_by_key(|c| c.market_cap_rank.unwrap_or(u32::MAX));
        Ok(hits.into_iter().next().and_then(|c| c.id))
    }

    /// Daily USD volumes for the last 30 days, oldest first.
    pub async fn daily_volumes(&self, id: &str) -> FetchResult<Vec<f64>> {
        let url = format!("{}/coins/{}/market_chart", self.base_url, id);
        let query = [
            ("vs_currency", "usd".to_string()),
            ("days", "30".to_string()),
            ("interval", "daily".to_string()),
        ];
        let chart: MarketChart = self.http.get_json(&url, &query, &HeaderMap::new()).await?;
        Ok(chart
            .total_volumes
            .iter()
            .filter_map(|point| point.get(1).copied().flatten())
            .filter(|v| v.is_finite())
            .collect())
    }

    pub async fn ath(&self, id: &str) -> FetchResult<GeckoAth> {
        let url = format!("{}/coins/markets", self.base_url);
        let query = [("vs_currency", "usd".to_string()), ("ids", id.to_string())];
        let rows: Vec<MarketRow> = self.http.get_json(&url, &query, &HeaderMap::new()).await?;
        let Some(row) = rows.into_iter().next() else {
            debug!(id, "no market row");
            return Ok(GeckoAth::default());
        };
        Ok(GeckoAth {
            price: row.ath,
            timestamp: row
                .ath_date
                .as_deref()
                .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
                .map(|dt| dt.timestamp_millis()),
        })
    }
}
