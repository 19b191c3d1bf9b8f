//! CoinMarketCap quotes: price, market cap, percent changes and supply.

use crate::error::{FetchError, FetchResult};
use crate::http::HttpFetcher;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::info;

/// Symbols per quotes request.
pub const CHUNK_SIZE: usize = 80;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketQuote {
    pub price: Option<f64>,
    pub market_cap: Option<f64>,
    pub fully_diluted_market_cap: Option<f64>,
    pub percent_change_24h: Option<f64>,
    pub percent_change_7d: Option<f64>,
    pub percent_change_30d: Option<f64>,
    pub volume_24h: Option<f64>,
    pub circulating_supply: Option<f64>,
    pub total_supply: Option<f64>,
    pub max_supply: Option<f64>,
    pub rank: Option<u32>,
}

#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Quotes keyed by uppercase symbol. Symbols the provider does not know
    /// are simply absent.
    async fn quotes(&self, symbols: &[String]) -> FetchResult<HashMap<String, MarketQuote>>;
}

// --- Wire format ---

#[derive(Deserialize)]
struct CmcResponse {
    #[serde(default)]
    data: HashMap<String, CmcListings>,
}

/// v2 returns a list per symbol; older payloads return a single object.
#[derive(Deserialize)]
#[serde(untagged)]
enum CmcListings {
    Many(Vec<CmcListing>),
    One(Box<CmcListing>),
}

#[derive(Deserialize)]
struct CmcListing {
    is_active: Option<i64>,
    cmc_rank: Option<u32>,
    circulating_supply: Option<f64>,
    total_supply: Option<f64>,
    max_supply: Option<f64>,
    #[serde(default)]
    quote: HashMap<String, CmcUsd>,
}

#[derive(Deserialize)]
struct CmcUsd {
    price: Option<f64>,
    volume_24h: Option<f64>,
    percent_change_24h: Option<f64>,
    percent_change_7d: Option<f64>,
    percent_change_30d: Option<f64>,
    market_cap: Option<f64>,
    fully_diluted_market_cap: Option<f64>,
}

impl CmcListing {
    fn into_quote(mut self) -> MarketQuote {
        let usd = self.quote.remove("USD");
        MarketQuote {
            price: usd.as_ref().and_then(|u| u.price),
            market_cap: usd.as_ref().and_then(|u| u.market_cap),
            fully_diluted_market_cap: usd.as_ref().and_then(|u| u.fully_diluted_market_cap),
            percent_change_24h: usd.as_ref().and_then(|u| u.percent_change_24h),
            percent_change_7d: usd.as_ref().and_then(|u| u.percent_change_7d),
            percent_change_30d: usd.as_ref().and_then(|u| u.percent_change_30d),
            volume_24h: usd.as_ref().and_then(|u| u.volume_24h),
            circulating_supply: self.circulating_supply,
            total_supply: self.total_supply,
            max_supply: self.max_supply,
            rank: self.cmc_rank,
        }
    }
}

/// Active listing with the lowest rank; the first listing when none is active.
fn best_listing(listings: CmcListings) -> Option<CmcListing> {
    let mut listings = match listings {
        CmcListings::Many(v) => v,
        CmcListings::One(one) => vec![*one],
    };
    let best = listings
        .iter()
        .enumerate()
        .filter(|(_, l)| l.is_active != Some(0))
        .min_by_key(|(_, l)| l.cmc_rank.unwrap_or(u32::MAX))
        .map(|(i, _)| i);
    match best {
        Some(i) => Some(listings.swap_remove(i)),
        None if !listings.is_empty() => Some(listings.swap_remove(0)),
        None => None,
    }
}

pub fn parse_quotes(body: &str) -> FetchResult<HashMap<String, MarketQuote>> {
    let resp: CmcResponse = serde_json::from_str(body)?;
    Ok(resp
        .data
        .into_iter()
        .filter_map(|(sym, listings)| best_listing(listings).map(|l| (sym.to_uppercase(), l.into_quote())))
        .collect())
}

pub struct CmcClient {
    base_url: String,
    api_key: String,
    http: HttpFetcher,
}

impl CmcClient {
    pub fn new(base_url: &str, api_key: &str, http: HttpFetcher) -> FetchResult<Self> {
        if api_key.trim().is_empty() {
            return Err(FetchError::MissingKey("CoinMarketCap"));
        }
        Ok(Self {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            api_key: api_key.trim().to_string(),
            http,
        })
    }

    fn headers(&self) -> FetchResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        let value = HeaderValue::from_str(&self.api_key)
            .map_err(|e| FetchError::Api(format!("invalid API key header: {e}")))?;
        headers.insert(HeaderName::from_static("x-cmc_pro_api_key"), value);
        Ok(headers)
    }
}

#[async_trait]
impl QuoteProvider for CmcClient {
    async fn quotes(&self, symbols: &[String]) -> FetchResult<HashMap<String, MarketQuote>> {
        let unique: Vec<&String> = symbols.iter().collect::<BTreeSet<_>>().into_iter().collect();
        let url = format!("{}/v2/cryptocurrency/quotes/latest", self.base_url);
        let headers = self.headers()?;

        let mut out = HashMap::new();
        for chunk in unique.chunks(CHUNK_SIZE) {
            let joined = chunk.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(",");
            let body = self.http.get_text(&url, &[("symbol", joined)], &headers).await?;
            out.extend(parse_quotes(&body)?);
        }
        info!(requested = unique.len(), found = out.len(), "market quotes fetched");
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowest_active_rank_wins() {
        let body = r#"{"data":{"ath":[
            {"is_active":1,"cmc_rank":900,"quote":{"USD":{"price":1.0}}},
            {"is_active":0,"cmc_rank":5,"quote":{"USD":{"price":2.0}}},
            {"is_active":1,"cmc_rank":120,"circulating_supply":10.0,"quote":{"USD":{"price":3.0,"market_cap":30.0}}}
        ]}}"#;
        let quotes = parse_quotes(body).unwrap();
        let q = &quotes["ATH"];
        assert_eq!(q.price, Some(3.0));
        assert_eq!(q.market_cap, Some(30.0));
        assert_eq!(q.rank, Some(120));
        assert_eq!(q.circulating_supply, Some(10.0));
    }

    #[test]
    fn inactive_only_falls_back_to_first() {
        let body = r#"{"data":{"OLD":[{"is_active":0,"cmc_rank":3,"quote":{"USD":{"price":7.0}}},
            {"is_active":0,"cmc_rank":1,"quote":{"USD":{"price":8.0}}}]}}"#;
        assert_eq!(parse_quotes(body).unwrap()["OLD"].price, Some(7.0));
    }

    #[test]
    fn single_object_payload_is_accepted() {
        let body = r#"{"data":{"AVAX":{"cmc_rank":12,"quote":{"USD":{"price":30.5,"volume_24h":1e9,"percent_change_24h":-2.5}}}}}"#;
        let q = &parse_quotes(body).unwrap()["AVAX"];
        assert_eq!(q.price, Some(30.5));
        assert_eq!(q.volume_24h, Some(1e9));
        assert_eq!(q.percent_change_24h, Some(-2.5));
        assert_eq!(q.percent_change_7d, None);
    }

    #[test]
    fn empty_listing_is_skipped() {
        assert!(parse_quotes(r#"{"data":{"NONE":[]}}"#).unwrap().is_empty());
        assert!(parse_quotes(r#"{"status":{"error_code":0}}"#).unwrap().is_empty());
    }

    #[test]
    fn client_requires_key() {
        let http = HttpFetcher::new(reqwest::Client::new(), std::time::Duration::ZERO, Default::default());
        assert!(matches!(
            CmcClient::new("https://pro-api.coinmarketcap.com", " ", http),
            Err(FetchError::MissingKey(_))
        ));
    }
}
