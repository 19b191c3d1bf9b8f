//! Per-token enrichment: TVL, candles, indicators and derived ratios merged
//! into one flat record. Every stage degrades to null on failure.

use crate::gecko::GeckoClient;
use crate::indicators::{IndicatorSet, tail_mean};
use crate::llama::{TvlMatch, TvlResolver};
use crate::market::MarketQuote;
use crate::ohlc::MultiVenueFetcher;
use crate::sheet::AlertedSymbol;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One output row. Unknown values serialize as `null`, never as zero and
/// never omitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub symbol: String,
    pub venue: String,
    pub alert_date: Option<String>,

    pub price: Option<f64>,
    pub d24: Option<f64>,
    pub d7: Option<f64>,
    pub d30: Option<f64>,

    pub mc: Option<f64>,
    pub tvl: Option<f64>,
    pub tvl_source: Option<String>,
    pub mc_tvl: Option<f64>,

    pub vol_mc_24: Option<f64>,
    pub vol7_mc: Option<f64>,
    pub vol7_tvl: Option<f64>,
    pub var_vol_7_over_30: Option<f64>,

    #[serde(flatten)]
    pub indicators: IndicatorSet,
    pub ath_mult: Option<f64>,

    pub circulating_supply: Option<f64>,
    pub total_supply: Option<f64>,
    pub max_supply: Option<f64>,
    pub fdv: Option<f64>,
    pub rank: Option<u32>,
}

/// `a / b`, null when either side is unknown or `b` is zero.
fn ratio(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) if b != 0.0 => Some(a / b),
        _ => None,
    }
}

fn percent(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    ratio(a, b).map(|r| r * 100.0)
}

impl TokenRecord {
    /// Identity and market-quote fields; enrichment fields start null.
    pub fn new(token: &AlertedSymbol, quote: Option<&MarketQuote>) -> Self {
        let q = quote.cloned().unwrap_or_default();
        Self {
            symbol: token.canonical.symbol.clone(),
            venue: token.canonical.venue.clone(),
            alert_date: token.alert_date.clone(),
            price: q.price,
            d24: q.percent_change_24h,
            d7: q.percent_change_7d,
            d30: q.percent_change_30d,
            mc: q.market_cap,
            vol_mc_24: percent(q.volume_24h, q.market_cap),
            circulating_supply: q.circulating_supply,
            total_supply: q.total_supply,
            max_supply: q.max_supply,
            fdv: q.fully_diluted_market_cap,
            rank: q.rank,
            ..Self::default()
        }
    }

    fn apply_tvl(&mut self, m: TvlMatch) {
        self.tvl = m.tvl;
        self.tvl_source = m.source;
    }

    /// Ratios that combine quote, TVL and indicator fields.
    pub fn derive_ratios(&mut self) {
        let v7 = self.indicators.avg_volume_7d;
        self.mc_tvl = ratio(self.mc, self.tvl);
        self.var_vol_7_over_30 = ratio(v7, self.indicators.avg_volume_30d);
        self.vol7_mc = percent(v7, self.mc);
        self.vol7_tvl = percent(v7, self.tvl);
        self.ath_mult = match self.price {
            Some(p) if p > 0.0 => ratio(self.indicators.ath_price, Some(p)),
            _ => None,
        };
    }
}

pub struct Enricher {
    fetcher: MultiVenueFetcher,
    tvl: TvlResolver,
    gecko: Option<GeckoClient>,
    rsi_period: usize,
    token_timeout: Duration,
}

impl Enricher {
    pub fn new(fetcher: MultiVenueFetcher, tvl: TvlResolver, rsi_period: usize, token_timeout: Duration) -> Self {
        Self {
            fetcher,
            tvl,
            gecko: None,
            rsi_period,
            token_timeout,
        }
    }

    pub fn with_gecko(mut self, gecko: GeckoClient) -> Self {
        self.gecko = Some(gecko);
        self
    }

    /// Tokens are processed one after another; output order follows input.
    pub async fn enrich_all(&self, tokens: &[AlertedSymbol], quotes: &HashMap<String, MarketQuote>) -> Vec<TokenRecord> {
        let mut records = Vec::with_capacity(tokens.len());
        for (i, token) in tokens.iter().enumerate() {
            info!(symbol = %token.canonical.symbol, venue = %token.canonical.venue, "enriching {}/{}", i + 1, tokens.len());
            records.push(self.enrich_token(token, quotes.get(&token.canonical.symbol)).await);
        }
        records
    }

    /// Never fails. A timeout keeps the identity and quote fields only.
    pub async fn enrich_token(&self, token: &AlertedSymbol, quote: Option<&MarketQuote>) -> TokenRecord {
        let mut record = TokenRecord::new(token, quote);
        match tokio::time::timeout(self.token_timeout, self.gather(token)).await {
            Ok((tvl, indicators)) => {
                record.apply_tvl(tvl);
                record.indicators = indicators;
            }
            Err(_) => warn!(symbol = %token.canonical.symbol, "enrichment timed out"),
        }
        record.derive_ratios();
        record
    }

    async fn gather(&self, token: &AlertedSymbol) -> (TvlMatch, IndicatorSet) {
        let symbol = &token.canonical.symbol;
        let venue = &token.canonical.venue;
        let pair = format!("{symbol}USDT");

        let (tvl, (daily, closes_4h)) = futures::join!(self.tvl.resolve(symbol), async {
            let daily = self.fetcher.fetch_daily(venue, &pair).await;
            let closes_4h = self.fetcher.fetch_intraday_4h(venue, &pair).await;
            (daily, closes_4h)
        });

        let mut indicators = IndicatorSet::from_candles(&daily, &closes_4h, self.rsi_period);
        if daily.is_empty() {
            self.gecko_fallback(symbol, &mut indicators).await;
        }
        (tvl, indicators)
    }

    async fn gecko_fallback(&self, symbol: &str, indicators: &mut IndicatorSet) {
        let Some(gecko) = &self.gecko else {
            return;
        };
        let id = match gecko.find_id(symbol).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                debug!(symbol, "no coingecko id");
                return;
            }
            Err(e) => {
                debug!(symbol, error = %e, "coingecko search failed");
                return;
            }
        };

        match gecko.daily_volumes(&id).await {
            Ok(volumes) => {
                indicators.avg_volume_7d = tail_mean(&volumes, 7);
                indicators.avg_volume_30d = tail_mean(&volumes, 30);
            }
            Err(e) => debug!(symbol, id = %id, error = %e, "coingecko volumes unavailable"),
        }
        match gecko.ath(&id).await {
            Ok(ath) => {
                indicators.ath_price = ath.price;
                indicators.ath_timestamp = ath.timestamp;
            }
            Err(e) => debug!(symbol, id = %id, error = %e, "coingecko ath unavailable"),
        }
    }
}
