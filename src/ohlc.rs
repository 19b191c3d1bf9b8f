//! Multi-venue candle acquisition: preferred venue first, then the fixed
//! fallback order, trying a few pair spellings on each.

use crate::klines::{Candle, CandleProvider, Interval, Venue};
use crate::symbols::split_pair;
use std::sync::Arc;
use tracing::{debug, info};

/// Quotes tried when building pair spellings.
const VARIANT_QUOTES: &[&str] = &["USDT", "USDC", "USD"];

pub struct MultiVenueFetcher {
    /// Providers in fallback order.
    providers: Vec<Arc<dyn CandleProvider>>,
    daily_limit: u32,
    hourly_limit: u32,
}

impl MultiVenueFetcher {
    pub fn new(providers: Vec<Arc<dyn CandleProvider>>, daily_limit: u32, hourly_limit: u32) -> Self {
        Self {
            providers,
            daily_limit,
            hourly_limit,
        }
    }

    /// Preferred venue first when it is supported, then everything else in
    /// the configured order.
    pub fn venue_order(&self, preferred: &str) -> Vec<Arc<dyn CandleProvider>> {
        let preferred = Venue::from_name(preferred);
        let mut ordered: Vec<Arc<dyn CandleProvider>> = self
            .providers
            .iter()
            .filter(|p| Some(p.venue()) == preferred)
            .cloned()
            .collect();
        ordered.extend(
            self.providers
                .iter()
                .filter(|p| Some(p.venue()) != preferred)
                .cloned(),
        );
        ordered
    }

    /// Daily candles, oldest first. Empty when no venue/spelling has data.
    pub async fn fetch_daily(&self, preferred_venue: &str, pair_hint: &str) -> Vec<Candle> {
        self.first_non_empty(preferred_venue, pair_hint, Interval::Daily, self.daily_limit)
            .await
    }

    /// Approximate 4h closes: every 4th hourly close (indices 3, 7, 11, ...),
    /// counted from the start of the returned hourly window.
    pub async fn fetch_intraday_4h(&self, preferred_venue: &str, pair_hint: &str) -> Vec<f64> {
        let hourly = self
            .first_non_empty(preferred_venue, pair_hint, Interval::Hourly, self.hourly_limit)
            .await;
        downsample_every_4th(&hourly)
    }

    async fn first_non_empty(&self, preferred_venue: &str, pair_hint: &str, interval: Interval, limit: u32) -> Vec<Candle> {
        let variants = pair_variants(pair_hint);
        for provider in self.venue_order(preferred_venue) {
            for pair in &variants {
                match provider.fetch_candles(pair, interval, limit).await {
                    Ok(candles) if !candles.is_empty() => {
                        info!(venue = %provider.venue(), pair = %pair, ?interval, count = candles.len(), "candles fetched");
                        return candles;
                    }
                    Ok(_) => debug!(venue = %provider.venue(), pair = %pair, "empty candle response"),
                    Err(e) => debug!(venue = %provider.venue(), pair = %pair, error = %e, rate_limited = e.is_rate_limit(), "candle fetch failed"),
                }
            }
        }
        debug!(pair_hint, ?interval, "no venue returned candles");
        Vec::new()
    }
}

/// The hint itself, then the hint re-quoted in USDT, USDC and USD. A hint
/// that already ends in any known quote currency has its suffix replaced;
/// otherwise the quotes are appended.
pub fn pair_variants(pair_hint: &str) -> Vec<String> {
    let hint = pair_hint.trim().to_uppercase();
    let base = split_pair(&hint).map_or(hint.as_str(), |(base, _)| base).to_string();

    let mut variants = vec![hint.clone()];
    for quote in VARIANT_QUOTES {
        let candidate = format!("{base}{quote}");
        if !variants.contains(&candidate) {
            variants.push(candidate);
        }
    }
    variants.retain(|v| !v.is_empty());
    variants
}

pub fn downsample_every_4th(hourly: &[Candle]) -> Vec<f64> {
    hourly.iter().skip(3).step_by(4).map(|c| c.close).collect()
}
