//! This module contains the batch pipeline: sheet, quotes, enrichment, output.

use crate::catalog::CatalogCache;
use crate::config::AppConfig;
use crate::enrich::{Enricher, TokenRecord};
use crate::gecko::GeckoClient;
use crate::http::{HttpFetcher, RetryPolicy, build_client};
use crate::klines::{CandleProvider, VenueClient};
use crate::llama::{LlamaClient, TvlResolver};
use crate::market::{CmcClient, MarketQuote, QuoteProvider};
use crate::ohlc::MultiVenueFetcher;
use crate::sheet;
use crate::storage_utils::AsyncStorageManager;
use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

pub const OUTPUT_NAME: &str = "data";

/// Shape of `data.json`.
#[derive(Serialize, Deserialize, Debug)]
pub struct OutputData {
    pub updated_at: String,
    pub tokens: Vec<TokenRecord>,
}

fn fetcher(client: &Client, config: &AppConfig, spacing_ms: u64) -> HttpFetcher {
    let policy = RetryPolicy {
        max_rate_limit_retries: config.throttle.max_rate_limit_retries,
        backoff: Duration::from_millis(config.throttle.rate_limit_backoff_ms),
    };
    HttpFetcher::new(client.clone(), Duration::from_millis(spacing_ms), policy)
}

pub fn build_enricher(client: &Client, config: &AppConfig) -> Enricher {
    let providers: Vec<Arc<dyn CandleProvider>> = config
        .klines
        .venue_order
        .iter()
        .map(|venue| {
            Arc::new(VenueClient::new(
                *venue,
                config.endpoints.venue(*venue),
                fetcher(client, config, config.throttle.venue_ms),
            )) as Arc<dyn CandleProvider>
        })
        .collect();
    let ohlc = MultiVenueFetcher::new(providers, config.klines.daily_limit, config.klines.hourly_limit);

    let llama = LlamaClient::new(
        &config.endpoints.defillama,
        fetcher(client, config, config.throttle.defillama_ms),
    );
    let tvl = TvlResolver::new(Arc::new(llama), Arc::new(CatalogCache::new()), config.aliases.chains.clone());

    let gecko = GeckoClient::new(
        &config.endpoints.coingecko,
        config.aliases.coingecko.clone(),
        fetcher(client, config, config.throttle.coingecko_ms),
    );

    Enricher::new(ohlc, tvl, config.klines.rsi_period, config.token_timeout()).with_gecko(gecko)
}

/// Market quotes never abort the batch: no key or a failed call yields an
/// empty map.
pub async fn fetch_quotes(client: &Client, config: &AppConfig, symbols: &[String]) -> HashMap<String, MarketQuote> {
    if symbols.is_empty() {
        return HashMap::new();
    }
    let key = config.cmc_api_key.as_deref().unwrap_or_default();
    let cmc = match CmcClient::new(
        &config.endpoints.coinmarketcap,
        key,
        fetcher(client, config, config.throttle.coinmarketcap_ms),
    ) {
        Ok(cmc) => cmc,
        Err(e) => {
            warn!(error = %e, "market quotes disabled");
            return HashMap::new();
        }
    };
    match cmc.quotes(symbols).await {
        Ok(quotes) => quotes,
        Err(e) => {
            warn!(error = %e, "market quotes unavailable");
            HashMap::new()
        }
    }
}

/// Runs the full batch and returns the enriched records. Only a failure to
/// read the sheet is an error.
pub async fn run_enrichment(config: &AppConfig, now: DateTime<Utc>) -> Result<Vec<TokenRecord>> {
    let client = build_client(Duration::from_secs(config.throttle.request_timeout_secs))?;

    // Step 1: Read alerts from the sheet
    let alerts = sheet::read_alerts(&client, &config.sheet, now).await?;
    if alerts.is_empty() {
        info!("no alerted tokens in window");
        return Ok(Vec::new());
    }

    // Step 2: Market quotes for the whole batch
    let symbols: Vec<String> = alerts.iter().map(|a| a.canonical.symbol.clone()).collect();
    let quotes = fetch_quotes(&client, config, &symbols).await;

    // Step 3: Per-token enrichment
    let enricher = build_enricher(&client, config);
    Ok(enricher.enrich_all(&alerts, &quotes).await)
}

/// Runs the batch and writes `data.json`. On failure an empty token list is
/// written and the error is returned.
pub async fn run_pipeline(config: &AppConfig, storage: &AsyncStorageManager) -> Result<(Vec<TokenRecord>, DateTime<Utc>)> {
    let now = Utc::now();
    let result = run_enrichment(config, now).await;

    let tokens = match &result {
        Ok(records) => records.clone(),
        Err(e) => {
            error!(error = %e, "enrichment failed, writing empty output");
            Vec::new()
        }
    };
    let output = OutputData {
        updated_at: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        tokens,
    };
    let path = storage.save(OUTPUT_NAME, &output).await?;
    info!(path = %path.display(), tokens = output.tokens.len(), "output written");

    result.map(|records| (records, now))
}
