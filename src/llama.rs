//! DeFiLlama catalogs and TVL resolution for a canonical symbol.

use crate::catalog::{AliasTable, CatalogCache, CatalogEntry, match_best};
use crate::error::{FetchError, FetchResult};
use crate::http::HttpFetcher;
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

#[async_trait]
pub trait CatalogProvider: Send + Sync {
    async fn fetch_protocols(&self) -> FetchResult<Vec<CatalogEntry>>;

    async fn fetch_chains(&self) -> FetchResult<Vec<CatalogEntry>>;

    /// Current TVL of one protocol.
    async fn fetch_protocol_tvl(&self, slug: &str) -> FetchResult<f64>;
}

#[derive(Deserialize)]
struct LlamaProtocol {
    name: Option<String>,
    symbol: Option<String>,
    tvl: Option<f64>,
    slug: Option<String>,
}

#[derive(Deserialize)]
struct LlamaChain {
    name: Option<String>,
    #[serde(rename = "tokenSymbol")]
    token_symbol: Option<String>,
    tvl: Option<f64>,
}

/// DeFiLlama uses "-" for protocols without a token.
fn clean_symbol(symbol: Option<String>) -> Option<String> {
    symbol.filter(|s| !s.trim().is_empty() && s.trim() != "-")
}

pub struct LlamaClient {
    base_url: String,
    http: HttpFetcher,
}

impl LlamaClient {
    pub fn new(base_url: &str, http: HttpFetcher) -> Self {
        Self {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            http,
        }
    }
}

#[async_trait]
impl CatalogProvider for LlamaClient {
    async fn fetch_protocols(&self) -> FetchResult<Vec<CatalogEntry>> {
        let url = format!("{}/protocols", self.base_url);
        let raw: Vec<LlamaProtocol> = self.http.get_json(&url, &[], &HeaderMap::new()).await?;
        Ok(raw
            .into_iter()
            .filter_map(|p| {
                Some(CatalogEntry {
                    name: p.name?,
                    symbol: clean_symbol(p.symbol),
                    tvl: p.tvl,
                    slug: p.slug,
                })
            })
            .collect())
    }

    async fn fetch_chains(&self) -> FetchResult<Vec<CatalogEntry>> {
        let url = format!("{}/chains", self.base_url);
        let raw: Vec<LlamaChain> = self.http.get_json(&url, &[], &HeaderMap::new()).await?;
        Ok(raw
            .into_iter()
            .filter_map(|c| {
                Some(CatalogEntry {
                    name: c.name?,
                    symbol: clean_symbol(c.token_symbol),
                    tvl: c.tvl,
                    slug: None,
                })
            })
            .collect())
    }

    async fn fetch_protocol_tvl(&self, slug: &str) -> FetchResult<f64> {
        let url = format!("{}/tvl/{}", self.base_url, slug);
        let value: serde_json::Value = self.http.get_json(&url, &[], &HeaderMap::new()).await?;
        value
            .as_f64()
            .ok_or_else(|| FetchError::Decode(format!("tvl for {slug} is not a number: {value}")))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TvlMatch {
    pub tvl: Option<f64>,
    /// `protocol:<slug>` or `chain:<name>`.
    pub source: Option<String>,
}

/// Protocol match first (its TVL fetched by slug), chain match second.
pub struct TvlResolver {
    provider: Arc<dyn CatalogProvider>,
    cache: Arc<CatalogCache>,
    chain_aliases: AliasTable,
}

impl TvlResolver {
    pub fn new(provider: Arc<dyn CatalogProvider>, cache: Arc<CatalogCache>, chain_aliases: AliasTable) -> Self {
        Self {
            provider,
            cache,
            chain_aliases,
        }
    }

    pub async fn resolve(&self, symbol: &str) -> TvlMatch {
        match self.cache.protocols(|| self.provider.fetch_protocols()).await {
            Ok(protocols) => {
                if let Some(slug) = match_best(symbol, protocols, None).and_then(|p| p.slug.clone()) {
                    match self.provider.fetch_protocol_tvl(&slug).await {
                        Ok(tvl) => {
                            return TvlMatch {
                                tvl: Some(tvl),
                                source: Some(format!("protocol:{slug}")),
                            };
                        }
                        Err(e) => debug!(symbol, slug = %slug, error = %e, "protocol tvl unavailable"),
                    }
                }
            }
            Err(e) => warn!(error = %e, "protocol catalog unavailable"),
        }

        match self.cache.chains(|| self.provider.fetch_chains()).await {
            Ok(chains) => {
                if let Some(chain) = match_best(symbol, chains, Some(&self.chain_aliases)) {
                    if let Some(tvl) = chain.tvl {
                        return TvlMatch {
                            tvl: Some(tvl),
                            source: Some(format!("chain:{}", chain.name)),
                        };
                    }
                }
            }
            Err(e) => warn!(error = %e, "chain catalog unavailable"),
        }

        TvlMatch::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::AliasValue;
    use std::collections::HashMap;

    struct StaticTvl(HashMap<&'static str, f64>);

    #[async_trait]
    impl CatalogProvider for StaticTvl {
        async fn fetch_protocols(&self) -> FetchResult<Vec<CatalogEntry>> {
            Err(FetchError::Api("prefilled".into()))
        }

        async fn fetch_chains(&self) -> FetchResult<Vec<CatalogEntry>> {
            Err(FetchError::Api("prefilled".into()))
        }

        async fn fetch_protocol_tvl(&self, slug: &str) -> FetchResult<f64> {
            self.0
                .get(slug)
                .copied()
                .ok_or_else(|| FetchError::Status { status: 404, url: slug.into() })
        }
    }

    fn resolver(tvls: &[(&'static str, f64)]) -> TvlResolver {
        let protocols = vec![
            CatalogEntry {
                name: "Curve DEX".into(),
                symbol: Some("CRV".into()),
                tvl: Some(2.0),
                slug: Some("curve-dex".into()),
            },
            CatalogEntry {
                name: "Broken".into(),
                symbol: Some("BRK".into()),
                tvl: Some(1.0),
                slug: Some("broken".into()),
            },
        ];
        let chains = vec![
            CatalogEntry {
                name: "Avalanche".into(),
                symbol: Some("AVAX".into()),
                tvl: Some(1_500.0),
                slug: None,
            },
            CatalogEntry {
                name: "Broken".into(),
                symbol: None,
                tvl: None,
                slug: None,
            },
        ];
        let mut aliases = AliasTable::new();
        aliases.insert("AVAX".into(), AliasValue::One("Avalanche".into()));
        TvlResolver::new(
            Arc::new(StaticTvl(tvls.iter().copied().collect())),
            Arc::new(CatalogCache::with_entries(protocols, chains)),
            aliases,
        )
    }

    #[test]
    fn placeholder_symbols_are_dropped() {
        assert_eq!(clean_symbol(Some("-".into())), None);
        assert_eq!(clean_symbol(Some(" ".into())), None);
        assert_eq!(clean_symbol(Some("CRV".into())), Some("CRV".into()));
    }

    #[tokio::test]
    async fn protocol_tvl_wins() {
        let m = resolver(&[("curve-dex", 1_234.5)]).resolve("CRV").await;
        assert_eq!(m.tvl, Some(1_234.5));
        assert_eq!(m.source.as_deref(), Some("protocol:curve-dex"));
    }

    #[tokio::test]
    async fn chain_is_the_fallback() {
        let m = resolver(&[]).resolve("AVAX").await;
        assert_eq!(m.tvl, Some(1_500.0));
        assert_eq!(m.source.as_deref(), Some("chain:Avalanche"));
    }

    #[tokio::test]
    async fn unresolved_is_null() {
        let m = resolver(&[]).resolve("BRK").await;
        assert_eq!(m, TvlMatch::default());
        assert_eq!(resolver(&[]).resolve("ZZZ").await, TvlMatch::default());
    }
}
