//! Fuzzy matching of canonical symbols against chain/protocol catalogs.

use crate::error::FetchResult;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use tokio::sync::OnceCell;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub symbol: Option<String>,
    pub tvl: Option<f64>,
    pub slug: Option<String>,
}

/// Alias values in config can be a single name or a list of names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AliasValue {
    One(String),
    Many(Vec<String>),
}

impl AliasValue {
    pub fn names(&self) -> Vec<&str> {
        match self {
            AliasValue::One(name) => vec![name.as_str()],
            AliasValue::Many(names) => names.iter().map(String::as_str).collect(),
        }
    }
}

pub type AliasTable = HashMap<String, AliasValue>;

/// Lowercase, ASCII alphanumerics only.
pub fn norm(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Exact pass (symbol field, or name equal to the symbol or an alias), then
/// substring pass on normalized names. Within a pass the largest TVL wins;
/// equal TVLs keep catalog order.
pub fn match_best<'a>(
    symbol: &str,
    catalog: &'a [CatalogEntry],
    aliases: Option<&AliasTable>,
) -> Option<&'a CatalogEntry> {
    let mut candidates: Vec<&str> = aliases
        .and_then(|table| table.get(symbol))
        .map(AliasValue::names)
        .unwrap_or_default();
    candidates.push(symbol);

    let exact: Vec<&CatalogEntry> = catalog
        .iter()
        .filter(|e| {
            e.symbol.as_deref().is_some_and(|s| s.eq_ignore_ascii_case(symbol))
                || candidates.iter().any(|c| e.name.eq_ignore_ascii_case(c))
        })
        .collect();
    if let Some(best) = largest_tvl(exact) {
        return Some(best);
    }

    let needles: Vec<String> = candidates.iter().map(|c| norm(c)).filter(|n| !n.is_empty()).collect();
    let fuzzy: Vec<&CatalogEntry> = catalog
        .iter()
        .filter(|e| {
            let name = norm(&e.name);
            needles.iter().any(|n| name.contains(n.as_str()))
        })
        .collect();
    largest_tvl(fuzzy)
}

fn largest_tvl(mut entries: Vec<&CatalogEntry>) -> Option<&CatalogEntry> {
    entries.sort_by(|a, b| {
        b.tvl
            .unwrap_or(0.0)
            .partial_cmp(&a.tvl.unwrap_or(0.0))
            .unwrap_or(Ordering::Equal)
    });
    entries.into_iter().next()
}

/// Catalog snapshots for one run. Each list is fetched at most once; a failed
/// fetch is not cached, so the next lookup tries again.
#[derive(Default)]
pub struct CatalogCache {
    protocols: OnceCell<Vec<CatalogEntry>>,
    chains: OnceCell<Vec<CatalogEntry>>,
}

impl CatalogCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cache that is already populated and never fetches.
    pub fn with_entries(protocols: Vec<CatalogEntry>, chains: Vec<CatalogEntry>) -> Self {
        Self {
            protocols: OnceCell::new_with(Some(protocols)),
            chains: OnceCell::new_with(Some(chains)),
        }
    }

    pub async fn protocols<F, Fut>(&self, load: F) -> FetchResult<&[CatalogEntry]>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FetchResult<Vec<CatalogEntry>>>,
    {
        self.protocols.get_or_try_init(load).await.map(Vec::as_slice)
    }

    pub async fn chains<F, Fut>(&self, load: F) -> FetchResult<&[CatalogEntry]>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FetchResult<Vec<CatalogEntry>>>,
    {
        self.chains.get_or_try_init(load).await.map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    fn entry(name: &str, symbol: Option<&str>, tvl: Option<f64>) -> CatalogEntry {
        CatalogEntry {
            name: name.to_string(),
            symbol: symbol.map(str::to_string),
            tvl,
            slug: Some(norm(name)),
        }
    }

    #[test]
    fn exact_symbol_beats_bigger_substring() {
        let catalog = vec![
            entry("Avalanche", Some("AVAX"), Some(5.0)),
            entry("Avalanche Bridge", None, Some(100.0)),
        ];
        let best = match_best("AVAX", &catalog, None).unwrap();
        assert_eq!(best.name, "Avalanche");
    }

    #[test]
    fn substring_ties_break_on_tvl() {
        let catalog = vec![
            entry("Curve Finance", Some("CRV"), Some(10.0)),
            entry("Uniswap V2", None, Some(50.0)),
            entry("Uniswap V3", None, Some(900.0)),
        ];
        let best = match_best("UNI", &catalog, None).unwrap();
        assert_eq!(best.name, "Uniswap V3");
    }

    #[test]
    fn missing_tvl_sorts_as_zero() {
        let catalog = vec![entry("Jupiter Perps", None, None), entry("Jupiter DCA", None, Some(1.0))];
        assert_eq!(match_best("JUP", &catalog, None).unwrap().name, "Jupiter DCA");
    }

    #[test]
    fn alias_resolves_display_name() {
        let catalog = vec![
            entry("BSC", Some("BNB"), Some(5.0)),
            entry("Ethereum", Some("ETH"), Some(50.0)),
            entry("Ethereum Classic", Some("ETC"), Some(1.0)),
        ];
        let mut aliases = AliasTable::new();
        aliases.insert("ETC".into(), AliasValue::One("Ethereum Classic".into()));
        aliases.insert("POL".into(), AliasValue::Many(vec!["Polygon".into(), "Ethereum".into()]));

        assert_eq!(match_best("ETC", &catalog, Some(&aliases)).unwrap().name, "Ethereum Classic");
        assert_eq!(match_best("POL", &catalog, Some(&aliases)).unwrap().name, "Ethereum");
    }

    #[test]
    fn exact_name_is_case_insensitive() {
        let catalog = vec![entry("Solana", None, Some(1.0)), entry("Solana Bridge", None, Some(9.0))];
        let mut aliases = AliasTable::new();
        aliases.insert("SOL".into(), AliasValue::One("solana".into()));
        assert_eq!(match_best("SOL", &catalog, Some(&aliases)).unwrap().name, "Solana");
    }

    #[test]
    fn no_match_is_none() {
        let catalog = vec![entry("Aave", Some("AAVE"), Some(1.0))];
        assert_eq!(match_best("ZZZ", &catalog, None), None);
        assert_eq!(match_best("ZZZ", &[], None), None);
    }

    #[test]
    fn alias_values_deserialize_both_shapes() {
        let table: AliasTable = serde_json::from_str(r#"{"ETH":"Ethereum","POL":["Polygon","Polygon zkEVM"]}"#).unwrap();
        assert_eq!(table["ETH"].names(), vec!["Ethereum"]);
        assert_eq!(table["POL"].names(), vec!["Polygon", "Polygon zkEVM"]);
    }

    #[tokio::test]
    async fn cache_populates_once() {
        let cache = CatalogCache::new();
        let loads = AtomicUsize::new(0);
        for _ in 0..3 {
            let list = cache
                .protocols(|| async {
                    loads.fetch_add(1, AtomicOrdering::SeqCst);
                    Ok(vec![entry("Aave", Some("AAVE"), Some(1.0))])
                })
                .await
                .unwrap();
            assert_eq!(list.len(), 1);
        }
        assert_eq!(loads.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_load_is_retried() {
        let cache = CatalogCache::new();
        let first = cache
            .chains(|| async { Err(FetchError::Api("down".into())) })
            .await;
        assert!(first.is_err());
        let second = cache.chains(|| async { Ok(vec![entry("Ethereum", None, None)]) }).await.unwrap();
        assert_eq!(second[0].name, "Ethereum");
    }

    #[tokio::test]
    async fn prefilled_cache_never_loads() {
        let cache = CatalogCache::with_entries(vec![], vec![entry("Ethereum", None, None)]);
        let chains = cache
            .chains(|| async { Err(FetchError::Api("should not load".into())) })
            .await
            .unwrap();
        assert_eq!(chains.len(), 1);
    }
}
