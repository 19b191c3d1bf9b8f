//! Ticker normalization: raw spreadsheet cells to canonical `{symbol, venue}`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;

/// Quote currencies stripped from the end of a pair. Order is priority:
/// only the first matching suffix is removed.
pub const QUOTES: &[&str] = &["USDT", "USDC", "USD", "BTC", "ETH", "EUR", "DAI"];

static SEPARATORS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[:\-_/]").unwrap());
static EVM_ADDRESS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^0x[0-9a-fA-F]{4,}$").unwrap());
static LEVERAGE_SUFFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(PERP|\d+L|\d+S)$").unwrap());
static NON_ALNUM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^A-Z0-9]").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanonicalSymbol {
    pub symbol: String,
    /// Uppercase exchange name, empty when the ticker carried none.
    pub venue: String,
}

impl CanonicalSymbol {
    pub fn key(&self) -> String {
        format!("{}|{}", self.symbol, self.venue)
    }
}

/// Returns `None` when nothing is left after stripping, e.g. `"USDT"` alone.
///
/// A venue is only extracted from the `EXCHANGE:PAIR` form. `EXCHANGE-PAIR`
/// and slash forms keep an empty venue.
pub fn normalize(raw: &str) -> Option<CanonicalSymbol> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != '[' && *c != ']').collect();
    let token = cleaned.split_whitespace().next()?;

    let (venue, mut base) = match token.split_once(':') {
        Some((left, right)) => (left.to_uppercase(), right),
        None => (String::new(), token),
    };

    // last segment, unless it is a bare quote as in `AVAX/USDT`
    let segments: Vec<&str> = SEPARATORS.split(base).filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        [.., pair, quote] if QUOTES.iter().any(|q| q.eq_ignore_ascii_case(quote)) => base = *pair,
        [.., last] => base = *last,
        [] => {}
    }

    if EVM_ADDRESS.is_match(base) {
        return Some(CanonicalSymbol {
            symbol: base.to_uppercase(),
            venue,
        });
    }

    let upper = base.to_uppercase();
    let mut stripped = LEVERAGE_SUFFIX.replace(&upper, "").into_owned();
    if let Some(quote) = QUOTES.iter().find(|q| stripped.ends_with(*q)) {
        stripped.truncate(stripped.len() - quote.len());
    }
    let symbol = NON_ALNUM.replace_all(&stripped, "").into_owned();

    if symbol.is_empty() {
        return None;
    }
    Some(CanonicalSymbol { symbol, venue })
}

/// Splits a pair such as `AVAXUSDT` into `("AVAX", "USDT")`.
pub fn split_pair(pair: &str) -> Option<(&str, &str)> {
    QUOTES.iter().find_map(|quote| {
        pair.strip_suffix(quote)
            .filter(|base| !base.is_empty())
            .map(|base| (base, *quote))
    })
}

/// Keeps the first item per key, preserving input order.
pub fn uniq_by<T, F>(items: Vec<T>, key: F) -> Vec<T>
where
    F: Fn(&T) -> String,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(key(item)))
        .collect()
}
