use crate::catalog::{AliasTable, AliasValue};
use crate::indicators::DEFAULT_RSI_PERIOD;
use crate::klines::Venue;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

// CONFIGURATION STRUCTS
// Every section falls back to its defaults, so a config file only needs the
// keys it changes.

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SheetConfig {
    pub csv_url: String,
    pub asset_column: String, // matched case-insensitively
    pub date_column: String,  // matched exactly
    pub recent_days: f64,
    pub fallback_days: f64,
    pub max_attempts: u32,
}

impl Default for SheetConfig {
    fn default() -> Self {
        Self {
            csv_url: "https://docs.google.com/spreadsheets/d/1c2-v0yZdroahwSqKn7yTZ4osQZa_DCf2onTTvPqJnc8/export?format=csv&gid=916004394".to_string(),
            asset_column: "asset".to_string(),
            date_column: "DateKey".to_string(),
            recent_days: 2.0,
            fallback_days: 7.0,
            max_attempts: 3,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct KlineConfig {
    pub daily_limit: u32,  // e.g., 1000 daily candles
    pub hourly_limit: u32, // e.g., 500 hourly candles
    pub rsi_period: usize,
    pub venue_order: Vec<Venue>,
}

impl Default for KlineConfig {
    fn default() -> Self {
        Self {
            daily_limit: 1000,
            hourly_limit: 500,
            rsi_period: DEFAULT_RSI_PERIOD,
            venue_order: Venue::FALLBACK_ORDER.to_vec(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Endpoints {
    pub binance: String,
    pub bybit: String,
    pub okx: String,
    pub mexc: String,
    pub coinmarketcap: String,
    pub defillama: String,
    pub coingecko: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            binance: "https://api.binance.com".to_string(),
            bybit: "https://api.bybit.com".to_string(),
            okx: "https://www.okx.com".to_string(),
            mexc: "https://api.mexc.com".to_string(),
            coinmarketcap: "https://pro-api.coinmarketcap.com".to_string(),
            defillama: "https://api.llama.fi".to_string(),
            coingecko: "https://api.coingecko.com/api/v3".to_string(),
        }
    }
}

impl Endpoints {
    pub fn venue(&self, venue: Venue) -> &str {
        match venue {
            Venue::Binance => &self.binance,
            Venue::Bybit => &self.bybit,
            Venue::Okx => &self.okx,
            Venue::Mexc => &self.mexc,
        }
    }
}

/// Minimum spacing between calls, per provider, in milliseconds.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ThrottleConfig {
    pub venue_ms: u64,
    pub coinmarketcap_ms: u64,
    pub defillama_ms: u64,
    pub coingecko_ms: u64,
    pub rate_limit_backoff_ms: u64,
    pub max_rate_limit_retries: u32,
    pub request_timeout_secs: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            venue_ms: 120,
            coinmarketcap_ms: 0,
            defillama_ms: 200,
            coingecko_ms: 2500,
            rate_limit_backoff_ms: 2000,
            max_rate_limit_retries: 2,
            request_timeout_secs: 20,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AliasConfig {
    /// Symbol to DeFiLlama chain name(s).
    pub chains: AliasTable,
    /// Symbol to CoinGecko id.
    pub coingecko: HashMap<String, String>,
}

impl Default for AliasConfig {
    fn default() -> Self {
        let chains = [
            ("ETH", "Ethereum"),
            ("AVAX", "Avalanche"),
            ("OP", "Optimism"),
            ("BNB", "BSC"),
            ("MATIC", "Polygon"),
            ("POL", "Polygon"),
            ("SOL", "Solana"),
            ("ARB", "Arbitrum"),
            ("ETC", "Ethereum Classic"),
        ]
        .into_iter()
        .map(|(sym, name)| (sym.to_string(), AliasValue::One(name.to_string())))
        .collect();

        let coingecko = [
            ("AVAX", "avalanche-2"),
            ("OP", "optimism"),
            ("ETC", "ethereum-classic"),
            ("CRV", "curve-dao-token"),
            ("SNX", "synthetix-network-token"),
            ("MORPHO", "morpho-token"),
            ("ATH", "aethir"),
        ]
        .into_iter()
        .map(|(sym, id)| (sym.to_string(), id.to_string()))
        .collect();

        Self { chains, coingecko }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AppConfig {
    // Nested structs organize the config logically
    pub sheet: SheetConfig,
    pub klines: KlineConfig,
    pub endpoints: Endpoints,
    pub throttle: ThrottleConfig,
    pub aliases: AliasConfig,
    pub token_timeout_secs: u64,
    /// Read from `CMC_API_KEY`, never from the file.
    #[serde(skip)]
    pub cmc_api_key: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sheet: SheetConfig::default(),
            klines: KlineConfig::default(),
            endpoints: Endpoints::default(),
            throttle: ThrottleConfig::default(),
            aliases: AliasConfig::default(),
            token_timeout_secs: 60,
            cmc_api_key: None,
        }
    }
}

impl AppConfig {
    /// Defaults, overlaid with the JSON file when given, then the environment.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                serde_json::from_slice(&content)
                    .with_context(|| format!("parsing config file {}", path.display()))?
            }
            None => AppConfig::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = var("CMC_API_KEY").filter(|k| !k.trim().is_empty()) {
            self.cmc_api_key = Some(key);
        }
        if let Some(url) = var("SHEET_CSV_URL").filter(|u| !u.trim().is_empty()) {
            self.sheet.csv_url = url;
        }
    }

    pub fn token_timeout(&self) -> Duration {
        Duration::from_secs(self.token_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: AppConfig = serde_json::from_str(
            r#"{"sheet":{"recent_days":3},"klines":{"venue_order":["MEXC","BINANCE"]},"aliases":{"chains":{"POL":["Polygon","Polygon zkEVM"]}}}"#,
        )
        .unwrap();
        assert_eq!(config.sheet.recent_days, 3.0);
        assert_eq!(config.sheet.fallback_days, 7.0);
        assert_eq!(config.sheet.date_column, "DateKey");
        assert_eq!(config.klines.venue_order, vec![Venue::Mexc, Venue::Binance]);
        assert_eq!(config.klines.rsi_period, 14);
        assert_eq!(config.aliases.chains["POL"].names(), vec!["Polygon", "Polygon zkEVM"]);
        assert_eq!(config.token_timeout_secs, 60);
    }

    #[test]
    fn env_overrides_key_and_sheet() {
        let mut config = AppConfig::default();
        config.apply_env(|key| match key {
            "CMC_API_KEY" => Some("secret".to_string()),
            "SHEET_CSV_URL" => Some("http://localhost/sheet.csv".to_string()),
            _ => None,
        });
        assert_eq!(config.cmc_api_key.as_deref(), Some("secret"));
        assert_eq!(config.sheet.csv_url, "http://localhost/sheet.csv");

        let mut untouched = AppConfig::default();
        untouched.apply_env(|_| Some("  ".to_string()));
        assert_eq!(untouched.cmc_api_key, None);
    }

    #[test]
    fn default_aliases_cover_common_chains() {
        let aliases = AliasConfig::default();
        assert_eq!(aliases.chains["BNB"], AliasValue::One("BSC".into()));
        assert_eq!(aliases.coingecko["AVAX"], "avalanche-2");
    }
}
