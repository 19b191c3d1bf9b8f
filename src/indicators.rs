use crate::klines::Candle;
use serde::{Deserialize, Serialize};
use ta::Next;
use ta::indicators::SimpleMovingAverage;

pub const DEFAULT_RSI_PERIOD: usize = 14;

/// Per-token indicators derived from one candle window. Every field is null
/// when the window could not support it. Serialized under the column names
/// the static site reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSet {
    #[serde(rename = "rsi_d")]
    pub rsi_daily: Option<f64>,
    #[serde(rename = "rsi_h4")]
    pub rsi_4h: Option<f64>,
    /// Highest `high` inside the fetched window, not a global all-time high.
    #[serde(rename = "ath")]
    pub ath_price: Option<f64>,
    pub ath_timestamp: Option<i64>,
    #[serde(rename = "vol7_avg")]
    pub avg_volume_7d: Option<f64>,
    #[serde(rename = "vol30_avg")]
    pub avg_volume_30d: Option<f64>,
}

impl IndicatorSet {
    pub fn from_candles(daily: &[Candle], closes_4h: &[f64], period: usize) -> Self {
        let closes: Vec<f64> = daily.iter().map(|c| c.close).collect();
        let volumes: Vec<f64> = daily.iter().map(|c| c.volume).collect();
        let ath = window_high(daily);
        Self {
            rsi_daily: wilder_rsi(&closes, period),
            rsi_4h: wilder_rsi(closes_4h, period),
            ath_price: ath.map(|(price, _)| price),
            ath_timestamp: ath.map(|(_, ts)| ts),
            avg_volume_7d: tail_mean(&volumes, 7),
            avg_volume_30d: tail_mean(&volumes, 30),
        }
    }
}

/// Wilder RSI: simple average of the first `period` deltas, then
/// `avg = (avg * (period - 1) + current) / period` for every later delta.
/// Zero average loss yields 100, including a perfectly flat series.
pub fn wilder_rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let mut gain = 0.0;
    let mut loss = 0.0;
    for w in closes[..=period].windows(2) {
        let delta = w[1] - w[0];
        if delta > 0.0 {
            gain += delta;
        } else {
            loss += -delta;
        }
    }
    let p = period as f64;
    let mut avg_gain = gain / p;
    let mut avg_loss = loss / p;

    for w in closes[period..].windows(2) {
        let delta = w[1] - w[0];
        let (g, l) = if delta > 0.0 { (delta, 0.0) } else { (0.0, -delta) };
        avg_gain = (avg_gain * (p - 1.0) + g) / p;
        avg_loss = (avg_loss * (p - 1.0) + l) / p;
    }

    if avg_loss == 0.0 {
        return Some(100.0);
    }
    Some(100.0 - 100.0 / (1.0 + avg_gain / avg_loss))
}

/// Maximum `high` and the timestamp of the first candle reaching it.
pub fn window_high(candles: &[Candle]) -> Option<(f64, i64)> {
    candles.iter().fold(None, |best, c| match best {
        Some((high, _)) if high >= c.high => best,
        _ => Some((c.high, c.timestamp)),
    })
}

/// Arithmetic mean of the last `window` values (fewer when the series is
/// shorter). Only the tail is fed to the SMA, so it never drifts over long
/// series.
pub fn tail_mean(values: &[f64], window: usize) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sma = SimpleMovingAverage::new(window).ok()?;
    let tail = &values[values.len().saturating_sub(window)..];
    tail.iter().fold(None, |_, v| Some(sma.next(*v)))
}
