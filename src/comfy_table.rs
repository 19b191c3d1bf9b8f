use crate::enrich::TokenRecord;
use chrono::{DateTime, Utc};
use comfy_table::{
    Attribute, Cell, CellAlignment, Color, ContentArrangement, Table, modifiers::UTF8_ROUND_CORNERS,
    presets::UTF8_BORDERS_ONLY,
};

const OVERBOUGHT: f64 = 70.0;
const OVERSOLD: f64 = 30.0;

/// Compact human form: 1.23B, 45.6M, 7.8K.
fn format_compact(value: Option<f64>) -> String {
    let Some(v) = value else {
        return "-".to_string();
    };
    let abs = v.abs();
    if abs >= 1e9 {
        format!("{:.2}B", v / 1e9)
    } else if abs >= 1e6 {
        format!("{:.2}M", v / 1e6)
    } else if abs >= 1e3 {
        format!("{:.1}K", v / 1e3)
    } else {
        format!("{:.2}", v)
    }
}

fn format_price(value: Option<f64>) -> String {
    match value {
        Some(p) if p >= 1.0 => format!("{:.2}", p),
        Some(p) => format!("{:.6}", p),
        None => "-".to_string(),
    }
}

fn pct_cell(value: Option<f64>) -> Cell {
    let cell = match value {
        Some(v) => Cell::new(format!("{:+.2}%", v)).fg(if v >= 0.0 { Color::Green } else { Color::Red }),
        None => Cell::new("-").fg(Color::DarkGrey),
    };
    cell.set_alignment(CellAlignment::Right)
}

fn rsi_cell(value: Option<f64>) -> Cell {
    let cell = match value {
        Some(v) if v >= OVERBOUGHT => Cell::new(format!("{:.1}", v)).fg(Color::Red),
        Some(v) if v <= OVERSOLD => Cell::new(format!("{:.1}", v)).fg(Color::Green),
        Some(v) => Cell::new(format!("{:.1}", v)),
        None => Cell::new("-").fg(Color::DarkGrey),
    };
    cell.set_alignment(CellAlignment::Right)
}

fn right(text: String) -> Cell {
    Cell::new(text).set_alignment(CellAlignment::Right)
}

pub fn build_table(records: &[TokenRecord]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_BORDERS_ONLY)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            ["#", "Asset", "Venue", "Price", "7d", "MC", "TVL", "RSI D", "RSI 4h", "ATH x"]
                .into_iter()
                .map(|h| Cell::new(h).add_attribute(Attribute::Bold)),
        );

    for (i, r) in records.iter().enumerate() {
        let venue = if r.venue.is_empty() { "-" } else { r.venue.as_str() };
        table.add_row(vec![
            Cell::new(i + 1).fg(Color::DarkGrey),
            Cell::new(&r.symbol).fg(Color::Cyan),
            Cell::new(venue).fg(Color::DarkGrey),
            right(format_price(r.price)),
            pct_cell(r.d7),
            right(format_compact(r.mc)),
            right(format_compact(r.tvl)),
            rsi_cell(r.indicators.rsi_daily),
            rsi_cell(r.indicators.rsi_4h),
            right(r.ath_mult.map_or_else(|| "-".to_string(), |m| format!("{:.2}x", m))),
        ]);
    }
    table
}

pub fn run(records: &[TokenRecord], updated_at: DateTime<Utc>) {
    if records.is_empty() {
        println!("No tokens enriched.");
        return;
    }
    let title = format!("(Data taken at {} UTC)", updated_at.format("%d-%m-%Y %H:%M:%S"));
    println!("\n{}\n{}", title, build_table(records));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::IndicatorSet;

    #[test]
    fn compact_numbers() {
        assert_eq!(format_compact(Some(1_234_000_000.0)), "1.23B");
        assert_eq!(format_compact(Some(45_600_000.0)), "45.60M");
        assert_eq!(format_compact(Some(7_800.0)), "7.8K");
        assert_eq!(format_compact(Some(12.0)), "12.00");
        assert_eq!(format_compact(None), "-");
        assert_eq!(format_price(Some(0.00012345)), "0.000123");
    }

    #[test]
    fn table_lists_every_record() {
        let records = vec![
            TokenRecord {
                symbol: "AVAX".into(),
                venue: "BINANCE".into(),
                price: Some(35.0),
                indicators: IndicatorSet {
                    rsi_daily: Some(72.3),
                    ..IndicatorSet::default()
                },
                ..TokenRecord::default()
            },
            TokenRecord {
                symbol: "CRV".into(),
                ..TokenRecord::default()
            },
        ];
        let rendered = build_table(&records).to_string();
        assert!(rendered.contains("AVAX"));
        assert!(rendered.contains("CRV"));
        assert!(rendered.contains("72.3"));
        assert!(rendered.contains("35.00"));
    }
}
