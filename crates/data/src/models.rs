//! Data models for the screener and alert engine.
//!
//! Money and metric values use `rust_decimal::Decimal` throughout; the
//! records derive `sqlx::FromRow` where they map one-to-one onto a
//! table row.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// One alert subscription row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AlertRecord {
    pub id: i64,
    pub user_id: i64,
    pub ticker: Option<String>,
    /// Alert kind discriminator; parsed into a typed condition by the
    /// alert engine.
    pub kind: String,
    pub name: String,
    pub condition: JsonValue,
    pub frequency: String,
    pub active: bool,
    pub last_triggered: Option<DateTime<Utc>>,
    pub last_evaluated: Option<DateTime<Utc>>,
    pub trigger_count: i32,
}

/// Fields accepted when creating a subscription.
#[derive(Debug, Clone, Deserialize)]
pub struct NewAlert {
    pub user_id: i64,
    pub ticker: Option<String>,
    pub kind: String,
    pub name: String,
    pub condition: JsonValue,
    #[serde(default = "default_frequency")]
    pub frequency: String,
}

fn default_frequency() -> String {
    "daily".to_string()
}

/// Partial update for a subscription; absent fields keep their value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertUpdate {
    pub name: Option<String>,
    pub condition: Option<JsonValue>,
    pub frequency: Option<String>,
    pub active: Option<bool>,
}

/// Instrument identity row.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct InstrumentRecord {
    pub ticker: String,
    pub name: String,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub exchange: Option<String>,
    pub market_cap: Option<Decimal>,
}

/// Instrument metadata bundle handed to the alert evaluator: identity
/// plus the event dates its event alerts look at.
#[derive(Debug, Clone, Serialize)]
pub struct InstrumentMeta {
    pub instrument: InstrumentRecord,
    pub next_earnings: Option<NaiveDate>,
    pub last_buyback: Option<NaiveDate>,
}

/// Current quote derived from the latest price rows.
#[derive(Debug, Clone, Serialize)]
pub struct Quote {
    pub ticker: String,
    pub price: Decimal,
    pub change_1d: Option<Decimal>,
    pub change_1w: Option<Decimal>,
    pub change_1m: Option<Decimal>,
    pub as_of: DateTime<Utc>,
    /// Latest value per technical indicator name (e.g. "rsi").
    pub indicators: HashMap<String, Decimal>,
}

/// Percentage changes over 1 day / 1 week / 1 month, computed from
/// newest-first close prices (1 / 5 / 21 trading rows back).
#[must_use]
pub fn price_changes(closes: &[Decimal]) -> (Option<Decimal>, Option<Decimal>, Option<Decimal>) {
    let change = |back: usize| -> Option<Decimal> {
        let current = closes.first()?;
        let past = closes.get(back)?;
        if past.is_zero() {
            return None;
        }
        Some((current - past) / past * Decimal::from(100))
    };
    (change(1), change(5), change(21))
}

/// Latest fundamentals snapshot for one instrument.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct FundamentalsSnapshot {
    pub ticker: String,
    pub quarter_end: Option<NaiveDate>,
    pub pe_ratio: Option<Decimal>,
    pub pb_ratio: Option<Decimal>,
    pub roe: Option<Decimal>,
    pub roa: Option<Decimal>,
    pub eps: Option<Decimal>,
    pub net_income: Option<Decimal>,
    pub revenue: Option<Decimal>,
    pub operating_margin: Option<Decimal>,
    pub net_margin: Option<Decimal>,
    pub dividend_yield: Option<Decimal>,
    pub debt_to_equity: Option<Decimal>,
    pub eps_growth: Option<Decimal>,
    pub revenue_growth_yoy: Option<Decimal>,
    pub earnings_growth_yoy: Option<Decimal>,
}

impl FundamentalsSnapshot {
    /// Looks up a metric by its catalog name.
    #[must_use]
    pub fn metric(&self, name: &str) -> Option<Decimal> {
        match name {
            "pe_ratio" => self.pe_ratio,
            "pb_ratio" => self.pb_ratio,
            "roe" => self.roe,
            "roa" => self.roa,
            "eps" => self.eps,
            "net_income" => self.net_income,
            "revenue" => self.revenue,
            "operating_margin" => self.operating_margin,
            "net_margin" => self.net_margin,
            "dividend_yield" => self.dividend_yield,
            "debt_to_equity" => self.debt_to_equity,
            "eps_growth" => self.eps_growth,
            "revenue_growth_yoy" => self.revenue_growth_yoy,
            "earnings_growth_yoy" => self.earnings_growth_yoy,
            _ => None,
        }
    }
}

/// One screener result row, following the compiler's fixed projection.
#[derive(Debug, Clone, Serialize)]
pub struct ScreenerHit {
    pub ticker: String,
    pub name: String,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub market_cap: Option<Decimal>,
    pub metrics: HashMap<String, Option<Decimal>>,
}

/// A notification about to be emitted for a triggered alert.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationDraft {
    pub user_id: i64,
    pub alert_id: i64,
    pub ticker: Option<String>,
    pub kind: String,
    pub title: String,
    pub message: String,
    pub payload: Option<JsonValue>,
}

/// Top mover row for the market-data surface.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MoverRecord {
    pub ticker: String,
    pub close: Decimal,
    pub change_pct: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    // ==================== Price Change Tests ====================

    #[test]
    fn price_changes_use_trading_row_offsets() {
        // Newest first: 110 today, 100 yesterday, then flat 90s.
        let mut closes = vec![dec!(110), dec!(100)];
        closes.extend(std::iter::repeat(dec!(90)).take(25));

        let (d1, w1, m1) = price_changes(&closes);
        assert_eq!(d1, Some(dec!(10)));
        assert_eq!(w1.map(|c| c.round_dp(2)), Some(dec!(22.22)));
        assert_eq!(m1.map(|c| c.round_dp(2)), Some(dec!(22.22)));
    }

    #[test]
    fn price_changes_handle_short_history() {
        let closes = vec![dec!(110), dec!(100)];
        let (d1, w1, m1) = price_changes(&closes);
        assert_eq!(d1, Some(dec!(10)));
        assert_eq!(w1, None);
        assert_eq!(m1, None);
    }

    #[test]
    fn price_changes_guard_zero_baseline() {
        let closes = vec![dec!(10), dec!(0)];
        let (d1, _, _) = price_changes(&closes);
        assert_eq!(d1, None);
    }

    // ==================== Fundamentals Metric Tests ====================

    #[test]
    fn metric_lookup_matches_catalog_names() {
        let snapshot = FundamentalsSnapshot {
            ticker: "INFY".to_string(),
            quarter_end: None,
            pe_ratio: Some(dec!(24.5)),
            pb_ratio: None,
            roe: Some(dec!(31.2)),
            roa: None,
            eps: None,
            net_income: None,
            revenue: None,
            operating_margin: None,
            net_margin: None,
            dividend_yield: None,
            debt_to_equity: None,
            eps_growth: None,
            revenue_growth_yoy: None,
            earnings_growth_yoy: None,
        };
        assert_eq!(snapshot.metric("pe_ratio"), Some(dec!(24.5)));
        assert_eq!(snapshot.metric("roe"), Some(dec!(31.2)));
        assert_eq!(snapshot.metric("pb_ratio"), None);
        assert_eq!(snapshot.metric("not_a_metric"), None);
    }
}
