//! Market data repository: quotes, instrument metadata, fundamentals
//! snapshots, technical indicators, and top movers.
//!
//! This is the read side the alert scheduler fans out over. Nothing here
//! computes market data; every value is read back from ingested rows.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use std::collections::HashMap;

use crate::models::{
    price_changes, FundamentalsSnapshot, InstrumentMeta, InstrumentRecord, MoverRecord, Quote,
};

/// Close rows fetched per quote: enough for the 21-trading-day change.
const QUOTE_LOOKBACK_ROWS: i64 = 23;

#[derive(Debug, Clone)]
pub struct MarketDataRepository {
    pool: PgPool,
}

impl MarketDataRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Latest quote with 1d/1w/1m changes and technical indicators.
    /// Returns `None` when no price history exists for the ticker.
    ///
    /// # Errors
    /// Returns an error if a database query fails.
    pub async fn latest_quote(&self, ticker: &str) -> Result<Option<Quote>> {
        let rows = sqlx::query(
            r"
            SELECT time, close
            FROM price_history
            WHERE ticker = $1 AND close IS NOT NULL
            ORDER BY time DESC
            LIMIT $2
            ",
        )
        .bind(ticker)
        .bind(QUOTE_LOOKBACK_ROWS)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch price history")?;

        let Some(latest) = rows.first() else {
            return Ok(None);
        };
        let as_of = latest.get("time");
        let closes: Vec<Decimal> = rows.iter().map(|row| row.get("close")).collect();
        let (change_1d, change_1w, change_1m) = price_changes(&closes);

        let indicators = self.indicators(ticker).await?;

        Ok(Some(Quote {
            ticker: ticker.to_string(),
            price: closes[0],
            change_1d,
            change_1w,
            change_1m,
            as_of,
            indicators,
        }))
    }

    /// Latest value per technical indicator for one ticker.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn indicators(&self, ticker: &str) -> Result<HashMap<String, Decimal>> {
        let rows = sqlx::query(
            r"
            SELECT DISTINCT ON (name) name, value
            FROM technical_indicators
            WHERE ticker = $1
            ORDER BY name, time DESC
            ",
        )
        .bind(ticker)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch technical indicators")?;

        Ok(rows
            .into_iter()
            .map(|row| (row.get("name"), row.get("value")))
            .collect())
    }

    /// Instrument identity plus upcoming-earnings and last-buyback dates.
    ///
    /// # Errors
    /// Returns an error if a database query fails.
    pub async fn metadata(&self, ticker: &str) -> Result<Option<InstrumentMeta>> {
        let instrument = sqlx::query_as::<_, InstrumentRecord>(
            r"
            SELECT ticker, name, sector, industry, exchange, market_cap
            FROM companies
            WHERE ticker = $1
            ",
        )
        .bind(ticker)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch instrument")?;

        let Some(instrument) = instrument else {
            return Ok(None);
        };

        let next_earnings: Option<(NaiveDate,)> = sqlx::query_as(
            r"
            SELECT earnings_date
            FROM earnings_calendar
            WHERE ticker = $1 AND earnings_date >= CURRENT_DATE AND status = 'scheduled'
            ORDER BY earnings_date ASC
            LIMIT 1
            ",
        )
        .bind(ticker)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch earnings calendar")?;

        let last_buyback: Option<(NaiveDate,)> = sqlx::query_as(
            r"
            SELECT announcement_date
            FROM buybacks
            WHERE ticker = $1
            ORDER BY announcement_date DESC
            LIMIT 1
            ",
        )
        .bind(ticker)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch buybacks")?;

        Ok(Some(InstrumentMeta {
            instrument,
            next_earnings: next_earnings.map(|r| r.0),
            last_buyback: last_buyback.map(|r| r.0),
        }))
    }

    /// Latest fundamentals snapshot row for one instrument.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn fundamentals(&self, ticker: &str) -> Result<Option<FundamentalsSnapshot>> {
        let snapshot = sqlx::query_as::<_, FundamentalsSnapshot>(
            r"
            SELECT ticker, quarter_end, pe_ratio, pb_ratio, roe, roa, eps,
                   net_income, revenue, operating_margin, net_margin,
                   dividend_yield, debt_to_equity, eps_growth,
                   revenue_growth_yoy, earnings_growth_yoy
            FROM fundamentals_quarterly
            WHERE ticker = $1
            ORDER BY id DESC
            LIMIT 1
            ",
        )
        .bind(ticker)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch fundamentals")?;

        Ok(snapshot)
    }

    /// Largest absolute one-day movers across the universe.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn top_movers(&self, limit: i64) -> Result<Vec<MoverRecord>> {
        let records = sqlx::query_as::<_, MoverRecord>(
            r"
            SELECT ticker, close,
                   ((close - prev_close) / NULLIF(prev_close, 0) * 100) AS change_pct
            FROM (
                SELECT ticker, close,
                       LAG(close) OVER (PARTITION BY ticker ORDER BY time) AS prev_close,
                       ROW_NUMBER() OVER (PARTITION BY ticker ORDER BY time DESC) AS rn
                FROM price_history
                WHERE close IS NOT NULL
            ) latest
            WHERE rn = 1 AND prev_close IS NOT NULL AND prev_close <> 0
            ORDER BY ABS((close - prev_close) / prev_close) DESC
            LIMIT $1
            ",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch top movers")?;

        Ok(records)
    }
}
