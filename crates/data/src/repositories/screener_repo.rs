//! Screener execution repository.
//!
//! The only place a compiled query touches the database. The SQL text
//! arrives fully assembled from catalog identifiers and placeholders;
//! this repository binds the positional parameters and maps the fixed
//! projection back into rows. It never edits the SQL.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashMap;

use screener_compiler::{CompiledQuery, SqlParam};

use crate::models::ScreenerHit;

/// Display metric columns in the compiler's projection template.
const METRIC_COLUMNS: &[&str] = &[
    "pe_ratio",
    "pb_ratio",
    "roe",
    "roa",
    "eps",
    "net_income",
    "revenue",
    "operating_margin",
    "net_margin",
    "dividend_yield",
    "debt_to_equity",
    "eps_growth",
    "revenue_growth_yoy",
    "earnings_growth_yoy",
];

#[derive(Debug, Clone)]
pub struct ScreenerRepository {
    pool: PgPool,
}

impl ScreenerRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Executes a compiled screen and returns the matching instruments.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn run(&self, compiled: &CompiledQuery) -> Result<Vec<ScreenerHit>> {
        let mut query = sqlx::query(&compiled.sql);
        for param in &compiled.params {
            query = match param {
                SqlParam::Int(v) => query.bind(*v),
                SqlParam::Number(v) => query.bind(*v),
                SqlParam::Text(v) => query.bind(v.clone()),
                SqlParam::Bool(v) => query.bind(*v),
            };
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .context("Failed to execute screener query")?;

        tracing::debug!(rows = rows.len(), params = compiled.params.len(), "Screen executed");

        Ok(rows.iter().map(map_hit).collect())
    }
}

fn map_hit(row: &PgRow) -> ScreenerHit {
    let mut metrics: HashMap<String, Option<Decimal>> = HashMap::new();
    for column in METRIC_COLUMNS {
        metrics.insert((*column).to_string(), row.try_get(*column).ok().flatten());
    }

    ScreenerHit {
        ticker: row.get("ticker"),
        name: row.get("name"),
        sector: row.try_get("sector").ok(),
        industry: row.try_get("industry").ok(),
        market_cap: row.try_get("market_cap").ok().flatten(),
        metrics,
    }
}
