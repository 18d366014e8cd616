//! Per-kind alert condition evaluation.
//!
//! Evaluation is a pure function of the subscription, the fetched data
//! bundle, and the evaluation date; the one exception is `custom_dsl`,
//! which re-runs a stored screen through the `ScreenExecutor` seam.
//! Missing data never errors: an alert over absent data simply does not
//! trigger this cycle.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde_json::{json, Value as JsonValue};

use screener_core::catalog::FieldCatalog;
use screener_data::models::AlertRecord;

use crate::executor::ScreenExecutor;
use crate::types::{
    AlertError, AlertKind, CmpOp, CustomDslCondition, DataBundle, EventCondition, Evaluation,
    FundamentalCondition, PriceChangeCondition, PriceThresholdCondition, TechnicalCondition,
};

pub struct AlertEvaluator {
    catalog: Arc<FieldCatalog>,
    executor: Arc<dyn ScreenExecutor>,
}

impl AlertEvaluator {
    #[must_use]
    pub fn new(catalog: Arc<FieldCatalog>, executor: Arc<dyn ScreenExecutor>) -> Self {
        Self { catalog, executor }
    }

    /// Evaluates one subscription against fresh data.
    ///
    /// # Errors
    /// Returns an error for malformed conditions or unknown kinds;
    /// missing data is not an error.
    pub async fn evaluate(
        &self,
        alert: &AlertRecord,
        bundle: &DataBundle,
        today: NaiveDate,
    ) -> Result<Evaluation, AlertError> {
        match AlertKind::parse(&alert.kind)? {
            AlertKind::PriceThreshold => self.price_threshold(alert, bundle),
            AlertKind::PriceChange => self.price_change(alert, bundle),
            AlertKind::Fundamental => self.fundamental(alert, bundle),
            AlertKind::Event => self.event(alert, bundle, today),
            AlertKind::Technical => self.technical(alert, bundle),
            AlertKind::CustomDsl => self.custom_dsl(alert).await,
        }
    }

    fn price_threshold(
        &self,
        alert: &AlertRecord,
        bundle: &DataBundle,
    ) -> Result<Evaluation, AlertError> {
        let condition: PriceThresholdCondition = parse_condition(&alert.condition)?;
        let op = CmpOp::parse(&condition.operator)?;

        let Some(quote) = &bundle.quote else {
            return Ok(Evaluation::not_triggered());
        };

        if !op.apply(quote.price, condition.value) {
            return Ok(Evaluation::not_triggered());
        }

        Ok(Evaluation::triggered(
            format!(
                "{} is trading at {} ({} {})",
                quote.ticker, quote.price, op, condition.value
            ),
            json!({
                "current_price": quote.price,
                "threshold": condition.value,
                "operator": op.as_str(),
            }),
        ))
    }

    fn price_change(
        &self,
        alert: &AlertRecord,
        bundle: &DataBundle,
    ) -> Result<Evaluation, AlertError> {
        let condition: PriceChangeCondition = parse_condition(&alert.condition)?;
        let op = CmpOp::parse(&condition.operator)?;

        let Some(quote) = &bundle.quote else {
            return Ok(Evaluation::not_triggered());
        };
        let Some(change) = condition.period.change(quote) else {
            return Ok(Evaluation::not_triggered());
        };

        if !op.apply(change, condition.change_percent) {
            return Ok(Evaluation::not_triggered());
        }

        Ok(Evaluation::triggered(
            format!(
                "{} moved {:.2}% over {} ({} {}%)",
                quote.ticker,
                change,
                condition.period.label(),
                op,
                condition.change_percent
            ),
            json!({
                "change_percent": change,
                "window": condition.period.label(),
                "threshold": condition.change_percent,
            }),
        ))
    }

    fn fundamental(
        &self,
        alert: &AlertRecord,
        bundle: &DataBundle,
    ) -> Result<Evaluation, AlertError> {
        let condition: FundamentalCondition = parse_condition(&alert.condition)?;
        let op = CmpOp::parse(&condition.operator)?;

        if self.catalog.resolve(&condition.metric).is_none() {
            return Err(AlertError::UnknownMetric(condition.metric));
        }

        let Some(fundamentals) = &bundle.fundamentals else {
            return Ok(Evaluation::not_triggered());
        };
        let Some(actual) = fundamentals.metric(&condition.metric) else {
            return Ok(Evaluation::not_triggered());
        };

        if !op.apply(actual, condition.value) {
            return Ok(Evaluation::not_triggered());
        }

        Ok(Evaluation::triggered(
            format!(
                "{} {} is {} ({} {})",
                fundamentals.ticker, condition.metric, actual, op, condition.value
            ),
            json!({
                "metric": condition.metric,
                "actual": actual,
                "threshold": condition.value,
            }),
        ))
    }

    fn event(
        &self,
        alert: &AlertRecord,
        bundle: &DataBundle,
        today: NaiveDate,
    ) -> Result<Evaluation, AlertError> {
        let condition: EventCondition = parse_condition(&alert.condition)?;

        let Some(metadata) = &bundle.metadata else {
            return Ok(Evaluation::not_triggered());
        };
        let ticker = metadata.instrument.ticker.as_str();

        match condition.event.as_str() {
            "earnings_date" => {
                let Some(date) = metadata.next_earnings else {
                    return Ok(Evaluation::not_triggered());
                };
                let days_until = (date - today).num_days();
                if days_until < 0 || days_until > condition.days_before {
                    return Ok(Evaluation::not_triggered());
                }
                Ok(Evaluation::triggered(
                    format!("{ticker} reports earnings in {days_until} days ({date})"),
                    json!({"earnings_date": date, "days_until": days_until}),
                ))
            }
            "buyback_announced" => {
                let Some(date) = metadata.last_buyback else {
                    return Ok(Evaluation::not_triggered());
                };
                let days_ago = (today - date).num_days();
                if days_ago < 0 || days_ago > condition.days_lookback {
                    return Ok(Evaluation::not_triggered());
                }
                Ok(Evaluation::triggered(
                    format!("{ticker} announced a buyback {days_ago} days ago ({date})"),
                    json!({"announcement_date": date, "days_ago": days_ago}),
                ))
            }
            other => Err(AlertError::InvalidCondition(format!(
                "unknown event type: {other}"
            ))),
        }
    }

    fn technical(
        &self,
        alert: &AlertRecord,
        bundle: &DataBundle,
    ) -> Result<Evaluation, AlertError> {
        let condition: TechnicalCondition = parse_condition(&alert.condition)?;
        let op = CmpOp::parse(&condition.operator)?;

        let Some(quote) = &bundle.quote else {
            return Ok(Evaluation::not_triggered());
        };
        let Some(actual) = quote.indicators.get(&condition.indicator).copied() else {
            return Ok(Evaluation::not_triggered());
        };

        if !op.apply(actual, condition.value) {
            return Ok(Evaluation::not_triggered());
        }

        Ok(Evaluation::triggered(
            format!(
                "{} {} is {} ({} {})",
                quote.ticker, condition.indicator, actual, op, condition.value
            ),
            json!({
                "indicator": condition.indicator,
                "actual": actual,
                "threshold": condition.value,
            }),
        ))
    }

    async fn custom_dsl(&self, alert: &AlertRecord) -> Result<Evaluation, AlertError> {
        let condition: CustomDslCondition = parse_condition(&alert.condition)?;
        let Some(ticker) = alert.ticker.as_deref() else {
            return Err(AlertError::InvalidCondition(
                "custom_dsl alerts require a ticker".to_string(),
            ));
        };

        if !self.executor.matches_instrument(&condition.dsl, ticker).await? {
            return Ok(Evaluation::not_triggered());
        }

        Ok(Evaluation::triggered(
            format!("{ticker} matches the screen '{}'", alert.name),
            json!({"screen": alert.name, "ticker": ticker}),
        ))
    }
}

fn parse_condition<T: DeserializeOwned>(raw: &JsonValue) -> Result<T, AlertError> {
    serde_json::from_value(raw.clone())
        .map_err(|e| AlertError::InvalidCondition(e.to_string()))
}
