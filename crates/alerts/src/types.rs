//! Typed alert kinds and conditions.
//!
//! Subscriptions store their condition as JSON; the evaluator parses it
//! into one of these structs based on the kind discriminator. Operators
//! here are the canonical comparison symbols only; alternate spellings
//! are normalized (or rejected) before a condition is ever stored.

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use screener_data::models::{FundamentalsSnapshot, InstrumentMeta, Quote};

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("unknown alert kind: {0}")]
    UnknownKind(String),

    #[error("invalid condition: {0}")]
    InvalidCondition(String),

    #[error("unknown metric: {0}")]
    UnknownMetric(String),

    #[error("screen execution failed: {0}")]
    Screen(#[from] anyhow::Error),
}

/// The closed set of alert kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    PriceThreshold,
    PriceChange,
    Fundamental,
    Event,
    Technical,
    CustomDsl,
}

impl AlertKind {
    /// Parses the stored discriminator.
    ///
    /// # Errors
    /// Returns `AlertError::UnknownKind` for anything outside the set.
    pub fn parse(s: &str) -> Result<Self, AlertError> {
        match s {
            "price_threshold" => Ok(Self::PriceThreshold),
            "price_change" => Ok(Self::PriceChange),
            "fundamental" => Ok(Self::Fundamental),
            "event" => Ok(Self::Event),
            "technical" => Ok(Self::Technical),
            "custom_dsl" => Ok(Self::CustomDsl),
            other => Err(AlertError::UnknownKind(other.to_string())),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PriceThreshold => "price_threshold",
            Self::PriceChange => "price_change",
            Self::Fundamental => "fundamental",
            Self::Event => "event",
            Self::Technical => "technical",
            Self::CustomDsl => "custom_dsl",
        }
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Comparison operator for alert conditions. Symbols only; `above` and
/// `below` were accepted historically and are now rejected here, having
/// been canonicalized at validation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
}

impl CmpOp {
    /// # Errors
    /// Returns `AlertError::InvalidCondition` for unknown spellings.
    pub fn parse(s: &str) -> Result<Self, AlertError> {
        match s {
            "<" => Ok(Self::Lt),
            ">" => Ok(Self::Gt),
            "<=" => Ok(Self::Le),
            ">=" => Ok(Self::Ge),
            "=" | "==" => Ok(Self::Eq),
            other => Err(AlertError::InvalidCondition(format!(
                "unsupported operator '{other}', use one of < > <= >= ="
            ))),
        }
    }

    #[must_use]
    pub fn apply(self, left: Decimal, right: Decimal) -> bool {
        match self {
            Self::Lt => left < right,
            Self::Gt => left > right,
            Self::Le => left <= right,
            Self::Ge => left >= right,
            Self::Eq => left == right,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
            Self::Eq => "=",
        }
    }
}

impl std::fmt::Display for CmpOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriceThresholdCondition {
    pub operator: String,
    pub value: Decimal,
}

/// Which change window a price-change alert watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum ChangeWindow {
    #[default]
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "1w")]
    OneWeek,
    #[serde(rename = "1m")]
    OneMonth,
}

impl ChangeWindow {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::OneDay => "1d",
            Self::OneWeek => "1w",
            Self::OneMonth => "1m",
        }
    }

    #[must_use]
    pub fn change(self, quote: &Quote) -> Option<Decimal> {
        match self {
            Self::OneDay => quote.change_1d,
            Self::OneWeek => quote.change_1w,
            Self::OneMonth => quote.change_1m,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriceChangeCondition {
    pub operator: String,
    pub change_percent: Decimal,
    #[serde(default)]
    pub period: ChangeWindow,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FundamentalCondition {
    pub metric: String,
    pub operator: String,
    pub value: Decimal,
}

fn default_days_before() -> i64 {
    30
}

fn default_days_lookback() -> i64 {
    90
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventCondition {
    pub event: String,
    #[serde(default = "default_days_before")]
    pub days_before: i64,
    #[serde(default = "default_days_lookback")]
    pub days_lookback: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TechnicalCondition {
    pub indicator: String,
    pub operator: String,
    pub value: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CustomDslCondition {
    pub dsl: JsonValue,
}

/// Fresh data fetched for one ticker group. Any member may be missing
/// when its fetch failed or timed out; evaluation degrades to
/// not-triggered instead of erroring.
#[derive(Debug, Clone, Default)]
pub struct DataBundle {
    pub quote: Option<Quote>,
    pub metadata: Option<InstrumentMeta>,
    pub fundamentals: Option<FundamentalsSnapshot>,
}

impl DataBundle {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.quote.is_none() && self.metadata.is_none() && self.fundamentals.is_none()
    }
}

/// Outcome of evaluating one alert.
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    pub triggered: bool,
    pub reason: Option<String>,
    pub payload: Option<JsonValue>,
}

impl Evaluation {
    #[must_use]
    pub fn not_triggered() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn triggered(reason: String, payload: JsonValue) -> Self {
        Self {
            triggered: true,
            reason: Some(reason),
            payload: Some(payload),
        }
    }
}
