//! Screen execution seam for custom-DSL alerts.
//!
//! A custom-DSL alert is just a stored screen re-run against a single
//! instrument: the stored rule is validated and compiled like any API
//! request, narrowed with a ticker equality condition, and the alert
//! triggers iff the result set is non-empty.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value as JsonValue;

use screener_compiler::{QueryCompiler, Validator};
use screener_core::dsl::{CondValue, Condition, Node, Operator};
use screener_data::repositories::ScreenerRepository;

#[async_trait]
pub trait ScreenExecutor: Send + Sync {
    /// Returns true when the stored screen matches the given instrument.
    async fn matches_instrument(&self, dsl: &JsonValue, ticker: &str) -> Result<bool>;
}

pub struct DslScreenExecutor {
    validator: Validator,
    compiler: QueryCompiler,
    screener: ScreenerRepository,
}

impl DslScreenExecutor {
    #[must_use]
    pub fn new(validator: Validator, compiler: QueryCompiler, screener: ScreenerRepository) -> Self {
        Self {
            validator,
            compiler,
            screener,
        }
    }
}

#[async_trait]
impl ScreenExecutor for DslScreenExecutor {
    async fn matches_instrument(&self, dsl: &JsonValue, ticker: &str) -> Result<bool> {
        let validated = self
            .validator
            .validate(dsl)
            .map_err(|report| anyhow!("stored screen failed validation: {report}"))?;

        let mut rule = validated.rule;
        let narrow = Node::Cond(Condition {
            field: "ticker".to_string(),
            operator: Operator::Eq,
            value: Some(CondValue::text(ticker)),
            period: None,
            null_handling: None,
            value_is_field: false,
        });
        rule.filter = Some(match rule.filter.take() {
            Some(filter) => Node::and(vec![narrow, filter]),
            None => Node::and(vec![narrow]),
        });
        rule.limit = Some(1);

        let compiled = self.compiler.compile(&rule)?;
        let hits = self.screener.run(&compiled).await?;
        Ok(!hits.is_empty())
    }
}
