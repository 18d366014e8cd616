//! DSL tree to parameterized SQL.
//!
//! The compiler consumes a validated `ScreenRule` and produces one
//! `SELECT DISTINCT` over the instruments table: LEFT LATERAL joins pick
//! the latest snapshot row per referenced side table, the WHERE clause is
//! the compiled predicate, and the projection is a fixed template of
//! instrument identity plus display metrics with latest-non-null
//! fallbacks.
//!
//! Safety properties, all tested: no user literal ever appears in the
//! SQL text (only `$n` placeholders), every identifier comes from the
//! catalog's closed table/column set, the parameter vector length equals
//! the placeholder count, and compilation is deterministic. The compiler
//! performs no I/O and allocates a fresh emitter per call; errors here
//! mean the validator and compiler disagree and fail the request fast.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;

use screener_core::catalog::{
    DenominatorGuard, DerivedFormula, FieldCatalog, FieldDef, FieldSource, SourceTable,
};
use screener_core::config::CompilerConfig;
use screener_core::dsl::{
    Aggregation, CondValue, Condition, Node, NullStrategy, Operator, Period, RuleMeta, ScalarValue,
    ScreenRule, SortOrder,
};

use crate::emitter::{SqlEmitter, SqlParam};
use crate::error::CompileError;

/// Fundamentals columns projected for display. Each gets a
/// latest-non-null fallback because the absolute-latest row is often
/// sparse. Sortable fundamentals fields must appear here so ORDER BY can
/// reference the output column under DISTINCT.
const DISPLAY_METRICS: &[&str] = &[
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

/// Relative tolerance for the `stable` trend: successive values may move
/// at most this share of the older value.
const STABLE_TOLERANCE: &str = "0.05";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CompileMetadata {
    pub uses_time_series: bool,
    pub uses_derived_metrics: bool,
    pub complexity: u32,
}

/// A compiled screen, ready for execution.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<SqlParam>,
    pub tables: BTreeSet<SourceTable>,
    pub metadata: CompileMetadata,
}

pub struct QueryCompiler {
    catalog: Arc<FieldCatalog>,
    config: CompilerConfig,
}

impl QueryCompiler {
    #[must_use]
    pub fn new(catalog: Arc<FieldCatalog>, config: CompilerConfig) -> Self {
        Self { catalog, config }
    }

    /// Compiles a validated rule. Two calls on the same rule produce
    /// byte-identical SQL and parameter vectors.
    ///
    /// # Errors
    ///
    /// Returns `CompileError` on internal invariant violations (a rule
    /// that did not come through the validator) or on reserved features
    /// such as the `interpolate` null strategy.
    pub fn compile(&self, rule: &ScreenRule) -> Result<CompiledQuery, CompileError> {
        let mut emitter = SqlEmitter::new();
        let mut metadata = CompileMetadata::default();

        let tables = self.collect_tables(rule)?;

        let predicate = rule
            .filter
            .as_ref()
            .map(|node| self.compile_node(node, &mut emitter, &mut metadata))
            .transpose()?;

        let mut clauses = Vec::new();
        if let Some(predicate) = predicate {
            clauses.push(predicate);
        }
        if let Some(meta) = &rule.meta {
            clauses.extend(compile_meta(meta, &mut emitter));
        }
        let where_clause = if clauses.is_empty() {
            "1=1".to_string()
        } else {
            clauses.join(" AND ")
        };

        let order_clause = self.order_clause(rule)?;

        let limit = rule
            .limit
            .unwrap_or(self.config.default_limit)
            .min(self.config.max_limit);
        let limit_placeholder = emitter.push(SqlParam::Int(i64::from(limit)));

        let mut sql = String::new();
        sql.push_str("SELECT DISTINCT\n    c.ticker,\n    c.name,\n    c.sector,\n    c.industry,\n    c.market_cap");
        for metric in DISPLAY_METRICS {
            sql.push_str(&format!(
                ",\n    COALESCE(fq.{metric}, (SELECT f.{metric} FROM fundamentals_quarterly f WHERE f.ticker = c.ticker AND f.{metric} IS NOT NULL ORDER BY f.id DESC LIMIT 1)) AS {metric}"
            ));
        }
        sql.push_str("\nFROM companies c");
        for table in &tables {
            if table.is_snapshot() {
                sql.push_str(&format!(
                    "\nLEFT JOIN LATERAL (\n    SELECT * FROM {name} t WHERE t.ticker = c.ticker ORDER BY t.{order} DESC LIMIT 1\n) {alias} ON TRUE",
                    name = table.table_name(),
                    order = table.order_column(),
                    alias = table.alias(),
                ));
            }
        }
        sql.push_str(&format!("\nWHERE {where_clause}"));
        sql.push_str(&format!("\nORDER BY {order_clause}"));
        sql.push_str(&format!("\nLIMIT {limit_placeholder}"));

        tracing::debug!(
            params = emitter.len(),
            tables = tables.len(),
            complexity = metadata.complexity,
            "Compiled screen"
        );

        Ok(CompiledQuery {
            sql,
            params: emitter.into_params(),
            tables,
            metadata,
        })
    }

    // ------------------------------------------------------------------
    // Table collection
    // ------------------------------------------------------------------

    fn collect_tables(&self, rule: &ScreenRule) -> Result<BTreeSet<SourceTable>, CompileError> {
        let mut tables = BTreeSet::new();
        tables.insert(SourceTable::Companies);
        tables.insert(SourceTable::FundamentalsQuarterly);

        let mut missing: Option<CompileError> = None;
        if let Some(node) = &rule.filter {
            node.for_each_condition(&mut |cond| {
                if missing.is_some() {
                    return;
                }
                match self.field_tables(&cond.field) {
                    Ok(ts) => tables.extend(ts),
                    Err(e) => missing = Some(e),
                }
                if cond.value_is_field {
                    if let Some(target) = cond.value.as_ref().and_then(|v| match v {
                        CondValue::Scalar(ScalarValue::Text(t)) => Some(t.as_str()),
                        _ => None,
                    }) {
                        match self.field_tables(target) {
                            Ok(ts) => tables.extend(ts),
                            Err(e) => missing = Some(e),
                        }
                    }
                }
            });
        }
        if let Some(e) = missing {
            return Err(e);
        }

        if let Some(sort) = &rule.sort {
            tables.extend(self.field_tables(&sort.field)?);
        }

        Ok(tables)
    }

    fn field_tables(&self, name: &str) -> Result<Vec<SourceTable>, CompileError> {
        let def = self
            .catalog
            .resolve(name)
            .ok_or_else(|| CompileError::UnknownField(name.to_string()))?;
        match def.source {
            FieldSource::Column { table, .. } => Ok(vec![table]),
            FieldSource::Derived(formula) => {
                let mut out = Vec::with_capacity(2);
                for input in [formula.numerator, formula.denominator] {
                    out.extend(self.field_tables(input)?);
                }
                Ok(out)
            }
        }
    }

    // ------------------------------------------------------------------
    // Predicate compilation
    // ------------------------------------------------------------------

    fn compile_node(
        &self,
        node: &Node,
        emitter: &mut SqlEmitter,
        metadata: &mut CompileMetadata,
    ) -> Result<String, CompileError> {
        match node {
            Node::And { and } => {
                metadata.complexity += 1;
                let clauses = and
                    .iter()
                    .map(|child| self.compile_node(child, emitter, metadata))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(format!("({})", clauses.join(" AND ")))
            }
            Node::Or { or } => {
                metadata.complexity += 1;
                let clauses = or
                    .iter()
                    .map(|child| self.compile_node(child, emitter, metadata))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(format!("({})", clauses.join(" OR ")))
            }
            Node::Not { not } => {
                metadata.complexity += 2;
                let inner = self.compile_node(not, emitter, metadata)?;
                Ok(format!("NOT ({inner})"))
            }
            Node::Cond(cond) => self.compile_condition(cond, emitter, metadata),
        }
    }

    fn compile_condition(
        &self,
        cond: &Condition,
        emitter: &mut SqlEmitter,
        metadata: &mut CompileMetadata,
    ) -> Result<String, CompileError> {
        let def = self
            .catalog
            .resolve(&cond.field)
            .ok_or_else(|| CompileError::UnknownField(cond.field.clone()))?;

        if cond.value_is_field {
            return self.compile_cross_field(cond, def, metadata);
        }

        if let Some(period) = &cond.period {
            return self.compile_period_condition(cond, def, period, emitter, metadata);
        }

        if cond.operator.is_trend() {
            return Err(CompileError::internal(format!(
                "trend operator {} without a period reached the compiler",
                cond.operator
            )));
        }

        let expr = if def.is_derived() {
            metadata.uses_derived_metrics = true;
            self.derived_expr(&cond.field)?
        } else {
            self.scalar_expr(def, cond, emitter, metadata)?
        };

        self.apply_operator(&expr, cond, emitter)
    }

    /// Column reference for a single-field predicate, with time-series
    /// and null-handling semantics applied.
    ///
    /// Predicate truth on a sparse time-series column must come from the
    /// latest non-null row, never from the LATERAL-projected row, whose
    /// absolute-latest snapshot may hold NULL for this column.
    fn scalar_expr(
        &self,
        def: &FieldDef,
        cond: &Condition,
        emitter: &mut SqlEmitter,
        metadata: &mut CompileMetadata,
    ) -> Result<String, CompileError> {
        let (table, column) = def
            .column()
            .ok_or_else(|| CompileError::internal(format!("{} has no backing column", def.name)))?;

        let base = if def.time_series {
            metadata.uses_time_series = true;
            latest_nonnull_expr(table, column)
        } else {
            format!("{}.{}", table.alias(), column)
        };

        match cond.null_handling.as_ref().map(|nh| nh.strategy) {
            None | Some(NullStrategy::Exclude | NullStrategy::Fail) => Ok(base),
            Some(NullStrategy::UseDefault) => {
                let default = cond
                    .null_handling
                    .as_ref()
                    .and_then(|nh| nh.default_value)
                    .ok_or_else(|| {
                        CompileError::invalid_value(def.name, "use_default without default_value")
                    })?;
                let placeholder = emitter.push(SqlParam::Number(default));
                Ok(format!("COALESCE({base}, {placeholder})"))
            }
            Some(NullStrategy::UseLatest) => Ok(latest_nonnull_expr(table, column)),
            Some(NullStrategy::Interpolate) => {
                Err(CompileError::NotImplemented("interpolate null handling"))
            }
        }
    }

    fn compile_cross_field(
        &self,
        cond: &Condition,
        def: &FieldDef,
        metadata: &mut CompileMetadata,
    ) -> Result<String, CompileError> {
        let target_name = match cond.value.as_ref() {
            Some(CondValue::Scalar(ScalarValue::Text(name))) => name.as_str(),
            _ => {
                return Err(CompileError::invalid_value(
                    &cond.field,
                    "value_is_field requires a field name value",
                ))
            }
        };
        let target = self
            .catalog
            .resolve(target_name)
            .ok_or_else(|| CompileError::UnknownField(target_name.to_string()))?;

        let op = cond
            .operator
            .sql()
            .ok_or_else(|| CompileError::unsupported_operator(&cond.field, cond.operator))?;

        let lhs = self.plain_expr(def, metadata)?;
        let rhs = self.plain_expr(target, metadata)?;
        Ok(format!("{lhs} {op} {rhs}"))
    }

    /// Direct LATERAL-row reference (or derived expansion), used on both
    /// sides of a cross-field comparison.
    fn plain_expr(
        &self,
        def: &FieldDef,
        metadata: &mut CompileMetadata,
    ) -> Result<String, CompileError> {
        if def.is_derived() {
            metadata.uses_derived_metrics = true;
            return self.derived_expr(def.name);
        }
        let (table, column) = def
            .column()
            .ok_or_else(|| CompileError::internal(format!("{} has no backing column", def.name)))?;
        Ok(format!("{}.{}", table.alias(), column))
    }

    fn derived_expr(&self, name: &str) -> Result<String, CompileError> {
        let formula = self
            .catalog
            .derived_formula(name)
            .ok_or_else(|| CompileError::internal(format!("{name} is not a derived metric")))?;
        self.formula_expr(formula)
    }

    /// A derived field never appears as a raw column reference; the
    /// formula is always expanded with its denominator guard.
    fn formula_expr(&self, formula: &DerivedFormula) -> Result<String, CompileError> {
        let numerator = self.input_column(formula.numerator)?;
        let denominator = self.input_column(formula.denominator)?;
        let scale = if formula.percentage { " * 100" } else { "" };

        Ok(match formula.guard {
            DenominatorGuard::NonZero => {
                format!("({numerator}::numeric / NULLIF({denominator}::numeric, 0){scale})")
            }
            DenominatorGuard::Positive => {
                format!(
                    "(CASE WHEN {denominator}::numeric > 0 THEN {numerator}::numeric / {denominator}::numeric{scale} END)"
                )
            }
        })
    }

    fn input_column(&self, name: &str) -> Result<String, CompileError> {
        let def = self
            .catalog
            .resolve(name)
            .ok_or_else(|| CompileError::UnknownField(name.to_string()))?;
        let (table, column) = def.column().ok_or_else(|| {
            CompileError::internal(format!("formula input {name} must be a plain column"))
        })?;
        Ok(format!("{}.{}", table.alias(), column))
    }

    // ------------------------------------------------------------------
    // Period semantics
    // ------------------------------------------------------------------

    fn compile_period_condition(
        &self,
        cond: &Condition,
        def: &FieldDef,
        period: &Period,
        emitter: &mut SqlEmitter,
        metadata: &mut CompileMetadata,
    ) -> Result<String, CompileError> {
        metadata.uses_time_series = true;

        let (table, column) = def.column().ok_or_else(|| {
            CompileError::internal(format!("{} cannot carry a period", def.name))
        })?;

        let rows = period.period_type.window_rows(period.n);
        let rows_placeholder = emitter.push(SqlParam::Int(i64::from(rows)));
        let window = format!(
            "SELECT t.{column} AS v, t.{order} AS ord FROM {name} t WHERE t.ticker = c.ticker AND t.{column} IS NOT NULL ORDER BY t.{order} DESC LIMIT {rows_placeholder}",
            name = table.table_name(),
            order = table.order_column(),
        );

        match period.aggregation {
            // Every window row must satisfy the condition. Rewritten as
            // "no row violates it", which silently relaxes when fewer
            // than N non-null rows exist.
            Aggregation::All => {
                let inverse = cond
                    .operator
                    .inverse()
                    .and_then(Operator::sql)
                    .ok_or_else(|| {
                        CompileError::unsupported_operator(&cond.field, cond.operator)
                    })?;
                let value = self.push_condition_value(cond, emitter)?;
                Ok(format!(
                    "NOT EXISTS (SELECT 1 FROM ({window}) w WHERE w.v {inverse} {value})"
                ))
            }
            Aggregation::Any => {
                let op = cond.operator.sql().ok_or_else(|| {
                    CompileError::unsupported_operator(&cond.field, cond.operator)
                })?;
                let value = self.push_condition_value(cond, emitter)?;
                Ok(format!(
                    "EXISTS (SELECT 1 FROM ({window}) w WHERE w.v {op} {value})"
                ))
            }
            Aggregation::Avg | Aggregation::Sum | Aggregation::Min | Aggregation::Max => {
                let agg = period
                    .aggregation
                    .sql_fn()
                    .ok_or_else(|| CompileError::internal("aggregate without SQL function"))?;
                let op = cond.operator.sql().ok_or_else(|| {
                    CompileError::unsupported_operator(&cond.field, cond.operator)
                })?;
                let value = self.push_condition_value(cond, emitter)?;
                Ok(format!(
                    "(SELECT {agg}(w.v) FROM ({window}) w) {op} {value}"
                ))
            }
            Aggregation::Latest => {
                let op = cond.operator.sql().ok_or_else(|| {
                    CompileError::unsupported_operator(&cond.field, cond.operator)
                })?;
                let value = self.push_condition_value(cond, emitter)?;
                Ok(format!(
                    "(SELECT w.v FROM ({window}) w ORDER BY w.ord DESC LIMIT 1) {op} {value}"
                ))
            }
            Aggregation::Trend => {
                let violation = match cond.operator {
                    Operator::Increasing => "d.diff <= 0".to_string(),
                    Operator::Decreasing => "d.diff >= 0".to_string(),
                    Operator::Stable => {
                        format!("ABS(d.diff) > ABS(d.base) * {STABLE_TOLERANCE}")
                    }
                    other => {
                        return Err(CompileError::internal(format!(
                            "trend aggregation with non-trend operator {other}"
                        )))
                    }
                };
                // Sign of successive differences: window rows are
                // newest-first, so diff = newer - older. Zero violations
                // means the trend holds across the whole window.
                Ok(format!(
                    "(SELECT COUNT(*) FROM (SELECT w.v - LEAD(w.v) OVER (ORDER BY w.ord DESC) AS diff, LEAD(w.v) OVER (ORDER BY w.ord DESC) AS base FROM ({window}) w) d WHERE {violation}) = 0"
                ))
            }
        }
    }

    // ------------------------------------------------------------------
    // Operators and values
    // ------------------------------------------------------------------

    fn apply_operator(
        &self,
        expr: &str,
        cond: &Condition,
        emitter: &mut SqlEmitter,
    ) -> Result<String, CompileError> {
        match cond.operator {
            Operator::Exists => {
                let present = cond
                    .value
                    .as_ref()
                    .and_then(|v| match v {
                        CondValue::Scalar(ScalarValue::Bool(b)) => Some(*b),
                        _ => None,
                    })
                    .ok_or_else(|| {
                        CompileError::invalid_value(&cond.field, "exists requires a boolean")
                    })?;
                Ok(if present {
                    format!("{expr} IS NOT NULL")
                } else {
                    format!("{expr} IS NULL")
                })
            }
            Operator::Between => {
                let (lo, hi) = match cond.value.as_ref() {
                    Some(CondValue::List(items)) if items.len() == 2 => {
                        match (items[0].as_f64(), items[1].as_f64()) {
                            (Some(lo), Some(hi)) => (lo, hi),
                            _ => {
                                return Err(CompileError::invalid_value(
                                    &cond.field,
                                    "between bounds must be numbers",
                                ))
                            }
                        }
                    }
                    _ => {
                        return Err(CompileError::invalid_value(
                            &cond.field,
                            "between requires [min, max]",
                        ))
                    }
                };
                let lo_placeholder = emitter.push(SqlParam::Number(lo));
                let hi_placeholder = emitter.push(SqlParam::Number(hi));
                Ok(format!("{expr} BETWEEN {lo_placeholder} AND {hi_placeholder}"))
            }
            Operator::In | Operator::NotIn => {
                let items = match cond.value.as_ref() {
                    Some(CondValue::List(items)) if !items.is_empty() => items,
                    _ => {
                        return Err(CompileError::invalid_value(
                            &cond.field,
                            "in/not_in requires a non-empty array",
                        ))
                    }
                };
                let placeholders: Vec<String> = items
                    .iter()
                    .map(|item| emitter.push(scalar_param(item)))
                    .collect();
                let keyword = if cond.operator == Operator::In {
                    "IN"
                } else {
                    "NOT IN"
                };
                Ok(format!("{expr} {keyword} ({})", placeholders.join(", ")))
            }
            op if op.is_comparison() => {
                let sql_op = op.sql().ok_or_else(|| {
                    CompileError::unsupported_operator(&cond.field, cond.operator)
                })?;
                let value = self.push_condition_value(cond, emitter)?;
                Ok(format!("{expr} {sql_op} {value}"))
            }
            other => Err(CompileError::unsupported_operator(&cond.field, other)),
        }
    }

    fn push_condition_value(
        &self,
        cond: &Condition,
        emitter: &mut SqlEmitter,
    ) -> Result<String, CompileError> {
        let scalar = match cond.value.as_ref() {
            Some(CondValue::Scalar(scalar)) => scalar,
            _ => {
                return Err(CompileError::invalid_value(
                    &cond.field,
                    format!("operator {} requires a scalar value", cond.operator),
                ))
            }
        };
        Ok(emitter.push(scalar_param(scalar)))
    }

    // ------------------------------------------------------------------
    // Sort
    // ------------------------------------------------------------------

    fn order_clause(&self, rule: &ScreenRule) -> Result<String, CompileError> {
        let Some(sort) = &rule.sort else {
            return Ok("c.market_cap DESC NULLS LAST".to_string());
        };

        let def = self
            .catalog
            .resolve(&sort.field)
            .ok_or_else(|| CompileError::UnknownField(sort.field.clone()))?;
        let (table, column) = def.column().ok_or_else(|| {
            CompileError::internal(format!("sort field {} is not a plain column", def.name))
        })?;

        // Under DISTINCT the sort expression must be part of the
        // projection: identity columns sort by their qualified name,
        // fundamentals metrics by their output column.
        let expr = match table {
            SourceTable::Companies => format!("c.{column}"),
            SourceTable::FundamentalsQuarterly if DISPLAY_METRICS.contains(&column) => {
                column.to_string()
            }
            _ => {
                return Err(CompileError::internal(format!(
                    "sort field {} is outside the projection",
                    def.name
                )))
            }
        };

        let direction = match sort.order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        Ok(format!("{expr} {direction} NULLS LAST"))
    }
}

fn compile_meta(meta: &RuleMeta, emitter: &mut SqlEmitter) -> Vec<String> {
    let mut clauses = Vec::new();
    if let Some(sector) = &meta.sector {
        let placeholder = emitter.push(SqlParam::Text(sector.clone()));
        clauses.push(format!("c.sector = {placeholder}"));
    }
    if let Some(industry) = &meta.industry {
        let placeholder = emitter.push(SqlParam::Text(industry.clone()));
        clauses.push(format!("c.industry = {placeholder}"));
    }
    if let Some(exchange) = &meta.exchange {
        let placeholder = emitter.push(SqlParam::Text(exchange.clone()));
        clauses.push(format!("c.exchange = {placeholder}"));
    }
    clauses
}

fn latest_nonnull_expr(table: SourceTable, column: &str) -> String {
    format!(
        "(SELECT t.{column} FROM {name} t WHERE t.ticker = c.ticker AND t.{column} IS NOT NULL ORDER BY t.{order} DESC LIMIT 1)",
        name = table.table_name(),
        order = table.order_column(),
    )
}

fn scalar_param(scalar: &ScalarValue) -> SqlParam {
    match scalar {
        ScalarValue::Number(n) => SqlParam::Number(*n),
        ScalarValue::Text(s) => SqlParam::Text(s.clone()),
        ScalarValue::Bool(b) => SqlParam::Bool(*b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use screener_core::config::ValidatorConfig;
    use serde_json::json;

    use crate::validator::Validator;

    fn compiler() -> QueryCompiler {
        QueryCompiler::new(Arc::new(FieldCatalog::builtin()), CompilerConfig::default())
    }

    /// Validate then compile, the way the request path does.
    fn compile(raw: serde_json::Value) -> CompiledQuery {
        let catalog = Arc::new(FieldCatalog::builtin());
        let validator = Validator::new(
            catalog.clone(),
            CompilerConfig::default(),
            ValidatorConfig::default(),
        );
        let validated = validator.validate(&raw).expect("rule should validate");
        QueryCompiler::new(catalog, CompilerConfig::default())
            .compile(&validated.rule)
            .expect("rule should compile")
    }

    /// Distinct `$n` placeholders must be exactly 1..=params.len().
    fn assert_placeholders_match(query: &CompiledQuery) {
        let mut seen = std::collections::BTreeSet::new();
        let bytes = query.sql.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'$' {
                let mut j = i + 1;
                while j < bytes.len() && bytes[j].is_ascii_digit() {
                    j += 1;
                }
                let n: usize = query.sql[i + 1..j].parse().expect("placeholder index");
                seen.insert(n);
                i = j;
            } else {
                i += 1;
            }
        }
        let expected: std::collections::BTreeSet<usize> = (1..=query.params.len()).collect();
        assert_eq!(seen, expected, "placeholders vs params mismatch");
    }

    // ==================== Literal Scenario Tests ====================

    #[test]
    fn simple_value_filter() {
        let query = compile(json!({
            "filter": {"and": [{"field": "pe_ratio", "operator": "<", "value": 15}]}
        }));
        assert!(query.sql.contains("fq.pe_ratio < $1"), "sql: {}", query.sql);
        assert_eq!(
            query.params,
            vec![SqlParam::Number(15.0), SqlParam::Int(100)]
        );
        assert_placeholders_match(&query);
    }

    #[test]
    fn period_all_quarters_positive() {
        let query = compile(json!({
            "filter": {"and": [{
                "field": "net_income", "operator": ">", "value": 0,
                "period": {"type": "last_n_quarters", "n": 4, "aggregation": "all"}
            }]}
        }));
        assert!(query.sql.contains("NOT EXISTS"), "sql: {}", query.sql);
        assert!(query.sql.contains("LIMIT $1"));
        assert!(query.sql.contains("w.v <= $2"), "inverted operator expected");
        assert_eq!(
            query.params,
            vec![SqlParam::Int(4), SqlParam::Number(0.0), SqlParam::Int(100)]
        );
        assert!(query.metadata.uses_time_series);
        assert_placeholders_match(&query);
    }

    #[test]
    fn cross_field_comparison_joins_both_tables() {
        let query = compile(json!({
            "filter": {"and": [{
                "field": "close", "operator": "<",
                "value": "price_target_avg", "value_is_field": true
            }]}
        }));
        assert!(
            query.sql.contains("ph.close < ae.price_target_avg"),
            "sql: {}",
            query.sql
        );
        assert!(query.tables.contains(&SourceTable::PriceHistory));
        assert!(query.tables.contains(&SourceTable::AnalystEstimates));
        assert!(query.sql.contains("price_history t"));
        assert!(query.sql.contains("analyst_estimates t"));
        assert_placeholders_match(&query);
    }

    #[test]
    fn derived_metric_expands_with_guard() {
        let query = compile(json!({
            "filter": {"and": [{"field": "debt_to_fcf", "operator": "<", "value": 3}]}
        }));
        assert!(
            query
                .sql
                .contains("(dp.total_debt::numeric / NULLIF(cf.free_cash_flow::numeric, 0)) < $1"),
            "sql: {}",
            query.sql
        );
        assert_eq!(query.params, vec![SqlParam::Number(3.0), SqlParam::Int(100)]);
        assert!(query.metadata.uses_derived_metrics);
        // The derived name itself never reaches the SQL.
        assert!(!query.sql.contains("debt_to_fcf"));
        assert_placeholders_match(&query);
    }

    #[test]
    fn empty_rule_compiles_to_where_true() {
        let query = compile(json!({"filter": {}}));
        assert!(query.sql.contains("WHERE 1=1"));
        assert_eq!(query.params, vec![SqlParam::Int(100)]);
        assert!(query.sql.contains("ORDER BY c.market_cap DESC NULLS LAST"));
        assert_placeholders_match(&query);
    }

    // ==================== Safety Property Tests ====================

    #[test]
    fn user_literals_never_reach_the_sql_text() {
        let query = compile(json!({
            "filter": {"and": [
                {"field": "pe_ratio", "operator": "<", "value": 73.5},
                {"field": "sector", "operator": "=", "value": "Banking'; DROP TABLE companies;--"}
            ]}
        }));
        assert!(!query.sql.contains("73.5"));
        assert!(!query.sql.contains("DROP TABLE"));
        assert!(!query.sql.contains("Banking"));
        assert_placeholders_match(&query);
    }

    #[test]
    fn compilation_is_deterministic() {
        let rule = json!({
            "filter": {"or": [
                {"field": "roe", "operator": ">", "value": 15},
                {"and": [
                    {"field": "pe_ratio", "operator": "between", "value": [5, 20]},
                    {"field": "net_income", "operator": ">", "value": 0,
                     "period": {"type": "last_n_quarters", "n": 4}}
                ]}
            ]},
            "sort": {"field": "pe_ratio", "order": "asc"},
            "limit": 50
        });
        let a = compile(rule.clone());
        let b = compile(rule);
        assert_eq!(a.sql, b.sql);
        assert_eq!(a.params, b.params);
    }

    #[test]
    fn period_condition_pushes_value_and_window() {
        for aggregation in ["all", "any", "avg", "sum", "min", "max"] {
            let query = compile(json!({
                "filter": {"and": [{
                    "field": "revenue", "operator": ">", "value": 42.25,
                    "period": {"type": "last_n_quarters", "n": 6, "aggregation": aggregation}
                }]}
            }));
            // window rows + value + limit
            assert_eq!(query.params.len(), 3, "aggregation {aggregation}");
            assert!(query.params.contains(&SqlParam::Int(6)));
            assert!(query.params.contains(&SqlParam::Number(42.25)));
            assert_placeholders_match(&query);
        }
    }

    // ==================== Operator Rendering Tests ====================

    #[test]
    fn between_and_in_render_placeholders() {
        let query = compile(json!({
            "filter": {"and": [
                {"field": "pe_ratio", "operator": "between", "value": [5, 20]},
                {"field": "sector", "operator": "in", "value": ["Banking", "Energy"]}
            ]}
        }));
        assert!(query.sql.contains("fq.pe_ratio BETWEEN $1 AND $2"));
        assert!(query.sql.contains("c.sector IN ($3, $4)"));
        assert_eq!(query.params.len(), 5);
        assert_placeholders_match(&query);
    }

    #[test]
    fn exists_renders_null_checks() {
        let query = compile(json!({
            "filter": {"and": [{"field": "buyback_date", "operator": "exists", "value": true}]}
        }));
        assert!(query.sql.contains("bb.announcement_date IS NOT NULL"));

        let query = compile(json!({
            "filter": {"and": [{"field": "buyback_date", "operator": "exists", "value": false}]}
        }));
        assert!(query.sql.contains("bb.announcement_date IS NULL"));
    }

    #[test]
    fn time_series_without_period_uses_latest_nonnull_subquery() {
        let query = compile(json!({
            "filter": {"and": [{"field": "net_income", "operator": ">", "value": 0}]}
        }));
        assert!(
            query.sql.contains(
                "(SELECT t.net_income FROM fundamentals_quarterly t WHERE t.ticker = c.ticker AND t.net_income IS NOT NULL ORDER BY t.id DESC LIMIT 1) > $1"
            ),
            "sql: {}",
            query.sql
        );
        assert_placeholders_match(&query);
    }

    #[test]
    fn aggregate_period_renders_scalar_subquery() {
        let query = compile(json!({
            "filter": {"and": [{
                "field": "revenue", "operator": ">", "value": 1000,
                "period": {"type": "last_n_quarters", "n": 4, "aggregation": "avg"}
            }]}
        }));
        assert!(query.sql.contains("(SELECT AVG(w.v) FROM ("));
        assert!(query.sql.contains(") w) > $2"));
        assert_placeholders_match(&query);
    }

    #[test]
    fn trend_renders_successive_difference_check() {
        let query = compile(json!({
            "filter": {"and": [{
                "field": "revenue", "operator": "increasing",
                "period": {"type": "last_n_quarters", "n": 4}
            }]}
        }));
        assert!(query.sql.contains("LEAD(w.v) OVER (ORDER BY w.ord DESC)"));
        assert!(query.sql.contains("d.diff <= 0"));
        assert!(query.sql.ends_with("LIMIT $2"));
        // Window rows + limit; trend has no comparison value.
        assert_eq!(query.params, vec![SqlParam::Int(4), SqlParam::Int(100)]);
        assert_placeholders_match(&query);
    }

    #[test]
    fn null_handling_use_default_coalesces_with_parameter() {
        let query = compile(json!({
            "filter": {"and": [{
                "field": "pe_ratio", "operator": "<", "value": 15,
                "null_handling": {"strategy": "use_default", "default_value": 9999}
            }]}
        }));
        assert!(query.sql.contains("COALESCE(fq.pe_ratio, $1) < $2"));
        assert_eq!(
            query.params,
            vec![
                SqlParam::Number(9999.0),
                SqlParam::Number(15.0),
                SqlParam::Int(100)
            ]
        );
        assert_placeholders_match(&query);
    }

    #[test]
    fn interpolate_null_handling_is_rejected() {
        let catalog = Arc::new(FieldCatalog::builtin());
        let rule = ScreenRule::with_filter(Node::Cond(Condition {
            field: "pe_ratio".to_string(),
            operator: Operator::Lt,
            value: Some(CondValue::number(15.0)),
            period: None,
            null_handling: Some(screener_core::dsl::NullHandling {
                strategy: NullStrategy::Interpolate,
                default_value: None,
            }),
            value_is_field: false,
        }));
        let err = QueryCompiler::new(catalog, CompilerConfig::default())
            .compile(&rule)
            .unwrap_err();
        assert!(matches!(err, CompileError::NotImplemented(_)));
    }

    // ==================== Meta / Sort / Limit Tests ====================

    #[test]
    fn meta_filters_are_parameterized() {
        let query = compile(json!({
            "filter": {"and": [{"field": "roe", "operator": ">", "value": 15}]},
            "meta": {"sector": "Banking", "exchange": "NSE"}
        }));
        assert!(query.sql.contains("c.sector = $2"));
        assert!(query.sql.contains("c.exchange = $3"));
        assert!(!query.sql.contains("Banking"));
        assert_placeholders_match(&query);
    }

    #[test]
    fn sort_uses_projection_columns() {
        let query = compile(json!({
            "filter": {},
            "sort": {"field": "pe_ratio", "order": "desc"}
        }));
        assert!(query.sql.contains("ORDER BY pe_ratio DESC NULLS LAST"));

        let query = compile(json!({
            "filter": {},
            "sort": {"field": "ticker", "order": "asc"}
        }));
        assert!(query.sql.contains("ORDER BY c.ticker ASC NULLS LAST"));
    }

    #[test]
    fn limit_is_always_the_last_parameter() {
        let query = compile(json!({
            "filter": {"and": [{"field": "pe_ratio", "operator": "<", "value": 15}]},
            "limit": 250
        }));
        assert_eq!(query.params.last(), Some(&SqlParam::Int(250)));
        assert!(query.sql.trim_end().ends_with("LIMIT $2"));
    }

    #[test]
    fn compiler_caps_limit_defensively() {
        let rule = ScreenRule {
            limit: Some(5000),
            ..ScreenRule::empty()
        };
        let query = compiler().compile(&rule).unwrap();
        assert_eq!(query.params, vec![SqlParam::Int(1000)]);
    }

    #[test]
    fn fundamentals_are_always_joined_for_the_projection() {
        let query = compile(json!({"filter": {}}));
        assert!(query.sql.contains("LEFT JOIN LATERAL"));
        assert!(query.sql.contains("fundamentals_quarterly t"));
        assert!(query.tables.contains(&SourceTable::FundamentalsQuarterly));
    }

    #[test]
    fn idempotent_recompile_of_normalized_tree() {
        let catalog = Arc::new(FieldCatalog::builtin());
        let validator = Validator::new(
            catalog.clone(),
            CompilerConfig::default(),
            ValidatorConfig::default(),
        );
        let validated = validator
            .validate(&json!({
                "filter": {"and": [{"field": "P/E", "operator": "below", "value": 15}]}
            }))
            .unwrap();
        let compiler = QueryCompiler::new(catalog, CompilerConfig::default());
        let first = compiler.compile(&validated.rule).unwrap();
        let second = compiler.compile(&validated.rule).unwrap();
        assert_eq!(first, second);
    }
}
