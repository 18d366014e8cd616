//! Pre-compilation validation of screener rules.
//!
//! The validator is the trust boundary: it takes untrusted JSON (from the
//! translator, the API, or a stored alert) and either produces a
//! normalized typed `ScreenRule` plus warnings, or a report of every
//! error found. Nothing reaches the compiler without passing through
//! here. Checks fail fast per node but run exhaustively across the tree,
//! so one response lists every problem.
//!
//! Normalizations applied while parsing: aliases rewritten to canonical
//! field names, `above`/`below` operator spellings rewritten to symbols,
//! the legacy `timeframe` key migrated to `period`, fraction-scaled
//! values above 1 divided by 100, and sort order case-folded.

use std::sync::Arc;

use serde_json::Value;

use screener_core::catalog::{DenominatorGuard, FieldCatalog, FieldDef, FieldKind, Scale};
use screener_core::config::{CompilerConfig, ValidatorConfig};
use screener_core::dsl::{
    Aggregation, CondValue, Condition, Node, NullHandling, NullStrategy, Operator, Period,
    RuleMeta, ScalarValue, ScreenRule, Sort, SortOrder,
};

use crate::conflict;
use crate::error::{IssueKind, ValidationIssue, ValidationReport};

const TOP_LEVEL_KEYS: &[&str] = &["filter", "meta", "sort", "limit"];
const CONDITION_KEYS: &[&str] = &[
    "field",
    "operator",
    "value",
    "period",
    "timeframe",
    "null_handling",
    "value_is_field",
];
const META_KEYS: &[&str] = &["sector", "industry", "exchange"];

/// A rule that passed validation, plus the non-blocking findings.
#[derive(Debug, Clone)]
pub struct Validated {
    pub rule: ScreenRule,
    pub warnings: Vec<ValidationIssue>,
}

pub struct Validator {
    catalog: Arc<FieldCatalog>,
    compiler_config: CompilerConfig,
    validator_config: ValidatorConfig,
}

impl Validator {
    #[must_use]
    pub fn new(
        catalog: Arc<FieldCatalog>,
        compiler_config: CompilerConfig,
        validator_config: ValidatorConfig,
    ) -> Self {
        Self {
            catalog,
            compiler_config,
            validator_config,
        }
    }

    #[must_use]
    pub const fn strict(&self) -> bool {
        self.validator_config.strict_mode
    }

    /// Validates and normalizes an untrusted rule document.
    ///
    /// # Errors
    ///
    /// Returns the full issue report when any error-severity finding
    /// blocks execution. Warnings and infos ride along in both outcomes.
    pub fn validate(&self, raw: &Value) -> Result<Validated, ValidationReport> {
        let mut issues = Vec::new();

        let Some(obj) = raw.as_object() else {
            issues.push(ValidationIssue::error(
                IssueKind::RuleValidity,
                "",
                "rule must be a JSON object",
            ));
            return Err(ValidationReport::new(issues));
        };

        for key in obj.keys() {
            if !TOP_LEVEL_KEYS.contains(&key.as_str()) {
                issues.push(
                    ValidationIssue::error(
                        IssueKind::RuleValidity,
                        key.clone(),
                        format!("unknown top-level key: {key}"),
                    )
                    .with_suggestion("allowed keys are filter, meta, sort, limit"),
                );
            }
        }

        let filter = match obj.get("filter") {
            None => {
                issues.push(ValidationIssue::error(
                    IssueKind::RuleValidity,
                    "filter",
                    "rule must contain a 'filter'",
                ));
                None
            }
            Some(Value::Object(map)) if map.is_empty() => None,
            Some(value) => self.parse_node(value, "filter", 1, &mut issues),
        };

        let meta = obj
            .get("meta")
            .and_then(|v| self.parse_meta(v, &mut issues));
        let sort = obj
            .get("sort")
            .and_then(|v| self.parse_sort(v, &mut issues));
        let limit = obj
            .get("limit")
            .and_then(|v| self.parse_limit(v, &mut issues));

        if let Some(node) = &filter {
            self.walk_conjunctions(node, "filter", false, &mut issues);
        }

        if issues.iter().any(ValidationIssue::is_error) {
            return Err(ValidationReport::new(issues));
        }

        Ok(Validated {
            rule: ScreenRule {
                meta,
                filter,
                sort,
                limit,
            },
            warnings: issues,
        })
    }

    // ------------------------------------------------------------------
    // Tree parsing (structural phase + per-condition semantic phases)
    // ------------------------------------------------------------------

    fn parse_node(
        &self,
        value: &Value,
        path: &str,
        depth: usize,
        issues: &mut Vec<ValidationIssue>,
    ) -> Option<Node> {
        let Some(map) = value.as_object() else {
            issues.push(ValidationIssue::error(
                IssueKind::RuleValidity,
                path,
                "filter node must be a JSON object",
            ));
            return None;
        };

        let logical: Vec<&str> = ["and", "or", "not"]
            .into_iter()
            .filter(|k| map.contains_key(*k))
            .collect();

        if logical.len() > 1 {
            issues.push(ValidationIssue::error(
                IssueKind::RuleValidity,
                path,
                "logical node must contain exactly one of 'and', 'or', 'not'",
            ));
            return None;
        }

        let Some(&key) = logical.first() else {
            return self.parse_condition(map, path, issues).map(Node::Cond);
        };

        if map.len() != 1 {
            issues.push(ValidationIssue::error(
                IssueKind::RuleValidity,
                path,
                format!("logical node must contain only the '{key}' key"),
            ));
            return None;
        }

        if depth > self.compiler_config.max_nesting_depth {
            issues.push(
                ValidationIssue::error(
                    IssueKind::RuleValidity,
                    path,
                    format!(
                        "nesting depth exceeds the maximum of {}",
                        self.compiler_config.max_nesting_depth
                    ),
                )
                .with_suggestion("flatten the rule or split it into separate screens"),
            );
            return None;
        }

        match key {
            "and" | "or" => {
                let Some(children_raw) = map[key].as_array() else {
                    issues.push(ValidationIssue::error(
                        IssueKind::RuleValidity,
                        format!("{path}.{key}"),
                        format!("'{key}' must be an array"),
                    ));
                    return None;
                };
                if children_raw.is_empty() {
                    issues.push(ValidationIssue::error(
                        IssueKind::RuleValidity,
                        format!("{path}.{key}"),
                        format!("'{key}' must not be empty"),
                    ));
                    return None;
                }

                let mut children = Vec::with_capacity(children_raw.len());
                let mut complete = true;
                for (i, child) in children_raw.iter().enumerate() {
                    match self.parse_node(child, &format!("{path}.{key}[{i}]"), depth + 1, issues)
                    {
                        Some(node) => children.push(node),
                        None => complete = false,
                    }
                }
                if !complete {
                    return None;
                }
                Some(if key == "and" {
                    Node::and(children)
                } else {
                    Node::or(children)
                })
            }
            "not" => {
                let child =
                    self.parse_node(&map["not"], &format!("{path}.not"), depth + 1, issues)?;
                Some(Node::not(child))
            }
            _ => unreachable!(),
        }
    }

    /// Parses and checks one condition. Returns `None` after the first
    /// error on this node; warnings accumulate without stopping.
    fn parse_condition(
        &self,
        map: &serde_json::Map<String, Value>,
        path: &str,
        issues: &mut Vec<ValidationIssue>,
    ) -> Option<Condition> {
        for key in map.keys() {
            if !CONDITION_KEYS.contains(&key.as_str()) {
                issues.push(ValidationIssue::warning(
                    IssueKind::Ambiguity,
                    format!("{path}.{key}"),
                    format!("unknown condition key: {key}"),
                ));
            }
        }

        let Some(field_raw) = map.get("field").and_then(Value::as_str) else {
            issues.push(ValidationIssue::error(
                IssueKind::RuleValidity,
                path,
                "condition missing 'field'",
            ));
            return None;
        };

        let Some(op_raw) = map.get("operator").and_then(Value::as_str) else {
            issues.push(
                ValidationIssue::error(IssueKind::RuleValidity, path, "condition missing 'operator'")
                    .with_field(field_raw),
            );
            return None;
        };

        // Alternate comparison spellings are normalized here; everywhere
        // else in the system only the symbols exist.
        let op_name = match op_raw {
            "above" => ">",
            "below" => "<",
            other => other,
        };
        let Some(operator) = Operator::parse(op_name) else {
            issues.push(
                ValidationIssue::error(
                    IssueKind::RuleValidity,
                    format!("{path}.operator"),
                    format!("unknown operator: {op_raw}"),
                )
                .with_field(field_raw)
                .with_suggestion("supported operators: < > <= >= = != between in not_in exists increasing decreasing stable"),
            );
            return None;
        };

        // Field validity + alias rewrite.
        let Some(def) = self
            .catalog
            .resolve(field_raw)
            .or_else(|| self.catalog.resolve_alias(field_raw))
        else {
            issues.push(
                ValidationIssue::error(
                    IssueKind::RuleValidity,
                    format!("{path}.field"),
                    format!("unknown field: {field_raw}"),
                )
                .with_field(field_raw)
                .with_suggestion("use a catalog field name or one of its aliases"),
            );
            return None;
        };

        if !self.catalog.allows(def, operator) {
            issues.push(
                ValidationIssue::error(
                    IssueKind::RuleValidity,
                    format!("{path}.operator"),
                    format!("operator {operator} is not allowed for field {}", def.name),
                )
                .with_field(def.name),
            );
            return None;
        }

        let value_is_field = map
            .get("value_is_field")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let mut value = match self.parse_value(map.get("value"), def, path, issues) {
            Ok(v) => v,
            Err(()) => return None,
        };

        if !self.check_value_shape(def, operator, &mut value, value_is_field, path, issues) {
            return None;
        }

        // Legacy rules used "timeframe"; accept and migrate.
        let period_raw = map.get("period").or_else(|| map.get("timeframe"));
        let period = match self.parse_period(period_raw, def, operator, path, issues) {
            Ok(p) => p,
            Err(()) => return None,
        };

        let null_handling = match self.parse_null_handling(map.get("null_handling"), def, path, issues)
        {
            Ok(n) => n,
            Err(()) => return None,
        };

        if def.is_derived() {
            self.note_derived_metric(def, path, issues);
        }

        if def.time_series && period.is_none() && operator.is_comparison() {
            issues.push(
                ValidationIssue::warning(
                    IssueKind::Ambiguity,
                    path.to_string(),
                    format!(
                        "time-series field {} used without a period; the latest value will be used",
                        def.name
                    ),
                )
                .with_field(def.name)
                .with_suggestion("add a period for historical analysis"),
            );
        }

        Some(Condition {
            field: def.name.to_string(),
            operator,
            value,
            period,
            null_handling,
            value_is_field,
        })
    }

    #[allow(clippy::result_unit_err)]
    fn parse_value(
        &self,
        raw: Option<&Value>,
        def: &FieldDef,
        path: &str,
        issues: &mut Vec<ValidationIssue>,
    ) -> Result<Option<CondValue>, ()> {
        let Some(raw) = raw else {
            return Ok(None);
        };
        match raw {
            Value::Null => Ok(None),
            Value::Number(n) => Ok(Some(CondValue::Scalar(ScalarValue::Number(
                n.as_f64().unwrap_or(f64::NAN),
            )))),
            Value::String(s) => Ok(Some(CondValue::Scalar(ScalarValue::Text(s.clone())))),
            Value::Bool(b) => Ok(Some(CondValue::Scalar(ScalarValue::Bool(*b)))),
            Value::Array(items) => {
                let mut scalars = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::Number(n) => {
                            scalars.push(ScalarValue::Number(n.as_f64().unwrap_or(f64::NAN)));
                        }
                        Value::String(s) => scalars.push(ScalarValue::Text(s.clone())),
                        Value::Bool(b) => scalars.push(ScalarValue::Bool(*b)),
                        other => {
                            issues.push(
                                ValidationIssue::error(
                                    IssueKind::RuleValidity,
                                    format!("{path}.value"),
                                    format!("array values must be scalars, found {other}"),
                                )
                                .with_field(def.name),
                            );
                            return Err(());
                        }
                    }
                }
                Ok(Some(CondValue::List(scalars)))
            }
            Value::Object(_) => {
                issues.push(
                    ValidationIssue::error(
                        IssueKind::RuleValidity,
                        format!("{path}.value"),
                        "value must be a scalar or an array of scalars",
                    )
                    .with_field(def.name),
                );
                Err(())
            }
        }
    }

    /// Phase 4 (value shape) and phase 5 (range sanity), plus fraction
    /// rescaling. Returns false after recording an error.
    #[allow(clippy::too_many_lines)]
    fn check_value_shape(
        &self,
        def: &FieldDef,
        operator: Operator,
        value: &mut Option<CondValue>,
        value_is_field: bool,
        path: &str,
        issues: &mut Vec<ValidationIssue>,
    ) -> bool {
        let value_path = format!("{path}.value");

        if operator.is_trend() && !value_is_field {
            if value.is_some() {
                issues.push(
                    ValidationIssue::warning(
                        IssueKind::Ambiguity,
                        value_path,
                        format!("value is ignored for the {operator} operator"),
                    )
                    .with_field(def.name),
                );
                *value = None;
            }
            return true;
        }

        if value_is_field {
            if !operator.is_comparison() {
                issues.push(
                    ValidationIssue::error(
                        IssueKind::RuleValidity,
                        format!("{path}.operator"),
                        format!("field comparisons require a comparison operator, not {operator}"),
                    )
                    .with_field(def.name),
                );
                return false;
            }
            let Some(CondValue::Scalar(ScalarValue::Text(target))) = value.as_ref() else {
                issues.push(
                    ValidationIssue::error(
                        IssueKind::RuleValidity,
                        value_path,
                        "value_is_field requires 'value' to name a catalog field",
                    )
                    .with_field(def.name),
                );
                return false;
            };
            let Some(target_def) = self
                .catalog
                .resolve(target)
                .or_else(|| self.catalog.resolve_alias(target))
            else {
                issues.push(
                    ValidationIssue::error(
                        IssueKind::RuleValidity,
                        value_path,
                        format!("unknown field on right-hand side: {target}"),
                    )
                    .with_field(def.name),
                );
                return false;
            };
            if !(def.kind.is_numeric() && target_def.kind.is_numeric()) {
                issues.push(
                    ValidationIssue::error(
                        IssueKind::RuleValidity,
                        value_path,
                        format!(
                            "cannot compare {} ({:?}) with {} ({:?})",
                            def.name, def.kind, target_def.name, target_def.kind
                        ),
                    )
                    .with_field(def.name),
                );
                return false;
            }
            *value = Some(CondValue::text(target_def.name));
            return true;
        }

        match operator {
            Operator::Exists => {
                if !matches!(value, Some(CondValue::Scalar(ScalarValue::Bool(_)))) {
                    issues.push(
                        ValidationIssue::error(
                            IssueKind::RuleValidity,
                            value_path,
                            "'exists' requires a boolean value",
                        )
                        .with_field(def.name),
                    );
                    return false;
                }
                true
            }
            Operator::Between => {
                let Some(CondValue::List(items)) = value.as_mut() else {
                    issues.push(
                        ValidationIssue::error(
                            IssueKind::RuleValidity,
                            value_path,
                            "'between' requires an array of two values [min, max]",
                        )
                        .with_field(def.name),
                    );
                    return false;
                };
                if items.len() != 2 {
                    issues.push(
                        ValidationIssue::error(
                            IssueKind::RuleValidity,
                            value_path,
                            "'between' requires exactly two values [min, max]",
                        )
                        .with_field(def.name),
                    );
                    return false;
                }
                let (Some(mut lo), Some(mut hi)) = (items[0].as_f64(), items[1].as_f64()) else {
                    issues.push(
                        ValidationIssue::error(
                            IssueKind::RuleValidity,
                            value_path,
                            "'between' bounds must be numbers",
                        )
                        .with_field(def.name),
                    );
                    return false;
                };
                if def.scale == Scale::Fraction {
                    lo = rescale_fraction(lo);
                    hi = rescale_fraction(hi);
                    items[0] = ScalarValue::Number(lo);
                    items[1] = ScalarValue::Number(hi);
                }
                if lo >= hi {
                    issues.push(
                        ValidationIssue::error(
                            IssueKind::LogicalConflict,
                            value_path,
                            format!("'between' range invalid: min ({lo}) >= max ({hi})"),
                        )
                        .with_field(def.name)
                        .with_suggestion("ensure min < max"),
                    );
                    return false;
                }
                self.range_sanity(def, lo, path, issues);
                self.range_sanity(def, hi, path, issues);
                true
            }
            Operator::In | Operator::NotIn => {
                let Some(CondValue::List(items)) = value.as_mut() else {
                    issues.push(
                        ValidationIssue::error(
                            IssueKind::RuleValidity,
                            value_path,
                            format!("'{operator}' requires a non-empty array"),
                        )
                        .with_field(def.name),
                    );
                    return false;
                };
                if items.is_empty() {
                    issues.push(
                        ValidationIssue::error(
                            IssueKind::RuleValidity,
                            value_path,
                            format!("'{operator}' requires a non-empty array"),
                        )
                        .with_field(def.name),
                    );
                    return false;
                }
                for item in items.iter_mut() {
                    if !self.scalar_matches_kind(def, item) {
                        issues.push(
                            ValidationIssue::error(
                                IssueKind::RuleValidity,
                                value_path.clone(),
                                format!("array value {item} does not match the {:?} field kind", def.kind),
                            )
                            .with_field(def.name),
                        );
                        return false;
                    }
                    if def.scale == Scale::Fraction {
                        if let ScalarValue::Number(n) = item {
                            *n = rescale_fraction(*n);
                        }
                    }
                }
                true
            }
            op if op.is_comparison() => {
                let Some(CondValue::Scalar(scalar)) = value.as_mut() else {
                    issues.push(
                        ValidationIssue::error(
                            IssueKind::RuleValidity,
                            value_path,
                            format!("operator '{operator}' requires a value"),
                        )
                        .with_field(def.name),
                    );
                    return false;
                };
                if !self.scalar_matches_kind(def, scalar) {
                    issues.push(
                        ValidationIssue::error(
                            IssueKind::RuleValidity,
                            value_path,
                            format!("value {scalar} does not match the {:?} field kind", def.kind),
                        )
                        .with_field(def.name),
                    );
                    return false;
                }
                if def.scale == Scale::Fraction {
                    if let ScalarValue::Number(n) = scalar {
                        *n = rescale_fraction(*n);
                    }
                }
                if let ScalarValue::Number(n) = scalar {
                    self.range_sanity(def, *n, path, issues);
                }
                true
            }
            _ => true,
        }
    }

    fn scalar_matches_kind(&self, def: &FieldDef, scalar: &ScalarValue) -> bool {
        match def.kind {
            FieldKind::Numeric | FieldKind::Percentage | FieldKind::Fraction => {
                matches!(scalar, ScalarValue::Number(_))
            }
            FieldKind::Text | FieldKind::Date => matches!(scalar, ScalarValue::Text(_)),
            FieldKind::Boolean => matches!(scalar, ScalarValue::Bool(_)),
        }
    }

    fn range_sanity(
        &self,
        def: &FieldDef,
        value: f64,
        path: &str,
        issues: &mut Vec<ValidationIssue>,
    ) {
        if let Some((min, max)) = def.value_range {
            if value < min || value > max {
                issues.push(
                    ValidationIssue::warning(
                        IssueKind::RuleValidity,
                        format!("{path}.value"),
                        format!(
                            "value {value} is outside the typical range [{min}, {max}] for {}",
                            def.name
                        ),
                    )
                    .with_field(def.name)
                    .with_suggestion("verify this is intentional"),
                );
            }
        }
    }

    #[allow(clippy::result_unit_err)]
    fn parse_period(
        &self,
        raw: Option<&Value>,
        def: &FieldDef,
        operator: Operator,
        path: &str,
        issues: &mut Vec<ValidationIssue>,
    ) -> Result<Option<Period>, ()> {
        let Some(raw) = raw else {
            if operator.is_trend() {
                issues.push(
                    ValidationIssue::error(
                        IssueKind::RuleValidity,
                        path,
                        format!("the {operator} operator requires a period"),
                    )
                    .with_field(def.name)
                    .with_suggestion("add a period such as {\"type\": \"last_n_quarters\", \"n\": 4}"),
                );
                return Err(());
            }
            return Ok(None);
        };

        let period_path = format!("{path}.period");

        let mut period: Period = match serde_json::from_value(raw.clone()) {
            Ok(p) => p,
            Err(e) => {
                issues.push(
                    ValidationIssue::error(
                        IssueKind::RuleValidity,
                        period_path,
                        format!("invalid period: {e}"),
                    )
                    .with_field(def.name),
                );
                return Err(());
            }
        };

        if !def.time_series {
            issues.push(
                ValidationIssue::error(
                    IssueKind::DataAvailability,
                    period_path,
                    format!("field {} does not support time-series queries", def.name),
                )
                .with_field(def.name)
                .with_suggestion("remove the period or use a time-series field"),
            );
            return Err(());
        }

        if !(1..=20).contains(&period.n) {
            issues.push(
                ValidationIssue::error(
                    IssueKind::RuleValidity,
                    format!("{period_path}.n"),
                    format!("period 'n' must be between 1 and 20, got {}", period.n),
                )
                .with_field(def.name),
            );
            return Err(());
        }

        if operator.is_trend() {
            period.aggregation = Aggregation::Trend;
        } else if period.aggregation == Aggregation::Trend {
            issues.push(
                ValidationIssue::error(
                    IssueKind::RuleValidity,
                    format!("{period_path}.aggregation"),
                    "the trend aggregation requires a trend operator (increasing, decreasing, stable)",
                )
                .with_field(def.name),
            );
            return Err(());
        } else if !operator.is_comparison() {
            issues.push(
                ValidationIssue::error(
                    IssueKind::RuleValidity,
                    format!("{period_path}.aggregation"),
                    format!(
                        "aggregation '{:?}' requires a comparison operator, not {operator}",
                        period.aggregation
                    ),
                )
                .with_field(def.name),
            );
            return Err(());
        }

        if period.n > 12 {
            issues.push(
                ValidationIssue::warning(
                    IssueKind::DataAvailability,
                    format!("{period_path}.n"),
                    format!(
                        "requesting {} periods may exceed historical coverage and shrink the result set",
                        period.n
                    ),
                )
                .with_field(def.name),
            );
        }

        Ok(Some(period))
    }

    #[allow(clippy::result_unit_err)]
    fn parse_null_handling(
        &self,
        raw: Option<&Value>,
        def: &FieldDef,
        path: &str,
        issues: &mut Vec<ValidationIssue>,
    ) -> Result<Option<NullHandling>, ()> {
        let Some(raw) = raw else {
            return Ok(None);
        };
        let nh_path = format!("{path}.null_handling");

        let handling: NullHandling = match serde_json::from_value(raw.clone()) {
            Ok(h) => h,
            Err(e) => {
                issues.push(
                    ValidationIssue::error(
                        IssueKind::RuleValidity,
                        nh_path,
                        format!("invalid null_handling: {e}"),
                    )
                    .with_field(def.name),
                );
                return Err(());
            }
        };

        match handling.strategy {
            NullStrategy::UseDefault if handling.default_value.is_none() => {
                issues.push(
                    ValidationIssue::error(
                        IssueKind::RuleValidity,
                        nh_path,
                        "the use_default strategy requires 'default_value'",
                    )
                    .with_field(def.name),
                );
                Err(())
            }
            NullStrategy::UseLatest if !def.time_series => {
                issues.push(
                    ValidationIssue::error(
                        IssueKind::DataAvailability,
                        nh_path,
                        format!("use_latest requires a time-series field, {} is not one", def.name),
                    )
                    .with_field(def.name),
                );
                Err(())
            }
            // Reserved strategy: passed through so the compiler can reject
            // it with NOT_IMPLEMENTED, per the compilation contract.
            _ => Ok(Some(handling)),
        }
    }

    fn note_derived_metric(
        &self,
        def: &FieldDef,
        path: &str,
        issues: &mut Vec<ValidationIssue>,
    ) {
        let Some(formula) = self.catalog.derived_formula(def.name) else {
            issues.push(
                ValidationIssue::error(
                    IssueKind::MetricSafety,
                    path,
                    format!("derived metric {} has no formula in the catalog", def.name),
                )
                .with_field(def.name),
            );
            return;
        };
        let guard_text = match formula.guard {
            DenominatorGuard::NonZero => "zero",
            DenominatorGuard::Positive => "non-positive",
        };
        issues.push(
            ValidationIssue::info(
                IssueKind::MetricSafety,
                path.to_string(),
                format!(
                    "{} excludes instruments with {guard_text} {}",
                    def.name, formula.denominator
                ),
            )
            .with_field(def.name),
        );
    }

    // ------------------------------------------------------------------
    // Phase 7/8: conjunctive satisfiability and literal metric safety
    // ------------------------------------------------------------------

    fn walk_conjunctions(
        &self,
        node: &Node,
        path: &str,
        under_and: bool,
        issues: &mut Vec<ValidationIssue>,
    ) {
        match node {
            Node::And { and } => {
                if !under_and {
                    let mut conds = Vec::new();
                    collect_conjunctive(node, &mut conds);
                    self.check_conjunction(&conds, path, issues);
                }
                for (i, child) in and.iter().enumerate() {
                    let child_path = format!("{path}.and[{i}]");
                    let child_is_and = matches!(child, Node::And { .. });
                    self.walk_conjunctions(child, &child_path, child_is_and, issues);
                }
            }
            Node::Or { or } => {
                for (i, child) in or.iter().enumerate() {
                    self.walk_conjunctions(child, &format!("{path}.or[{i}]"), false, issues);
                }
            }
            Node::Not { not } => {
                self.walk_conjunctions(not, &format!("{path}.not"), false, issues);
            }
            Node::Cond(_) => {}
        }
    }

    fn check_conjunction(
        &self,
        conds: &[&Condition],
        path: &str,
        issues: &mut Vec<ValidationIssue>,
    ) {
        for conflict in conflict::find_conflicts(conds) {
            issues.push(
                ValidationIssue::error(
                    IssueKind::LogicalConflict,
                    format!("{path}.and"),
                    format!(
                        "unsatisfiable conditions for '{}': ({}) AND ({}) can never both hold",
                        conflict.field, conflict.first, conflict.second
                    ),
                )
                .with_field(conflict.field)
                .with_suggestion("relax or remove one of the conflicting conditions"),
            );
        }

        // Pure-literal divide-by-zero: the same AND level pins a derived
        // metric's denominator to a value its guard excludes.
        for cond in conds {
            let Some(formula) = self.catalog.derived_formula(&cond.field) else {
                continue;
            };
            for other in conds {
                if other.field != formula.denominator || other.operator != Operator::Eq {
                    continue;
                }
                let Some(pinned) = other.value.as_ref().and_then(CondValue::as_f64) else {
                    continue;
                };
                let violates = match formula.guard {
                    DenominatorGuard::NonZero => pinned == 0.0,
                    DenominatorGuard::Positive => pinned <= 0.0,
                };
                if violates {
                    issues.push(
                        ValidationIssue::error(
                            IssueKind::MetricSafety,
                            format!("{path}.and"),
                            format!(
                                "{} cannot be computed: ({}) pins its denominator to a guarded value",
                                cond.field,
                                other.describe()
                            ),
                        )
                        .with_field(cond.field.clone()),
                    );
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Phase 9: meta, sort, limit
    // ------------------------------------------------------------------

    fn parse_meta(&self, raw: &Value, issues: &mut Vec<ValidationIssue>) -> Option<RuleMeta> {
        let Some(map) = raw.as_object() else {
            issues.push(ValidationIssue::error(
                IssueKind::RuleValidity,
                "meta",
                "'meta' must be an object",
            ));
            return None;
        };

        let mut meta = RuleMeta::default();
        for (key, value) in map {
            if !META_KEYS.contains(&key.as_str()) {
                issues.push(ValidationIssue::warning(
                    IssueKind::Ambiguity,
                    format!("meta.{key}"),
                    format!("unknown meta key: {key}"),
                ));
                continue;
            }
            let Some(text) = value.as_str() else {
                issues.push(ValidationIssue::error(
                    IssueKind::RuleValidity,
                    format!("meta.{key}"),
                    format!("meta.{key} must be a string"),
                ));
                continue;
            };
            match key.as_str() {
                "sector" => meta.sector = Some(text.to_string()),
                "industry" => meta.industry = Some(text.to_string()),
                "exchange" => meta.exchange = Some(text.to_string()),
                _ => unreachable!(),
            }
        }

        if meta.is_empty() {
            None
        } else {
            Some(meta)
        }
    }

    fn parse_sort(&self, raw: &Value, issues: &mut Vec<ValidationIssue>) -> Option<Sort> {
        let Some(map) = raw.as_object() else {
            issues.push(ValidationIssue::error(
                IssueKind::RuleValidity,
                "sort",
                "'sort' must be an object",
            ));
            return None;
        };

        let Some(field_raw) = map.get("field").and_then(Value::as_str) else {
            issues.push(ValidationIssue::error(
                IssueKind::RuleValidity,
                "sort.field",
                "sort requires a 'field'",
            ));
            return None;
        };

        let Some(def) = self
            .catalog
            .resolve(field_raw)
            .or_else(|| self.catalog.resolve_alias(field_raw))
        else {
            issues.push(
                ValidationIssue::error(
                    IssueKind::RuleValidity,
                    "sort.field",
                    format!("unknown sort field: {field_raw}"),
                )
                .with_field(field_raw),
            );
            return None;
        };

        if !def.sortable {
            issues.push(
                ValidationIssue::error(
                    IssueKind::RuleValidity,
                    "sort.field",
                    format!("field {} is not sortable", def.name),
                )
                .with_field(def.name),
            );
            return None;
        }

        let order = match map.get("order").and_then(Value::as_str) {
            None => SortOrder::Asc,
            Some(raw_order) => match raw_order.to_ascii_lowercase().as_str() {
                "asc" | "ascending" => SortOrder::Asc,
                "desc" | "descending" => SortOrder::Desc,
                other => {
                    issues.push(ValidationIssue::error(
                        IssueKind::RuleValidity,
                        "sort.order",
                        format!("sort order must be 'asc' or 'desc', got {other}"),
                    ));
                    return None;
                }
            },
        };

        Some(Sort {
            field: def.name.to_string(),
            order,
        })
    }

    fn parse_limit(&self, raw: &Value, issues: &mut Vec<ValidationIssue>) -> Option<u32> {
        let max = self.compiler_config.max_limit;
        let valid = raw
            .as_u64()
            .filter(|&n| n >= 1 && n <= u64::from(max))
            .map(|n| u32::try_from(n).unwrap_or(max));
        if valid.is_none() {
            issues.push(ValidationIssue::error(
                IssueKind::RuleValidity,
                "limit",
                format!("limit must be an integer between 1 and {max}"),
            ));
        }
        valid
    }
}

fn collect_conjunctive<'a>(node: &'a Node, out: &mut Vec<&'a Condition>) {
    match node {
        Node::And { and } => {
            for child in and {
                collect_conjunctive(child, out);
            }
        }
        Node::Cond(cond) => out.push(cond),
        Node::Or { .. } | Node::Not { .. } => {}
    }
}

fn rescale_fraction(value: f64) -> f64 {
    if value > 1.0 {
        value / 100.0
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Severity;
    use serde_json::json;

    fn validator() -> Validator {
        Validator::new(
            Arc::new(FieldCatalog::builtin()),
            CompilerConfig::default(),
            ValidatorConfig::default(),
        )
    }

    fn validate(raw: serde_json::Value) -> Result<Validated, ValidationReport> {
        validator().validate(&raw)
    }

    fn first_error(report: &ValidationReport) -> &ValidationIssue {
        report.errors().into_iter().next().expect("expected an error")
    }

    // ==================== Structural Tests ====================

    #[test]
    fn accepts_simple_rule() {
        let validated = validate(json!({
            "filter": {"and": [{"field": "pe_ratio", "operator": "<", "value": 15}]}
        }))
        .unwrap();
        let Node::And { and } = validated.rule.filter.unwrap() else {
            panic!("expected And");
        };
        assert_eq!(and.len(), 1);
    }

    #[test]
    fn empty_filter_is_the_degenerate_rule() {
        let validated = validate(json!({"filter": {}})).unwrap();
        assert!(validated.rule.filter.is_none());
    }

    #[test]
    fn missing_filter_is_an_error() {
        let report = validate(json!({"limit": 10})).unwrap_err();
        assert_eq!(first_error(&report).path, "filter");
    }

    #[test]
    fn unknown_top_level_key_is_an_error() {
        let report = validate(json!({"filter": {}, "bogus": 1})).unwrap_err();
        assert!(first_error(&report).message.contains("bogus"));
    }

    #[test]
    fn two_logical_keys_on_one_node_is_an_error() {
        let report = validate(json!({
            "filter": {"and": [], "or": []}
        }))
        .unwrap_err();
        assert!(first_error(&report).message.contains("exactly one"));
    }

    #[test]
    fn empty_and_array_is_an_error() {
        let report = validate(json!({"filter": {"and": []}})).unwrap_err();
        assert!(first_error(&report).message.contains("must not be empty"));
    }

    fn nested_to_depth(depth: usize) -> serde_json::Value {
        let mut node = json!({"field": "pe_ratio", "operator": "<", "value": 15});
        for _ in 0..depth {
            node = json!({"and": [node]});
        }
        json!({"filter": node})
    }

    #[test]
    fn depth_five_accepted_depth_six_rejected() {
        assert!(validate(nested_to_depth(5)).is_ok());
        let report = validate(nested_to_depth(6)).unwrap_err();
        assert!(first_error(&report).message.contains("nesting depth"));
    }

    // ==================== Field & Operator Tests ====================

    #[test]
    fn unknown_field_is_an_error_with_path() {
        let report = validate(json!({
            "filter": {"and": [{"field": "mystery_metric", "operator": ">", "value": 1}]}
        }))
        .unwrap_err();
        let err = first_error(&report);
        assert_eq!(err.path, "filter.and[0].field");
        assert_eq!(err.kind, IssueKind::RuleValidity);
    }

    #[test]
    fn aliases_rewrite_to_canonical_names() {
        let validated = validate(json!({
            "filter": {"and": [{"field": "P/E Ratio", "operator": "<", "value": 15}]}
        }))
        .unwrap();
        let Node::And { and } = validated.rule.filter.unwrap() else {
            panic!();
        };
        let Node::Cond(cond) = &and[0] else { panic!() };
        assert_eq!(cond.field, "pe_ratio");
    }

    #[test]
    fn above_below_spellings_are_canonicalized() {
        let validated = validate(json!({
            "filter": {"and": [{"field": "pe_ratio", "operator": "below", "value": 15}]}
        }))
        .unwrap();
        let Node::And { and } = validated.rule.filter.unwrap() else {
            panic!();
        };
        let Node::Cond(cond) = &and[0] else { panic!() };
        assert_eq!(cond.operator, Operator::Lt);
    }

    #[test]
    fn operator_not_in_field_whitelist_is_an_error() {
        let report = validate(json!({
            "filter": {"and": [{"field": "sector", "operator": "<", "value": "banking"}]}
        }))
        .unwrap_err();
        assert!(first_error(&report).message.contains("not allowed"));
    }

    #[test]
    fn unknown_operator_is_an_error() {
        let report = validate(json!({
            "filter": {"and": [{"field": "pe_ratio", "operator": "LIKE", "value": 10}]}
        }))
        .unwrap_err();
        assert!(first_error(&report).message.contains("unknown operator"));
    }

    // ==================== Value Shape Tests ====================

    #[test]
    fn comparison_without_value_is_an_error() {
        let report = validate(json!({
            "filter": {"and": [{"field": "pe_ratio", "operator": "<"}]}
        }))
        .unwrap_err();
        assert!(first_error(&report).message.contains("requires a value"));
    }

    #[test]
    fn value_kind_mismatch_is_an_error() {
        let report = validate(json!({
            "filter": {"and": [{"field": "pe_ratio", "operator": "<", "value": "cheap"}]}
        }))
        .unwrap_err();
        assert!(first_error(&report).message.contains("does not match"));
    }

    #[test]
    fn between_rejects_inverted_and_equal_bounds() {
        for bounds in [json!([20, 10]), json!([10, 10])] {
            let report = validate(json!({
                "filter": {"and": [{"field": "pe_ratio", "operator": "between", "value": bounds}]}
            }))
            .unwrap_err();
            let err = first_error(&report);
            assert_eq!(err.kind, IssueKind::LogicalConflict);
        }
    }

    #[test]
    fn in_requires_non_empty_array() {
        let report = validate(json!({
            "filter": {"and": [{"field": "sector", "operator": "in", "value": []}]}
        }))
        .unwrap_err();
        assert!(first_error(&report).message.contains("non-empty"));
    }

    #[test]
    fn exists_requires_boolean() {
        let report = validate(json!({
            "filter": {"and": [{"field": "buyback_date", "operator": "exists", "value": 1}]}
        }))
        .unwrap_err();
        assert!(first_error(&report).message.contains("boolean"));
    }

    #[test]
    fn fraction_scaled_values_are_rescaled() {
        let validated = validate(json!({
            "filter": {"and": [{"field": "dividend_yield", "operator": ">", "value": 2}]}
        }))
        .unwrap();
        let Node::And { and } = validated.rule.filter.unwrap() else {
            panic!();
        };
        let Node::Cond(cond) = &and[0] else { panic!() };
        assert_eq!(cond.value.as_ref().unwrap().as_f64(), Some(0.02));
    }

    #[test]
    fn out_of_range_value_warns_but_passes() {
        let validated = validate(json!({
            "filter": {"and": [{"field": "roe", "operator": ">", "value": 250}]}
        }))
        .unwrap();
        assert!(validated
            .warnings
            .iter()
            .any(|w| w.severity == Severity::Warning && w.message.contains("typical range")));
    }

    #[test]
    fn cross_field_comparison_resolves_both_sides() {
        let validated = validate(json!({
            "filter": {"and": [{
                "field": "close", "operator": "<",
                "value": "analyst target", "value_is_field": true
            }]}
        }))
        .unwrap();
        let Node::And { and } = validated.rule.filter.unwrap() else {
            panic!();
        };
        let Node::Cond(cond) = &and[0] else { panic!() };
        assert_eq!(cond.field, "close");
        assert_eq!(
            cond.value,
            Some(CondValue::text("price_target_avg"))
        );
    }

    #[test]
    fn cross_field_kind_mismatch_is_an_error() {
        let report = validate(json!({
            "filter": {"and": [{
                "field": "close", "operator": "<",
                "value": "sector", "value_is_field": true
            }]}
        }))
        .unwrap_err();
        assert!(first_error(&report).message.contains("cannot compare"));
    }

    // ==================== Period Tests ====================

    #[test]
    fn period_on_non_time_series_field_is_an_error() {
        let report = validate(json!({
            "filter": {"and": [{
                "field": "pe_ratio", "operator": "<", "value": 15,
                "period": {"type": "last_n_quarters", "n": 4}
            }]}
        }))
        .unwrap_err();
        assert_eq!(first_error(&report).kind, IssueKind::DataAvailability);
    }

    #[test]
    fn period_n_boundaries() {
        let rule = |n: u32| {
            json!({
                "filter": {"and": [{
                    "field": "net_income", "operator": ">", "value": 0,
                    "period": {"type": "last_n_quarters", "n": n}
                }]}
            })
        };
        assert!(validate(rule(20)).is_ok());
        let report = validate(rule(21)).unwrap_err();
        assert!(first_error(&report).path.ends_with("period.n"));
    }

    #[test]
    fn large_n_warns_about_coverage() {
        let validated = validate(json!({
            "filter": {"and": [{
                "field": "net_income", "operator": ">", "value": 0,
                "period": {"type": "last_n_quarters", "n": 16}
            }]}
        }))
        .unwrap();
        assert!(validated
            .warnings
            .iter()
            .any(|w| w.kind == IssueKind::DataAvailability));
    }

    #[test]
    fn legacy_timeframe_key_is_migrated() {
        let validated = validate(json!({
            "filter": {"and": [{
                "field": "net_income", "operator": ">", "value": 0,
                "timeframe": {"type": "last_n_quarters", "n": 4}
            }]}
        }))
        .unwrap();
        let Node::And { and } = validated.rule.filter.unwrap() else {
            panic!();
        };
        let Node::Cond(cond) = &and[0] else { panic!() };
        assert_eq!(cond.period.unwrap().n, 4);
    }

    #[test]
    fn trend_operator_without_period_is_an_error() {
        let report = validate(json!({
            "filter": {"and": [{"field": "revenue", "operator": "increasing"}]}
        }))
        .unwrap_err();
        assert!(first_error(&report).message.contains("requires a period"));
    }

    #[test]
    fn trend_operator_forces_trend_aggregation() {
        let validated = validate(json!({
            "filter": {"and": [{
                "field": "revenue", "operator": "increasing",
                "period": {"type": "last_n_quarters", "n": 4, "aggregation": "all"}
            }]}
        }))
        .unwrap();
        let Node::And { and } = validated.rule.filter.unwrap() else {
            panic!();
        };
        let Node::Cond(cond) = &and[0] else { panic!() };
        assert_eq!(cond.period.unwrap().aggregation, Aggregation::Trend);
    }

    #[test]
    fn trend_aggregation_with_comparison_operator_is_an_error() {
        let report = validate(json!({
            "filter": {"and": [{
                "field": "revenue", "operator": ">", "value": 0,
                "period": {"type": "last_n_quarters", "n": 4, "aggregation": "trend"}
            }]}
        }))
        .unwrap_err();
        assert!(first_error(&report).message.contains("trend aggregation"));
    }

    #[test]
    fn time_series_without_period_warns() {
        let validated = validate(json!({
            "filter": {"and": [{"field": "net_income", "operator": ">", "value": 0}]}
        }))
        .unwrap();
        assert!(validated
            .warnings
            .iter()
            .any(|w| w.kind == IssueKind::Ambiguity && w.message.contains("latest value")));
    }

    // ==================== Conflict Tests ====================

    #[test]
    fn unsatisfiable_range_is_one_logical_conflict() {
        let report = validate(json!({
            "filter": {"and": [
                {"field": "pe_ratio", "operator": ">", "value": 50},
                {"field": "pe_ratio", "operator": "<", "value": 5}
            ]}
        }))
        .unwrap_err();
        let errors = report.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, IssueKind::LogicalConflict);
        assert_eq!(errors[0].path, "filter.and");
        assert!(errors[0].message.contains("pe_ratio > 50"));
        assert!(errors[0].message.contains("pe_ratio < 5"));
    }

    #[test]
    fn conflicts_across_or_branches_are_allowed() {
        let result = validate(json!({
            "filter": {"or": [
                {"field": "pe_ratio", "operator": ">", "value": 50},
                {"field": "pe_ratio", "operator": "<", "value": 5}
            ]}
        }));
        assert!(result.is_ok());
    }

    #[test]
    fn nested_and_flattens_into_the_same_conjunction() {
        let report = validate(json!({
            "filter": {"and": [
                {"field": "pe_ratio", "operator": ">", "value": 50},
                {"and": [{"field": "pe_ratio", "operator": "<", "value": 5}]}
            ]}
        }))
        .unwrap_err();
        assert_eq!(report.errors().len(), 1);
    }

    #[test]
    fn pinned_denominator_blocks_derived_metric() {
        let report = validate(json!({
            "filter": {"and": [
                {"field": "eps_growth", "operator": "=", "value": 0},
                {"field": "peg_ratio", "operator": "<", "value": 1}
            ]}
        }))
        .unwrap_err();
        assert!(report
            .errors()
            .iter()
            .any(|e| e.kind == IssueKind::MetricSafety));
    }

    #[test]
    fn derived_metric_emits_info_notice() {
        let validated = validate(json!({
            "filter": {"and": [{"field": "debt_to_fcf", "operator": "<", "value": 3}]}
        }))
        .unwrap();
        assert!(validated
            .warnings
            .iter()
            .any(|i| i.severity == Severity::Info && i.kind == IssueKind::MetricSafety));
    }

    // ==================== Meta / Sort / Limit Tests ====================

    #[test]
    fn limit_boundaries() {
        assert!(validate(json!({"filter": {}, "limit": 1000})).is_ok());
        assert!(validate(json!({"filter": {}, "limit": 1001})).is_err());
        assert!(validate(json!({"filter": {}, "limit": 0})).is_err());
    }

    #[test]
    fn sort_order_is_canonicalized() {
        let validated =
            validate(json!({"filter": {}, "sort": {"field": "market_cap", "order": "DESC"}}))
                .unwrap();
        let sort = validated.rule.sort.unwrap();
        assert_eq!(sort.order, SortOrder::Desc);
        assert_eq!(sort.field, "market_cap");
    }

    #[test]
    fn unsortable_sort_field_is_an_error() {
        let report =
            validate(json!({"filter": {}, "sort": {"field": "buyback_date"}})).unwrap_err();
        assert!(first_error(&report).message.contains("not sortable"));
    }

    #[test]
    fn meta_keys_are_checked() {
        let validated = validate(json!({
            "filter": {},
            "meta": {"sector": "Banking", "timeframe": "1y"}
        }))
        .unwrap();
        assert_eq!(validated.rule.meta.unwrap().sector.as_deref(), Some("Banking"));
        assert!(validated
            .warnings
            .iter()
            .any(|w| w.message.contains("unknown meta key")));
    }

    #[test]
    fn all_errors_are_collected_in_one_pass() {
        let report = validate(json!({
            "filter": {"and": [
                {"field": "mystery", "operator": ">", "value": 1},
                {"field": "pe_ratio", "operator": "LIKE", "value": 1}
            ]},
            "limit": 9999
        }))
        .unwrap_err();
        assert!(report.errors().len() >= 3);
    }
}
