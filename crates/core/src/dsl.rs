//! The screener rule tree.
//!
//! A `ScreenRule` is the validated, canonical representation of one screen:
//! a boolean filter tree over catalog fields plus optional sort and limit.
//! The wire format is plain JSON (`{"and": [...]}`, `{"or": [...]}`,
//! `{"not": {...}}`, or a flat condition object); the validator is the only
//! component that parses untrusted JSON into this tree, and the only one
//! allowed to mutate it (alias rewriting, unit rescaling, legacy key
//! migration). The compiler consumes it read-only.

use serde::{Deserialize, Serialize};

/// Every operator the DSL admits. The set is closed; each field in the
/// catalog whitelists the subset legal for its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "between")]
    Between,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not_in")]
    NotIn,
    #[serde(rename = "exists")]
    Exists,
    #[serde(rename = "increasing")]
    Increasing,
    #[serde(rename = "decreasing")]
    Decreasing,
    #[serde(rename = "stable")]
    Stable,
}

impl Operator {
    /// Parses the canonical wire spelling. Alternate spellings
    /// (`above`, `below`) are handled by the validator's normalization
    /// pass, not here.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "<" => Some(Self::Lt),
            ">" => Some(Self::Gt),
            "<=" => Some(Self::Le),
            ">=" => Some(Self::Ge),
            "=" | "==" => Some(Self::Eq),
            "!=" => Some(Self::Ne),
            "between" => Some(Self::Between),
            "in" => Some(Self::In),
            "not_in" => Some(Self::NotIn),
            "exists" => Some(Self::Exists),
            "increasing" => Some(Self::Increasing),
            "decreasing" => Some(Self::Decreasing),
            "stable" => Some(Self::Stable),
            _ => None,
        }
    }

    /// Canonical wire spelling.
    #[must_use]
    pub const fn wire_name(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Between => "between",
            Self::In => "in",
            Self::NotIn => "not_in",
            Self::Exists => "exists",
            Self::Increasing => "increasing",
            Self::Decreasing => "decreasing",
            Self::Stable => "stable",
        }
    }

    /// SQL rendering for plain comparison operators.
    #[must_use]
    pub const fn sql(self) -> Option<&'static str> {
        match self {
            Self::Lt => Some("<"),
            Self::Gt => Some(">"),
            Self::Le => Some("<="),
            Self::Ge => Some(">="),
            Self::Eq => Some("="),
            Self::Ne => Some("!="),
            _ => None,
        }
    }

    /// Logical inverse, used by the `all`-aggregation rewrite
    /// (`NOT EXISTS (... WHERE col INV_OP value)`).
    #[must_use]
    pub const fn inverse(self) -> Option<Self> {
        match self {
            Self::Lt => Some(Self::Ge),
            Self::Gt => Some(Self::Le),
            Self::Le => Some(Self::Gt),
            Self::Ge => Some(Self::Lt),
            Self::Eq => Some(Self::Ne),
            Self::Ne => Some(Self::Eq),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Lt | Self::Gt | Self::Le | Self::Ge | Self::Eq | Self::Ne
        )
    }

    #[must_use]
    pub const fn is_trend(self) -> bool {
        matches!(self, Self::Increasing | Self::Decreasing | Self::Stable)
    }

    /// True when the operator needs a `value` on the condition.
    #[must_use]
    pub const fn requires_value(self) -> bool {
        !matches!(self, Self::Increasing | Self::Decreasing | Self::Stable)
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// A single JSON scalar carried by a condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Number(f64),
    Text(String),
    Bool(bool),
}

impl ScalarValue {
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl std::fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Condition value: a scalar for comparisons, a list for
/// `between` / `in` / `not_in`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CondValue {
    Scalar(ScalarValue),
    List(Vec<ScalarValue>),
}

impl CondValue {
    #[must_use]
    pub fn number(n: f64) -> Self {
        Self::Scalar(ScalarValue::Number(n))
    }

    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Self::Scalar(ScalarValue::Text(s.into()))
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Scalar(s) => s.as_f64(),
            Self::List(_) => None,
        }
    }
}

/// Window over a time-series field's historical rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodType {
    LastNQuarters,
    LastNYears,
    Trailing12Months,
    QuarterOverQuarter,
    YearOverYear,
}

impl PeriodType {
    /// How many rows of the backing quarterly/daily table the window reads.
    /// `last 4 quarters` reads 4 rows; `last 2 years` reads 8 quarterly
    /// rows; quarter-over-quarter needs the latest pair.
    #[must_use]
    pub const fn window_rows(self, n: u32) -> u32 {
        match self {
            Self::LastNQuarters => n,
            Self::LastNYears => 4 * n,
            Self::Trailing12Months => 4,
            Self::QuarterOverQuarter => 2,
            Self::YearOverYear => 5,
        }
    }
}

/// How the rows inside a period window combine into a truth value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    #[default]
    All,
    Any,
    Avg,
    Sum,
    Min,
    Max,
    Trend,
    Latest,
}

impl Aggregation {
    /// SQL aggregate function name, for the scalar-aggregate modes.
    #[must_use]
    pub const fn sql_fn(self) -> Option<&'static str> {
        match self {
            Self::Avg => Some("AVG"),
            Self::Sum => Some("SUM"),
            Self::Min => Some("MIN"),
            Self::Max => Some("MAX"),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    #[serde(rename = "type")]
    pub period_type: PeriodType,
    pub n: u32,
    #[serde(default)]
    pub aggregation: Aggregation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullStrategy {
    #[default]
    Exclude,
    Fail,
    UseDefault,
    UseLatest,
    Interpolate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NullHandling {
    pub strategy: NullStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<f64>,
}

/// Leaf of the filter tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<CondValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<Period>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub null_handling: Option<NullHandling>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub value_is_field: bool,
}

impl Condition {
    /// Shorthand for a plain comparison against a number.
    #[must_use]
    pub fn cmp(field: impl Into<String>, operator: Operator, value: f64) -> Self {
        Self {
            field: field.into(),
            operator,
            value: Some(CondValue::number(value)),
            period: None,
            null_handling: None,
            value_is_field: false,
        }
    }

    /// Human-readable rendering used in conflict messages and alert reasons.
    #[must_use]
    pub fn describe(&self) -> String {
        match &self.value {
            Some(CondValue::Scalar(v)) => format!("{} {} {}", self.field, self.operator, v),
            Some(CondValue::List(vs)) => {
                let parts: Vec<String> = vs.iter().map(ToString::to_string).collect();
                format!("{} {} [{}]", self.field, self.operator, parts.join(", "))
            }
            None => format!("{} {}", self.field, self.operator),
        }
    }
}

/// Filter tree node. The variant set is closed; every visitor matches
/// exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Node {
    And {
        and: Vec<Node>,
    },
    Or {
        or: Vec<Node>,
    },
    Not {
        not: Box<Node>,
    },
    Cond(Condition),
}

impl Node {
    #[must_use]
    pub fn and(children: Vec<Node>) -> Self {
        Self::And { and: children }
    }

    #[must_use]
    pub fn or(children: Vec<Node>) -> Self {
        Self::Or { or: children }
    }

    #[must_use]
    pub fn not(child: Node) -> Self {
        Self::Not {
            not: Box::new(child),
        }
    }

    /// Maximum nesting depth of logical nodes; a bare condition is depth 1.
    #[must_use]
    pub fn depth(&self) -> usize {
        match self {
            Self::And { and: children } | Self::Or { or: children } => {
                1 + children.iter().map(Node::depth).max().unwrap_or(0)
            }
            Self::Not { not } => 1 + not.depth(),
            Self::Cond(_) => 1,
        }
    }

    /// Visits every condition in the tree.
    pub fn for_each_condition<'a>(&'a self, f: &mut impl FnMut(&'a Condition)) {
        match self {
            Self::And { and: children } | Self::Or { or: children } => {
                for child in children {
                    child.for_each_condition(f);
                }
            }
            Self::Not { not } => not.for_each_condition(f),
            Self::Cond(cond) => f(cond),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sort {
    pub field: String,
    pub order: SortOrder,
}

/// Universe narrowing carried outside the filter tree (sector, industry,
/// exchange equality filters on the instruments table).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange: Option<String>,
}

impl RuleMeta {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sector.is_none() && self.industry.is_none() && self.exchange.is_none()
    }
}

/// A complete, validated screen.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScreenRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<RuleMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<Sort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl ScreenRule {
    /// The degenerate rule: matches the whole universe.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_filter(filter: Node) -> Self {
        Self {
            filter: Some(filter),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Operator Tests ====================

    #[test]
    fn operator_parse_round_trips_wire_names() {
        for op in [
            Operator::Lt,
            Operator::Gt,
            Operator::Le,
            Operator::Ge,
            Operator::Eq,
            Operator::Ne,
            Operator::Between,
            Operator::In,
            Operator::NotIn,
            Operator::Exists,
            Operator::Increasing,
            Operator::Decreasing,
            Operator::Stable,
        ] {
            assert_eq!(Operator::parse(op.wire_name()), Some(op));
        }
    }

    #[test]
    fn operator_parse_rejects_unknown() {
        assert_eq!(Operator::parse("LIKE"), None);
        assert_eq!(Operator::parse("above"), None);
    }

    #[test]
    fn operator_inverse_pairs() {
        assert_eq!(Operator::Gt.inverse(), Some(Operator::Le));
        assert_eq!(Operator::Le.inverse(), Some(Operator::Gt));
        assert_eq!(Operator::Lt.inverse(), Some(Operator::Ge));
        assert_eq!(Operator::Ge.inverse(), Some(Operator::Lt));
        assert_eq!(Operator::Eq.inverse(), Some(Operator::Ne));
        assert_eq!(Operator::Between.inverse(), None);
    }

    #[test]
    fn operator_serde_uses_symbols() {
        let json = serde_json::to_string(&Operator::Le).unwrap();
        assert_eq!(json, "\"<=\"");
        let parsed: Operator = serde_json::from_str("\"not_in\"").unwrap();
        assert_eq!(parsed, Operator::NotIn);
    }

    // ==================== Node Tests ====================

    #[test]
    fn node_depth_counts_logical_nesting() {
        let leaf = Node::Cond(Condition::cmp("pe_ratio", Operator::Lt, 15.0));
        assert_eq!(leaf.depth(), 1);

        let tree = Node::and(vec![Node::or(vec![
            Node::Cond(Condition::cmp("roe", Operator::Gt, 15.0)),
            Node::not(Node::Cond(Condition::cmp("pe_ratio", Operator::Gt, 50.0))),
        ])]);
        assert_eq!(tree.depth(), 4);
    }

    #[test]
    fn node_serializes_to_wire_format() {
        let tree = Node::and(vec![Node::Cond(Condition::cmp(
            "pe_ratio",
            Operator::Lt,
            15.0,
        ))]);
        let json = serde_json::to_value(&tree).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "and": [{"field": "pe_ratio", "operator": "<", "value": 15.0}]
            })
        );
    }

    #[test]
    fn node_deserializes_nested_tree() {
        let json = serde_json::json!({
            "or": [
                {"field": "roe", "operator": ">", "value": 15},
                {"not": {"field": "sector", "operator": "=", "value": "banking"}}
            ]
        });
        let node: Node = serde_json::from_value(json).unwrap();
        match node {
            Node::Or { or } => assert_eq!(or.len(), 2),
            other => panic!("expected Or, got {other:?}"),
        }
    }

    #[test]
    fn for_each_condition_visits_all_leaves() {
        let tree = Node::and(vec![
            Node::Cond(Condition::cmp("pe_ratio", Operator::Lt, 15.0)),
            Node::or(vec![
                Node::Cond(Condition::cmp("roe", Operator::Gt, 15.0)),
                Node::Cond(Condition::cmp("net_income", Operator::Gt, 0.0)),
            ]),
        ]);
        let mut seen = Vec::new();
        tree.for_each_condition(&mut |c| seen.push(c.field.clone()));
        assert_eq!(seen, vec!["pe_ratio", "roe", "net_income"]);
    }

    // ==================== Period Tests ====================

    #[test]
    fn period_window_rows() {
        assert_eq!(PeriodType::LastNQuarters.window_rows(4), 4);
        assert_eq!(PeriodType::LastNYears.window_rows(2), 8);
        assert_eq!(PeriodType::Trailing12Months.window_rows(1), 4);
        assert_eq!(PeriodType::QuarterOverQuarter.window_rows(1), 2);
    }

    #[test]
    fn period_deserializes_with_default_aggregation() {
        let period: Period =
            serde_json::from_value(serde_json::json!({"type": "last_n_quarters", "n": 4}))
                .unwrap();
        assert_eq!(period.period_type, PeriodType::LastNQuarters);
        assert_eq!(period.aggregation, Aggregation::All);
    }

    // ==================== Condition Tests ====================

    #[test]
    fn condition_omits_empty_optionals_on_wire() {
        let cond = Condition::cmp("pe_ratio", Operator::Lt, 15.0);
        let json = serde_json::to_value(&cond).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"field": "pe_ratio", "operator": "<", "value": 15.0})
        );
    }

    #[test]
    fn condition_describe_is_readable() {
        let cond = Condition::cmp("pe_ratio", Operator::Gt, 50.0);
        assert_eq!(cond.describe(), "pe_ratio > 50");
    }
}
