//! Heuristic English-to-DSL translation.
//!
//! The translator turns a free-form investor query into a rule tree by
//! running ordered strip-and-parse passes: each pass removes the text it
//! understood so later passes see a cleaner residue. It never rejects
//! input. Phrases it cannot resolve are dropped silently and the
//! downstream validator makes the accept/reject decision on whatever
//! came out.
//!
//! Pass order: sector/exchange metadata, cross-field comparisons, event
//! keywords, protected `between` ranges, top-level OR split, then
//! per-segment condition parsing with unit and period clauses.

use std::ops::Range;
use std::sync::Arc;

use regex::Regex;

use screener_core::catalog::{FieldCatalog, FieldDef, Scale, EXCHANGE_ALIASES, SECTOR_ALIASES};
use screener_core::dsl::{
    Aggregation, CondValue, Condition, Node, Operator, Period, PeriodType, ScalarValue, ScreenRule,
};

/// Words that join clauses; they must never be swallowed into a field
/// phrase, or the logical split below loses its separators.
const CONNECTORS: &[&str] = &[
    "and", "or", "with", "where", "whose", "that", "which", "having", "in",
];

/// Short sector aliases that collide with everyday words; they only
/// count when followed by a listing noun ("IT stocks", "auto sector").
const GUARDED_SECTOR_ALIASES: &[&str] = &["it", "auto", "tech", "infra", "finance"];

const LISTING_NOUNS: &[&str] = &[
    "stock", "stocks", "company", "companies", "sector", "share", "shares", "firm", "firms",
    "scrip", "scrips", "name", "names",
];

pub struct QueryTranslator {
    catalog: Arc<FieldCatalog>,
    cross_field: Regex,
    between: Regex,
    standard: Regex,
    period_clause: Regex,
    trailing_twelve: Regex,
    leading_positive: Regex,
    leading_growth: Regex,
}

impl QueryTranslator {
    #[must_use]
    pub fn new(catalog: Arc<FieldCatalog>) -> Self {
        Self {
            catalog,
            cross_field: Regex::new(
                r"(?P<lhs>[a-z][a-z /]*?)\s+(?P<op>below|above|under|over|less than|greater than)\s+(?P<rhs>[a-z][a-z /]*)",
            )
            .expect("cross-field pattern"),
            between: Regex::new(
                r"(?P<field>[a-z][a-z /]*?)\s+between\s+(?P<lo>-?\d+(?:\.\d+)?)\s+and\s+(?P<hi>-?\d+(?:\.\d+)?)",
            )
            .expect("between pattern"),
            standard: Regex::new(
                r"^(?P<field>.+?)\s*(?P<op><=|>=|!=|=|<|>|below|above|under|over|less than|greater than|more than|at least|at most)\s*(?P<num>-?\d+(?:\.\d+)?)\s*(?P<pct>%)?\s*(?P<unit>crores?|lakhs?|thousand|million|billion|trillion)?(?P<rest>.*)$",
            )
            .expect("standard comparison pattern"),
            period_clause: Regex::new(
                r"(?:\b(?:in|for|over)\s+)?(?:the\s+)?\blast\s+(?P<n>\d+)\s+(?P<gran>quarters?|years?|months?)\b",
            )
            .expect("period clause pattern"),
            trailing_twelve: Regex::new(r"\b(?:trailing\s+(?:twelve|12)\s+months|ttm)\b")
                .expect("ttm pattern"),
            leading_positive: Regex::new(r"^(?:positive|profitable)\b\s*(?P<rest>.*)$")
                .expect("positive pattern"),
            leading_growth: Regex::new(r"^(?:increasing|growing|rising|improving)\b\s*(?P<rest>.*)$")
                .expect("growth pattern"),
        }
    }

    /// Translates a query. Always succeeds; an unintelligible query
    /// yields the degenerate rule matching the whole universe.
    #[must_use]
    pub fn translate(&self, query: &str) -> ScreenRule {
        let mut text = query.to_lowercase();
        let mut global = Vec::new();

        self.extract_metadata(&mut text, &mut global);
        self.extract_cross_field(&mut text, &mut global);
        self.extract_events(&mut text, &mut global);
        self.extract_between(&mut text, &mut global);

        let branches: Vec<Vec<Condition>> = text
            .split(" or ")
            .map(|branch| self.parse_branch(branch))
            .filter(|conds| !conds.is_empty())
            .collect();

        let mut children: Vec<Node> = global.into_iter().map(Node::Cond).collect();
        match branches.len() {
            0 => {}
            1 => {
                let only = branches.into_iter().next().unwrap_or_default();
                children.extend(only.into_iter().map(Node::Cond));
            }
            _ => {
                children.push(Node::or(
                    branches
                        .into_iter()
                        .map(|conds| Node::and(conds.into_iter().map(Node::Cond).collect()))
                        .collect(),
                ));
            }
        }

        if children.is_empty() {
            ScreenRule::empty()
        } else {
            ScreenRule::with_filter(Node::and(children))
        }
    }

    // ------------------------------------------------------------------
    // Pass 1: sector / exchange metadata
    // ------------------------------------------------------------------

    fn extract_metadata(&self, text: &mut String, out: &mut Vec<Condition>) {
        let sectors = extract_vocabulary(text, SECTOR_ALIASES, true);
        push_membership(out, "sector", sectors);

        let exchanges = extract_vocabulary(text, EXCHANGE_ALIASES, false);
        push_membership(out, "exchange", exchanges);
    }

    // ------------------------------------------------------------------
    // Pass 2: cross-field comparisons
    // ------------------------------------------------------------------

    fn extract_cross_field(&self, text: &mut String, out: &mut Vec<Condition>) {
        let snapshot = text.clone();
        let mut removals: Vec<Range<usize>> = Vec::new();

        for caps in self.cross_field.captures_iter(&snapshot) {
            let whole = caps.get(0).map(|m| m.range()).unwrap_or_default();
            let lhs_match = match caps.name("lhs") {
                Some(m) => m,
                None => continue,
            };
            let rhs_match = match caps.name("rhs") {
                Some(m) => m,
                None => continue,
            };

            // Keep connectors out of the removed span on both sides.
            let (lhs_phrase, lhs_offset) = trim_leading_connectors(lhs_match.as_str());
            let rhs_phrase = trim_trailing_connectors(rhs_match.as_str());
            if lhs_phrase.is_empty() || rhs_phrase.is_empty() {
                continue;
            }

            let Some(lhs_def) = self.catalog.resolve_loose(lhs_phrase) else {
                continue;
            };
            let Some(rhs_def) = self.catalog.resolve_loose(rhs_phrase) else {
                continue;
            };
            if !lhs_def.kind.is_numeric() || !rhs_def.kind.is_numeric() {
                continue;
            }
            if lhs_def.name == rhs_def.name {
                continue;
            }

            let operator = match &caps["op"] {
                "below" | "under" | "less than" => Operator::Lt,
                _ => Operator::Gt,
            };

            out.push(Condition {
                field: lhs_def.name.to_string(),
                operator,
                value: Some(CondValue::text(rhs_def.name)),
                period: None,
                null_handling: None,
                value_is_field: true,
            });

            let start = lhs_match.start() + lhs_offset;
            let end = (rhs_match.start() + rhs_phrase.len()).min(whole.end);
            removals.push(start..end);
        }

        apply_removals(text, removals);
    }

    // ------------------------------------------------------------------
    // Pass 3: event keywords
    // ------------------------------------------------------------------

    fn extract_events(&self, text: &mut String, out: &mut Vec<Condition>) {
        let mut found = false;
        for keyword in ["buyback", "buy back"] {
            while let Some(range) = find_word(text, keyword) {
                text.replace_range(range, " ");
                found = true;
            }
        }
        if found {
            out.push(Condition {
                field: "buyback_date".to_string(),
                operator: Operator::Exists,
                value: Some(CondValue::Scalar(ScalarValue::Bool(true))),
                period: None,
                null_handling: None,
                value_is_field: false,
            });
        }
    }

    // ------------------------------------------------------------------
    // Pass 4: protected between-ranges
    // ------------------------------------------------------------------

    fn extract_between(&self, text: &mut String, out: &mut Vec<Condition>) {
        let snapshot = text.clone();
        let mut removals = Vec::new();

        for caps in self.between.captures_iter(&snapshot) {
            let field_match = match caps.name("field") {
                Some(m) => m,
                None => continue,
            };
            let (field_phrase, field_offset) = trim_leading_connectors(field_match.as_str());
            let Some(def) = self.catalog.resolve_loose(field_phrase) else {
                continue;
            };
            if !def.kind.is_numeric() {
                continue;
            }
            let (Ok(lo), Ok(hi)) = (caps["lo"].parse::<f64>(), caps["hi"].parse::<f64>()) else {
                continue;
            };

            out.push(Condition {
                field: def.name.to_string(),
                operator: Operator::Between,
                value: Some(CondValue::List(vec![
                    ScalarValue::Number(scale_value(def, lo)),
                    ScalarValue::Number(scale_value(def, hi)),
                ])),
                period: None,
                null_handling: None,
                value_is_field: false,
            });

            let whole = caps.get(0).map(|m| m.range()).unwrap_or_default();
            removals.push(field_match.start() + field_offset..whole.end);
        }

        apply_removals(text, removals);
    }

    // ------------------------------------------------------------------
    // Pass 5: per-segment condition parsing
    // ------------------------------------------------------------------

    fn parse_branch(&self, branch: &str) -> Vec<Condition> {
        branch
            .split(',')
            .flat_map(|part| part.split(" and "))
            .filter_map(|segment| self.parse_segment(segment.trim()))
            .collect()
    }

    fn parse_segment(&self, segment: &str) -> Option<Condition> {
        if segment.is_empty() {
            return None;
        }

        let (period, residue) = self.extract_period(segment);
        let residue = residue.trim();

        // "positive <field>"
        if let Some(caps) = self.leading_positive.captures(residue) {
            let def = self.catalog.resolve_loose(&caps["rest"])?;
            if !def.kind.is_numeric() {
                return None;
            }
            return Some(Condition {
                field: def.name.to_string(),
                operator: Operator::Gt,
                value: Some(CondValue::number(0.0)),
                period: period.filter(|_| def.time_series),
                null_handling: None,
                value_is_field: false,
            });
        }

        // "increasing/growing <field>": prefer the growth sibling.
        if let Some(caps) = self.leading_growth.captures(residue) {
            let def = self.catalog.resolve_loose(&caps["rest"])?;
            if let Some(sibling) = def.growth_sibling {
                return Some(Condition::cmp(sibling, Operator::Gt, 0.0));
            }
            if def.time_series {
                return Some(Condition {
                    field: def.name.to_string(),
                    operator: Operator::Increasing,
                    value: None,
                    period: Some(period.unwrap_or(Period {
                        period_type: PeriodType::LastNQuarters,
                        n: 4,
                        aggregation: Aggregation::Trend,
                    })),
                    null_handling: None,
                    value_is_field: false,
                });
            }
            return None;
        }

        // "<field> <op> <number>[%][unit]"
        if let Some(caps) = self.standard.captures(residue) {
            let (field_phrase, _) = trim_leading_connectors(&caps["field"]);
            let def = self.catalog.resolve_loose(field_phrase)?;
            if !def.kind.is_numeric() {
                return None;
            }

            let operator = match &caps["op"] {
                "<" | "below" | "under" | "less than" => Operator::Lt,
                ">" | "above" | "over" | "greater than" | "more than" => Operator::Gt,
                "<=" | "at most" => Operator::Le,
                ">=" | "at least" => Operator::Ge,
                "=" => Operator::Eq,
                "!=" => Operator::Ne,
                _ => return None,
            };

            let mut value: f64 = caps["num"].parse().ok()?;
            if let Some(unit) = caps.name("unit") {
                value *= unit_multiplier(unit.as_str());
            }
            value = scale_value(def, value);

            let period = period
                .or_else(|| self.extract_period(&caps["rest"]).0)
                .filter(|_| def.time_series);

            return Some(Condition {
                field: def.name.to_string(),
                operator,
                value: Some(CondValue::number(value)),
                period,
                null_handling: None,
                value_is_field: false,
            });
        }

        // Bare growth phrase: "revenue growth" with no number.
        let def = self.catalog.resolve_loose(residue)?;
        if def.name.contains("growth") && def.kind.is_numeric() {
            return Some(Condition::cmp(def.name, Operator::Gt, 0.0));
        }

        None
    }

    /// Pulls a period clause out of a segment. Returns the period (if
    /// any) and the segment with the clause removed.
    fn extract_period(&self, segment: &str) -> (Option<Period>, String) {
        let mut residue = segment.to_string();
        let mut period = None;

        if let Some(caps) = self.period_clause.captures(segment) {
            let n: u32 = caps["n"].parse().unwrap_or(1);
            let (period_type, n) = match caps["gran"].as_bytes().first() {
                Some(b'q') => (PeriodType::LastNQuarters, n),
                Some(b'y') => (PeriodType::LastNYears, n),
                // Months round up to whole quarters.
                _ => (PeriodType::LastNQuarters, n.div_ceil(3)),
            };
            if let Some(whole) = caps.get(0) {
                residue.replace_range(whole.range(), " ");
            }
            period = Some(Period {
                period_type,
                n: n.clamp(1, 20),
                aggregation: Aggregation::All,
            });
        } else if let Some(m) = self.trailing_twelve.find(segment) {
            residue.replace_range(m.range(), " ");
            period = Some(Period {
                period_type: PeriodType::Trailing12Months,
                n: 1,
                aggregation: Aggregation::All,
            });
        }

        if let Some(p) = period.as_mut() {
            for (word, aggregation) in [
                ("average", Aggregation::Avg),
                ("avg", Aggregation::Avg),
                ("any", Aggregation::Any),
                ("every", Aggregation::All),
                ("each", Aggregation::All),
            ] {
                if let Some(range) = find_word(&residue, word) {
                    p.aggregation = aggregation;
                    residue.replace_range(range, " ");
                    break;
                }
            }
        }

        (period, residue)
    }
}

// ----------------------------------------------------------------------
// Text helpers
// ----------------------------------------------------------------------

/// Word-boundary search returning the byte range of the first hit.
fn find_word(haystack: &str, needle: &str) -> Option<Range<usize>> {
    let bytes = haystack.as_bytes();
    let mut start = 0;
    while start <= haystack.len().saturating_sub(needle.len()) {
        let Some(pos) = haystack[start..].find(needle) else {
            return None;
        };
        let abs = start + pos;
        let end = abs + needle.len();
        let left_ok = abs == 0 || !bytes[abs - 1].is_ascii_alphanumeric();
        let right_ok = end == haystack.len() || !bytes[end].is_ascii_alphanumeric();
        if left_ok && right_ok {
            return Some(abs..end);
        }
        start = abs + 1;
    }
    None
}

/// Strips leading connector words, returning the kept phrase and its
/// byte offset inside the original.
fn trim_leading_connectors(phrase: &str) -> (&str, usize) {
    let mut offset = 0;
    let mut rest = phrase;
    loop {
        let trimmed = rest.trim_start();
        offset += rest.len() - trimmed.len();
        rest = trimmed;
        let Some(word) = rest.split_whitespace().next() else {
            break;
        };
        if CONNECTORS.contains(&word) {
            offset += word.len();
            rest = &rest[word.len()..];
        } else {
            break;
        }
    }
    (rest.trim_end(), offset)
}

/// Cuts a phrase at the first connector word, so a greedy capture does
/// not swallow the next clause.
fn trim_trailing_connectors(phrase: &str) -> &str {
    let mut end = phrase.len();
    for word in CONNECTORS {
        if let Some(range) = find_word(phrase, word) {
            end = end.min(range.start);
        }
    }
    phrase[..end].trim()
}

/// Removes byte ranges from the text, widest-index first so earlier
/// ranges stay valid.
fn apply_removals(text: &mut String, mut removals: Vec<Range<usize>>) {
    removals.sort_by_key(|r| std::cmp::Reverse(r.start));
    for range in removals {
        if range.end <= text.len() {
            text.replace_range(range, " ");
        }
    }
}

/// Scans for vocabulary phrases (longest first), removes hits, and
/// returns the canonical values found.
fn extract_vocabulary(
    text: &mut String,
    vocabulary: &[(&str, &str)],
    guard_short: bool,
) -> Vec<String> {
    let mut entries: Vec<(&str, &str)> = vocabulary.to_vec();
    entries.sort_by_key(|(alias, _)| std::cmp::Reverse(alias.len()));

    let mut found = Vec::new();
    for (alias, canonical) in entries {
        let Some(range) = find_word(text, alias) else {
            continue;
        };
        if guard_short && GUARDED_SECTOR_ALIASES.contains(&alias) {
            let after = text[range.end..].trim_start();
            let next = after.split_whitespace().next().unwrap_or("");
            if !LISTING_NOUNS.contains(&next) {
                continue;
            }
        }
        text.replace_range(range, " ");
        if !found.iter().any(|f| f == canonical) {
            found.push(canonical.to_string());
        }
    }
    found
}

fn push_membership(out: &mut Vec<Condition>, field: &str, values: Vec<String>) {
    match values.len() {
        0 => {}
        1 => out.push(Condition {
            field: field.to_string(),
            operator: Operator::Eq,
            value: values.into_iter().next().map(CondValue::text),
            period: None,
            null_handling: None,
            value_is_field: false,
        }),
        _ => out.push(Condition {
            field: field.to_string(),
            operator: Operator::In,
            value: Some(CondValue::List(
                values.into_iter().map(ScalarValue::Text).collect(),
            )),
            period: None,
            null_handling: None,
            value_is_field: false,
        }),
    }
}

fn unit_multiplier(unit: &str) -> f64 {
    match unit {
        "crore" | "crores" => 1e7,
        "lakh" | "lakhs" => 1e5,
        "thousand" => 1e3,
        "million" => 1e6,
        "billion" => 1e9,
        "trillion" => 1e12,
        _ => 1.0,
    }
}

/// Fraction-scaled fields store 0..1 for 0..100%; spoken percentages
/// come in on the display scale.
fn scale_value(def: &FieldDef, value: f64) -> f64 {
    if def.scale == Scale::Fraction && value > 1.0 {
        value / 100.0
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use screener_core::catalog::FieldCatalog;

    fn translator() -> QueryTranslator {
        QueryTranslator::new(Arc::new(FieldCatalog::builtin()))
    }

    fn conditions(rule: &ScreenRule) -> Vec<&Condition> {
        let mut out = Vec::new();
        if let Some(filter) = &rule.filter {
            filter.for_each_condition(&mut |c| out.push(c));
        }
        out
    }

    // ==================== Basic Comparison Tests ====================

    #[test]
    fn simple_comparison() {
        let rule = translator().translate("PE less than 15");
        let conds = conditions(&rule);
        assert_eq!(conds.len(), 1);
        assert_eq!(conds[0].field, "pe_ratio");
        assert_eq!(conds[0].operator, Operator::Lt);
        assert_eq!(conds[0].value.as_ref().unwrap().as_f64(), Some(15.0));
    }

    #[test]
    fn symbolic_operators_work() {
        let rule = translator().translate("roe >= 18");
        let conds = conditions(&rule);
        assert_eq!(conds[0].field, "roe");
        assert_eq!(conds[0].operator, Operator::Ge);
    }

    #[test]
    fn units_multiply_values() {
        let rule = translator().translate("revenue above 100 crore");
        let conds = conditions(&rule);
        assert_eq!(conds[0].field, "revenue");
        assert_eq!(conds[0].value.as_ref().unwrap().as_f64(), Some(1e9));

        let rule = translator().translate("market cap over 2 billion");
        let conds = conditions(&rule);
        assert_eq!(conds[0].field, "market_cap");
        assert_eq!(conds[0].value.as_ref().unwrap().as_f64(), Some(2e9));
    }

    #[test]
    fn fraction_scaled_fields_are_rescaled() {
        let rule = translator().translate("dividend yield above 2%");
        let conds = conditions(&rule);
        assert_eq!(conds[0].field, "dividend_yield");
        assert_eq!(conds[0].value.as_ref().unwrap().as_f64(), Some(0.02));
    }

    // ==================== Period Tests ====================

    #[test]
    fn positive_field_with_period() {
        let rule = translator().translate("positive earnings last 4 quarters");
        let conds = conditions(&rule);
        assert_eq!(conds.len(), 1);
        assert_eq!(conds[0].field, "net_income");
        assert_eq!(conds[0].operator, Operator::Gt);
        assert_eq!(conds[0].value.as_ref().unwrap().as_f64(), Some(0.0));
        let period = conds[0].period.expect("period expected");
        assert_eq!(period.period_type, PeriodType::LastNQuarters);
        assert_eq!(period.n, 4);
        assert_eq!(period.aggregation, Aggregation::All);
    }

    #[test]
    fn period_clause_with_aggregation_word() {
        let rule = translator().translate("revenue above 500 crore on average over last 8 quarters");
        let conds = conditions(&rule);
        assert_eq!(conds.len(), 1);
        let period = conds[0].period.expect("period expected");
        assert_eq!(period.n, 8);
        assert_eq!(period.aggregation, Aggregation::Avg);
    }

    #[test]
    fn months_round_up_to_quarters() {
        let rule = translator().translate("positive net profit in last 8 months");
        let conds = conditions(&rule);
        let period = conds[0].period.expect("period expected");
        assert_eq!(period.period_type, PeriodType::LastNQuarters);
        assert_eq!(period.n, 3);
    }

    #[test]
    fn period_on_non_time_series_field_is_dropped() {
        let rule = translator().translate("pe below 15 for last 4 quarters");
        let conds = conditions(&rule);
        assert_eq!(conds[0].field, "pe_ratio");
        assert!(conds[0].period.is_none());
    }

    // ==================== Growth Heuristic Tests ====================

    #[test]
    fn growing_field_resolves_to_growth_sibling() {
        let rule = translator().translate("growing revenue");
        let conds = conditions(&rule);
        assert_eq!(conds[0].field, "revenue_growth_yoy");
        assert_eq!(conds[0].operator, Operator::Gt);
        assert_eq!(conds[0].value.as_ref().unwrap().as_f64(), Some(0.0));
    }

    #[test]
    fn bare_growth_phrase_without_number() {
        let rule = translator().translate("revenue growth");
        let conds = conditions(&rule);
        assert_eq!(conds[0].field, "revenue_growth_yoy");
        assert_eq!(conds[0].operator, Operator::Gt);
    }

    // ==================== Cross-field Tests ====================

    #[test]
    fn cross_field_comparison() {
        let rule = translator().translate("current price below analyst target");
        let conds = conditions(&rule);
        assert_eq!(conds.len(), 1);
        assert_eq!(conds[0].field, "close");
        assert_eq!(conds[0].operator, Operator::Lt);
        assert!(conds[0].value_is_field);
        assert_eq!(conds[0].value, Some(CondValue::text("price_target_avg")));
    }

    #[test]
    fn cross_field_leaves_the_rest_of_the_query_intact() {
        let rule = translator().translate("price below analyst target and pe below 15");
        let conds = conditions(&rule);
        assert_eq!(conds.len(), 2);
        assert!(conds.iter().any(|c| c.value_is_field && c.field == "close"));
        assert!(conds
            .iter()
            .any(|c| c.field == "pe_ratio" && c.value.as_ref().unwrap().as_f64() == Some(15.0)));
    }

    #[test]
    fn cross_field_requires_both_sides_numeric() {
        // "sector" is text; this must not become a field comparison.
        let rule = translator().translate("price below sector");
        let conds = conditions(&rule);
        assert!(conds.iter().all(|c| !c.value_is_field));
    }

    // ==================== Logical Split Tests ====================

    #[test]
    fn top_level_or_splits_branches() {
        let rule = translator().translate("pe below 15 or roe above 20");
        let Some(Node::And { and }) = rule.filter else {
            panic!("expected top-level and");
        };
        assert_eq!(and.len(), 1);
        let Node::Or { or } = &and[0] else {
            panic!("expected or node");
        };
        assert_eq!(or.len(), 2);
    }

    #[test]
    fn between_is_protected_from_the_and_split() {
        let rule = translator().translate("pe between 10 and 20, roe above 15");
        let conds = conditions(&rule);
        assert_eq!(conds.len(), 2);
        let between = conds
            .iter()
            .find(|c| c.operator == Operator::Between)
            .expect("between condition");
        assert_eq!(between.field, "pe_ratio");
        assert_eq!(
            between.value,
            Some(CondValue::List(vec![
                ScalarValue::Number(10.0),
                ScalarValue::Number(20.0)
            ]))
        );
    }

    #[test]
    fn comma_and_and_are_conjunctions() {
        let rule = translator().translate("pe below 20, roe above 15 and positive earnings");
        let conds = conditions(&rule);
        assert_eq!(conds.len(), 3);
    }

    // ==================== Metadata Tests ====================

    #[test]
    fn sector_keyword_becomes_equality() {
        let rule = translator().translate("banking stocks with pe below 15");
        let conds = conditions(&rule);
        assert_eq!(conds.len(), 2);
        let sector = conds.iter().find(|c| c.field == "sector").expect("sector");
        assert_eq!(sector.operator, Operator::Eq);
        assert_eq!(sector.value, Some(CondValue::text("Banking")));
    }

    #[test]
    fn guarded_sector_alias_needs_listing_noun() {
        // "it" as a pronoun must not become the IT sector.
        let rule = translator().translate("pe below 15 because it is cheap");
        let conds = conditions(&rule);
        assert!(conds.iter().all(|c| c.field != "sector"));

        let rule = translator().translate("it stocks with roe above 20");
        let conds = conditions(&rule);
        assert!(conds
            .iter()
            .any(|c| c.field == "sector"
                && c.value == Some(CondValue::text("Information Technology"))));
    }

    #[test]
    fn exchange_keyword_is_extracted() {
        let rule = translator().translate("nse stocks with pe below 10");
        let conds = conditions(&rule);
        let exchange = conds.iter().find(|c| c.field == "exchange").expect("exchange");
        assert_eq!(exchange.value, Some(CondValue::text("NSE")));
    }

    // ==================== Event Tests ====================

    #[test]
    fn buyback_keyword_becomes_exists() {
        let rule = translator().translate("companies with buyback and pe below 20");
        let conds = conditions(&rule);
        let event = conds
            .iter()
            .find(|c| c.field == "buyback_date")
            .expect("buyback condition");
        assert_eq!(event.operator, Operator::Exists);
        assert_eq!(event.value, Some(CondValue::Scalar(ScalarValue::Bool(true))));
    }

    // ==================== Degenerate Input Tests ====================

    #[test]
    fn empty_and_gibberish_yield_the_degenerate_rule() {
        assert!(translator().translate("").filter.is_none());
        assert!(translator().translate("   ").filter.is_none());
        assert!(translator()
            .translate("tell me something nice")
            .filter
            .is_none());
    }

    #[test]
    fn unresolvable_field_phrases_abort_silently() {
        let rule = translator().translate("flux capacitance above 88 and pe below 15");
        let conds = conditions(&rule);
        assert_eq!(conds.len(), 1);
        assert_eq!(conds[0].field, "pe_ratio");
    }
}
