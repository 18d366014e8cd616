//! Satisfiability analysis for conjunctive condition sets.
//!
//! For every scalar field constrained more than once at the same AND
//! level, the constraints are folded into an interval (plus point
//! equalities and exclusions). An empty intersection means no row can
//! ever match; the validator reports that as a `LogicalConflict` naming
//! both offending sub-conditions instead of silently returning an empty
//! result set.

use screener_core::dsl::{CondValue, Condition, Operator, ScalarValue};
use std::collections::BTreeMap;

/// An unsatisfiable pair of conditions on one field.
#[derive(Debug, Clone, PartialEq)]
pub struct Conflict {
    pub field: String,
    pub first: String,
    pub second: String,
}

impl Conflict {
    fn new(field: &str, first: &Condition, second: &Condition) -> Self {
        Self {
            field: field.to_string(),
            first: first.describe(),
            second: second.describe(),
        }
    }
}

#[derive(Default)]
struct Bounds<'a> {
    /// Greatest lower bound: (value, inclusive, source condition).
    lower: Option<(f64, bool, &'a Condition)>,
    /// Least upper bound.
    upper: Option<(f64, bool, &'a Condition)>,
    equals: Option<(f64, &'a Condition)>,
    not_equals: Vec<(f64, &'a Condition)>,
}

impl<'a> Bounds<'a> {
    fn raise_lower(&mut self, value: f64, inclusive: bool, cond: &'a Condition) {
        let tighter = match self.lower {
            None => true,
            Some((current, current_incl, _)) => {
                value > current || (value == current && current_incl && !inclusive)
            }
        };
        if tighter {
            self.lower = Some((value, inclusive, cond));
        }
    }

    fn drop_upper(&mut self, value: f64, inclusive: bool, cond: &'a Condition) {
        let tighter = match self.upper {
            None => true,
            Some((current, current_incl, _)) => {
                value < current || (value == current && current_incl && !inclusive)
            }
        };
        if tighter {
            self.upper = Some((value, inclusive, cond));
        }
    }

    fn check(&self, field: &str) -> Option<Conflict> {
        if let (Some((lo, lo_incl, lo_cond)), Some((hi, hi_incl, hi_cond))) =
            (self.lower, self.upper)
        {
            let empty = lo > hi || (lo == hi && !(lo_incl && hi_incl));
            if empty {
                return Some(Conflict::new(field, lo_cond, hi_cond));
            }
        }

        if let Some((eq, eq_cond)) = self.equals {
            if let Some((lo, lo_incl, lo_cond)) = self.lower {
                if eq < lo || (eq == lo && !lo_incl) {
                    return Some(Conflict::new(field, lo_cond, eq_cond));
                }
            }
            if let Some((hi, hi_incl, hi_cond)) = self.upper {
                if eq > hi || (eq == hi && !hi_incl) {
                    return Some(Conflict::new(field, eq_cond, hi_cond));
                }
            }
            for (ne, ne_cond) in &self.not_equals {
                if *ne == eq {
                    return Some(Conflict::new(field, eq_cond, ne_cond));
                }
            }
        }

        None
    }
}

fn scalar_number(value: &CondValue) -> Option<f64> {
    match value {
        CondValue::Scalar(ScalarValue::Number(n)) => Some(*n),
        _ => None,
    }
}

/// Finds unsatisfiable combinations in one conjunctive set. Conditions
/// with periods, field-valued comparisons, or non-numeric values are
/// constraints on different things and are left alone.
#[must_use]
pub fn find_conflicts<'a>(conditions: &[&'a Condition]) -> Vec<Conflict> {
    let mut by_field: BTreeMap<&str, Bounds<'a>> = BTreeMap::new();

    for &cond in conditions {
        if cond.period.is_some() || cond.value_is_field {
            continue;
        }
        let Some(value) = cond.value.as_ref() else {
            continue;
        };

        let bounds = by_field.entry(cond.field.as_str()).or_default();

        match cond.operator {
            Operator::Gt => {
                if let Some(v) = scalar_number(value) {
                    bounds.raise_lower(v, false, cond);
                }
            }
            Operator::Ge => {
                if let Some(v) = scalar_number(value) {
                    bounds.raise_lower(v, true, cond);
                }
            }
            Operator::Lt => {
                if let Some(v) = scalar_number(value) {
                    bounds.drop_upper(v, false, cond);
                }
            }
            Operator::Le => {
                if let Some(v) = scalar_number(value) {
                    bounds.drop_upper(v, true, cond);
                }
            }
            Operator::Eq => {
                if let Some(v) = scalar_number(value) {
                    match bounds.equals {
                        Some((existing, first)) if existing != v => {
                            return vec![Conflict::new(cond.field.as_str(), first, cond)];
                        }
                        _ => bounds.equals = Some((v, cond)),
                    }
                }
            }
            Operator::Ne => {
                if let Some(v) = scalar_number(value) {
                    bounds.not_equals.push((v, cond));
                }
            }
            Operator::Between => {
                if let CondValue::List(values) = value {
                    if let (Some(lo), Some(hi)) = (
                        values.first().and_then(ScalarValue::as_f64),
                        values.get(1).and_then(ScalarValue::as_f64),
                    ) {
                        bounds.raise_lower(lo, true, cond);
                        bounds.drop_upper(hi, true, cond);
                    }
                }
            }
            _ => {}
        }
    }

    by_field
        .iter()
        .filter_map(|(field, bounds)| bounds.check(field))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use screener_core::dsl::Condition;

    fn cmp(field: &str, op: Operator, value: f64) -> Condition {
        Condition::cmp(field, op, value)
    }

    #[test]
    fn disjoint_gt_lt_is_a_conflict() {
        let a = cmp("pe_ratio", Operator::Gt, 50.0);
        let b = cmp("pe_ratio", Operator::Lt, 5.0);
        let conflicts = find_conflicts(&[&a, &b]);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].field, "pe_ratio");
        assert!(conflicts[0].first.contains("pe_ratio > 50"));
        assert!(conflicts[0].second.contains("pe_ratio < 5"));
    }

    #[test]
    fn touching_exclusive_bounds_conflict() {
        // x > 10 AND x < 10 and x > 10 AND x <= 10 are both empty.
        let a = cmp("roe", Operator::Gt, 10.0);
        let b = cmp("roe", Operator::Le, 10.0);
        assert_eq!(find_conflicts(&[&a, &b]).len(), 1);

        // x >= 10 AND x <= 10 admits exactly 10.
        let a = cmp("roe", Operator::Ge, 10.0);
        let b = cmp("roe", Operator::Le, 10.0);
        assert!(find_conflicts(&[&a, &b]).is_empty());
    }

    #[test]
    fn overlapping_ranges_are_fine() {
        let a = cmp("pe_ratio", Operator::Gt, 5.0);
        let b = cmp("pe_ratio", Operator::Lt, 50.0);
        assert!(find_conflicts(&[&a, &b]).is_empty());
    }

    #[test]
    fn equal_and_not_equal_same_value_conflict() {
        let a = cmp("roe", Operator::Eq, 15.0);
        let b = cmp("roe", Operator::Ne, 15.0);
        assert_eq!(find_conflicts(&[&a, &b]).len(), 1);
    }

    #[test]
    fn two_distinct_equalities_conflict() {
        let a = cmp("roe", Operator::Eq, 15.0);
        let b = cmp("roe", Operator::Eq, 20.0);
        assert_eq!(find_conflicts(&[&a, &b]).len(), 1);
    }

    #[test]
    fn equality_outside_range_conflicts() {
        let a = cmp("pe_ratio", Operator::Lt, 10.0);
        let b = cmp("pe_ratio", Operator::Eq, 25.0);
        assert_eq!(find_conflicts(&[&a, &b]).len(), 1);
    }

    #[test]
    fn between_participates_in_bounds() {
        let range = Condition {
            field: "pe_ratio".to_string(),
            operator: Operator::Between,
            value: Some(CondValue::List(vec![
                ScalarValue::Number(10.0),
                ScalarValue::Number(20.0),
            ])),
            period: None,
            null_handling: None,
            value_is_field: false,
        };
        let outside = cmp("pe_ratio", Operator::Gt, 30.0);
        assert_eq!(find_conflicts(&[&range, &outside]).len(), 1);

        let inside = cmp("pe_ratio", Operator::Gt, 12.0);
        assert!(find_conflicts(&[&range, &inside]).is_empty());
    }

    #[test]
    fn period_conditions_do_not_participate() {
        use screener_core::dsl::{Aggregation, Period, PeriodType};
        let mut windowed = cmp("net_income", Operator::Gt, 50.0);
        windowed.period = Some(Period {
            period_type: PeriodType::LastNQuarters,
            n: 4,
            aggregation: Aggregation::All,
        });
        let latest = cmp("net_income", Operator::Lt, 10.0);
        // Different windows, not comparable constraints.
        assert!(find_conflicts(&[&windowed, &latest]).is_empty());
    }

    #[test]
    fn different_fields_never_conflict() {
        let a = cmp("pe_ratio", Operator::Gt, 50.0);
        let b = cmp("roe", Operator::Lt, 5.0);
        assert!(find_conflicts(&[&a, &b]).is_empty());
    }
}
