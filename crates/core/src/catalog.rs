//! The field catalog: the closed set of screenable attributes.
//!
//! Every identifier the compiler ever writes into SQL (table, column,
//! alias) is drawn from here. The catalog is built once at process start
//! and shared read-only (`Arc<FieldCatalog>`) into every component; no
//! other part of the system may invent a column name.

use std::collections::HashMap;

use serde::Serialize;

use crate::dsl::Operator;

/// Value kind of a catalog field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Numeric,
    Percentage,
    Fraction,
    #[serde(rename = "string")]
    Text,
    Date,
    Boolean,
}

impl FieldKind {
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(self, Self::Numeric | Self::Percentage | Self::Fraction)
    }
}

/// How a stored value maps to its display scale. Fraction-scaled fields
/// hold 0..1 for 0..100%; the validator rescales user input accordingly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scale {
    Unit,
    Fraction,
}

/// Physical tables the compiler may reference. Aliases are fixed across
/// the compiler; each snapshot table carries the monotonic column its
/// "latest row" ordering uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTable {
    Companies,
    FundamentalsQuarterly,
    PriceHistory,
    DebtProfile,
    CashflowStatements,
    AnalystEstimates,
    EarningsCalendar,
    Buybacks,
}

impl SourceTable {
    #[must_use]
    pub const fn table_name(self) -> &'static str {
        match self {
            Self::Companies => "companies",
            Self::FundamentalsQuarterly => "fundamentals_quarterly",
            Self::PriceHistory => "price_history",
            Self::DebtProfile => "debt_profile",
            Self::CashflowStatements => "cashflow_statements",
            Self::AnalystEstimates => "analyst_estimates",
            Self::EarningsCalendar => "earnings_calendar",
            Self::Buybacks => "buybacks",
        }
    }

    #[must_use]
    pub const fn alias(self) -> &'static str {
        match self {
            Self::Companies => "c",
            Self::FundamentalsQuarterly => "fq",
            Self::PriceHistory => "ph",
            Self::DebtProfile => "dp",
            Self::CashflowStatements => "cf",
            Self::AnalystEstimates => "ae",
            Self::EarningsCalendar => "ec",
            Self::Buybacks => "bb",
        }
    }

    /// Column that orders snapshots newest-first.
    #[must_use]
    pub const fn order_column(self) -> &'static str {
        match self {
            Self::Companies => "ticker",
            Self::FundamentalsQuarterly | Self::DebtProfile | Self::CashflowStatements => "id",
            Self::PriceHistory => "time",
            Self::AnalystEstimates => "estimate_date",
            Self::EarningsCalendar => "earnings_date",
            Self::Buybacks => "announcement_date",
        }
    }

    /// True for one-row-per-snapshot side tables that get a LATERAL join.
    #[must_use]
    pub const fn is_snapshot(self) -> bool {
        !matches!(self, Self::Companies)
    }
}

/// Guard the compiler must emit around a derived metric's denominator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenominatorGuard {
    /// `NULLIF(den, 0)` -- division by zero yields NULL, row drops out.
    NonZero,
    /// `CASE WHEN den > 0 THEN ... END` -- negative denominators are as
    /// meaningless as zero (e.g. debt serviced by negative cash flow).
    Positive,
}

/// Formula for a derived metric: a ratio of two non-derived catalog
/// fields, optionally scaled to a percentage.
#[derive(Debug, Clone, Copy)]
pub struct DerivedFormula {
    pub numerator: &'static str,
    pub denominator: &'static str,
    pub guard: DenominatorGuard,
    pub percentage: bool,
}

/// Where a field's value comes from.
#[derive(Debug, Clone, Copy)]
pub enum FieldSource {
    Column {
        table: SourceTable,
        column: &'static str,
    },
    Derived(DerivedFormula),
}

/// One screenable attribute.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: &'static str,
    pub kind: FieldKind,
    pub source: FieldSource,
    pub time_series: bool,
    pub operators: &'static [Operator],
    pub value_range: Option<(f64, f64)>,
    pub scale: Scale,
    /// Normalized phrasings (lowercase, no punctuation). Translator only.
    pub aliases: &'static [&'static str],
    pub sortable: bool,
    /// Growth-rate counterpart, for "increasing X" phrasings.
    pub growth_sibling: Option<&'static str>,
}

impl FieldDef {
    #[must_use]
    pub const fn is_derived(&self) -> bool {
        matches!(self.source, FieldSource::Derived(_))
    }

    /// Backing table, or the numerator's table for derived fields
    /// (resolved by the compiler via the formula instead).
    #[must_use]
    pub fn column(&self) -> Option<(SourceTable, &'static str)> {
        match self.source {
            FieldSource::Column { table, column } => Some((table, column)),
            FieldSource::Derived(_) => None,
        }
    }
}

const CMP_OPS: &[Operator] = &[
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
];

const TS_NUMERIC_OPS: &[Operator] = &[
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
];

const TEXT_OPS: &[Operator] = &[
    Operator::Eq,
    Operator::Ne,
    Operator::In,
    Operator::NotIn,
    Operator::Exists,
];

const DATE_OPS: &[Operator] = &[
    Operator::Lt,
    Operator::Gt,
    Operator::Le,
    Operator::Ge,
    Operator::Eq,
    Operator::Ne,
    Operator::Exists,
];

/// Known sector vocabulary for the translator's metadata pass.
/// `(spoken phrase, canonical value)`.
pub const SECTOR_ALIASES: &[(&str, &str)] = &[
    ("banking", "Banking"),
    ("banks", "Banking"),
    ("bank", "Banking"),
    ("it", "Information Technology"),
    ("information technology", "Information Technology"),
    ("software", "Information Technology"),
    ("tech", "Information Technology"),
    ("pharma", "Pharmaceuticals"),
    ("pharmaceutical", "Pharmaceuticals"),
    ("pharmaceuticals", "Pharmaceuticals"),
    ("healthcare", "Healthcare"),
    ("energy", "Energy"),
    ("oil and gas", "Energy"),
    ("auto", "Automobile"),
    ("automobile", "Automobile"),
    ("automotive", "Automobile"),
    ("fmcg", "FMCG"),
    ("consumer goods", "FMCG"),
    ("infrastructure", "Infrastructure"),
    ("infra", "Infrastructure"),
    ("metals", "Metals"),
    ("steel", "Metals"),
    ("financial services", "Financial Services"),
    ("finance", "Financial Services"),
    ("nbfc", "Financial Services"),
    ("telecom", "Telecom"),
    ("real estate", "Real Estate"),
    ("realty", "Real Estate"),
];

/// Known exchange vocabulary. `(spoken phrase, canonical value)`.
pub const EXCHANGE_ALIASES: &[(&str, &str)] = &[("nse", "NSE"), ("bse", "BSE")];

fn builtin_fields() -> Vec<FieldDef> {
    use FieldSource::{Column, Derived};
    use SourceTable::{
        AnalystEstimates, Buybacks, CashflowStatements, Companies, DebtProfile, EarningsCalendar,
        FundamentalsQuarterly, PriceHistory,
    };

    vec![
        // -- instrument identity ------------------------------------------
        FieldDef {
            name: "ticker",
            kind: FieldKind::Text,
            source: Column { table: Companies, column: "ticker" },
            time_series: false,
            operators: TEXT_OPS,
            value_range: None,
            scale: Scale::Unit,
            aliases: &["symbol", "scrip"],
            sortable: true,
            growth_sibling: None,
        },
        FieldDef {
            name: "company_name",
            kind: FieldKind::Text,
            source: Column { table: Companies, column: "name" },
            time_series: false,
            operators: TEXT_OPS,
            value_range: None,
            scale: Scale::Unit,
            aliases: &["company", "name"],
            sortable: true,
            growth_sibling: None,
        },
        FieldDef {
            name: "sector",
            kind: FieldKind::Text,
            source: Column { table: Companies, column: "sector" },
            time_series: false,
            operators: TEXT_OPS,
            value_range: None,
            scale: Scale::Unit,
            aliases: &[],
            sortable: true,
            growth_sibling: None,
        },
        FieldDef {
            name: "industry",
            kind: FieldKind::Text,
            source: Column { table: Companies, column: "industry" },
            time_series: false,
            operators: TEXT_OPS,
            value_range: None,
            scale: Scale::Unit,
            aliases: &[],
            sortable: true,
            growth_sibling: None,
        },
        FieldDef {
            name: "exchange",
            kind: FieldKind::Text,
            source: Column { table: Companies, column: "exchange" },
            time_series: false,
            operators: TEXT_OPS,
            value_range: None,
            scale: Scale::Unit,
            aliases: &[],
            sortable: false,
            growth_sibling: None,
        },
        FieldDef {
            name: "market_cap",
            kind: FieldKind::Numeric,
            source: Column { table: Companies, column: "market_cap" },
            time_series: false,
            operators: CMP_OPS,
            value_range: Some((0.0, 1e16)),
            scale: Scale::Unit,
            aliases: &["market capitalisation", "market capitalization", "mcap", "market value"],
            sortable: true,
            growth_sibling: None,
        },
        // -- quarterly fundamentals ---------------------------------------
        FieldDef {
            name: "pe_ratio",
            kind: FieldKind::Numeric,
            source: Column { table: FundamentalsQuarterly, column: "pe_ratio" },
            time_series: false,
            operators: CMP_OPS,
            value_range: Some((0.0, 1000.0)),
            scale: Scale::Unit,
            aliases: &["pe", "p e", "pe ratio", "p e ratio", "price to earnings", "price earnings ratio"],
            sortable: true,
            growth_sibling: None,
        },
        FieldDef {
            name: "pb_ratio",
            kind: FieldKind::Numeric,
            source: Column { table: FundamentalsQuarterly, column: "pb_ratio" },
            time_series: false,
            operators: CMP_OPS,
            value_range: Some((0.0, 500.0)),
            scale: Scale::Unit,
            aliases: &["pb", "p b", "pb ratio", "p b ratio", "price to book"],
            sortable: true,
            growth_sibling: None,
        },
        FieldDef {
            name: "roe",
            kind: FieldKind::Percentage,
            source: Column { table: FundamentalsQuarterly, column: "roe" },
            time_series: false,
            operators: CMP_OPS,
            value_range: Some((-100.0, 100.0)),
            scale: Scale::Unit,
            aliases: &["return on equity"],
            sortable: true,
            growth_sibling: None,
        },
        FieldDef {
            name: "roa",
            kind: FieldKind::Percentage,
            source: Column { table: FundamentalsQuarterly, column: "roa" },
            time_series: false,
            operators: CMP_OPS,
            value_range: Some((-100.0, 100.0)),
            scale: Scale::Unit,
            aliases: &["return on assets"],
            sortable: true,
            growth_sibling: None,
        },
        FieldDef {
            name: "eps",
            kind: FieldKind::Numeric,
            source: Column { table: FundamentalsQuarterly, column: "eps" },
            time_series: true,
            operators: TS_NUMERIC_OPS,
            value_range: None,
            scale: Scale::Unit,
            aliases: &["earnings per share"],
            sortable: true,
            growth_sibling: Some("eps_growth"),
        },
        FieldDef {
            name: "net_income",
            kind: FieldKind::Numeric,
            source: Column { table: FundamentalsQuarterly, column: "net_income" },
            time_series: true,
            operators: TS_NUMERIC_OPS,
            value_range: None,
            scale: Scale::Unit,
            aliases: &["net profit", "profit", "earnings", "pat", "bottom line"],
            sortable: true,
            growth_sibling: Some("earnings_growth_yoy"),
        },
        FieldDef {
            name: "revenue",
            kind: FieldKind::Numeric,
            source: Column { table: FundamentalsQuarterly, column: "revenue" },
            time_series: true,
            operators: TS_NUMERIC_OPS,
            value_range: Some((0.0, 1e15)),
            scale: Scale::Unit,
            aliases: &["sales", "turnover", "topline", "top line"],
            sortable: true,
            growth_sibling: Some("revenue_growth_yoy"),
        },
        FieldDef {
            name: "gross_profit",
            kind: FieldKind::Numeric,
            source: Column { table: FundamentalsQuarterly, column: "gross_profit" },
            time_series: true,
            operators: TS_NUMERIC_OPS,
            value_range: None,
            scale: Scale::Unit,
            aliases: &[],
            sortable: false,
            growth_sibling: None,
        },
        FieldDef {
            name: "operating_profit",
            kind: FieldKind::Numeric,
            source: Column { table: FundamentalsQuarterly, column: "operating_profit" },
            time_series: true,
            operators: TS_NUMERIC_OPS,
            value_range: None,
            scale: Scale::Unit,
            aliases: &["ebit"],
            sortable: false,
            growth_sibling: None,
        },
        FieldDef {
            name: "ebitda",
            kind: FieldKind::Numeric,
            source: Column { table: FundamentalsQuarterly, column: "ebitda" },
            time_series: true,
            operators: TS_NUMERIC_OPS,
            value_range: None,
            scale: Scale::Unit,
            aliases: &[],
            sortable: false,
            growth_sibling: None,
        },
        FieldDef {
            name: "operating_margin",
            kind: FieldKind::Percentage,
            source: Column { table: FundamentalsQuarterly, column: "operating_margin" },
            time_series: false,
            operators: CMP_OPS,
            value_range: Some((-100.0, 100.0)),
            scale: Scale::Unit,
            aliases: &["opm"],
            sortable: true,
            growth_sibling: None,
        },
        FieldDef {
            name: "net_margin",
            kind: FieldKind::Percentage,
            source: Column { table: FundamentalsQuarterly, column: "net_margin" },
            time_series: false,
            operators: CMP_OPS,
            value_range: Some((-100.0, 100.0)),
            scale: Scale::Unit,
            aliases: &["npm", "profit margin", "net profit margin"],
            sortable: true,
            growth_sibling: None,
        },
        FieldDef {
            name: "dividend_yield",
            kind: FieldKind::Fraction,
            source: Column { table: FundamentalsQuarterly, column: "dividend_yield" },
            time_series: false,
            operators: CMP_OPS,
            value_range: Some((0.0, 1.0)),
            scale: Scale::Fraction,
            aliases: &["dividend", "div yield"],
            sortable: true,
            growth_sibling: None,
        },
        FieldDef {
            name: "promoter_holding",
            kind: FieldKind::Fraction,
            source: Column { table: FundamentalsQuarterly, column: "promoter_holding" },
            time_series: false,
            operators: CMP_OPS,
            value_range: Some((0.0, 1.0)),
            scale: Scale::Fraction,
            aliases: &["promoter stake", "promoter shareholding"],
            sortable: false,
            growth_sibling: None,
        },
        FieldDef {
            name: "current_ratio",
            kind: FieldKind::Numeric,
            source: Column { table: FundamentalsQuarterly, column: "current_ratio" },
            time_series: false,
            operators: CMP_OPS,
            value_range: Some((0.0, 100.0)),
            scale: Scale::Unit,
            aliases: &[],
            sortable: false,
            growth_sibling: None,
        },
        FieldDef {
            name: "debt_to_equity",
            kind: FieldKind::Numeric,
            source: Column { table: FundamentalsQuarterly, column: "debt_to_equity" },
            time_series: false,
            operators: CMP_OPS,
            value_range: Some((0.0, 100.0)),
            scale: Scale::Unit,
            aliases: &["de ratio", "leverage"],
            sortable: true,
            growth_sibling: None,
        },
        FieldDef {
            name: "eps_growth",
            kind: FieldKind::Percentage,
            source: Column { table: FundamentalsQuarterly, column: "eps_growth" },
            time_series: false,
            operators: CMP_OPS,
            value_range: Some((-100.0, 1000.0)),
            scale: Scale::Unit,
            aliases: &["eps growth", "eps growth rate"],
            sortable: true,
            growth_sibling: None,
        },
        FieldDef {
            name: "revenue_growth_yoy",
            kind: FieldKind::Percentage,
            source: Column { table: FundamentalsQuarterly, column: "revenue_growth_yoy" },
            time_series: false,
            operators: CMP_OPS,
            value_range: Some((-100.0, 500.0)),
            scale: Scale::Unit,
            aliases: &["revenue growth", "sales growth", "topline growth"],
            sortable: true,
            growth_sibling: None,
        },
        FieldDef {
            name: "earnings_growth_yoy",
            kind: FieldKind::Percentage,
            source: Column { table: FundamentalsQuarterly, column: "earnings_growth_yoy" },
            time_series: false,
            operators: CMP_OPS,
            value_range: Some((-100.0, 1000.0)),
            scale: Scale::Unit,
            aliases: &["earnings growth", "profit growth", "net profit growth"],
            sortable: true,
            growth_sibling: None,
        },
        // -- price history ------------------------------------------------
        FieldDef {
            name: "close",
            kind: FieldKind::Numeric,
            source: Column { table: PriceHistory, column: "close" },
            time_series: true,
            operators: TS_NUMERIC_OPS,
            value_range: Some((0.0, 1e7)),
            scale: Scale::Unit,
            aliases: &["price", "current price", "stock price", "share price", "last price"],
            sortable: false,
            growth_sibling: None,
        },
        FieldDef {
            name: "volume",
            kind: FieldKind::Numeric,
            source: Column { table: PriceHistory, column: "volume" },
            time_series: true,
            operators: TS_NUMERIC_OPS,
            value_range: Some((0.0, 1e12)),
            scale: Scale::Unit,
            aliases: &["trading volume"],
            sortable: false,
            growth_sibling: None,
        },
        // -- debt profile -------------------------------------------------
        FieldDef {
            name: "total_debt",
            kind: FieldKind::Numeric,
            source: Column { table: DebtProfile, column: "total_debt" },
            time_series: false,
            operators: CMP_OPS,
            value_range: Some((0.0, 1e15)),
            scale: Scale::Unit,
            aliases: &["debt", "borrowings", "total borrowings"],
            sortable: false,
            growth_sibling: None,
        },
        // -- cash flow ----------------------------------------------------
        FieldDef {
            name: "free_cash_flow",
            kind: FieldKind::Numeric,
            source: Column { table: CashflowStatements, column: "free_cash_flow" },
            time_series: true,
            operators: TS_NUMERIC_OPS,
            value_range: None,
            scale: Scale::Unit,
            aliases: &["fcf", "free cashflow"],
            sortable: false,
            growth_sibling: None,
        },
        FieldDef {
            name: "operating_cash_flow",
            kind: FieldKind::Numeric,
            source: Column { table: CashflowStatements, column: "operating_cash_flow" },
            time_series: true,
            operators: TS_NUMERIC_OPS,
            value_range: None,
            scale: Scale::Unit,
            aliases: &["ocf", "cash from operations"],
            sortable: false,
            growth_sibling: None,
        },
        // -- analyst estimates --------------------------------------------
        FieldDef {
            name: "price_target_avg",
            kind: FieldKind::Numeric,
            source: Column { table: AnalystEstimates, column: "price_target_avg" },
            time_series: false,
            operators: CMP_OPS,
            value_range: Some((0.0, 1e7)),
            scale: Scale::Unit,
            aliases: &["analyst target", "average target price", "target price", "analyst price target"],
            sortable: false,
            growth_sibling: None,
        },
        FieldDef {
            name: "price_target_high",
            kind: FieldKind::Numeric,
            source: Column { table: AnalystEstimates, column: "price_target_high" },
            time_series: false,
            operators: CMP_OPS,
            value_range: Some((0.0, 1e7)),
            scale: Scale::Unit,
            aliases: &["high target price"],
            sortable: false,
            growth_sibling: None,
        },
        FieldDef {
            name: "price_target_low",
            kind: FieldKind::Numeric,
            source: Column { table: AnalystEstimates, column: "price_target_low" },
            time_series: false,
            operators: CMP_OPS,
            value_range: Some((0.0, 1e7)),
            scale: Scale::Unit,
            aliases: &["low target price"],
            sortable: false,
            growth_sibling: None,
        },
        // -- corporate events ---------------------------------------------
        FieldDef {
            name: "earnings_date",
            kind: FieldKind::Date,
            source: Column { table: EarningsCalendar, column: "earnings_date" },
            time_series: false,
            operators: DATE_OPS,
            value_range: None,
            scale: Scale::Unit,
            aliases: &["earnings date", "upcoming earnings", "results date", "next results"],
            sortable: false,
            growth_sibling: None,
        },
        FieldDef {
            name: "buyback_date",
            kind: FieldKind::Date,
            source: Column { table: Buybacks, column: "announcement_date" },
            time_series: false,
            operators: DATE_OPS,
            value_range: None,
            scale: Scale::Unit,
            aliases: &["buyback", "buyback announcement", "share buyback", "buy back"],
            sortable: false,
            growth_sibling: None,
        },
        // -- derived metrics ----------------------------------------------
        FieldDef {
            name: "peg_ratio",
            kind: FieldKind::Numeric,
            source: Derived(DerivedFormula {
                numerator: "pe_ratio",
                denominator: "eps_growth",
                guard: DenominatorGuard::NonZero,
                percentage: false,
            }),
            time_series: false,
            operators: CMP_OPS,
            value_range: Some((0.0, 10.0)),
            scale: Scale::Unit,
            aliases: &["peg"],
            sortable: false,
            growth_sibling: None,
        },
        FieldDef {
            name: "debt_to_fcf",
            kind: FieldKind::Numeric,
            source: Derived(DerivedFormula {
                numerator: "total_debt",
                denominator: "free_cash_flow",
                guard: DenominatorGuard::NonZero,
                percentage: false,
            }),
            time_series: false,
            operators: CMP_OPS,
            value_range: Some((0.0, 50.0)),
            scale: Scale::Unit,
            aliases: &["debt to fcf", "debt to free cash flow"],
            sortable: false,
            growth_sibling: None,
        },
        FieldDef {
            name: "fcf_margin",
            kind: FieldKind::Percentage,
            source: Derived(DerivedFormula {
                numerator: "free_cash_flow",
                denominator: "revenue",
                guard: DenominatorGuard::Positive,
                percentage: true,
            }),
            time_series: false,
            operators: CMP_OPS,
            value_range: Some((-100.0, 100.0)),
            scale: Scale::Unit,
            aliases: &["free cash flow margin", "fcf margin"],
            sortable: false,
            growth_sibling: None,
        },
    ]
}

/// Normalizes a phrase for alias lookup: lowercase, punctuation stripped,
/// whitespace collapsed. "P/E Ratio" and "pe ratio" normalize identically.
#[must_use]
pub fn normalize_phrase(phrase: &str) -> String {
    let mut out = String::with_capacity(phrase.len());
    let mut last_space = true;
    for ch in phrase.chars() {
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}

/// The process-wide, immutable field catalog.
pub struct FieldCatalog {
    fields: Vec<FieldDef>,
    by_name: HashMap<&'static str, usize>,
    by_alias: HashMap<String, usize>,
}

impl FieldCatalog {
    /// Builds the built-in catalog. Panics only on a programming error in
    /// the static field table (duplicate name, derived metric referencing
    /// another derived metric), which is checked here so it cannot reach
    /// the compiler.
    #[must_use]
    pub fn builtin() -> Self {
        let fields = builtin_fields();
        let mut by_name = HashMap::new();
        let mut by_alias = HashMap::new();

        for (idx, field) in fields.iter().enumerate() {
            let clash = by_name.insert(field.name, idx);
            assert!(clash.is_none(), "duplicate catalog field {}", field.name);
            for alias in field.aliases {
                by_alias.insert(normalize_phrase(alias), idx);
            }
            // The canonical name is itself a resolvable phrase.
            by_alias
                .entry(normalize_phrase(field.name))
                .or_insert(idx);
        }

        let catalog = Self {
            fields,
            by_name,
            by_alias,
        };

        for field in &catalog.fields {
            if let FieldSource::Derived(formula) = field.source {
                for input in [formula.numerator, formula.denominator] {
                    let resolved = catalog
                        .resolve(input)
                        .unwrap_or_else(|| panic!("{}: unknown formula input {input}", field.name));
                    assert!(
                        !resolved.is_derived(),
                        "{}: formula input {input} is itself derived",
                        field.name
                    );
                }
            }
        }

        catalog
    }

    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<&FieldDef> {
        self.by_name.get(name).map(|&idx| &self.fields[idx])
    }

    /// Exact alias lookup after normalization.
    #[must_use]
    pub fn resolve_alias(&self, phrase: &str) -> Option<&FieldDef> {
        self.by_alias
            .get(&normalize_phrase(phrase))
            .map(|&idx| &self.fields[idx])
    }

    /// Loose resolution for the translator: exact alias first, then the
    /// longest alias key contained in the phrase. Equal-length ties break
    /// lexicographically so resolution never depends on map order.
    #[must_use]
    pub fn resolve_loose(&self, phrase: &str) -> Option<&FieldDef> {
        if let Some(field) = self.resolve_alias(phrase) {
            return Some(field);
        }
        let normalized = normalize_phrase(phrase);
        let mut best: Option<(&str, usize)> = None;
        for (alias, &idx) in &self.by_alias {
            if !contains_word(&normalized, alias) {
                continue;
            }
            let better = match best {
                None => true,
                Some((current, _)) => {
                    alias.len() > current.len()
                        || (alias.len() == current.len() && alias.as_str() < current)
                }
            };
            if better {
                best = Some((alias.as_str(), idx));
            }
        }
        best.map(|(_, idx)| &self.fields[idx])
    }

    #[must_use]
    pub fn allows(&self, field: &FieldDef, op: Operator) -> bool {
        field.operators.contains(&op)
    }

    #[must_use]
    pub fn derived_formula(&self, name: &str) -> Option<&DerivedFormula> {
        match self.resolve(name)?.source {
            FieldSource::Derived(ref formula) => Some(formula),
            FieldSource::Column { .. } => None,
        }
    }

    #[must_use]
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }
}

/// Substring match on word boundaries, so the alias "pe" does not fire
/// inside "operating".
fn contains_word(haystack: &str, needle: &str) -> bool {
    let mut start = 0;
    while let Some(pos) = haystack[start..].find(needle) {
        let abs = start + pos;
        let end = abs + needle.len();
        let left_ok = abs == 0 || haystack.as_bytes()[abs - 1] == b' ';
        let right_ok = end == haystack.len() || haystack.as_bytes()[end] == b' ';
        if left_ok && right_ok {
            return true;
        }
        start = abs + 1;
        if start >= haystack.len() {
            break;
        }
    }
    false
}
