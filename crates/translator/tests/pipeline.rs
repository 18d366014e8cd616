//! End-to-end pipeline tests: English in, parameterized SQL out.
//!
//! These cover the full request path the API uses (translate, validate,
//! compile) without a database.

use std::sync::Arc;

use screener_compiler::{CompiledQuery, QueryCompiler, SqlParam, Validator};
use screener_core::catalog::FieldCatalog;
use screener_core::config::{CompilerConfig, ValidatorConfig};
use screener_translator::QueryTranslator;

fn compile_nl(query: &str) -> CompiledQuery {
    let catalog = Arc::new(FieldCatalog::builtin());
    let translator = QueryTranslator::new(catalog.clone());
    let validator = Validator::new(
        catalog.clone(),
        CompilerConfig::default(),
        ValidatorConfig::default(),
    );
    let compiler = QueryCompiler::new(catalog, CompilerConfig::default());

    let rule = translator.translate(query);
    let raw = serde_json::to_value(rule).expect("rule serializes");
    let validated = validator.validate(&raw).expect("translated rule validates");
    compiler.compile(&validated.rule).expect("rule compiles")
}

#[test]
fn empty_query_runs_the_whole_universe() {
    let query = compile_nl("");
    assert!(query.sql.contains("WHERE 1=1"));
    assert_eq!(query.params, vec![SqlParam::Int(100)]);
}

#[test]
fn gibberish_never_raises() {
    let query = compile_nl("please find me something nice to buy");
    assert!(query.sql.contains("WHERE 1=1"));
}

#[test]
fn simple_value_filter_end_to_end() {
    let query = compile_nl("PE less than 15");
    assert!(query.sql.contains("fq.pe_ratio < $1"), "sql: {}", query.sql);
    assert_eq!(
        query.params,
        vec![SqlParam::Number(15.0), SqlParam::Int(100)]
    );
}

#[test]
fn period_query_end_to_end() {
    let query = compile_nl("positive earnings last 4 quarters");
    assert!(query.sql.contains("NOT EXISTS"), "sql: {}", query.sql);
    assert!(query.sql.contains("w.v <= $2"), "sql: {}", query.sql);
    assert_eq!(
        query.params,
        vec![SqlParam::Int(4), SqlParam::Number(0.0), SqlParam::Int(100)]
    );
}

#[test]
fn cross_field_query_end_to_end() {
    let query = compile_nl("current price below analyst target");
    assert!(
        query.sql.contains("ph.close < ae.price_target_avg"),
        "sql: {}",
        query.sql
    );
    assert!(query.sql.contains("price_history"));
    assert!(query.sql.contains("analyst_estimates"));
}

#[test]
fn sector_and_or_query_end_to_end() {
    let query = compile_nl("banking stocks with pe below 15 or roe above 20");
    assert!(query.sql.contains("c.sector = $1"), "sql: {}", query.sql);
    assert!(query.sql.contains(" OR "), "sql: {}", query.sql);
    // sector + two branch values + limit
    assert_eq!(query.params.len(), 4);
}

#[test]
fn units_flow_through_to_parameters() {
    let query = compile_nl("revenue above 100 crore");
    assert!(query.params.contains(&SqlParam::Number(1e9)));
    assert!(!query.sql.contains("1000000000"));
}

#[test]
fn full_pipeline_is_deterministic() {
    let a = compile_nl("pe below 20, positive earnings last 4 quarters and roe above 15");
    let b = compile_nl("pe below 20, positive earnings last 4 quarters and roe above 15");
    assert_eq!(a.sql, b.sql);
    assert_eq!(a.params, b.params);
}
