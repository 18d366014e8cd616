pub mod catalog;
pub mod config;
pub mod config_loader;
pub mod dsl;

pub use catalog::{
    DenominatorGuard, DerivedFormula, FieldCatalog, FieldDef, FieldKind, FieldSource, Scale,
    SourceTable,
};
pub use config::{
    AppConfig, CompilerConfig, DatabaseConfig, SchedulerConfig, ServerConfig, ValidatorConfig,
};
pub use config_loader::ConfigLoader;
pub use dsl::{
    Aggregation, CondValue, Condition, Node, NullHandling, NullStrategy, Operator, Period,
    PeriodType, RuleMeta, ScalarValue, ScreenRule, Sort, SortOrder,
};
