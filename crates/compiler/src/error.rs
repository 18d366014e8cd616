//! Error types for DSL validation and compilation.
//!
//! Validation problems are data, not exceptions: the validator collects
//! every issue it finds and returns them in one report so the client can
//! fix a rule in a single round trip. Compilation errors are the
//! opposite: any invariant violation inside the compiler is a bug, fails
//! fast, and surfaces as a 500.

use serde::Serialize;
use thiserror::Error;

/// Severity of a validation issue. Only `Error` blocks execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// Closed taxonomy of validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    RuleValidity,
    Ambiguity,
    DataAvailability,
    MetricSafety,
    LogicalConflict,
    SystemError,
}

/// One validation finding, addressed by a dotted JSON path
/// (e.g. `filter.and[1].operator`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub kind: IssueKind,
    pub path: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    #[must_use]
    pub fn error(kind: IssueKind, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            kind,
            path: path.into(),
            message: message.into(),
            field: None,
            suggestion: None,
        }
    }

    #[must_use]
    pub fn warning(kind: IssueKind, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(kind, path, message)
        }
    }

    #[must_use]
    pub fn info(kind: IssueKind, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            ..Self::error(kind, path, message)
        }
    }

    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self.severity, Severity::Error)
    }
}

/// All findings from one validation pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    #[must_use]
    pub fn new(issues: Vec<ValidationIssue>) -> Self {
        Self { issues }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.issues.iter().any(ValidationIssue::is_error)
    }

    #[must_use]
    pub fn errors(&self) -> Vec<&ValidationIssue> {
        self.issues.iter().filter(|i| i.is_error()).collect()
    }

    #[must_use]
    pub fn warnings(&self) -> Vec<&ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
            .collect()
    }
}

impl std::fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let errors = self.errors();
        if errors.is_empty() {
            return f.write_str("valid");
        }
        let messages: Vec<&str> = errors
            .iter()
            .take(3)
            .map(|i| i.message.as_str())
            .collect();
        write!(f, "{}", messages.join("; "))
    }
}

/// Errors raised while turning a validated rule into SQL. Any of these
/// reaching a caller means the validator and compiler disagree, which is
/// a bug in this crate, not bad user input.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("unknown field: {0}")]
    UnknownField(String),

    #[error("operator {operator} is not valid for field {field}")]
    UnsupportedOperator { field: String, operator: String },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    #[error("internal compiler invariant violated: {0}")]
    Internal(String),
}

impl CompileError {
    pub fn unsupported_operator(field: impl Into<String>, operator: impl std::fmt::Display) -> Self {
        Self::UnsupportedOperator {
            field: field.into(),
            operator: operator.to_string(),
        }
    }

    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_validity_tracks_error_severity() {
        let mut report = ValidationReport::default();
        assert!(report.is_valid());

        report.issues.push(ValidationIssue::warning(
            IssueKind::Ambiguity,
            "filter",
            "time-series field used without period",
        ));
        assert!(report.is_valid());

        report.issues.push(ValidationIssue::error(
            IssueKind::RuleValidity,
            "filter.and[0].field",
            "unknown field",
        ));
        assert!(!report.is_valid());
        assert_eq!(report.errors().len(), 1);
        assert_eq!(report.warnings().len(), 1);
    }

    #[test]
    fn issue_serializes_without_empty_optionals() {
        let issue = ValidationIssue::error(IssueKind::RuleValidity, "limit", "limit too large");
        let json = serde_json::to_value(&issue).unwrap();
        assert_eq!(json["kind"], "rule_validity");
        assert_eq!(json["severity"], "error");
        assert!(json.get("field").is_none());
    }

    #[test]
    fn compile_error_messages_name_the_problem() {
        let err = CompileError::unsupported_operator("sector", "<");
        assert_eq!(err.to_string(), "operator < is not valid for field sector");
        let err = CompileError::NotImplemented("interpolate null handling");
        assert!(err.to_string().contains("interpolate"));
    }
}
