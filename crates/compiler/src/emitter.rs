//! Positional parameter emitter.
//!
//! Every literal that originates outside this crate goes through
//! `SqlEmitter::push`, which stores the value and hands back its `$n`
//! placeholder. SQL text is assembled from catalog-derived identifiers
//! and these placeholders only; there is no other way to get a value
//! into a query.

use serde::Serialize;

/// A positional SQL parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlParam {
    Int(i64),
    Number(f64),
    Text(String),
    Bool(bool),
}

impl std::fmt::Display for SqlParam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Number(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
        }
    }
}

impl From<f64> for SqlParam {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<i64> for SqlParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for SqlParam {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<bool> for SqlParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// Accumulates positional parameters for one compilation. Fresh per
/// `compile` call; never shared.
#[derive(Debug, Default)]
pub struct SqlEmitter {
    params: Vec<SqlParam>,
}

impl SqlEmitter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a parameter and returns its placeholder (`$1`, `$2`, ...).
    pub fn push(&mut self, param: impl Into<SqlParam>) -> String {
        self.params.push(param.into());
        format!("${}", self.params.len())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.params.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    #[must_use]
    pub fn into_params(self) -> Vec<SqlParam> {
        self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_are_numbered_in_push_order() {
        let mut emitter = SqlEmitter::new();
        assert_eq!(emitter.push(15.0), "$1");
        assert_eq!(emitter.push(4i64), "$2");
        assert_eq!(emitter.push("banking"), "$3");

        let params = emitter.into_params();
        assert_eq!(
            params,
            vec![
                SqlParam::Number(15.0),
                SqlParam::Int(4),
                SqlParam::Text("banking".to_string()),
            ]
        );
    }

    #[test]
    fn param_serializes_to_plain_json_scalars() {
        assert_eq!(
            serde_json::to_value(SqlParam::Number(12.5)).unwrap(),
            serde_json::json!(12.5)
        );
        assert_eq!(
            serde_json::to_value(SqlParam::Bool(true)).unwrap(),
            serde_json::json!(true)
        );
    }
}
