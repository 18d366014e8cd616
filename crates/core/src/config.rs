use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub compiler: CompilerConfig,
    #[serde(default)]
    pub validator: ValidatorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/stock_screener".to_string(),
            max_connections: 10,
        }
    }
}

/// Alert scheduler cadence and fan-out limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between evaluation cycles.
    pub cadence_seconds: u64,
    /// Minimum hours between two triggers of the same subscription.
    pub rate_limit_window_hours: i64,
    /// Maximum ticker groups evaluated concurrently within a cycle.
    pub max_parallel_groups: usize,
    /// Per-fetch deadline for quote/metadata/fundamentals calls.
    pub fetch_timeout_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cadence_seconds: 60,
            rate_limit_window_hours: 24,
            max_parallel_groups: 32,
            fetch_timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerConfig {
    /// LIMIT applied when the rule does not set one.
    pub default_limit: u32,
    /// Hard cap on any requested limit.
    pub max_limit: u32,
    /// Maximum logical nesting depth a rule may use.
    pub max_nesting_depth: usize,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            default_limit: 100,
            max_limit: 1000,
            max_nesting_depth: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Kept for forward compatibility: warnings never block in either
    /// mode today.
    pub strict_mode: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self { strict_mode: true }
    }
}
