//! Alert subscriptions: typed conditions, evaluation, scheduling, and
//! notification emission.

pub mod evaluator;
pub mod executor;
pub mod scheduler;
pub mod sink;
pub mod types;

pub use evaluator::AlertEvaluator;
pub use executor::{DslScreenExecutor, ScreenExecutor};
pub use scheduler::AlertScheduler;
pub use sink::{DatabaseSink, LogSink, NotificationSink};
pub use types::{AlertError, AlertKind, CmpOp, DataBundle, Evaluation};
