//! Database repositories for the screener platform.
//!
//! Each repository wraps one concern over the shared pool: alert
//! subscriptions, market data reads, notification inserts, and compiled
//! screener execution.

pub mod alert_repo;
pub mod market_repo;
pub mod notification_repo;
pub mod screener_repo;

pub use alert_repo::AlertRepository;
pub use market_repo::MarketDataRepository;
pub use notification_repo::NotificationRepository;
pub use screener_repo::ScreenerRepository;

use sqlx::PgPool;

/// All repositories built from a single database pool.
#[derive(Debug, Clone)]
pub struct Repositories {
    pub alerts: AlertRepository,
    pub market: MarketDataRepository,
    pub notifications: NotificationRepository,
    pub screener: ScreenerRepository,
}

impl Repositories {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            alerts: AlertRepository::new(pool.clone()),
            market: MarketDataRepository::new(pool.clone()),
            notifications: NotificationRepository::new(pool.clone()),
            screener: ScreenerRepository::new(pool),
        }
    }
}
