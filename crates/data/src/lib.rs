pub mod database;
pub mod models;
pub mod repositories;

pub use database::connect;
pub use models::{
    price_changes, AlertRecord, AlertUpdate, FundamentalsSnapshot, InstrumentMeta,
    InstrumentRecord, MoverRecord, NewAlert, NotificationDraft, Quote, ScreenerHit,
};
pub use repositories::{
    AlertRepository, MarketDataRepository, NotificationRepository, Repositories,
    ScreenerRepository,
};
