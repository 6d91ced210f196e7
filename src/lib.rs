pub mod allocation;
pub mod config;
pub mod costing;
pub mod effects;
pub mod equipment;
pub mod error;
pub mod logging;
pub mod records;
pub mod replay;
pub mod rrp_number;
pub mod service;
pub mod stock_card;
pub mod store;
pub mod types;
pub mod utils;

pub use config::{ConfigStore, EngineSettings, SledConfigStore, StaticConfig};
pub use error::{LedgerError, Result};
pub use service::ProcurementService;
pub use store::LedgerStore;
