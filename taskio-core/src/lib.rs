pub mod models;
pub mod cache;
pub mod config;
pub mod directory;
pub mod error;
pub mod logging;
pub mod metrics;

pub use config::Config;
pub use error::{Error, Result};
pub use cache::{CacheKeys, EntityCache};
