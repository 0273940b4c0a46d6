pub mod invalidation;
pub mod keys;
pub mod store;

pub use invalidation::{CacheInvalidator, EntityMutation};
pub use keys::CacheKeys;
pub use store::EntityCache;
