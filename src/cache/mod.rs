pub mod smart_cache;

pub use smart_cache::{CacheStats, CacheStrategy, CommandKind, SmartCache};
