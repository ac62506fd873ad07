//! Size-bounded LRU caches with per-entry expiry, and a multi-level chain
//! of them.

mod events;
mod gate;
mod multi;
mod size;
mod stats;
mod store;

pub use self::events::{CacheEvent, DisposeReason};
pub use self::multi::MultiLevelCache;
pub use self::size::{Weigh, json_weight};
pub use self::stats::CacheStats;
pub use self::store::{Cache, DisposeFn, SetOptions};
