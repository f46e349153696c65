//! Pageflow Cache Library
//!
//! Bounded bitmap cache for rendered pages and tiles: size-weighted LRU
//! accounting, proportional trimming under memory pressure, and an explicit
//! release hook for evicted bitmaps.

pub mod bitmap;
pub mod config;
pub mod lru;
pub mod pressure;

pub use bitmap::{Bitmap, BitmapKey};
pub use config::{CacheConfig, ConfigError};
pub use lru::{BitmapCache, BitmapCacheBuilder, CacheStats, EvictionReason, ReleaseFn, SizeFn};
pub use pressure::MemoryPressure;
