//! Content reference resolution for session relays.
//!
//! Provides:
//! - `Resolver` - Inline/remote reference resolution with per-fetch timeouts
//! - `ResolutionCache` - Bounded LRU cache of fetched content
//! - `ContentFetcher` implementations (HTTP via reqwest, in-memory map)

pub mod cache;
pub mod fetch;
pub mod resolver;

pub use cache::{CacheConfig, CacheEntry, CacheStats, ResolutionCache};
#[cfg(feature = "http")]
pub use fetch::HttpFetcher;
pub use fetch::{ContentFetcher, FetchError, MapFetcher};
pub use resolver::{LocalResources, Resolver, ResolverConfig};
