//! Response caching.
//!
//! - [`ResponseCache`]: integrity-verified, TTL- and capacity-bounded
//!   cache of completed inference results, layered on a
//!   [`CacheStore`](crate::store::CacheStore).
//! - [`IntegrityKey`]: the process secret that signs and verifies records.
//!
//! Keys come from [`fingerprint`](crate::fingerprint); the cache itself
//! treats them as opaque strings.

mod index;
pub mod integrity;
pub mod response;

pub use integrity::IntegrityKey;
pub use response::{
    CacheConfig, CacheLookup, CacheStats, CachedContent, EvictionReport, IntegrityReport,
    ResponseCache,
};
