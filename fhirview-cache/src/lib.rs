//! # fhirview-cache
//!
//! Recent-writes cache client for the fhirview analytics engine.
//!
//! Documents that have not yet reached the batch layer are held in a
//! key/value store under `fhir:<kind-lowercased>:<id>` with per-kind TTLs.
//! The speed-layer runner scans them by kind, and the ingestor writes them
//! as it polls the document store.

pub mod client;
pub mod config;
pub mod entry;
pub mod error;

pub use client::CacheClient;
pub use config::{CacheConfig, DEFAULT_CACHE_URL};
pub use entry::{cache_key, kind_pattern, CachedResource};
pub use error::{CacheError, CacheResult};
