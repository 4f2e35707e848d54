//! finhub-market - The market spoke
//!
//! Hosts the market tools on top of the multi-source data aggregator: an
//! ordered fallback chain over upstream providers, with per-provider rate
//! limits, a bounded coalescing cache, and a normalized response envelope.

pub mod aggregator;
pub mod providers;
pub mod tools;

pub use aggregator::{
    DataAggregator, DataOperation, Envelope, EnvelopeMetadata, Provider, ProviderError,
    RawResponse,
};
