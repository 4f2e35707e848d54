//! The provider abstraction.
//!
//! A provider knows which operations it can serve, fetches raw vendor
//! payloads, and normalizes them into the common shapes. Normalization is
//! pure so it can be tested against fixture payloads without a network.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use finhub_core::{CacheTtlConfig, RequestContext};

/// Logical data operations served by the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataOperation {
    Quote,
    PriceHistory,
    News,
    CompanyProfile,
}

impl DataOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quote => "quote",
            Self::PriceHistory => "price_history",
            Self::News => "news",
            Self::CompanyProfile => "company_profile",
        }
    }

    /// Cache TTL for this operation.
    pub fn ttl(self, ttls: &CacheTtlConfig) -> std::time::Duration {
        let seconds = match self {
            Self::Quote => ttls.quote,
            Self::PriceHistory => ttls.price_history,
            Self::News => ttls.news,
            Self::CompanyProfile => ttls.company_profile,
        };
        std::time::Duration::from_secs(seconds)
    }
}

impl fmt::Display for DataOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quote" => Ok(Self::Quote),
            "price_history" => Ok(Self::PriceHistory),
            "news" => Ok(Self::News),
            "company_profile" => Ok(Self::CompanyProfile),
            other => Err(format!("unknown operation: {other}")),
        }
    }
}

/// Typed provider failure kinds; the fallback executor branches on these.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// Out of quota. The chain continues with the next provider.
    #[error("rate limited")]
    RateLimited,

    /// Temporary upstream trouble (network, 5xx). The chain continues.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Auth failure or equivalent; the provider is sidelined for the
    /// configured cooldown.
    #[error("permanently unavailable: {0}")]
    PermanentUnavailable(String),

    /// Authoritative absence. The chain stops: the data does not exist,
    /// it is not the provider's fault.
    #[error("not found")]
    NotFound,

    /// The vendor payload did not parse into the expected shape.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Short tag for error breakdowns (sanitized, credential-free).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::Transient(_) => "transient",
            Self::PermanentUnavailable(_) => "permanent_unavailable",
            Self::NotFound => "not_found",
            Self::Malformed(_) => "malformed",
        }
    }
}

/// Raw vendor payload, tagged with the operation it answered.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub operation: DataOperation,
    pub body: Value,
}

/// One upstream data source.
#[async_trait]
pub trait Provider: Send + Sync {
    fn id(&self) -> &str;

    /// Whether this provider can serve the operation with these
    /// parameters.
    fn supports(&self, operation: DataOperation, params: &Value) -> bool;

    /// Fetch the raw vendor payload. Implementations bound their HTTP
    /// call by the context's remaining budget.
    async fn fetch(
        &self,
        operation: DataOperation,
        params: &Value,
        ctx: &RequestContext,
    ) -> Result<RawResponse, ProviderError>;

    /// Pure normalization of a raw payload into the common shape.
    fn normalize(&self, raw: RawResponse) -> Result<Value, ProviderError>;
}
