//! Domain types shared across the mesh.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of one registered spoke process.
///
/// Stable for the entire lifetime of the process; a restarted spoke
/// registers under a fresh id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    /// Generate a fresh random instance id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Health of a service instance as observed by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Passing,
    Warning,
    Critical,
    Unknown,
}

impl HealthStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Passing => 3,
            Self::Warning => 2,
            Self::Critical => 1,
            Self::Unknown => 0,
        }
    }

    /// Whether this status satisfies a `min_status` filter.
    pub fn at_least(self, min: HealthStatus) -> bool {
        self.rank() >= min.rank()
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Passing => "Passing",
            Self::Warning => "Warning",
            Self::Critical => "Critical",
            Self::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for HealthStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Passing" | "passing" => Ok(Self::Passing),
            "Warning" | "warning" => Ok(Self::Warning),
            "Critical" | "critical" => Ok(Self::Critical),
            "Unknown" | "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown health status: {other}")),
        }
    }
}

/// Callable endpoint of a spoke.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAddress {
    pub host: String,
    pub port: u16,
}

impl ServiceAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Base URL for HTTP calls against this instance.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ServiceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One registered spoke process as stored by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub id: InstanceId,
    /// Logical service name, e.g. `market-spoke`. Instances sharing a name
    /// are peers for load balancing.
    pub name: String,
    pub address: ServiceAddress,
    pub tags: BTreeSet<String>,
    pub metadata: BTreeMap<String, String>,
    /// Absolute URL of the instance's health probe endpoint.
    pub health_endpoint: String,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
    pub status: HealthStatus,
    /// Monotonic counter, bumped on every observable state change. Readers
    /// can detect stale views: the version of a given instance never
    /// regresses across successive reads.
    pub version: u64,
}

impl ServiceInstance {
    pub fn matches(&self, filter: &DiscoverFilter) -> bool {
        if let Some(name) = &filter.name {
            if &self.name != name {
                return false;
            }
        }
        if let Some(tag) = &filter.tag {
            if !self.tags.contains(tag) {
                return false;
            }
        }
        self.status.at_least(filter.min_status)
    }
}

/// Registration payload sent by a spoke on startup.
///
/// Timestamps, status, and version are assigned by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRegistration {
    pub id: InstanceId,
    pub name: String,
    pub address: ServiceAddress,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub health_endpoint: String,
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
}

/// Declared capability of a spoke, attached to a service *name*.
///
/// A qualified name is globally unique across the mesh at any instant;
/// the registry rejects a registration that would let two service names
/// advertise the same tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Dotted name, e.g. `market.stock_quote`.
    pub qualified_name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
    /// Logical name of the owning service, resolved to instances at
    /// dispatch time.
    pub service_name: String,
}

/// Filter for `discover`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverFilter {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default = "default_min_status")]
    pub min_status: HealthStatus,
}

impl Default for DiscoverFilter {
    fn default() -> Self {
        Self {
            name: None,
            tag: None,
            min_status: HealthStatus::Passing,
        }
    }
}

fn default_min_status() -> HealthStatus {
    HealthStatus::Passing
}

impl DiscoverFilter {
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            tag: None,
            min_status: HealthStatus::Passing,
        }
    }

    pub fn min_status(mut self, min: HealthStatus) -> Self {
        self.min_status = min;
        self
    }
}

/// Body of a spoke's health probe response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl HealthReport {
    pub fn passing() -> Self {
        Self {
            status: HealthStatus::Passing,
            detail: None,
        }
    }
}
