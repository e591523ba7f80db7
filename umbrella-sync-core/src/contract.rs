//! # contract: the seams between the engine and the outside world
//!
//! This module defines the data model of the destination list API and the two traits the
//! engine is written against:
//!
//! - [`ListApi`]: the four remote operations (paged listing, list creation, batch add,
//!   batch remove). The real implementation is the reqwest client in the `umbrella-sync` crate.
//! - [`IgnoreStore`]: the persisted high-volume domain list, backed by the config file.
//!
//! Both traits are annotated for `mockall` so tests can script the remote side.
//!
//! ## Wire shapes
//! Field names follow the API's camelCase JSON. Fields the engine never reads are still
//! modelled so a list can be logged or re-serialized without loss.

use std::fmt;

use async_trait::async_trait;
#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, SyncError};

/// Per-type counters the API keeps on every destination list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DestinationListMeta {
    pub destination_count: u64,
    pub domain_count: u64,
    pub url_count: u64,
    pub ipv4_count: u64,
    pub application_count: u64,
}

/// A remote destination list. Identity is `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationList {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub access: String,
    #[serde(default)]
    pub is_global: bool,
    #[serde(default)]
    pub organization_id: Option<i64>,
    #[serde(default)]
    pub thirdparty_category_id: Option<serde_json::Value>,
    #[serde(default)]
    pub created_at: Option<serde_json::Value>,
    #[serde(default)]
    pub modified_at: Option<serde_json::Value>,
    #[serde(default)]
    pub is_msp_default: bool,
    #[serde(default)]
    pub marked_for_deletion: bool,
    #[serde(default)]
    pub bundle_type_id: Option<i64>,
    #[serde(default)]
    pub meta: DestinationListMeta,
}

/// Server-assigned destination id. The API has returned both strings and numbers here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DestinationId {
    Number(i64),
    Text(String),
}

impl DestinationId {
    /// Numeric form used by the batch-delete endpoint, if the id has one.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DestinationId::Number(n) => Some(*n),
            DestinationId::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl fmt::Display for DestinationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DestinationId::Number(n) => write!(f, "{n}"),
            DestinationId::Text(s) => f.write_str(s),
        }
    }
}

/// One entry stored in a destination list. `destination` is the comparison key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    pub id: DestinationId,
    pub destination: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub created_at: Option<serde_json::Value>,
}

/// Element of the batch-create payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDestination {
    pub destination: String,
}

impl NewDestination {
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
        }
    }
}

/// Payload for creating a destination list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDestinationList {
    pub access: String,
    pub is_global: bool,
    pub name: String,
}

/// Pagination block of a listing response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageMeta {
    pub page: u64,
    pub limit: u64,
    pub total: u64,
}

/// One page of a listing, with the items still undecoded.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub data: serde_json::Value,
    pub meta: PageMeta,
}

/// Listable collections of the destination list API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// Every destination list in the organization.
    DestinationLists,
    /// Entries of one destination list.
    Destinations { list_id: i64 },
}

impl Resource {
    /// Path below the policies scope, without leading slash.
    pub fn path(&self) -> String {
        match self {
            Resource::DestinationLists => "destinationlists".to_string(),
            Resource::Destinations { list_id } => {
                format!("destinationlists/{list_id}/destinations")
            }
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// Remote operations the engine needs from the destination list API.
///
/// Implementors own authentication, timeouts and response envelopes; every method returns the
/// already-unwrapped payload or an [`ApiError`] that keeps the server's body for inspection.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ListApi: Send + Sync {
    /// Fetch one page of `resource`.
    async fn list_page(&self, resource: Resource, page: u32, limit: u32)
        -> Result<Page, ApiError>;

    /// Create a destination list and return it as stored.
    async fn create_list(&self, req: NewDestinationList) -> Result<DestinationList, ApiError>;

    /// Add a batch of destinations; returns the list with refreshed counts.
    async fn add_destinations(
        &self,
        list_id: i64,
        destinations: Vec<NewDestination>,
    ) -> Result<DestinationList, ApiError>;

    /// Remove a batch of destinations by id; returns the list with refreshed counts.
    async fn remove_destinations(
        &self,
        list_id: i64,
        ids: Vec<i64>,
    ) -> Result<DestinationList, ApiError>;
}

/// Persisted high-volume domain list.
///
/// Implementations read the whole store on demand and write it through on every append.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait IgnoreStore: Send + Sync {
    /// Current list of suppressed host suffixes.
    fn high_volume_domains(&self) -> Result<Vec<String>, SyncError>;

    /// Append `host` if absent and persist. Returns `true` when the store changed.
    fn append_high_volume_domain(&self, host: &str) -> Result<bool, SyncError>;
}
