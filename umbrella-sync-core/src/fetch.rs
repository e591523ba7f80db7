//! Paginated retrieval of a complete remote collection.
//!
//! One generic loop serves every listable [`Resource`]: it requests pages `1, 2, 3, ...` with a
//! fixed page size and decodes each page's `data` array into `T`. It stops on the first empty
//! page, or when the page meta reports `limit > total` (the API's `total` counts the items on
//! that page, so a short page has `total < limit`). Both checks run on every page.
//!
//! Items are not deduplicated, and a list mutated by someone else while it is being paged may
//! come back with gaps or repeats.

use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use crate::contract::{Destination, DestinationList, ListApi, Resource};
use crate::error::SyncError;

/// Fetch every item of `resource`.
///
/// A failed page request aborts the whole fetch; items from earlier pages are discarded.
pub async fn fetch_all<T, A>(api: &A, resource: Resource, page_size: u32) -> Result<Vec<T>, SyncError>
where
    T: DeserializeOwned,
    A: ListApi + ?Sized,
{
    let limit = page_size.max(1);
    let mut items: Vec<T> = Vec::new();
    let mut page: u32 = 1;

    loop {
        debug!(resource = %resource, page, limit, "[FETCH] Requesting page");
        let response = api.list_page(resource, page, limit).await.map_err(|e| {
            error!(resource = %resource, page, error = ?e, "[FETCH][ERROR] Page request failed");
            SyncError::from(e)
        })?;

        let batch: Vec<T> = serde_json::from_value(response.data).map_err(|e| {
            error!(resource = %resource, page, error = %e, "[FETCH][ERROR] Could not decode page");
            SyncError::Decode(format!("page {page} of {resource}: {e}"))
        })?;

        let received = batch.len();
        items.extend(batch);
        debug!(
            resource = %resource,
            page,
            received,
            meta_limit = response.meta.limit,
            meta_total = response.meta.total,
            "[FETCH] Page received"
        );

        if received == 0 || response.meta.limit > response.meta.total {
            break;
        }
        page += 1;
    }

    info!(resource = %resource, count = items.len(), pages = page, "[FETCH] Fetched collection");
    Ok(items)
}

/// Every destination list in the organization.
pub async fn fetch_destination_lists<A: ListApi + ?Sized>(
    api: &A,
    page_size: u32,
) -> Result<Vec<DestinationList>, SyncError> {
    fetch_all(api, Resource::DestinationLists, page_size).await
}

/// Every entry of one destination list.
pub async fn fetch_destinations<A: ListApi + ?Sized>(
    api: &A,
    list_id: i64,
    page_size: u32,
) -> Result<Vec<Destination>, SyncError> {
    fetch_all(api, Resource::Destinations { list_id }, page_size).await
}
