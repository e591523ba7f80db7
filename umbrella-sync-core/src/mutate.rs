//! Chunked application of a [`Delta`](crate::delta::Delta) to a remote list.
//!
//! Adds and removes are split into contiguous chunks of at most `chunk_size` values and sent one
//! request per chunk, in order. A chunk that fails does not stop the ones after it; every chunk
//! ends up as one [`ChunkOutcome`] in the returned [`MutationReport`] and the caller decides what
//! partial success means.
//!
//! The list returned by each successful request replaces the running list, so the report's
//! `list` carries the server's latest counts.
//!
//! A high-volume rejection of an add chunk feeds the ignore loop: the named host is recorded in
//! memory and in the [`IgnoreStore`] before the next chunk is sent.

use std::collections::HashMap;

use tracing::{debug, error, info, warn};

use crate::contract::{Destination, DestinationList, IgnoreStore, ListApi, NewDestination};
use crate::error::SyncError;
use crate::ignore::{record_rejection, IgnoreSet};

/// Largest batch the destination endpoints accept.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Result of sending one chunk. `index` is zero-based.
#[derive(Debug)]
pub enum ChunkOutcome {
    Applied {
        index: usize,
        size: usize,
    },
    /// The API refused the chunk because `host` is a high-volume domain.
    Rejected {
        index: usize,
        size: usize,
        host: String,
    },
    Failed {
        index: usize,
        size: usize,
        error: SyncError,
    },
}

impl ChunkOutcome {
    pub fn index(&self) -> usize {
        match self {
            ChunkOutcome::Applied { index, .. }
            | ChunkOutcome::Rejected { index, .. }
            | ChunkOutcome::Failed { index, .. } => *index,
        }
    }

    pub fn size(&self) -> usize {
        match self {
            ChunkOutcome::Applied { size, .. }
            | ChunkOutcome::Rejected { size, .. }
            | ChunkOutcome::Failed { size, .. } => *size,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, ChunkOutcome::Applied { .. })
    }
}

/// Everything one add or remove pass did.
#[derive(Debug)]
pub struct MutationReport {
    /// Latest list state seen, initially the list passed in.
    pub list: DestinationList,
    pub chunks: Vec<ChunkOutcome>,
    /// Values that were never sent (removals without a resolvable id).
    pub skipped: usize,
}

impl MutationReport {
    fn new(list: DestinationList) -> Self {
        Self {
            list,
            chunks: Vec::new(),
            skipped: 0,
        }
    }

    /// Number of values in chunks the API accepted.
    pub fn applied(&self) -> usize {
        self.chunks
            .iter()
            .filter(|c| c.is_applied())
            .map(ChunkOutcome::size)
            .sum()
    }

    pub fn failed_chunks(&self) -> usize {
        self.chunks.iter().filter(|c| !c.is_applied()).count()
    }

    pub fn rejected_hosts(&self) -> Vec<&str> {
        self.chunks
            .iter()
            .filter_map(|c| match c {
                ChunkOutcome::Rejected { host, .. } => Some(host.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Sends chunked add and remove requests for one list.
pub struct BatchMutator<'a, A: ?Sized, S: ?Sized> {
    api: &'a A,
    store: &'a S,
    chunk_size: usize,
}

impl<'a, A, S> BatchMutator<'a, A, S>
where
    A: ListApi + ?Sized,
    S: IgnoreStore + ?Sized,
{
    /// A `chunk_size` of zero is treated as one.
    pub fn new(api: &'a A, store: &'a S, chunk_size: usize) -> Self {
        Self {
            api,
            store,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Add `values` to `list`.
    ///
    /// Only a failure to persist a newly rejected host is returned as an error; request failures
    /// are recorded per chunk.
    pub async fn apply_adds(
        &self,
        list: DestinationList,
        values: &[String],
        ignore: &mut IgnoreSet,
    ) -> Result<MutationReport, SyncError> {
        let list_id = list.id;
        let mut report = MutationReport::new(list);

        for (index, chunk) in values.chunks(self.chunk_size).enumerate() {
            let size = chunk.len();
            let payload: Vec<NewDestination> = chunk.iter().map(NewDestination::new).collect();
            debug!(list_id, chunk = index, size, "[MUTATE] Adding chunk");

            match self.api.add_destinations(list_id, payload).await {
                Ok(updated) => {
                    info!(
                        list_id,
                        chunk = index,
                        size,
                        destination_count = updated.meta.destination_count,
                        "[MUTATE] Added chunk"
                    );
                    report.list = updated;
                    report.chunks.push(ChunkOutcome::Applied { index, size });
                }
                Err(e) => {
                    let e = SyncError::from(e);
                    match e.high_volume_host() {
                        Some(host) => {
                            warn!(
                                list_id,
                                chunk = index,
                                size,
                                host = %host,
                                "[MUTATE] Chunk rejected for high-volume domain"
                            );
                            record_rejection(self.store, ignore, &host)?;
                            report
                                .chunks
                                .push(ChunkOutcome::Rejected { index, size, host });
                        }
                        None => {
                            error!(list_id, chunk = index, size, error = ?e, "[MUTATE][ERROR] Add chunk failed");
                            report.chunks.push(ChunkOutcome::Failed {
                                index,
                                size,
                                error: e,
                            });
                        }
                    }
                }
            }
        }

        Ok(report)
    }

    /// Remove `values` from `list`, looking their ids up in `existing`.
    ///
    /// Values with no id in `existing` (or only a non-numeric one) are skipped. When a value
    /// appears more than once, the last entry's id is used.
    pub async fn apply_removes(
        &self,
        list: DestinationList,
        values: &[String],
        existing: &[Destination],
    ) -> MutationReport {
        let list_id = list.id;
        let mut report = MutationReport::new(list);

        let index_by_value: HashMap<&str, i64> = existing
            .iter()
            .filter_map(|d| d.id.as_i64().map(|id| (d.destination.as_str(), id)))
            .collect();

        let mut ids = Vec::with_capacity(values.len());
        for value in values {
            match index_by_value.get(value.as_str()) {
                Some(id) => ids.push(*id),
                None => {
                    debug!(list_id, destination = %value, "[MUTATE] No id for destination; skipping removal");
                    report.skipped += 1;
                }
            }
        }
        if report.skipped > 0 {
            info!(list_id, count = report.skipped, "[MUTATE] Skipped removals without an id");
        }

        for (index, chunk) in ids.chunks(self.chunk_size).enumerate() {
            let size = chunk.len();
            debug!(list_id, chunk = index, size, "[MUTATE] Removing chunk");

            match self.api.remove_destinations(list_id, chunk.to_vec()).await {
                Ok(updated) => {
                    info!(
                        list_id,
                        chunk = index,
                        size,
                        destination_count = updated.meta.destination_count,
                        "[MUTATE] Removed chunk"
                    );
                    report.list = updated;
                    report.chunks.push(ChunkOutcome::Applied { index, size });
                }
                Err(e) => {
                    let e = SyncError::from(e);
                    error!(list_id, chunk = index, size, error = ?e, "[MUTATE][ERROR] Remove chunk failed");
                    report.chunks.push(ChunkOutcome::Failed {
                        index,
                        size,
                        error: e,
                    });
                }
            }
        }

        report
    }
}
