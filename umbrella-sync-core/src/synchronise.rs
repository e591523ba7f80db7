//! High-level pipeline: reconciles every configured blocklist file with its destination list.
//!
//! A run loads the high-volume ignore set and fetches all destination lists once, then handles
//! the files strictly one after another:
//!   - read the file and resolve (or create) its destination list
//!   - fetch the list's current destinations
//!   - normalize the local entries and diff them against the remote values, both sides
//!     reduced to the same canonical key
//!   - apply the adds, then the removes, in chunks
//!
//! # Failure model
//! Loading the ignore set and the initial list fetch are fatal: [`synchronise`] returns `Err`.
//! Anything that goes wrong for a single file (unreadable file, list creation, entry fetch,
//! persisting a rejected host) is recorded as [`FileOutcome::Failed`] and the run moves on.
//! Chunk failures inside a file are not file failures; they show up in the file's
//! [`MutationReport`]s.
//!
//! # Pacing
//! [`SyncSettings::pause`] is slept between files to stay under the API's rate limits.
//!
//! # Navigation
//! - Main entrypoint: [`synchronise`]
//! - Single file: [`sync_file`]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{error, info, warn};

use crate::blockfile::BlockFile;
use crate::contract::{DestinationList, IgnoreStore, ListApi};
use crate::delta::{diff, Delta};
use crate::error::SyncError;
use crate::fetch::{fetch_destination_lists, fetch_destinations};
use crate::ignore::IgnoreSet;
use crate::matcher::resolve;
use crate::mutate::{BatchMutator, MutationReport, DEFAULT_CHUNK_SIZE};
use crate::normalize::{canonical_key, normalize};

/// Default number of items requested per page.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Default pause between two files.
pub const DEFAULT_PAUSE: Duration = Duration::from_secs(60);

/// Tuning knobs for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub page_size: u32,
    pub chunk_size: usize,
    pub pause: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            pause: DEFAULT_PAUSE,
        }
    }
}

/// What happened to one file that made it through the pipeline.
#[derive(Debug)]
pub struct FileReport {
    pub path: PathBuf,
    pub list_id: i64,
    pub list_name: String,
    /// True when the destination list was created during this run.
    pub created: bool,
    /// Non-blank lines in the file.
    pub local_entries: usize,
    /// Local entries dropped by normalization.
    pub ignored: usize,
    /// Destinations the list held before mutation.
    pub remote_entries: usize,
    pub delta: Delta,
    pub adds: MutationReport,
    pub removes: MutationReport,
}

impl FileReport {
    /// List state after both passes.
    pub fn final_list(&self) -> &DestinationList {
        &self.removes.list
    }
}

#[derive(Debug)]
pub enum FileOutcome {
    Synced(FileReport),
    Failed { path: PathBuf, error: SyncError },
}

impl FileOutcome {
    pub fn path(&self) -> &Path {
        match self {
            FileOutcome::Synced(report) => &report.path,
            FileOutcome::Failed { path, .. } => path,
        }
    }
}

/// Per-file outcomes of a run, in input order.
#[derive(Debug, Default)]
pub struct SynchroniseReport {
    pub files: Vec<FileOutcome>,
}

impl SynchroniseReport {
    pub fn synced(&self) -> impl Iterator<Item = &FileReport> {
        self.files.iter().filter_map(|f| match f {
            FileOutcome::Synced(report) => Some(report),
            FileOutcome::Failed { .. } => None,
        })
    }

    pub fn failed(&self) -> impl Iterator<Item = (&Path, &SyncError)> {
        self.files.iter().filter_map(|f| match f {
            FileOutcome::Failed { path, error } => Some((path.as_path(), error)),
            FileOutcome::Synced(_) => None,
        })
    }

    /// True when there was at least one file and none of them synced.
    pub fn all_failed(&self) -> bool {
        !self.files.is_empty() && self.synced().next().is_none()
    }
}

/// Reconcile one file against the remote side.
///
/// `lists` is the run's view of all destination lists; a list created here is appended to it
/// and the matched list's counts are refreshed, so later files see the change.
pub async fn sync_file<A, S>(
    api: &A,
    store: &S,
    ignore: &mut IgnoreSet,
    file: &BlockFile,
    lists: &mut Vec<DestinationList>,
    settings: &SyncSettings,
) -> Result<FileReport, SyncError>
where
    A: ListApi + ?Sized,
    S: IgnoreStore + ?Sized,
{
    let resolution = resolve(api, &file.name, lists).await?;
    let created = resolution.was_created();
    let list = resolution.into_list();
    if created {
        lists.push(list.clone());
    }

    let remote = fetch_destinations(api, list.id, settings.page_size).await?;
    let mut remote_by_key: HashMap<String, Vec<String>> = HashMap::new();
    for destination in &remote {
        let raw = remote_by_key
            .entry(canonical_key(&destination.destination))
            .or_default();
        if !raw.contains(&destination.destination) {
            raw.push(destination.destination.clone());
        }
    }
    let remote_keys: Vec<&str> = remote_by_key.keys().map(String::as_str).collect();

    let normalized = normalize(&file.entries, ignore);
    if normalized.ignored > 0 {
        info!(
            file = %file.path.display(),
            count = normalized.ignored,
            "[SYNC] Ignored local entries (unparseable, IP literal or high-volume)"
        );
    }

    let mut delta = diff(&normalized.valid, &remote_keys);
    // Entries the file still lists but normalization dropped stay on the remote side.
    let dropped: HashSet<&str> = normalized.dropped.iter().map(String::as_str).collect();
    let before = delta.to_remove.len();
    delta.to_remove.retain(|key| !dropped.contains(key.as_str()));
    if delta.to_remove.len() < before {
        info!(
            file = %file.path.display(),
            kept = before - delta.to_remove.len(),
            "[SYNC] Keeping remote entries still listed locally but not sendable"
        );
    }
    info!(
        file = %file.path.display(),
        list_id = list.id,
        local = normalized.valid.len(),
        remote = remote.len(),
        to_add = delta.to_add.len(),
        to_remove = delta.to_remove.len(),
        "[SYNC] Computed delta"
    );

    let mutator = BatchMutator::new(api, store, settings.chunk_size);
    let adds = mutator.apply_adds(list, &delta.to_add, ignore).await?;
    let raw_removals: Vec<String> = delta
        .to_remove
        .iter()
        .filter_map(|key| remote_by_key.get(key))
        .flatten()
        .cloned()
        .collect();
    let removes = mutator
        .apply_removes(adds.list.clone(), &raw_removals, &remote)
        .await;

    if let Some(slot) = lists.iter_mut().find(|l| l.id == removes.list.id) {
        *slot = removes.list.clone();
    }

    Ok(FileReport {
        path: file.path.clone(),
        list_id: removes.list.id,
        list_name: removes.list.name.clone(),
        created,
        local_entries: file.entries.len(),
        ignored: normalized.ignored,
        remote_entries: remote.len(),
        delta,
        adds,
        removes,
    })
}

/// Reconcile every file in `files`, in order.
pub async fn synchronise<A, S>(
    files: &[PathBuf],
    api: &A,
    store: &S,
    settings: &SyncSettings,
) -> Result<SynchroniseReport, SyncError>
where
    A: ListApi + ?Sized,
    S: IgnoreStore + ?Sized,
{
    info!(files = files.len(), "[SYNC] Starting synchronisation");

    let mut ignore = IgnoreSet::load(store).map_err(|e| {
        error!(error = ?e, "[SYNC][ERROR] Could not load high-volume ignore list");
        e
    })?;

    let mut lists = fetch_destination_lists(api, settings.page_size)
        .await
        .map_err(|e| {
            error!(error = ?e, "[SYNC][ERROR] Could not fetch destination lists");
            e
        })?;

    let mut report = SynchroniseReport::default();

    for (i, path) in files.iter().enumerate() {
        if i > 0 && !settings.pause.is_zero() {
            info!(secs = settings.pause.as_secs(), "[SYNC] Pausing before next file");
            tokio::time::sleep(settings.pause).await;
        }

        info!(file = %path.display(), "[SYNC] Synchronising file");
        let result = match BlockFile::read(path) {
            Ok(file) => {
                sync_file(api, store, &mut ignore, &file, &mut lists, settings).await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(file_report) => {
                info!(
                    file = %path.display(),
                    list_id = file_report.list_id,
                    added = file_report.adds.applied(),
                    removed = file_report.removes.applied(),
                    failed_chunks = file_report.adds.failed_chunks() + file_report.removes.failed_chunks(),
                    skipped_removals = file_report.removes.skipped,
                    destination_count = file_report.final_list().meta.destination_count,
                    "[SYNC] File synchronised"
                );
                report.files.push(FileOutcome::Synced(file_report));
            }
            Err(error) => {
                warn!(file = %path.display(), error = ?error, "[SYNC][ERROR] File failed; continuing");
                report.files.push(FileOutcome::Failed {
                    path: path.clone(),
                    error,
                });
            }
        }
    }

    info!(
        synced = report.synced().count(),
        failed = report.failed().count(),
        "[SYNC] Synchronisation finished"
    );
    Ok(report)
}
