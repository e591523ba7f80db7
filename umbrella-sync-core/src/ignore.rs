//! High-volume domain suppression and the rejection feedback loop.
//!
//! The API refuses to add some hosts to a destination list because they carry too much
//! traffic. Every such refusal is remembered in the [`IgnoreStore`] so later runs filter the
//! host out during normalization instead of sending it again.

use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::contract::IgnoreStore;
use crate::error::SyncError;

/// Token the API puts in the error message of a high-volume rejection.
pub const HIGH_VOLUME_MARKER: &str = "high_volume_list_domain";

/// In-memory view of the suppressed host suffixes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreSet {
    domains: Vec<String>,
}

impl IgnoreSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_domains<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        for domain in domains {
            set.insert(domain.as_ref());
        }
        set
    }

    /// Read the current list from `store`.
    pub fn load<S: IgnoreStore + ?Sized>(store: &S) -> Result<Self, SyncError> {
        let set = Self::from_domains(store.high_volume_domains()?);
        info!(count = set.len(), "Loaded high-volume ignore list");
        Ok(set)
    }

    /// Add a domain. Returns `false` if it was already present.
    pub fn insert(&mut self, domain: &str) -> bool {
        let domain = canonical_domain(domain);
        if domain.is_empty() || self.domains.contains(&domain) {
            return false;
        }
        self.domains.push(domain);
        true
    }

    /// True when `host` equals an entry or is a subdomain of one.
    pub fn matches(&self, host: &str) -> bool {
        let host = canonical_domain(host);
        self.domains.iter().any(|domain| {
            host == *domain
                || (host.len() > domain.len()
                    && host.ends_with(domain.as_str())
                    && host.as_bytes()[host.len() - domain.len() - 1] == b'.')
        })
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.domains.iter().map(String::as_str)
    }
}

fn canonical_domain(domain: &str) -> String {
    domain.trim().trim_end_matches('.').to_ascii_lowercase()
}

fn high_volume_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"high_volume_list_domain[\\/"':,\s\]\[]+([A-Za-z0-9](?:[A-Za-z0-9\-.]*[A-Za-z0-9])?)"#)
            .expect("high-volume pattern is valid")
    })
}

/// Find the host a high-volume rejection message refers to.
///
/// The API reports these as `.../high_volume_list_domain/<host>`, with the slashes escaped
/// as `\/` when the message is itself embedded JSON.
pub fn extract_high_volume_host(message: &str) -> Option<String> {
    if !message.contains(HIGH_VOLUME_MARKER) {
        return None;
    }
    high_volume_pattern()
        .captures(message)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_ascii_lowercase())
}

/// Remember a rejected host in memory and in the persisted store.
///
/// Persisting happens immediately; it is not transactional with the mutation that triggered
/// it. Returns `true` when the store gained a new entry.
pub fn record_rejection<S: IgnoreStore + ?Sized>(
    store: &S,
    ignore: &mut IgnoreSet,
    host: &str,
) -> Result<bool, SyncError> {
    ignore.insert(host);
    let added = store.append_high_volume_domain(host)?;
    if added {
        warn!(host, "Added high-volume domain to ignore list");
    } else {
        debug!(host, "High-volume domain already on ignore list");
    }
    Ok(added)
}
