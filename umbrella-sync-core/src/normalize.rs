//! Entry normalization: turns raw blocklist lines into the canonical strings compared
//! against the remote list.
//!
//! An entry survives when it parses as a URL (or as a bare `host[/path][?query]`), its host is
//! not an IP literal, and its host is not covered by the high-volume ignore list. Survivors
//! are rebuilt as `scheme://host[/path][?query]`; fragment, userinfo and port are dropped.
//! A lone `/` path is dropped too unless a query follows it.

use std::net::IpAddr;

use tracing::debug;
use url::{Host, Url};

use crate::error::SyncError;
use crate::ignore::IgnoreSet;

/// Result of normalizing a batch of raw entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Normalized {
    /// Canonical entries, in input order. Duplicates are kept; the delta collapses them.
    pub valid: Vec<String>,
    /// How many raw entries were dropped for any reason.
    pub ignored: usize,
    /// Comparison keys of the dropped entries. The remote copies of these are left alone.
    pub dropped: Vec<String>,
}

/// A parsed indicator, before filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Indicator {
    pub scheme: Option<String>,
    pub host: String,
    pub is_ip: bool,
    pub path: String,
    pub query: Option<String>,
}

impl Indicator {
    /// Canonical comparison key.
    pub fn canonical(&self) -> String {
        let mut out = String::new();
        if let Some(scheme) = &self.scheme {
            out.push_str(scheme);
            out.push_str("://");
        }
        out.push_str(&self.host);
        let query = self.query.as_deref().filter(|q| !q.is_empty());
        // A bare root path is implied unless a query follows it.
        if !self.path.is_empty() && (self.path != "/" || query.is_some()) {
            out.push_str(&self.path);
        }
        if let Some(query) = query {
            out.push('?');
            out.push_str(query);
        }
        out
    }
}

/// Parse one raw entry. Entries without `://` are read as bare hosts.
pub fn parse_entry(raw: &str) -> Result<Indicator, SyncError> {
    let trimmed = raw.trim();
    let parse_err = |reason: String| SyncError::Parse {
        entry: raw.to_string(),
        reason,
    };
    if trimmed.is_empty() {
        return Err(parse_err("empty entry".to_string()));
    }

    let has_scheme = trimmed
        .split_once("://")
        .is_some_and(|(scheme, _)| is_scheme(scheme));
    let parsed = if has_scheme {
        Url::parse(trimmed)
    } else {
        Url::parse(&format!("http://{trimmed}"))
    }
    .map_err(|e| parse_err(e.to_string()))?;

    let (host, is_ip) = match parsed.host() {
        Some(Host::Domain(domain)) if !domain.is_empty() => {
            let is_ip = domain.parse::<IpAddr>().is_ok()
                || domain
                    .strip_prefix('[')
                    .and_then(|d| d.strip_suffix(']'))
                    .is_some_and(|d| d.parse::<IpAddr>().is_ok());
            (domain.to_string(), is_ip)
        }
        Some(Host::Ipv4(addr)) => (addr.to_string(), true),
        Some(Host::Ipv6(addr)) => (format!("[{addr}]"), true),
        _ => return Err(parse_err("missing host".to_string())),
    };

    Ok(Indicator {
        scheme: has_scheme.then(|| parsed.scheme().to_string()),
        host,
        is_ip,
        path: parsed.path().to_string(),
        query: parsed.query().map(str::to_string),
    })
}

/// Comparison key for a raw value from either side. Unparseable values compare as trimmed text.
pub fn canonical_key(raw: &str) -> String {
    parse_entry(raw)
        .map(|indicator| indicator.canonical())
        .unwrap_or_else(|_| raw.trim().to_string())
}

fn is_scheme(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Normalize `raw_entries`, dropping anything the API cannot take.
pub fn normalize<S: AsRef<str>>(raw_entries: &[S], ignore: &IgnoreSet) -> Normalized {
    let mut out = Normalized::default();

    for raw in raw_entries {
        let raw = raw.as_ref();
        let indicator = match parse_entry(raw) {
            Ok(indicator) => indicator,
            Err(e) => {
                debug!(entry = raw, error = %e, "Ignoring unparseable entry");
                out.ignored += 1;
                let trimmed = raw.trim();
                if !trimmed.is_empty() {
                    out.dropped.push(trimmed.to_string());
                }
                continue;
            }
        };

        if indicator.is_ip {
            debug!(entry = raw, host = %indicator.host, "Ignoring IP literal");
            out.ignored += 1;
            out.dropped.push(indicator.canonical());
            continue;
        }

        if ignore.matches(&indicator.host) {
            debug!(entry = raw, host = %indicator.host, "Ignoring high-volume domain");
            out.ignored += 1;
            out.dropped.push(indicator.canonical());
            continue;
        }

        out.valid.push(indicator.canonical());
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(entries: &[&str], ignore: &[&str]) -> Normalized {
        normalize(entries, &IgnoreSet::from_domains(ignore.iter().copied()))
    }

    #[test]
    fn bare_hosts_stay_bare() {
        let out = run(&["a.com", "b.com/path?q=1"], &[]);
        assert_eq!(out.valid, vec!["a.com", "b.com/path?q=1"]);
        assert_eq!(out.ignored, 0);
    }

    #[test]
    fn embedded_scheme_in_query_does_not_count_as_scheme() {
        let out = run(&["redirect.example/?u=http://target.example"], &[]);
        assert_eq!(out.valid, vec!["redirect.example/?u=http://target.example"]);
    }

    #[test]
    fn urls_lose_fragment_port_and_userinfo() {
        let out = run(
            &[
                "https://user:pw@evil.example:8443/dl/payload.exe?x=1#frag",
                "http://evil.example/",
            ],
            &[],
        );
        assert_eq!(
            out.valid,
            vec![
                "https://evil.example/dl/payload.exe?x=1",
                "http://evil.example"
            ]
        );
    }

    #[test]
    fn ip_literals_are_dropped_and_counted() {
        let out = run(
            &[
                "1.2.3.4",
                "http://10.0.0.1:8080/x",
                "[2001:db8::1]",
                "https://[::1]/",
                "ok.example",
            ],
            &[],
        );
        assert_eq!(out.valid, vec!["ok.example"]);
        assert_eq!(out.ignored, 4);
    }

    #[test]
    fn ip_literal_under_opaque_scheme_is_dropped() {
        let out = run(&["foo://1.2.3.4/path"], &[]);
        assert!(out.valid.is_empty());
        assert_eq!(out.ignored, 1);
    }

    #[test]
    fn high_volume_hosts_and_subdomains_are_dropped() {
        let out = run(
            &["google.com", "mail.google.com/x", "notgoogle.com"],
            &["google.com"],
        );
        assert_eq!(out.valid, vec!["notgoogle.com"]);
        assert_eq!(out.ignored, 2);
    }

    #[test]
    fn unparseable_entries_are_counted_not_fatal() {
        let out = run(&["", "http://", "exa mple.com", "good.example"], &[]);
        assert_eq!(out.valid, vec!["good.example"]);
        assert_eq!(out.ignored, 3);
    }

    #[test]
    fn every_ip_literal_counts_once() {
        let entries: Vec<String> = (1..=20).map(|i| format!("192.0.2.{i}")).collect();
        let mut all = entries.clone();
        all.push("keep.example".to_string());
        let out = normalize(&all, &IgnoreSet::new());
        assert_eq!(out.ignored, entries.len());
        assert_eq!(out.valid, vec!["keep.example"]);
    }

    #[test]
    fn dropped_entries_keep_their_comparison_key() {
        let out = run(
            &["1.2.3.4", "https://mail.google.com/", "exa mple.com ", "", "ok.example"],
            &["google.com"],
        );
        assert_eq!(out.valid, vec!["ok.example"]);
        assert_eq!(
            out.dropped,
            vec!["1.2.3.4", "https://mail.google.com", "exa mple.com"]
        );
    }

    #[test]
    fn canonical_key_matches_normalized_form() {
        assert_eq!(canonical_key("http://evil.example/"), "http://evil.example");
        assert_eq!(canonical_key(" a.com "), "a.com");
        assert_eq!(canonical_key("1.2.3.4"), "1.2.3.4");
        assert_eq!(canonical_key("exa mple.com"), "exa mple.com");
    }

    #[test]
    fn parse_entry_reports_parse_error() {
        match parse_entry("http://") {
            Err(SyncError::Parse { entry, .. }) => assert_eq!(entry, "http://"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
