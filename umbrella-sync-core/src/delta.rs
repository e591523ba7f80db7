//! Set difference between the local blocklist and a remote destination list.

use std::collections::HashSet;

/// What has to change remotely so it matches the local file.
///
/// Both sides are sorted so batches and logs are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    pub to_add: Vec<String>,
    pub to_remove: Vec<String>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// `to_add = local \ remote`, `to_remove = remote \ local`. Duplicates on either side collapse.
pub fn diff<L, R>(local: &[L], remote: &[R]) -> Delta
where
    L: AsRef<str>,
    R: AsRef<str>,
{
    let local: HashSet<&str> = local.iter().map(AsRef::as_ref).collect();
    let remote: HashSet<&str> = remote.iter().map(AsRef::as_ref).collect();

    let mut to_add: Vec<String> = local
        .difference(&remote)
        .map(|s| (*s).to_string())
        .collect();
    let mut to_remove: Vec<String> = remote
        .difference(&local)
        .map(|s| (*s).to_string())
        .collect();
    to_add.sort();
    to_remove.sort();

    Delta { to_add, to_remove }
}
