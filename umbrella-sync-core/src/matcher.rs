//! Pairs a local blocklist file with its remote destination list.
//!
//! A list matches when its name contains the file's base name (case-sensitive). When several
//! lists match, the first one the API returned wins and a warning names the others. When none
//! matches, a new block list called `"SOC Block " + name` is created.

use tracing::{info, warn};

use crate::contract::{DestinationList, ListApi, NewDestinationList};
use crate::error::SyncError;

/// Prefix given to lists this tool creates.
pub const LIST_NAME_PREFIX: &str = "SOC Block ";

/// Access mode of created lists.
pub const BLOCK_ACCESS: &str = "block";

/// How a local file was paired with a remote list.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Matched(DestinationList),
    Created(DestinationList),
}

impl Resolution {
    pub fn list(&self) -> &DestinationList {
        match self {
            Resolution::Matched(list) | Resolution::Created(list) => list,
        }
    }

    pub fn into_list(self) -> DestinationList {
        match self {
            Resolution::Matched(list) | Resolution::Created(list) => list,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, Resolution::Created(_))
    }
}

/// First list whose name contains `local_name`.
pub fn find_matching<'a>(local_name: &str, lists: &'a [DestinationList]) -> Option<&'a DestinationList> {
    let mut matches = lists.iter().filter(|list| list.name.contains(local_name));
    let first = matches.next()?;

    let others: Vec<i64> = matches.map(|list| list.id).collect();
    if !others.is_empty() {
        warn!(
            file = local_name,
            list_id = first.id,
            list_name = %first.name,
            ignored_list_ids = ?others,
            "[SYNC] Several destination lists match; using the first"
        );
    }
    Some(first)
}

/// Find the list for `local_name`, creating it when nothing matches.
///
/// An empty name would match every list, so it is refused as a configuration error.
pub async fn resolve<A: ListApi + ?Sized>(
    api: &A,
    local_name: &str,
    lists: &[DestinationList],
) -> Result<Resolution, SyncError> {
    if local_name.is_empty() {
        return Err(SyncError::Config(
            "blocklist file has an empty base name".to_string(),
        ));
    }

    if let Some(list) = find_matching(local_name, lists) {
        info!(file = local_name, list_id = list.id, list_name = %list.name, "[SYNC] Matched destination list");
        return Ok(Resolution::Matched(list.clone()));
    }

    let request = NewDestinationList {
        access: BLOCK_ACCESS.to_string(),
        is_global: false,
        name: format!("{LIST_NAME_PREFIX}{local_name}"),
    };
    info!(file = local_name, list_name = %request.name, "[SYNC] No matching destination list; creating one");
    let created = api.create_list(request).await?;
    info!(file = local_name, list_id = created.id, "[SYNC] Created destination list");
    Ok(Resolution::Created(created))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{DestinationListMeta, MockListApi};
    use crate::error::ApiError;

    fn list(id: i64, name: &str) -> DestinationList {
        DestinationList {
            id,
            name: name.to_string(),
            access: BLOCK_ACCESS.to_string(),
            is_global: false,
            organization_id: None,
            thirdparty_category_id: None,
            created_at: None,
            modified_at: None,
            is_msp_default: false,
            marked_for_deletion: false,
            bundle_type_id: None,
            meta: DestinationListMeta::default(),
        }
    }

    #[test]
    fn substring_match_is_case_sensitive() {
        let lists = vec![list(1, "SOC Block Phishing"), list(2, "SOC Block malware")];
        assert_eq!(find_matching("malware", &lists).map(|l| l.id), Some(2));
        assert_eq!(find_matching("Malware", &lists).map(|l| l.id), None);
    }

    #[test]
    fn first_match_wins() {
        let lists = vec![list(7, "feeds-a"), list(8, "feeds-b")];
        assert_eq!(find_matching("feeds", &lists).map(|l| l.id), Some(7));
    }

    #[tokio::test]
    async fn existing_list_is_not_created() {
        let api = MockListApi::new();
        let lists = vec![list(3, "SOC Block tor")];
        let resolution = resolve(&api, "tor", &lists).await.unwrap();
        assert!(!resolution.was_created());
        assert_eq!(resolution.into_list().id, 3);
    }

    #[tokio::test]
    async fn missing_list_is_created_as_block_list() {
        let mut api = MockListApi::new();
        api.expect_create_list()
            .withf(|req| req.name == "SOC Block c2" && req.access == "block" && !req.is_global)
            .times(1)
            .returning(|req| Ok(list(99, &req.name)));

        let resolution = resolve(&api, "c2", &[]).await.unwrap();
        assert!(resolution.was_created());
        assert_eq!(resolution.list().id, 99);
    }

    #[tokio::test]
    async fn creation_failure_is_returned() {
        let mut api = MockListApi::new();
        api.expect_create_list()
            .times(1)
            .returning(|_| Err(ApiError::Transport("connection reset".into())));

        let err = resolve(&api, "c2", &[]).await.unwrap_err();
        assert!(matches!(err, SyncError::Transport(_)));
    }

    #[tokio::test]
    async fn empty_name_is_refused() {
        let api = MockListApi::new();
        let err = resolve(&api, "", &[list(1, "anything")]).await.unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }
}
