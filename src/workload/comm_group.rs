//! Communicator group configuration.
//!
//! A JSON object mapping group name to a list of rank ids. A rank joins the
//! group whose list contains its id. Ranks that want to talk to each other
//! must name identical groups.

use std::collections::BTreeMap;
use std::path::Path;

use crate::config::ConfigError;
use crate::topo::RankId;

#[derive(Debug, Clone)]
pub struct CommGroup {
    pub name: String,
    pub members: Vec<RankId>,
}

/// Load the group for `rank` from `path`. A path containing "empty" means no
/// group was configured.
pub fn load_comm_group(path: &str, rank: RankId) -> Result<Option<CommGroup>, ConfigError> {
    if path.contains("empty") {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_string(),
        source,
    })?;
    // BTreeMap 保证遍历顺序确定，组名冲突时后者覆盖前者。
    let groups: BTreeMap<String, Vec<usize>> =
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })?;

    let mut found = None;
    for (name, ids) in groups {
        if ids.contains(&rank.0) {
            found = Some(CommGroup {
                name,
                members: ids.into_iter().map(RankId).collect(),
            });
        }
    }
    Ok(found)
}
