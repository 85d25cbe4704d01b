//! Tag reconciliation.
//!
//! Tag changes are best-effort: a tag that cannot be added or removed is
//! reported as a [`Warning`] and the remaining tags are still processed.

use std::collections::BTreeSet;

use tracing::{info, warn};

use crate::error::Warning;
use crate::gateway::{Gateway, GatewayError};

/// Comment attached to tags created on demand.
pub const CREATED_TAG_COMMENT: &str = "added by terraform";

/// Result of a tag reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagChanges {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub warnings: Vec<Warning>,
}

/// Tags to add and to remove to get from `current` to `declared`.
#[must_use]
pub fn diff_tags(current: &[String], declared: &[String]) -> (Vec<String>, Vec<String>) {
    let current: BTreeSet<&str> = current.iter().map(String::as_str).collect();
    let declared: BTreeSet<&str> = declared.iter().map(String::as_str).collect();
    let to_add = declared.difference(&current).map(|t| (*t).to_string()).collect();
    let to_remove = current.difference(&declared).map(|t| (*t).to_string()).collect();
    (to_add, to_remove)
}

/// Add `declared \ current` and remove `current \ declared` on a machine.
pub async fn reconcile_tags(
    gateway: &dyn Gateway,
    system_id: &str,
    current: &[String],
    declared: &[String],
) -> TagChanges {
    let (to_add, to_remove) = diff_tags(current, declared);
    let mut changes = TagChanges::default();

    for tag in to_add {
        match add_tag(gateway, system_id, &tag).await {
            Ok(()) => changes.added.push(tag),
            Err(e) => {
                warn!(system_id, tag = %tag, error = %e, "Unable to add tag");
                changes.warnings.push(Warning::new("add tag", tag, e));
            }
        }
    }

    let removal = remove_tags(gateway, system_id, &to_remove).await;
    changes.removed = removal.removed;
    changes.warnings.extend(removal.warnings);

    if !changes.added.is_empty() || !changes.removed.is_empty() {
        info!(system_id, added = ?changes.added, removed = ?changes.removed, "Updated tags");
    }
    changes
}

/// Remove each of `tags` from a machine, collecting failures as warnings.
pub async fn remove_tags(gateway: &dyn Gateway, system_id: &str, tags: &[String]) -> TagChanges {
    let mut changes = TagChanges::default();
    for tag in tags {
        match gateway.remove_tag_from_machine(tag, system_id).await {
            Ok(()) => changes.removed.push(tag.clone()),
            Err(e) => {
                warn!(system_id, tag = %tag, error = %e, "Unable to remove tag");
                changes.warnings.push(Warning::new("remove tag", tag.clone(), e));
            }
        }
    }
    changes
}

/// Look the tag up, create it when MAAS does not know it, then attach it.
async fn add_tag(gateway: &dyn Gateway, system_id: &str, tag: &str) -> Result<(), GatewayError> {
    if let Err(e) = gateway.get_tag(tag).await {
        warn!(tag, error = %e, "Tag does not exist, creating");
        gateway.create_tag(tag, CREATED_TAG_COMMENT).await?;
    }
    gateway.add_tag_to_machine(tag, system_id).await
}
