use std::collections::HashSet;

use tracing::info;

use crate::error::StoreError;

use super::LocalStore;

/// Remove progress records whose local item no longer exists on the device
///
/// Returns the number of records removed.
pub fn remove_orphaned_progress(
    store: &dyn LocalStore,
    existing_local_item_ids: &HashSet<String>,
) -> Result<usize, StoreError> {
    let mut removed = 0;

    for progress in store.all_local_media_progress()? {
        if existing_local_item_ids.contains(&progress.local_library_item_id) {
            continue;
        }
        store.remove_local_media_progress(&progress.id)?;
        removed += 1;
    }

    if removed > 0 {
        info!("Removed {} orphaned local progress records", removed);
    }

    Ok(removed)
}
