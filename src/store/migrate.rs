//! Legacy scope migration
//!
//! Early snapshots stored keys without a scope, or with free-form scopes.
//! After loading, such keys are folded into the default scope.

use tracing::info;

use super::{StoreKey, StoreWriter};

/// Whether a scope has the `^[a-z]+_[a-z0-9-]+$` shape (e.g. `player_3f2a-01`)
pub fn is_canonical_scope(scope: &str) -> bool {
    let Some((kind, id)) = scope.split_once('_') else {
        return false;
    };
    !kind.is_empty()
        && kind.bytes().all(|b| b.is_ascii_lowercase())
        && !id.is_empty()
        && id
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

/// Fold every non-canonical key into `default_scope`, summing counts
///
/// Returns the number of migrated keys. The store is marked dirty when at
/// least one key moved.
pub fn migrate_legacy_scopes<I: Send + Sync + 'static>(
    writer: &mut StoreWriter<'_, I>,
    default_scope: &str,
) -> usize {
    let legacy: Vec<(StoreKey, i64)> = writer
        .counts()
        .into_iter()
        .filter(|(key, _)| key.scope != default_scope && !is_canonical_scope(&key.scope))
        .collect();

    if legacy.is_empty() {
        return 0;
    }

    info!(
        records = legacy.len(),
        default_scope, "migrating legacy-scope records"
    );

    for (old_key, count) in &legacy {
        let new_key = StoreKey::new(default_scope, old_key.partition, old_key.identity.clone());
        let existing = writer.store().get(&new_key);
        writer.remove(old_key);
        writer.load(new_key, existing.saturating_add(*count));
    }
    writer.store().mark_dirty();

    info!(records = legacy.len(), "legacy migration complete");
    legacy.len()
}
