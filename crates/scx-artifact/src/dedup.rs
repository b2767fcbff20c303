//! Version deduplication
//!
//! Among items sharing a canonical base name, only the one with the
//! greatest `(produced_at, sequence)` survives. Equal keys fall back to
//! arrival order: the later item wins.

use crate::artifact::{ArtifactRef, VersionKey};
use std::collections::HashMap;

/// Keep the latest version of every canonical name
///
/// Output preserves the input order of the surviving items, so callers
/// that feed items in arrival order get the survivors in arrival order.
pub fn latest_versions<T, F>(items: impl IntoIterator<Item = T>, key: F) -> Vec<T>
where
    F: Fn(&T) -> VersionKey,
{
    let items: Vec<T> = items.into_iter().collect();
    let keys: Vec<VersionKey> = items.iter().map(&key).collect();

    let mut winners: HashMap<&str, usize> = HashMap::with_capacity(keys.len());
    for (idx, k) in keys.iter().enumerate() {
        winners
            .entry(k.canonical.as_str())
            .and_modify(|best| {
                let current = &keys[*best];
                if (k.produced_at, k.sequence) >= (current.produced_at, current.sequence) {
                    *best = idx;
                }
            })
            .or_insert(idx);
    }

    let mut keep = vec![false; items.len()];
    for idx in winners.into_values() {
        keep[idx] = true;
    }

    items
        .into_iter()
        .zip(keep)
        .filter_map(|(item, kept)| kept.then_some(item))
        .collect()
}

/// [`latest_versions`] specialised to [`ArtifactRef`]
#[must_use]
pub fn latest_artifacts(artifacts: impl IntoIterator<Item = ArtifactRef>) -> Vec<ArtifactRef> {
    latest_versions(artifacts, ArtifactRef::version_key)
}

/// Whether any canonical name competes between a versioned and an
/// unversioned item, meaning arrival time decided the outcome
pub fn uses_arrival_fallback<'a>(keys: impl IntoIterator<Item = &'a VersionKey>) -> bool {
    let mut seen: HashMap<&str, (bool, bool)> = HashMap::new();
    for k in keys {
        let entry = seen.entry(k.canonical.as_str()).or_default();
        if k.versioned {
            entry.0 = true;
        } else {
            entry.1 = true;
        }
    }
    seen.values().any(|&(versioned, plain)| versioned && plain)
}
