//! Working-tree diff fingerprints used for no-progress detection.

use sha2::{Digest, Sha256};

/// Hash the textual diff against the last commit plus the porcelain status.
///
/// Status is folded in so newly created untracked files change the
/// fingerprint even though `git diff HEAD` does not show them.
pub fn fingerprint(diff: &str, status: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(diff.as_bytes());
    hasher.update([0u8]);
    hasher.update(status.as_bytes());
    hex::encode(hasher.finalize())
}

/// True iff the two fingerprints differ.
pub fn has_changes_occurred(previous: &str, current: &str) -> bool {
    previous != current
}
