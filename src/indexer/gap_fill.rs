// Gap filling for the profile feed.
//
// `recent-users` silently skips some fids even with filtering off. The feed
// is newest-first, so the first user returned carries the highest fid; every
// id in [1, that fid] that never showed up gets a placeholder row holding
// only its id.

use std::collections::HashSet;

use crate::warpcast::types::RawUser;

/// Ids in `[1, max_id]` not present in `observed`, ascending.
pub fn missing_ids(max_id: i64, observed: impl IntoIterator<Item = i64>) -> Vec<i64> {
    let seen: HashSet<i64> = observed.into_iter().collect();
    (1..=max_id).filter(|id| !seen.contains(id)).collect()
}

/// Placeholder users for every id missing from `users`.
///
/// Returns an empty list when `users` is empty; callers treat an empty feed
/// as an error before getting here.
pub fn fill_gaps(users: &[RawUser]) -> Vec<RawUser> {
    let Some(first) = users.first() else {
        return Vec::new();
    };
    missing_ids(first.fid, users.iter().map(|u| u.fid))
        .into_iter()
        .map(RawUser::placeholder)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_ids_handles_non_positive_max() {
        assert!(missing_ids(0, []).is_empty());
        assert!(missing_ids(-5, [1, 2]).is_empty());
    }

    #[test]
    fn missing_ids_ignores_ids_above_max() {
        assert_eq!(missing_ids(3, [1, 10, 11]), vec![2, 3]);
    }

    #[test]
    fn fill_gaps_on_empty_feed() {
        assert!(fill_gaps(&[]).is_empty());
    }
}
