//! Lane-mapping service shared by continuity and stateful primitives: turns
//! an old/new pair of per-lane identity vectors into a `newToOld` index
//! table, used to migrate per-lane buffers across an element-count change.
//!
//! Lookups are deterministic by construction, never dependent on hash-table
//! iteration order; a degraded or reset mapping is a declared outcome, not
//! an incidental one, so it is returned as data rather than panicking.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::ident::TargetId;

/// How the new lane set's correspondence to the old one should be computed.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum IdentityMode {
    /// Match lanes by their stable `TargetId`.
    ById,
    /// Match lanes positionally: new lane `k` maps to old lane `k`.
    ByIndex,
    /// No correspondence; every new lane is unmatched.
    None,
}

/// How a duplicate or otherwise invalid identity vector is handled.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DuplicatePolicy {
    /// Refuse the mapping outright (`mode_used = ResetAll`).
    Strict,
    /// Degrade to `byIndex` and report the duplicate.
    Lenient,
}

/// The mode a mapping request actually resolved to, which may differ from
/// the mode requested (a duplicate under [`DuplicatePolicy::Lenient`]
/// degrades `byId` to `byIndex`; under [`DuplicatePolicy::Strict`] it resets).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum UsedMode {
    /// Matched by stable `TargetId`.
    ById,
    /// Matched positionally.
    ByIndex,
    /// No correspondence was requested.
    None,
    /// A duplicate was rejected under a strict policy; every lane is unmatched.
    ResetAll,
}

/// Result of a lane-mapping request.
#[derive(Clone, Debug)]
pub struct LaneMapping {
    /// `newToOld[k]` is the old lane index feeding new lane `k`, or `-1` if
    /// new lane `k` has no predecessor.
    pub new_to_old: Vec<i32>,
    /// The mode actually used to compute `new_to_old`.
    pub mode_used: UsedMode,
    /// Count of new lanes that matched an old lane.
    pub matched: u32,
    /// Count of new lanes with no predecessor.
    pub unmatched_new: u32,
    /// `true` if a duplicate identity was detected in either vector.
    pub duplicate_detected: bool,
}

/// Computes a `newToOld` mapping from `old` to `new` lane identities under
/// `mode`, applying `policy` if either vector contains a duplicate id.
#[must_use]
pub fn build_lane_mapping(old: &[TargetId], new: &[TargetId], mode: IdentityMode, policy: DuplicatePolicy) -> LaneMapping {
    match mode {
        IdentityMode::None => LaneMapping {
            new_to_old: vec![-1; new.len()],
            mode_used: UsedMode::None,
            matched: 0,
            unmatched_new: u32::try_from(new.len()).unwrap_or(u32::MAX),
            duplicate_detected: false,
        },
        IdentityMode::ByIndex => by_index(old, new, UsedMode::ByIndex, false),
        IdentityMode::ById => {
            if has_duplicates(old) || has_duplicates(new) {
                match policy {
                    DuplicatePolicy::Strict => LaneMapping {
                        new_to_old: vec![-1; new.len()],
                        mode_used: UsedMode::ResetAll,
                        matched: 0,
                        unmatched_new: u32::try_from(new.len()).unwrap_or(u32::MAX),
                        duplicate_detected: true,
                    },
                    DuplicatePolicy::Lenient => by_index(old, new, UsedMode::ByIndex, true),
                }
            } else {
                by_id(old, new)
            }
        }
    }
}

fn has_duplicates(ids: &[TargetId]) -> bool {
    let mut seen = FxHashSet::default();
    ids.iter().any(|id| !seen.insert(*id))
}

fn by_index(old: &[TargetId], new: &[TargetId], mode_used: UsedMode, duplicate_detected: bool) -> LaneMapping {
    let new_to_old: Vec<i32> = (0..new.len()).map(|k| if k < old.len() { i32::try_from(k).unwrap_or(-1) } else { -1 }).collect();
    let matched = u32::try_from(new_to_old.iter().filter(|&&v| v >= 0).count()).unwrap_or(0);
    let unmatched_new = u32::try_from(new.len()).unwrap_or(u32::MAX) - matched;
    LaneMapping {
        new_to_old,
        mode_used,
        matched,
        unmatched_new,
        duplicate_detected,
    }
}

fn by_id(old: &[TargetId], new: &[TargetId]) -> LaneMapping {
    let index: FxHashMap<TargetId, usize> = old.iter().enumerate().map(|(i, &id)| (id, i)).collect();
    let new_to_old: Vec<i32> = new.iter().map(|id| index.get(id).map_or(-1, |&i| i32::try_from(i).unwrap_or(-1))).collect();
    let matched = u32::try_from(new_to_old.iter().filter(|&&v| v >= 0).count()).unwrap_or(0);
    let unmatched_new = u32::try_from(new.len()).unwrap_or(u32::MAX) - matched;
    LaneMapping {
        new_to_old,
        mode_used: UsedMode::ById,
        matched,
        unmatched_new,
        duplicate_detected: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> TargetId {
        TargetId([byte; 32])
    }

    #[test]
    fn by_index_maps_positionally_and_truncates() {
        let old = vec![id(1), id(2), id(3)];
        let new = vec![id(9), id(9)];
        let m = build_lane_mapping(&old, &new, IdentityMode::ByIndex, DuplicatePolicy::Strict);
        assert_eq!(m.new_to_old, vec![0, 1]);
        assert_eq!(m.matched, 2);
    }

    #[test]
    fn by_id_matches_regardless_of_order() {
        let old = vec![id(1), id(2), id(3)];
        let new = vec![id(3), id(1)];
        let m = build_lane_mapping(&old, &new, IdentityMode::ById, DuplicatePolicy::Strict);
        assert_eq!(m.new_to_old, vec![2, 0]);
        assert_eq!(m.matched, 2);
        assert_eq!(m.unmatched_new, 0);
    }

    #[test]
    fn duplicate_under_strict_policy_resets_all() {
        let old = vec![id(1), id(1)];
        let new = vec![id(1)];
        let m = build_lane_mapping(&old, &new, IdentityMode::ById, DuplicatePolicy::Strict);
        assert_eq!(m.mode_used, UsedMode::ResetAll);
        assert_eq!(m.new_to_old, vec![-1]);
        assert!(m.duplicate_detected);
    }

    #[test]
    fn duplicate_under_lenient_policy_degrades_to_by_index() {
        let old = vec![id(1), id(1)];
        let new = vec![id(9)];
        let m = build_lane_mapping(&old, &new, IdentityMode::ById, DuplicatePolicy::Lenient);
        assert_eq!(m.mode_used, UsedMode::ByIndex);
        assert!(m.duplicate_detected);
        assert_eq!(m.new_to_old, vec![0]);
    }

    #[test]
    fn none_mode_matches_nothing() {
        let old = vec![id(1)];
        let new = vec![id(1), id(2)];
        let m = build_lane_mapping(&old, &new, IdentityMode::None, DuplicatePolicy::Strict);
        assert_eq!(m.new_to_old, vec![-1, -1]);
        assert_eq!(m.matched, 0);
    }
}
