//! Forced-matrix placement.
//!
//! New registrants are attached to the shallowest, left-most slot with
//! fewer than [`MATRIX_WIDTH`] occupants, searching breadth-first from the
//! sponsor. "Left-most" follows the existing list order of the member set,
//! which makes placement deterministic for a fixed snapshot.

use std::collections::{HashMap, VecDeque};

use crate::member::Member;

/// Maximum direct children per matrix slot.
pub const MATRIX_WIDTH: usize = 10;

/// Maximum depth of the matrix; registrations that would place a member at
/// this level or below are rejected by the caller. The search itself is
/// capacity-bounded only.
pub const MATRIX_DEPTH: u32 = 10;

/// Parent-id -> direct children index, preserving member-set order.
pub fn children_index(members: &[Member]) -> HashMap<&str, Vec<&Member>> {
    let mut index: HashMap<&str, Vec<&Member>> = HashMap::new();
    for member in members {
        if let Some(parent_id) = member.parent_id.as_deref() {
            index.entry(parent_id).or_default().push(member);
        }
    }
    index
}

/// Find the matrix parent for a registrant sponsored by `sponsor_id`.
///
/// Breadth-first from the sponsor: the first candidate with an open slot
/// wins; a full candidate enqueues its children in list order. If the
/// queue empties without an open slot (malformed member set) the sponsor
/// id is returned as a last resort.
///
/// The caller must resolve an unknown sponsor to the root before invoking,
/// and must enforce the depth cap on the returned parent.
pub fn find_placement_parent(members: &[Member], sponsor_id: &str) -> String {
    let index = children_index(members);

    let mut queue: VecDeque<&str> = VecDeque::new();
    queue.push_back(sponsor_id);

    while let Some(candidate) = queue.pop_front() {
        let children = index.get(candidate).map(Vec::as_slice).unwrap_or(&[]);
        if children.len() < MATRIX_WIDTH {
            return candidate.to_string();
        }
        queue.extend(children.iter().map(|c| c.id.as_str()));
    }

    sponsor_id.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::member::{AvatarConfig, Role, ROOT_MEMBER_ID};
    use chrono::Utc;

    fn member(id: &str, parent: Option<&str>, level: u32) -> Member {
        Member {
            id: id.to_string(),
            username: id.to_string(),
            password: "pw".to_string(),
            email: format!("{id}@example.com"),
            phone: "+390001".to_string(),
            sponsor_id: parent.map(str::to_string),
            parent_id: parent.map(str::to_string),
            joined_at: Utc::now(),
            level,
            role: Role::Member,
            utilities: Vec::new(),
            avatar_config: AvatarConfig::default(),
        }
    }

    fn root() -> Member {
        member(ROOT_MEMBER_ID, None, 0)
    }

    #[test]
    fn sponsor_with_open_slot_is_chosen() {
        let mut members = vec![root()];
        for i in 0..4 {
            members.push(member(&format!("m{i}"), Some(ROOT_MEMBER_ID), 1));
        }
        assert_eq!(find_placement_parent(&members, ROOT_MEMBER_ID), ROOT_MEMBER_ID);
    }

    #[test]
    fn full_sponsor_cascades_to_first_child() {
        let mut members = vec![root()];
        for i in 0..MATRIX_WIDTH {
            members.push(member(&format!("m{i}"), Some(ROOT_MEMBER_ID), 1));
        }
        // Root is full with exactly 10 children; the 11th registrant lands
        // under the left-most child.
        assert_eq!(find_placement_parent(&members, ROOT_MEMBER_ID), "m0");
    }

    #[test]
    fn cascade_skips_full_children_in_order() {
        let mut members = vec![root()];
        for i in 0..MATRIX_WIDTH {
            members.push(member(&format!("m{i}"), Some(ROOT_MEMBER_ID), 1));
        }
        // Fill m0 completely; placement must move on to m1.
        for i in 0..MATRIX_WIDTH {
            members.push(member(&format!("m0-{i}"), Some("m0"), 2));
        }
        assert_eq!(find_placement_parent(&members, ROOT_MEMBER_ID), "m1");
    }

    #[test]
    fn full_two_levels_places_at_depth_three() {
        let mut members = vec![root()];
        // Level 1: 10 children of root, each full with 10 children.
        for i in 0..MATRIX_WIDTH {
            let child = format!("m{i}");
            members.push(member(&child, Some(ROOT_MEMBER_ID), 1));
            for j in 0..MATRIX_WIDTH {
                members.push(member(&format!("{child}-{j}"), Some(&child), 2));
            }
        }
        // Every slot through level 2 is taken; first open slot is the
        // left-most grandchild.
        assert_eq!(find_placement_parent(&members, ROOT_MEMBER_ID), "m0-0");
    }

    #[test]
    fn search_starts_at_the_sponsor_not_the_root() {
        let mut members = vec![root()];
        members.push(member("m0", Some(ROOT_MEMBER_ID), 1));
        members.push(member("m1", Some(ROOT_MEMBER_ID), 1));
        assert_eq!(find_placement_parent(&members, "m1"), "m1");
    }

    #[test]
    fn deterministic_for_fixed_snapshot() {
        let mut members = vec![root()];
        for i in 0..MATRIX_WIDTH {
            members.push(member(&format!("m{i}"), Some(ROOT_MEMBER_ID), 1));
        }
        let first = find_placement_parent(&members, ROOT_MEMBER_ID);
        let second = find_placement_parent(&members, ROOT_MEMBER_ID);
        assert_eq!(first, second);
    }

    #[test]
    fn unknown_sponsor_falls_back_to_itself() {
        // Caller substitutes the root for unknown sponsors; if it does not,
        // the engine still terminates with the sponsor id.
        let members = vec![root()];
        assert_eq!(find_placement_parent(&members, "ghost"), "ghost");
    }
}
