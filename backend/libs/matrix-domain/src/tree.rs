//! Downline tree construction and aggregation.
//!
//! [`build_tree`] produces a fresh [`MatrixNode`] view on every call; nodes
//! are never mutated in place. A parent->children index is built once so a
//! full build stays O(N) in the member count.

use std::collections::HashMap;

use serde::Serialize;

use crate::member::Member;
use crate::placement::{children_index, find_placement_parent};

/// Sentinel sponsor name when `sponsor_id` is null (the root).
pub const SPONSOR_NONE: &str = "none";

/// Sentinel sponsor name when `sponsor_id` does not resolve.
pub const SPONSOR_UNKNOWN: &str = "unknown";

/// A member with its constructed subtree and rolled-up downstream metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatrixNode {
    #[serde(flatten)]
    pub member: Member,
    pub children: Vec<MatrixNode>,
    /// Count of all descendants, not just direct children.
    pub total_downline: u64,
    /// Count of all descendant utilities, excluding this node's own.
    pub total_utilities: u64,
    pub sponsor_username: String,
}

/// Build the downline view rooted at `root_id`, or `None` when the id is
/// absent from the member set.
pub fn build_tree(members: &[Member], root_id: &str) -> Option<MatrixNode> {
    let root = members.iter().find(|m| m.id == root_id)?;

    let index = children_index(members);
    let usernames: HashMap<&str, &str> = members
        .iter()
        .map(|m| (m.id.as_str(), m.username.as_str()))
        .collect();

    Some(build_node(root, &index, &usernames))
}

fn build_node(
    member: &Member,
    index: &HashMap<&str, Vec<&Member>>,
    usernames: &HashMap<&str, &str>,
) -> MatrixNode {
    let children: Vec<MatrixNode> = index
        .get(member.id.as_str())
        .map(Vec::as_slice)
        .unwrap_or(&[])
        .iter()
        .map(|child| build_node(child, index, usernames))
        .collect();

    let total_downline = children.iter().map(|c| 1 + c.total_downline).sum();
    let total_utilities = children
        .iter()
        .map(|c| c.member.utilities.len() as u64 + c.total_utilities)
        .sum();

    let sponsor_username = match member.sponsor_id.as_deref() {
        None => SPONSOR_NONE.to_string(),
        Some(sponsor_id) => usernames
            .get(sponsor_id)
            .map(|name| name.to_string())
            .unwrap_or_else(|| SPONSOR_UNKNOWN.to_string()),
    };

    MatrixNode {
        member: member.clone(),
        children,
        total_downline,
        total_utilities,
        sponsor_username,
    }
}

/// Aggregate counters over the whole member set.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStats {
    pub total_members: u64,
    /// Deepest occupied level; 0 for a root-only network.
    pub matrix_depth: u32,
    /// Sum of every member's own utilities.
    pub total_utilities: u64,
    /// Username of the member who would receive the next registrant
    /// sponsored by the root.
    pub next_open_slot: String,
}

/// Compute [`NetworkStats`] for a member set.
pub fn network_stats(members: &[Member]) -> NetworkStats {
    let root = members.iter().find(|m| m.is_root());

    let next_open_slot = root
        .map(|r| find_placement_parent(members, &r.id))
        .and_then(|parent_id| members.iter().find(|m| m.id == parent_id))
        .map(|m| m.username.clone())
        .unwrap_or_default();

    NetworkStats {
        total_members: members.len() as u64,
        matrix_depth: members.iter().map(|m| m.level).max().unwrap_or(0),
        total_utilities: members.iter().map(|m| m.utilities.len() as u64).sum(),
        next_open_slot,
    }
}
