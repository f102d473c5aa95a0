//! MatrixFlow domain model
//!
//! Entity types for the forced-matrix membership network plus the two pure
//! algorithms that operate on a member set:
//!
//! - [`placement`] — breadth-first slot assignment under the 10-children cap
//! - [`tree`] — recursive downline view with aggregated metrics
//!
//! Everything here is side-effect free. Persistence and reconciliation live
//! in the service and store crates; they consume these types and never
//! define their own member shapes.

pub mod member;
pub mod placement;
pub mod tree;
pub mod utility;

pub use member::{AvatarConfig, Member, Role, ROOT_MEMBER_ID};
pub use placement::{find_placement_parent, MATRIX_DEPTH, MATRIX_WIDTH};
pub use tree::{build_tree, network_stats, MatrixNode, NetworkStats};
pub use utility::{Utility, UtilityStatus, UtilityType};
