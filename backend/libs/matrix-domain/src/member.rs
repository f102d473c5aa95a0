use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::utility::Utility;

/// Reserved id of the canonical root member. The root is the only member
/// with `parent_id = None`; every placement chain ends at it.
pub const ROOT_MEMBER_ID: &str = "root-001";

/// Membership role. Utility status decisions require `Admin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Member => "member",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

/// Display configuration for a member's generated avatar. Carried through
/// every persistence path but never interpreted by the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvatarConfig {
    pub style: String,
    pub seed: String,
    pub background_color: String,
}

impl AvatarConfig {
    /// Default avatar for a given seed (usually the username).
    pub fn for_seed(seed: &str) -> Self {
        Self {
            style: "bottts-neutral".to_string(),
            seed: seed.to_string(),
            background_color: "transparent".to_string(),
        }
    }
}

impl Default for AvatarConfig {
    fn default() -> Self {
        Self::for_seed("")
    }
}

/// A member of the matrix network.
///
/// `sponsor_id` records who invited the member; `parent_id` records whose
/// matrix slot they occupy. The two differ whenever the sponsor's slots
/// were already full at registration time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: String,
    pub username: String,
    /// Opaque credential. Hardening is an explicit non-goal.
    pub password: String,
    pub email: String,
    pub phone: String,
    pub sponsor_id: Option<String>,
    pub parent_id: Option<String>,
    pub joined_at: DateTime<Utc>,
    /// Distance from the root; the root itself is level 0.
    pub level: u32,
    #[serde(default)]
    pub role: Role,
    /// Personal portfolio, insertion order = chronological.
    #[serde(default)]
    pub utilities: Vec<Utility>,
    #[serde(default)]
    pub avatar_config: AvatarConfig,
}

impl Member {
    /// Generate a fresh opaque member id.
    pub fn new_id() -> String {
        format!("member-{}", Uuid::new_v4())
    }

    /// The canonical root member seeded on first start and used to
    /// initialize an empty remote store.
    pub fn seeded_root() -> Self {
        Self {
            id: ROOT_MEMBER_ID.to_string(),
            username: "admin".to_string(),
            password: "password".to_string(),
            email: "admin@matrixflow.dev".to_string(),
            phone: "+390000000000".to_string(),
            sponsor_id: None,
            parent_id: None,
            joined_at: Utc::now(),
            level: 0,
            role: Role::Admin,
            utilities: Vec::new(),
            avatar_config: AvatarConfig::for_seed("admin"),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn utility(&self, utility_id: &str) -> Option<&Utility> {
        self.utilities.iter().find(|u| u.id == utility_id)
    }

    pub fn utility_mut(&mut self, utility_id: &str) -> Option<&mut Utility> {
        self.utilities.iter_mut().find(|u| u.id == utility_id)
    }
}

/// Case-insensitive username lookup, the uniqueness key for registration.
pub fn find_by_username<'a>(members: &'a [Member], username: &str) -> Option<&'a Member> {
    members
        .iter()
        .find(|m| m.username.eq_ignore_ascii_case(username))
}

/// Lookup by opaque id.
pub fn find_by_id<'a>(members: &'a [Member], id: &str) -> Option<&'a Member> {
    members.iter().find(|m| m.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_root_is_admin_at_level_zero() {
        let root = Member::seeded_root();
        assert_eq!(root.id, ROOT_MEMBER_ID);
        assert!(root.is_root());
        assert!(root.role.is_admin());
        assert_eq!(root.level, 0);
        assert!(root.sponsor_id.is_none());
    }

    #[test]
    fn username_lookup_is_case_insensitive() {
        let mut root = Member::seeded_root();
        root.username = "Admin".to_string();
        let members = vec![root];
        assert!(find_by_username(&members, "admin").is_some());
        assert!(find_by_username(&members, "ADMIN").is_some());
        assert!(find_by_username(&members, "nobody").is_none());
    }

    #[test]
    fn member_serializes_camel_case() {
        let root = Member::seeded_root();
        let json = serde_json::to_value(&root).unwrap();
        assert!(json.get("sponsorId").is_some());
        assert!(json.get("parentId").is_some());
        assert!(json.get("joinedAt").is_some());
        assert!(json.get("avatarConfig").is_some());
        assert_eq!(json["role"], "admin");
    }

    #[test]
    fn missing_role_defaults_to_member() {
        let json = r#"{
            "id": "member-1",
            "username": "alice",
            "password": "pw",
            "email": "alice@example.com",
            "phone": "+390001",
            "sponsorId": "root-001",
            "parentId": "root-001",
            "joinedAt": "2024-01-01T00:00:00Z",
            "level": 1
        }"#;
        let member: Member = serde_json::from_str(json).unwrap();
        assert_eq!(member.role, Role::Member);
        assert!(member.utilities.is_empty());
        assert_eq!(member.avatar_config, AvatarConfig::default());
    }
}
