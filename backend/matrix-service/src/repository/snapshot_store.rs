//! Durable local snapshot cache.
//!
//! The on-device copy of the member set and the active session member.
//! Both are plain JSON documents under a data directory, subordinate to
//! the remote store: they may be discarded and rebuilt at any time, so an
//! unreadable file is reseeded rather than treated as fatal.
//!
//! Every write is a whole-file replacement through a temp-file rename, so
//! the cache is never left partially written. Every write also applies the
//! size-bounding transform: attachment payloads above
//! [`MAX_CACHED_ATTACHMENT_BYTES`] are dropped from the durable copy (the
//! in-memory copies callers hold keep the full payload; the remote store
//! has the canonical one).

use std::path::PathBuf;

use tokio::fs;
use tracing::{debug, info, warn};

use matrix_domain::Member;

use crate::error::Result;

/// Largest attachment payload the durable cache will hold, in bytes.
/// Bigger payloads stay remote-only to keep the snapshot from exhausting
/// local storage.
pub const MAX_CACHED_ATTACHMENT_BYTES: usize = 50 * 1024;

/// Replacement attachment name recorded when an oversized payload could
/// not be stored locally and never reached the remote store either.
pub const ATTACHMENT_TOO_LARGE_MARKER: &str = "(attachment too large - not stored)";

const MEMBERS_FILE: &str = "members.json";
const SESSION_FILE: &str = "session.json";

/// File-backed snapshot persistence for the member set and the session.
#[derive(Clone)]
pub struct SnapshotStore {
    data_dir: PathBuf,
}

impl SnapshotStore {
    /// Open (and create if needed) the data directory.
    pub async fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir).await?;
        Ok(Self { data_dir })
    }

    /// Load the cached member set, seeding the canonical root when the
    /// snapshot is missing or unreadable.
    pub async fn load_members(&self) -> Result<Vec<Member>> {
        let path = self.data_dir.join(MEMBERS_FILE);

        match fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<Vec<Member>>(&bytes) {
                Ok(members) if !members.is_empty() => Ok(members),
                Ok(_) => self.seed_root().await,
                Err(e) => {
                    warn!(error = %e, "Member snapshot unreadable, reseeding root");
                    self.seed_root().await
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => self.seed_root().await,
            Err(e) => Err(e.into()),
        }
    }

    async fn seed_root(&self) -> Result<Vec<Member>> {
        info!("Seeding local snapshot with the canonical root member");
        let members = vec![Member::seeded_root()];
        self.save_members(&members).await?;
        Ok(members)
    }

    /// Persist the member set, applying the size-bounding transform.
    pub async fn save_members(&self, members: &[Member]) -> Result<()> {
        let trimmed: Vec<Member> = members.iter().map(trim_for_cache).collect();
        let bytes = serde_json::to_vec(&trimmed)?;
        self.write_atomic(MEMBERS_FILE, bytes).await?;
        debug!(count = members.len(), "Member snapshot saved");
        Ok(())
    }

    /// Load the persisted session member, if any. An unreadable session
    /// file is treated as "not logged in".
    pub async fn load_session(&self) -> Result<Option<Member>> {
        let path = self.data_dir.join(SESSION_FILE);

        match fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<Member>(&bytes) {
                Ok(member) => Ok(Some(member)),
                Err(e) => {
                    warn!(error = %e, "Session snapshot unreadable, clearing");
                    self.clear_session().await?;
                    Ok(None)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist the session member (size-bounded like the member set).
    pub async fn save_session(&self, member: &Member) -> Result<()> {
        let bytes = serde_json::to_vec(&trim_for_cache(member))?;
        self.write_atomic(SESSION_FILE, bytes).await
    }

    /// Remove the persisted session, if present.
    pub async fn clear_session(&self) -> Result<()> {
        match fs::remove_file(self.data_dir.join(SESSION_FILE)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Whole-file replacement: write to a temp file, then rename over the
    /// target so readers never observe a torn snapshot.
    async fn write_atomic(&self, name: &str, bytes: Vec<u8>) -> Result<()> {
        let target = self.data_dir.join(name);
        let temp = self.data_dir.join(format!("{name}.tmp"));
        fs::write(&temp, &bytes).await?;
        fs::rename(&temp, &target).await?;
        Ok(())
    }
}

/// The size-bounding transform: strip oversized attachment payloads from
/// a member's durable copy. `has_attachment` stays set so the payload can
/// be rehydrated from the remote store on demand.
pub fn trim_for_cache(member: &Member) -> Member {
    let mut trimmed = member.clone();
    for utility in &mut trimmed.utilities {
        let oversized = utility
            .attachment_data
            .as_ref()
            .is_some_and(|data| data.len() > MAX_CACHED_ATTACHMENT_BYTES);
        if oversized {
            utility.attachment_data = None;
        }
    }
    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;
    use matrix_domain::{Utility, UtilityType, ROOT_MEMBER_ID};
    use tempfile::TempDir;

    async fn store() -> (TempDir, SnapshotStore) {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path()).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn first_load_seeds_the_root() {
        let (_dir, store) = store().await;
        let members = store.load_members().await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].id, ROOT_MEMBER_ID);
        assert!(members[0].role.is_admin());
    }

    #[tokio::test]
    async fn members_round_trip() {
        let (_dir, store) = store().await;
        let mut members = store.load_members().await.unwrap();

        let mut alice = Member::seeded_root();
        alice.id = "member-alice".to_string();
        alice.username = "alice".to_string();
        alice.parent_id = Some(ROOT_MEMBER_ID.to_string());
        alice.level = 1;
        members.push(alice);

        store.save_members(&members).await.unwrap();
        let loaded = store.load_members().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].username, "alice");
    }

    #[tokio::test]
    async fn corrupt_snapshot_reseeds_instead_of_failing() {
        let (dir, store) = store().await;
        tokio::fs::write(dir.path().join("members.json"), b"{not json")
            .await
            .unwrap();

        let members = store.load_members().await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].id, ROOT_MEMBER_ID);
    }

    #[tokio::test]
    async fn oversized_attachments_are_stripped_from_durable_copy() {
        let (_dir, store) = store().await;
        let mut members = store.load_members().await.unwrap();

        let big = "x".repeat(MAX_CACHED_ATTACHMENT_BYTES + 1);
        let small = "y".repeat(128);
        members[0].utilities.push(
            Utility::new(UtilityType::Electricity, "Enel").with_attachment(
                "big.pdf",
                "application/pdf",
                big,
            ),
        );
        members[0].utilities.push(
            Utility::new(UtilityType::Gas, "Eni").with_attachment("small.pdf", "application/pdf", small),
        );

        store.save_members(&members).await.unwrap();
        let loaded = store.load_members().await.unwrap();

        let utilities = &loaded[0].utilities;
        assert!(utilities[0].attachment_data.is_none());
        assert!(utilities[0].has_attachment, "presence flag survives trimming");
        assert_eq!(utilities[0].attachment_name.as_deref(), Some("big.pdf"));
        assert!(utilities[1].attachment_data.is_some());
    }

    #[tokio::test]
    async fn session_round_trip_and_clear() {
        let (_dir, store) = store().await;
        assert!(store.load_session().await.unwrap().is_none());

        let root = Member::seeded_root();
        store.save_session(&root).await.unwrap();
        let restored = store.load_session().await.unwrap().unwrap();
        assert_eq!(restored.id, root.id);

        store.clear_session().await.unwrap();
        assert!(store.load_session().await.unwrap().is_none());
        // Clearing twice is a no-op
        store.clear_session().await.unwrap();
    }
}
