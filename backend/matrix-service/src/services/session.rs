//! Session manager: the single "current member" pointer.
//!
//! Persisted through the snapshot store and restored across restarts.
//! Injected into the reconciliation engine rather than living as ambient
//! global state; only mutations that touch the current member's own record
//! go through [`SessionManager::sync_if_current`].

use tokio::sync::RwLock;
use tracing::debug;

use matrix_domain::Member;

use crate::error::Result;
use crate::repository::SnapshotStore;

pub struct SessionManager {
    store: SnapshotStore,
    current: RwLock<Option<Member>>,
}

impl SessionManager {
    /// Restore the persisted session, if any.
    pub async fn restore(store: SnapshotStore) -> Result<Self> {
        let current = store.load_session().await?;
        if let Some(member) = &current {
            debug!(member_id = %member.id, username = %member.username, "Session restored");
        }
        Ok(Self {
            store,
            current: RwLock::new(current),
        })
    }

    /// The currently authenticated member, if any.
    pub async fn current(&self) -> Option<Member> {
        self.current.read().await.clone()
    }

    /// Set the current member and persist it.
    pub async fn set_current(&self, member: Member) -> Result<()> {
        self.store.save_session(&member).await?;
        *self.current.write().await = Some(member);
        Ok(())
    }

    /// Clear the session (logout).
    pub async fn clear(&self) -> Result<()> {
        self.store.clear_session().await?;
        *self.current.write().await = None;
        Ok(())
    }

    /// Propagate an updated record into the session iff it belongs to the
    /// current member. Updates to other members never touch the session.
    pub async fn sync_if_current(&self, member: &Member) -> Result<()> {
        let is_current = self
            .current
            .read()
            .await
            .as_ref()
            .is_some_and(|c| c.id == member.id);
        if is_current {
            self.set_current(member.clone()).await?;
        }
        Ok(())
    }
}
