//! Reconciliation engine.
//!
//! The only component allowed to write to the remote store or the local
//! snapshot. Reads resolve the authoritative remote list against the
//! local cache (grace-window merge); mutations validate locally, apply
//! optimistically to the snapshot and session, then submit to the remote
//! store — awaited for registration, through the observable outbox for
//! everything else.
//!
//! Remote wins on merge, except for local members written within the
//! grace window that have not propagated yet. This is a heuristic, not a
//! conflict-resolution protocol: it cannot detect true concurrent edits
//! to the same record.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use matrix_domain::{
    build_tree, find_placement_parent, member::find_by_id, member::find_by_username,
    network_stats, AvatarConfig, MatrixNode, Member, NetworkStats, Role, Utility, UtilityStatus,
    UtilityType, MATRIX_DEPTH,
};
use sheet_store::{MemberFieldPatch, RemoteStore};
use write_outbox::{DeliveryReceipt, Outbox, OutboxError, OutboxEvent, OutboxResult, OutboxTransport};

use crate::error::{MatrixError, Result};
use crate::repository::{
    SnapshotStore, ATTACHMENT_TOO_LARGE_MARKER, MAX_CACHED_ATTACHMENT_BYTES,
};
use crate::services::session::SessionManager;
use crate::validators;

/// Local writes absent from a successful remote fetch are kept for this
/// long after their `joined_at` before being presumed stale.
pub const SYNC_GRACE_WINDOW_MINUTES: i64 = 15;

/// Outbox event kinds understood by [`RemoteWriteTransport`].
pub const EVENT_MEMBER_SEEDED: &str = "member.seeded";
pub const EVENT_UTILITY_ADDED: &str = "utility.added";
pub const EVENT_UTILITY_STATUS: &str = "utility.status_changed";
pub const EVENT_PROFILE_UPDATED: &str = "member.profile_updated";

/// Whether the last remote round-trip succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Connected,
    Degraded,
}

/// Registration request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRegistration {
    pub username: String,
    pub password: String,
    /// Sponsor's username; unknown sponsors fall back to the root.
    #[serde(default)]
    pub sponsor_username: String,
    pub email: String,
    pub phone: String,
}

/// Result of a registration: the member always exists locally; a remote
/// failure is reported, not fatal (offline-mode outcome).
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterOutcome {
    pub member: Member,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_error: Option<String>,
}

/// Attachment supplied with a new utility.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentUpload {
    pub name: String,
    pub mime_type: String,
    /// Base64 payload.
    pub data: String,
}

/// New-utility request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUtility {
    #[serde(rename = "type")]
    pub kind: UtilityType,
    pub provider: String,
    #[serde(default)]
    pub attachment: Option<AttachmentUpload>,
}

/// An optimistic mutation result: the merged member plus the receipt for
/// its queued remote write, so callers (and tests) can observe delivery.
#[derive(Debug)]
pub struct MutationOutcome {
    pub member: Member,
    pub delivery: DeliveryReceipt,
}

/// Outbox transport mapping queued events onto remote store calls.
pub struct RemoteWriteTransport {
    remote: Arc<dyn RemoteStore>,
}

impl RemoteWriteTransport {
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self { remote }
    }
}

#[async_trait::async_trait]
impl OutboxTransport for RemoteWriteTransport {
    async fn deliver(&self, event: &OutboxEvent) -> OutboxResult<()> {
        match event.kind.as_str() {
            EVENT_MEMBER_SEEDED => {
                let member: Member = serde_json::from_value(event.payload.clone())?;
                self.remote
                    .register(&member)
                    .await
                    .map_err(|e| OutboxError::Delivery(e.to_string()))
            }
            EVENT_UTILITY_ADDED => {
                let member_id = payload_str(&event.payload, "memberId")?;
                let utility: Utility =
                    serde_json::from_value(event.payload["utility"].clone())?;
                self.remote
                    .add_utility(&member_id, &utility)
                    .await
                    .map_err(|e| OutboxError::Delivery(e.to_string()))
            }
            EVENT_UTILITY_STATUS => {
                let member_id = payload_str(&event.payload, "memberId")?;
                let utility_id = payload_str(&event.payload, "utilityId")?;
                let status: UtilityStatus =
                    serde_json::from_value(event.payload["status"].clone())?;
                self.remote
                    .update_utility_status(&member_id, &utility_id, status)
                    .await
                    .map_err(|e| OutboxError::Delivery(e.to_string()))
            }
            EVENT_PROFILE_UPDATED => {
                let member_id = payload_str(&event.payload, "memberId")?;
                let fields: MemberFieldPatch =
                    serde_json::from_value(event.payload["fields"].clone())?;
                self.remote
                    .update_member_fields(&member_id, &fields)
                    .await
                    .map_err(|e| OutboxError::Delivery(e.to_string()))
            }
            other => {
                // Retrying an event nobody understands would spin forever.
                warn!(kind = other, event_id = %event.id, "Ignoring unknown outbox event kind");
                Ok(())
            }
        }
    }
}

fn payload_str(payload: &serde_json::Value, key: &str) -> OutboxResult<String> {
    payload
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| OutboxError::Delivery(format!("payload missing `{key}`")))
}

/// Orchestrator for all reads and writes against the member set.
pub struct ReconciliationEngine {
    remote: Arc<dyn RemoteStore>,
    store: SnapshotStore,
    session: Arc<SessionManager>,
    outbox: Outbox,
    status: RwLock<SyncStatus>,
    /// Serializes mutations: the durable cache is a whole-list rewrite,
    /// so concurrent writers in the same process would lose updates.
    write_lock: Mutex<()>,
}

impl ReconciliationEngine {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        store: SnapshotStore,
        session: Arc<SessionManager>,
        outbox: Outbox,
    ) -> Self {
        Self {
            remote,
            store,
            session,
            outbox,
            // Until the first remote round-trip succeeds we only trust
            // the local snapshot.
            status: RwLock::new(SyncStatus::Degraded),
            write_lock: Mutex::new(()),
        }
    }

    pub async fn status(&self) -> SyncStatus {
        *self.status.read().await
    }

    async fn set_status(&self, status: SyncStatus) {
        let mut current = self.status.write().await;
        if *current != status {
            info!(?status, "Sync status changed");
        }
        *current = status;
    }

    /// Resolve the current member set: remote when reachable (merged with
    /// recent unsynced local writes and written back to the cache), local
    /// snapshot otherwise.
    pub async fn fetch_members(&self) -> Result<Vec<Member>> {
        match self.remote.fetch_all().await {
            Ok(remote_members) => {
                self.set_status(SyncStatus::Connected).await;

                if remote_members.is_empty() {
                    return self.seed_remote_root().await;
                }

                let local = self.store.load_members().await?;
                let merged = merge_with_grace(local, remote_members, Utc::now());
                self.store.save_members(&merged).await?;
                Ok(merged)
            }
            Err(e) => {
                warn!(error = %e, "Remote fetch failed, serving local snapshot");
                self.set_status(SyncStatus::Degraded).await;
                self.store.load_members().await
            }
        }
    }

    /// The remote store answered with an empty list: it exists but has
    /// never been seeded. Push the canonical root up (fire-and-forget)
    /// and serve the singleton.
    async fn seed_remote_root(&self) -> Result<Vec<Member>> {
        let members = self.store.load_members().await?;
        let root = members
            .iter()
            .find(|m| m.is_root())
            .cloned()
            .unwrap_or_else(Member::seeded_root);

        info!(root_id = %root.id, "Remote store empty, submitting root seed");
        let payload = serde_json::to_value(&root)?;
        let _ = self.outbox.enqueue(EVENT_MEMBER_SEEDED, payload).await;

        Ok(vec![root])
    }

    /// Register a new member under `sponsor_username`'s matrix.
    ///
    /// The remote write is awaited; its failure is reported in the outcome
    /// but the optimistic local write stands, so the member is usable for
    /// the current session either way.
    pub async fn register_member(&self, registration: NewRegistration) -> Result<RegisterOutcome> {
        let NewRegistration {
            username,
            password,
            sponsor_username,
            email,
            phone,
        } = registration;

        if !validators::validate_username(&username) {
            return Err(MatrixError::InvalidUsername(username));
        }
        if email.trim().is_empty() {
            return Err(MatrixError::MissingContactField("email"));
        }
        if !validators::validate_email(&email) {
            return Err(MatrixError::InvalidEmail(email));
        }
        if phone.trim().is_empty() {
            return Err(MatrixError::MissingContactField("phone"));
        }
        if !validators::validate_phone(&phone) {
            return Err(MatrixError::InvalidPhone(phone));
        }

        let _guard = self.write_lock.lock().await;
        let members = self.fetch_members().await?;

        if find_by_username(&members, &username).is_some() {
            return Err(MatrixError::UsernameTaken);
        }

        let sponsor_id = find_by_username(&members, &sponsor_username)
            .or_else(|| members.iter().find(|m| m.is_root()))
            .or_else(|| members.first())
            .map(|m| m.id.clone())
            .ok_or_else(|| MatrixError::Internal("member set is empty".to_string()))?;

        let parent_id = find_placement_parent(&members, &sponsor_id);
        let parent_level = find_by_id(&members, &parent_id).map(|p| p.level).unwrap_or(0);
        if parent_level >= MATRIX_DEPTH {
            return Err(MatrixError::DepthLimitReached);
        }

        let member = Member {
            id: Member::new_id(),
            avatar_config: AvatarConfig::for_seed(&username),
            username,
            password,
            email,
            phone,
            sponsor_id: Some(sponsor_id),
            parent_id: Some(parent_id),
            joined_at: Utc::now(),
            level: parent_level + 1,
            role: Role::Member,
            utilities: Vec::new(),
        };

        // Optimistic write first: the caller observes the new member
        // immediately, before the network resolves.
        let mut updated = members;
        updated.push(member.clone());
        self.store.save_members(&updated).await?;

        let remote_error = match self.remote.register(&member).await {
            Ok(()) => {
                self.set_status(SyncStatus::Connected).await;
                None
            }
            Err(e) => {
                warn!(member_id = %member.id, error = %e, "Remote registration failed, member stays local");
                self.set_status(SyncStatus::Degraded).await;
                Some(e.to_string())
            }
        };

        Ok(RegisterOutcome { member, remote_error })
    }

    /// Add a `Pending` utility to a member's portfolio.
    pub async fn add_utility(&self, member_id: &str, new_utility: NewUtility) -> Result<MutationOutcome> {
        let _guard = self.write_lock.lock().await;
        let mut members = self.fetch_members().await?;

        let mut utility = Utility::new(new_utility.kind, new_utility.provider);
        if let Some(attachment) = new_utility.attachment {
            utility = utility.with_attachment(attachment.name, attachment.mime_type, attachment.data);
        }

        let member = members
            .iter_mut()
            .find(|m| m.id == member_id)
            .ok_or(MatrixError::MemberNotFound)?;
        member.utilities.push(utility.clone());
        let full_member = member.clone();

        // The durable copy never holds oversized payloads; if the remote
        // is unreachable too, the cached record is marked so the payload
        // reads as lost rather than pending hydration.
        let oversized = utility
            .attachment_data
            .as_ref()
            .is_some_and(|d| d.len() > MAX_CACHED_ATTACHMENT_BYTES);
        let degraded = self.status().await == SyncStatus::Degraded;

        let mut cache_copy = members.clone();
        if oversized && degraded {
            if let Some(cached) = cache_copy
                .iter_mut()
                .find(|m| m.id == member_id)
                .and_then(|m| m.utility_mut(&utility.id))
            {
                cached.attachment_name = Some(ATTACHMENT_TOO_LARGE_MARKER.to_string());
                cached.has_attachment = false;
            }
        }
        self.store.save_members(&cache_copy).await?;
        self.session.sync_if_current(&full_member).await?;

        // Remote submission keeps the full payload regardless of size.
        let payload = serde_json::json!({ "memberId": member_id, "utility": utility });
        let delivery = self.outbox.enqueue(EVENT_UTILITY_ADDED, payload).await;

        Ok(MutationOutcome {
            member: full_member,
            delivery,
        })
    }

    /// Decide a pending utility. Requires the admin role; while degraded,
    /// the owning member may decide their own records.
    pub async fn update_utility_status(
        &self,
        actor_id: &str,
        member_id: &str,
        utility_id: &str,
        next: UtilityStatus,
    ) -> Result<MutationOutcome> {
        let _guard = self.write_lock.lock().await;
        let mut members = self.fetch_members().await?;

        let actor_is_admin = find_by_id(&members, actor_id)
            .ok_or(MatrixError::MemberNotFound)?
            .role
            .is_admin();
        let degraded = self.status().await == SyncStatus::Degraded;
        if !(actor_is_admin || (degraded && actor_id == member_id)) {
            return Err(MatrixError::NotAuthorized);
        }

        let member = members
            .iter_mut()
            .find(|m| m.id == member_id)
            .ok_or(MatrixError::MemberNotFound)?;
        let utility = member
            .utility_mut(utility_id)
            .ok_or(MatrixError::UtilityNotFound)?;

        if !utility.status.can_transition_to(next) {
            return Err(MatrixError::InvalidStatusTransition {
                from: utility.status,
                to: next,
            });
        }
        utility.status = next;
        let full_member = member.clone();

        self.store.save_members(&members).await?;
        self.session.sync_if_current(&full_member).await?;

        let payload = serde_json::json!({
            "memberId": member_id,
            "utilityId": utility_id,
            "status": next,
        });
        let delivery = self.outbox.enqueue(EVENT_UTILITY_STATUS, payload).await;

        Ok(MutationOutcome {
            member: full_member,
            delivery,
        })
    }

    /// Patch a member's profile fields (email, phone, avatar).
    pub async fn update_member_profile(
        &self,
        member_id: &str,
        fields: MemberFieldPatch,
    ) -> Result<MutationOutcome> {
        if let Some(email) = &fields.email {
            if !validators::validate_email(email) {
                return Err(MatrixError::InvalidEmail(email.clone()));
            }
        }
        if let Some(phone) = &fields.phone {
            if !validators::validate_phone(phone) {
                return Err(MatrixError::InvalidPhone(phone.clone()));
            }
        }

        let _guard = self.write_lock.lock().await;
        let mut members = self.fetch_members().await?;

        let member = members
            .iter_mut()
            .find(|m| m.id == member_id)
            .ok_or(MatrixError::MemberNotFound)?;
        if let Some(email) = &fields.email {
            member.email = email.clone();
        }
        if let Some(phone) = &fields.phone {
            member.phone = phone.clone();
        }
        if let Some(avatar) = &fields.avatar_config {
            member.avatar_config = avatar.clone();
        }
        let full_member = member.clone();

        self.store.save_members(&members).await?;
        self.session.sync_if_current(&full_member).await?;

        let payload = serde_json::json!({ "memberId": member_id, "fields": fields });
        let delivery = self.outbox.enqueue(EVENT_PROFILE_UPDATED, payload).await;

        Ok(MutationOutcome {
            member: full_member,
            delivery,
        })
    }

    /// Plain credential match over the resolved member set; sets the
    /// session on success. Credential hardening is an explicit non-goal.
    pub async fn login(&self, username: &str, password: &str) -> Result<Member> {
        let members = self.fetch_members().await?;
        let member = members
            .iter()
            .find(|m| m.username.eq_ignore_ascii_case(username) && m.password == password)
            .cloned()
            .ok_or(MatrixError::InvalidCredentials)?;

        self.session.set_current(member.clone()).await?;
        Ok(member)
    }

    pub async fn logout(&self) -> Result<()> {
        self.session.clear().await
    }

    pub async fn current_member(&self) -> Option<Member> {
        self.session.current().await
    }

    /// Resolved downline view rooted at `root_id`.
    pub async fn tree(&self, root_id: &str) -> Result<Option<MatrixNode>> {
        let members = self.fetch_members().await?;
        Ok(build_tree(&members, root_id))
    }

    /// Aggregate counters over the resolved member set.
    pub async fn stats(&self) -> Result<NetworkStats> {
        let members = self.fetch_members().await?;
        Ok(network_stats(&members))
    }

    /// Lazily hydrate one utility's attachment payload. Bulk fetches omit
    /// payloads; this pulls a single one from the remote store, falling
    /// back to the durable cache (small payloads only) when unreachable.
    pub async fn fetch_attachment(&self, utility_id: &str) -> Result<Option<String>> {
        match self.remote.fetch_attachment(utility_id).await {
            Ok(data) => {
                self.set_status(SyncStatus::Connected).await;
                Ok(data)
            }
            Err(e) => {
                self.set_status(SyncStatus::Degraded).await;
                let members = self.store.load_members().await?;
                for member in &members {
                    if let Some(utility) = member.utility(utility_id) {
                        if let Some(data) = &utility.attachment_data {
                            debug!(utility_id, "Serving attachment from degraded cache");
                            return Ok(Some(data.clone()));
                        }
                    }
                }
                Err(e.into())
            }
        }
    }
}

/// Remote-wins merge with the grace-window exception: local members the
/// remote does not know about yet are kept while their `joined_at` is
/// within the window, and presumed stale after it.
fn merge_with_grace(
    local: Vec<Member>,
    remote: Vec<Member>,
    now: DateTime<Utc>,
) -> Vec<Member> {
    let remote_ids: HashSet<String> = remote.iter().map(|m| m.id.clone()).collect();
    let window = Duration::minutes(SYNC_GRACE_WINDOW_MINUTES);

    let mut merged = remote;
    for member in local {
        if remote_ids.contains(&member.id) {
            continue;
        }
        let age = now.signed_duration_since(member.joined_at);
        if age <= window {
            info!(member_id = %member.id, "Keeping recent local member not yet visible remotely");
            merged.push(member);
        } else {
            debug!(member_id = %member.id, "Dropping stale local member absent from remote");
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use matrix_domain::ROOT_MEMBER_ID;

    fn member_joined(id: &str, joined_at: DateTime<Utc>) -> Member {
        let mut member = Member::seeded_root();
        member.id = id.to_string();
        member.username = id.to_string();
        member.sponsor_id = Some(ROOT_MEMBER_ID.to_string());
        member.parent_id = Some(ROOT_MEMBER_ID.to_string());
        member.level = 1;
        member.role = Role::Member;
        member.joined_at = joined_at;
        member
    }

    #[test]
    fn grace_window_keeps_recent_local_writes() {
        let now = Utc::now();
        let root = Member::seeded_root();

        let recent = member_joined("member-recent", now - Duration::minutes(5));
        let stale = member_joined("member-stale", now - Duration::minutes(20));

        let merged = merge_with_grace(
            vec![root.clone(), recent, stale],
            vec![root],
            now,
        );

        let ids: Vec<&str> = merged.iter().map(|m| m.id.as_str()).collect();
        assert!(ids.contains(&"member-recent"));
        assert!(!ids.contains(&"member-stale"));
    }

    #[test]
    fn remote_copy_wins_over_local_copy() {
        let now = Utc::now();
        let mut local_root = Member::seeded_root();
        local_root.email = "local@matrixflow.dev".to_string();
        let mut remote_root = Member::seeded_root();
        remote_root.email = "remote@matrixflow.dev".to_string();

        let merged = merge_with_grace(vec![local_root], vec![remote_root], now);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].email, "remote@matrixflow.dev");
    }

    #[test]
    fn window_boundary_is_inclusive() {
        let now = Utc::now();
        let boundary = member_joined(
            "member-boundary",
            now - Duration::minutes(SYNC_GRACE_WINDOW_MINUTES),
        );
        let merged = merge_with_grace(vec![boundary], vec![Member::seeded_root()], now);
        assert_eq!(merged.len(), 2);
    }
}
