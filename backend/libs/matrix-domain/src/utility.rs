use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The two supply categories a utility contract can cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UtilityType {
    Electricity,
    Gas,
}

impl UtilityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UtilityType::Electricity => "Electricity",
            UtilityType::Gas => "Gas",
        }
    }

    /// Tolerant parse for values arriving from the remote store.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            v if v.eq_ignore_ascii_case("electricity") => Some(UtilityType::Electricity),
            v if v.eq_ignore_ascii_case("gas") => Some(UtilityType::Gas),
            _ => None,
        }
    }
}

/// Utility lifecycle. Created `Pending`; `Active` and `Rejected` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UtilityStatus {
    #[default]
    Pending,
    Active,
    Rejected,
}

impl UtilityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UtilityStatus::Pending => "Pending",
            UtilityStatus::Active => "Active",
            UtilityStatus::Rejected => "Rejected",
        }
    }

    /// Tolerant parse; unknown strings fall back to `Pending`.
    pub fn parse_or_pending(value: &str) -> Self {
        match value.trim() {
            v if v.eq_ignore_ascii_case("active") => UtilityStatus::Active,
            v if v.eq_ignore_ascii_case("rejected") => UtilityStatus::Rejected,
            _ => UtilityStatus::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, UtilityStatus::Pending)
    }

    /// The only transitions defined are Pending -> Active | Rejected.
    pub fn can_transition_to(&self, next: UtilityStatus) -> bool {
        matches!(self, UtilityStatus::Pending) && next != UtilityStatus::Pending
    }
}

/// An attachable utility contract record in a member's portfolio.
///
/// `attachment_data` carries the base64 document payload when present.
/// Bulk reads from the remote store omit it and advertise presence via
/// `has_attachment`; the payload is then hydrated lazily per utility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Utility {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: UtilityType,
    pub provider: String,
    pub date_added: DateTime<Utc>,
    #[serde(default)]
    pub status: UtilityStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_data: Option<String>,
    #[serde(default)]
    pub has_attachment: bool,
}

impl Utility {
    /// Generate a fresh opaque utility id.
    pub fn new_id() -> String {
        format!("util-{}", Uuid::new_v4())
    }

    /// A new `Pending` record with no attachment.
    pub fn new(kind: UtilityType, provider: impl Into<String>) -> Self {
        Self {
            id: Self::new_id(),
            kind,
            provider: provider.into(),
            date_added: Utc::now(),
            status: UtilityStatus::Pending,
            attachment_name: None,
            attachment_type: None,
            attachment_data: None,
            has_attachment: false,
        }
    }

    /// Attach a document payload to the record.
    pub fn with_attachment(
        mut self,
        name: impl Into<String>,
        mime: impl Into<String>,
        data: impl Into<String>,
    ) -> Self {
        self.attachment_name = Some(name.into());
        self.attachment_type = Some(mime.into());
        self.attachment_data = Some(data.into());
        self.has_attachment = true;
        self
    }
}
