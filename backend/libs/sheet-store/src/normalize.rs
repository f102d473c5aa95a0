//! Normalization boundary between the remote store and the typed core.
//!
//! The spreadsheet backend is loosely typed: numeric-looking cells come
//! back as numbers (ids, passwords, phone numbers), columns can be empty,
//! and nested structures may arrive as stringified JSON. Everything is
//! coerced into a strictly-typed [`Member`] here so untyped data never
//! reaches placement or tree logic.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tracing::warn;

use matrix_domain::{AvatarConfig, Member, Role, Utility, UtilityStatus, UtilityType};

/// Coerce a JSON value into a string. Numbers are accepted because the
/// sheet turns numeric-looking cells into numbers.
fn coerce_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn string_field(obj: &serde_json::Map<String, Value>, key: &str) -> String {
    obj.get(key).and_then(coerce_string).unwrap_or_default()
}

/// Nullable reference field: null, missing and empty cells all mean None.
fn opt_ref_field(obj: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(coerce_string)
        .filter(|s| !s.trim().is_empty())
}

/// Timestamps that do not parse are pinned to the epoch rather than "now":
/// a fresh-looking timestamp would wrongly grant the reconciliation grace
/// window to an arbitrarily old row.
fn timestamp_field(obj: &serde_json::Map<String, Value>, key: &str) -> DateTime<Utc> {
    let epoch = Utc.timestamp_opt(0, 0).single().unwrap_or_else(Utc::now);
    let Some(value) = obj.get(key) else {
        return epoch;
    };

    if let Some(s) = value.as_str() {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(s) {
            return parsed.with_timezone(&Utc);
        }
    }
    if let Some(millis) = value.as_i64() {
        if let Some(parsed) = Utc.timestamp_millis_opt(millis).single() {
            return parsed;
        }
    }
    epoch
}

fn level_field(obj: &serde_json::Map<String, Value>, key: &str) -> u32 {
    match obj.get(key) {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0).min(u32::MAX as u64) as u32,
        Some(Value::String(s)) => s.trim().parse::<u32>().unwrap_or(0),
        _ => 0,
    }
}

/// Avatar config may arrive as an object or as the stringified JSON the
/// sheet stores in its cell.
fn avatar_field(obj: &serde_json::Map<String, Value>, seed: &str) -> AvatarConfig {
    let parsed = match obj.get("avatarConfig") {
        Some(Value::Object(_)) => {
            serde_json::from_value(obj["avatarConfig"].clone()).ok()
        }
        Some(Value::String(raw)) => serde_json::from_str(raw).ok(),
        _ => None,
    };
    parsed.unwrap_or_else(|| AvatarConfig::for_seed(seed))
}

fn bool_field(obj: &serde_json::Map<String, Value>, key: &str) -> bool {
    match obj.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        Some(Value::Number(n)) => n.as_i64() == Some(1),
        _ => false,
    }
}

/// Normalize one raw member row. Returns `None` when the row is unusable
/// (no id or username), which the caller logs and skips.
pub fn normalize_member(value: &Value) -> Option<Member> {
    let obj = value.as_object()?;

    let id = opt_ref_field(obj, "id")?;
    let username = opt_ref_field(obj, "username")?;

    let utilities = match obj.get("utilities") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| normalize_utility(item, &id))
            .collect(),
        _ => Vec::new(),
    };

    let role = match obj.get("role").and_then(coerce_string) {
        Some(s) if s.eq_ignore_ascii_case("admin") => Role::Admin,
        _ => Role::Member,
    };

    Some(Member {
        avatar_config: avatar_field(obj, &username),
        password: string_field(obj, "password"),
        email: string_field(obj, "email"),
        phone: string_field(obj, "phone"),
        sponsor_id: opt_ref_field(obj, "sponsorId"),
        parent_id: opt_ref_field(obj, "parentId"),
        joined_at: timestamp_field(obj, "joinedAt"),
        level: level_field(obj, "level"),
        role,
        utilities,
        id,
        username,
    })
}

fn normalize_utility(value: &Value, member_id: &str) -> Option<Utility> {
    let obj = value.as_object()?;

    let id = opt_ref_field(obj, "id")?;
    let kind = match obj.get("type").and_then(coerce_string) {
        Some(raw) => match UtilityType::parse(&raw) {
            Some(kind) => kind,
            None => {
                warn!(utility_id = %id, member_id, raw_type = %raw, "Skipping utility with unknown type");
                return None;
            }
        },
        None => return None,
    };

    let status = obj
        .get("status")
        .and_then(coerce_string)
        .map(|s| UtilityStatus::parse_or_pending(&s))
        .unwrap_or_default();

    let attachment_data = opt_ref_field(obj, "attachmentData");
    let has_attachment = bool_field(obj, "hasAttachment") || attachment_data.is_some();

    Some(Utility {
        provider: string_field(obj, "provider"),
        date_added: timestamp_field(obj, "dateAdded"),
        status,
        attachment_name: opt_ref_field(obj, "attachmentName"),
        attachment_type: opt_ref_field(obj, "attachmentType"),
        attachment_data,
        has_attachment,
        id,
        kind,
    })
}

/// Normalize a full fetch result, dropping unusable rows.
pub fn normalize_members(rows: &[Value]) -> Vec<Member> {
    rows.iter()
        .filter_map(|row| {
            let member = normalize_member(row);
            if member.is_none() {
                warn!("Skipping member row with no usable id/username");
            }
            member
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn coerces_numeric_ids_and_passwords() {
        let row = json!({
            "id": 12345,
            "username": "alice",
            "password": 8912,
            "email": "alice@example.com",
            "phone": 390001,
            "sponsorId": "root-001",
            "parentId": "root-001",
            "joinedAt": "2024-03-01T10:00:00Z",
            "level": 1
        });
        let member = normalize_member(&row).unwrap();
        assert_eq!(member.id, "12345");
        assert_eq!(member.password, "8912");
        assert_eq!(member.phone, "390001");
        assert_eq!(member.level, 1);
    }

    #[test]
    fn empty_references_become_none() {
        let row = json!({
            "id": "root-001",
            "username": "admin",
            "sponsorId": "",
            "parentId": Value::Null,
            "level": 0
        });
        let member = normalize_member(&row).unwrap();
        assert!(member.sponsor_id.is_none());
        assert!(member.parent_id.is_none());
    }

    #[test]
    fn level_accepts_string_cells() {
        let row = json!({"id": "m1", "username": "m1", "level": "3"});
        assert_eq!(normalize_member(&row).unwrap().level, 3);

        let row = json!({"id": "m1", "username": "m1", "level": "garbage"});
        assert_eq!(normalize_member(&row).unwrap().level, 0);
    }

    #[test]
    fn unparseable_join_date_is_epoch_not_now() {
        let row = json!({"id": "m1", "username": "m1", "joinedAt": "yesterday-ish"});
        let member = normalize_member(&row).unwrap();
        assert_eq!(member.joined_at.timestamp(), 0);
    }

    #[test]
    fn stringified_avatar_config_is_parsed() {
        let row = json!({
            "id": "m1",
            "username": "m1",
            "avatarConfig": "{\"style\":\"shapes\",\"seed\":\"m1\",\"backgroundColor\":\"transparent\"}"
        });
        let member = normalize_member(&row).unwrap();
        assert_eq!(member.avatar_config.style, "shapes");
    }

    #[test]
    fn missing_avatar_defaults_to_username_seed() {
        let row = json!({"id": "m1", "username": "alice"});
        let member = normalize_member(&row).unwrap();
        assert_eq!(member.avatar_config.seed, "alice");
        assert_eq!(member.avatar_config.style, "bottts-neutral");
    }

    #[test]
    fn utilities_are_normalized_and_unknown_types_skipped() {
        let row = json!({
            "id": "m1",
            "username": "m1",
            "utilities": [
                {"id": 7, "type": "Gas", "provider": "Eni", "status": "strange", "hasAttachment": "true"},
                {"id": "u2", "type": "Water", "provider": "Nope"}
            ]
        });
        let member = normalize_member(&row).unwrap();
        assert_eq!(member.utilities.len(), 1);
        let utility = &member.utilities[0];
        assert_eq!(utility.id, "7");
        assert_eq!(utility.kind, UtilityType::Gas);
        assert_eq!(utility.status, UtilityStatus::Pending);
        assert!(utility.has_attachment);
        assert!(utility.attachment_data.is_none());
    }

    #[test]
    fn rows_without_identity_are_dropped() {
        let rows = vec![
            json!({"id": "m1", "username": "alice"}),
            json!({"username": "ghost"}),
            json!({"id": ""}),
            json!("not even an object"),
        ];
        let members = normalize_members(&rows);
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].id, "m1");
    }
}
