//! AI collaborator boundary.
//!
//! Two advisory capabilities consumed as black boxes: extracting a
//! provider/kind pre-fill from an uploaded bill document, and producing a
//! short strategy report for a downline tree. Neither affects core
//! invariants; an analyzer failure must never block manual entry.

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::warn;

use matrix_domain::{MatrixNode, UtilityType};

/// Subtrees below this depth are collapsed to a summary before prompting,
/// to keep the request inside token limits.
const MAX_PROMPT_DEPTH: u32 = 4;

const GENERATIVE_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Debug, Error)]
pub enum InsightsError {
    #[error("Analyzer not configured")]
    NotConfigured,

    #[error("Analyzer request failed: {0}")]
    Request(String),

    #[error("Analyzer returned an unusable response: {0}")]
    Malformed(String),
}

/// Structured pre-fill extracted from a bill document. Either field may be
/// missing; the caller falls back to manual entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillExtraction {
    pub provider: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<UtilityType>,
}

#[async_trait::async_trait]
pub trait DocumentAnalyzer: Send + Sync {
    /// Extract provider/kind from an uploaded document.
    async fn extract_bill(
        &self,
        document: &[u8],
        mime_type: &str,
    ) -> Result<BillExtraction, InsightsError>;

    /// Advisory strategy report over a downline tree.
    async fn summarize_network(&self, tree: &MatrixNode) -> Result<String, InsightsError>;
}

/// Analyzer backed by the Generative Language REST API.
pub struct GeminiAnalyzer {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiAnalyzer {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    async fn generate(&self, parts: Value) -> Result<String, InsightsError> {
        let url = format!(
            "{GENERATIVE_API_BASE}/{}:generateContent?key={}",
            self.model, self.api_key
        );
        let body = json!({ "contents": [{ "parts": parts }] });

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| InsightsError::Request(e.to_string()))?;

        let value: Value = response
            .json()
            .await
            .map_err(|e| InsightsError::Malformed(e.to_string()))?;

        value["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| InsightsError::Malformed("no text candidate in response".to_string()))
    }
}

#[async_trait::async_trait]
impl DocumentAnalyzer for GeminiAnalyzer {
    async fn extract_bill(
        &self,
        document: &[u8],
        mime_type: &str,
    ) -> Result<BillExtraction, InsightsError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(document);
        let prompt = "Analyze this energy bill or supply contract. Extract:\n\
                      1. The provider name (e.g. Enel, Eni, A2A, Edison).\n\
                      2. The supply kind: \"Electricity\" or \"Gas\".\n\
                      Reply ONLY with valid JSON, no markdown:\n\
                      {\"provider\": \"Name\", \"type\": \"Electricity\" | \"Gas\" | null}\n\
                      Use null or an empty string for anything you cannot find.";

        let parts = json!([
            { "inlineData": { "data": encoded, "mimeType": mime_type } },
            { "text": prompt },
        ]);

        let text = self.generate(parts).await?;
        parse_extraction(&text)
    }

    async fn summarize_network(&self, tree: &MatrixNode) -> Result<String, InsightsError> {
        let simplified = simplify_tree(tree, 0);
        let prompt = format!(
            "You are a senior network-marketing analyst for the energy sector \
             (electricity and gas). Analyze this forced 10x10 matrix structure.\n\n\
             Network data (simplified JSON):\n{}\n\n\
             Provide a strategy report (max 120 words):\n\
             1. Network health (member growth vs contract production).\n\
             2. The electricity/gas mix, or personal portfolio saturation.\n\
             3. One tactical suggestion for \"{}\" to grow volume.\n\n\
             Tone: energetic, professional, results-oriented.",
            serde_json::to_string_pretty(&simplified).unwrap_or_default(),
            tree.member.username,
        );

        self.generate(json!([{ "text": prompt }])).await
    }
}

/// Parse the model's JSON answer, tolerating markdown code fences.
fn parse_extraction(text: &str) -> Result<BillExtraction, InsightsError> {
    let cleaned = text.replace("```json", "").replace("```", "");
    let value: Value = serde_json::from_str(cleaned.trim())
        .map_err(|e| InsightsError::Malformed(e.to_string()))?;

    let provider = value
        .get("provider")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .and_then(UtilityType::parse);

    if provider.is_none() && kind.is_none() {
        warn!("Bill extraction produced no usable fields");
    }
    Ok(BillExtraction { provider, kind })
}

/// Reduce a tree to the structure-relevant fields, collapsing subtrees
/// below [`MAX_PROMPT_DEPTH`].
fn simplify_tree(node: &MatrixNode, depth: u32) -> Value {
    if depth > MAX_PROMPT_DEPTH {
        return json!({ "summary": format!("{} more members below", node.total_downline) });
    }

    let kinds: Vec<&str> = node
        .member
        .utilities
        .iter()
        .map(|u| u.kind.as_str())
        .collect();

    json!({
        "username": node.member.username,
        "level": node.member.level,
        "personalUtilities": node.member.utilities.len(),
        "personalUtilityKinds": kinds.join(", "),
        "directChildren": node.children.len(),
        "totalDownline": node.total_downline,
        "totalGroupUtilities": node.total_utilities,
        "children": node.children.iter().map(|c| simplify_tree(c, depth + 1)).collect::<Vec<_>>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use matrix_domain::{build_tree, AvatarConfig, Member, Role, ROOT_MEMBER_ID};

    #[test]
    fn parses_fenced_extraction() {
        let text = "```json\n{\"provider\": \"Enel\", \"type\": \"Electricity\"}\n```";
        let extraction = parse_extraction(text).unwrap();
        assert_eq!(extraction.provider.as_deref(), Some("Enel"));
        assert_eq!(extraction.kind, Some(UtilityType::Electricity));
    }

    #[test]
    fn empty_and_unknown_fields_become_none() {
        let extraction = parse_extraction(r#"{"provider": "", "type": "Water"}"#).unwrap();
        assert!(extraction.provider.is_none());
        assert!(extraction.kind.is_none());
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            parse_extraction("I could not read the document"),
            Err(InsightsError::Malformed(_))
        ));
    }

    #[test]
    fn deep_trees_are_pruned_for_prompting() {
        // Chain of 8 members; levels past MAX_PROMPT_DEPTH collapse.
        let mut members = vec![Member::seeded_root()];
        for i in 1..8u32 {
            let parent = members[(i - 1) as usize].id.clone();
            members.push(Member {
                id: format!("member-{i}"),
                username: format!("m{i}"),
                password: "pw".to_string(),
                email: format!("m{i}@example.com"),
                phone: "+390001".to_string(),
                sponsor_id: Some(parent.clone()),
                parent_id: Some(parent),
                joined_at: Utc::now(),
                level: i,
                role: Role::Member,
                utilities: Vec::new(),
                avatar_config: AvatarConfig::default(),
            });
        }
        let tree = build_tree(&members, ROOT_MEMBER_ID).unwrap();
        let simplified = simplify_tree(&tree, 0);

        let mut node = &simplified;
        for _ in 0..=MAX_PROMPT_DEPTH {
            node = &node["children"][0];
        }
        assert!(node.get("summary").is_some());
        assert!(node.get("children").is_none());
    }
}
