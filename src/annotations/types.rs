//! Annotation domain types
//!
//! External field names follow the JSON API contract (camelCase). Structured
//! fields (tags, rich text, text-selection ranges) are opaque to the rest of
//! the server and cross the storage boundary as JSON text; the encode/decode
//! helpers at the bottom of this module are the only place that conversion
//! happens.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Text that replaces the content of a soft-deleted annotation
pub const TOMBSTONE_TEXT: &str = "[Deleted]";

/// Annotation type used when the client does not send one
pub const DEFAULT_ANNOTATION_TYPE: &str = "highlight";

/// Reaction type used when the client does not send one
pub const DEFAULT_REACTION_TYPE: &str = "like";

/// A user's note attached to an article or an external URL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    /// Unique identifier (UUID)
    pub id: String,
    /// Internal article reference; at least one of `article_id`/`url` is set
    #[serde(rename = "articleId", skip_serializing_if = "Option::is_none")]
    pub article_id: Option<String>,
    /// External page reference
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Owning user; immutable once set
    #[serde(rename = "userId")]
    pub user_id: String,
    /// Plain-text content
    pub text: String,
    /// Optional structured content blob, passed through untouched
    #[serde(rename = "richText", skip_serializing_if = "Option::is_none")]
    pub rich_text: Option<Value>,
    /// Open set: "highlight", "comment", "question", ...
    #[serde(rename = "type")]
    pub annotation_type: String,
    pub tags: Vec<String>,
    pub sentiment: f64,
    pub visibility: Visibility,
    /// Opaque text-selection range description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection: Option<Value>,
    /// Parent annotation when this row is a reply
    #[serde(rename = "parentId", skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// True iff `parent_id` is set
    #[serde(rename = "isReply")]
    pub is_reply: bool,
    /// Maintained incrementally by the thread manager
    #[serde(rename = "replyCount")]
    pub reply_count: i64,
    #[serde(rename = "collectionId", skip_serializing_if = "Option::is_none")]
    pub collection_id: Option<String>,
    /// Tombstone flag; content is replaced by [`TOMBSTONE_TEXT`]
    #[serde(rename = "isDeleted")]
    pub is_deleted: bool,
    /// Starts at 1, +1 per content update; matches the latest ledger row
    pub version: i64,
    /// Recomputed from reaction rows on every reaction write
    #[serde(rename = "reactionCount")]
    pub reaction_count: i64,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

/// Who may read an annotation besides its owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Private,
    Public,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Private => "private",
            Visibility::Public => "public",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "public" => Visibility::Public,
            _ => Visibility::Private,
        }
    }
}

/// One row of the append-only revision ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationVersion {
    pub id: String,
    #[serde(rename = "annotationId")]
    pub annotation_id: String,
    /// Actor who made this revision
    #[serde(rename = "userId")]
    pub user_id: String,
    pub text: String,
    #[serde(rename = "richText", skip_serializing_if = "Option::is_none")]
    pub rich_text: Option<Value>,
    #[serde(rename = "type")]
    pub annotation_type: String,
    pub tags: Vec<String>,
    /// Matches the annotation's `version` at write time
    pub version: i64,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

/// A user's reaction to an annotation; at most one row per user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationReaction {
    pub id: String,
    #[serde(rename = "annotationId")]
    pub annotation_id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    /// Open set: "like", "insightful", ...
    #[serde(rename = "type")]
    pub reaction_type: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

/// A named, user-owned grouping of annotations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationCollection {
    pub id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "isPublic")]
    pub is_public: bool,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

// Storage-boundary serialization. Columns hold JSON text; the domain model
// holds the decoded values.

pub(crate) fn encode_tags(tags: &[String]) -> Result<String> {
    Ok(serde_json::to_string(tags)?)
}

pub(crate) fn decode_tags(raw: &str) -> Result<Vec<String>> {
    Ok(serde_json::from_str(raw)?)
}

pub(crate) fn encode_json(value: Option<&Value>) -> Result<Option<String>> {
    value.map(serde_json::to_string).transpose().map_err(Into::into)
}

pub(crate) fn decode_json(raw: Option<&str>) -> Result<Option<Value>> {
    raw.map(serde_json::from_str).transpose().map_err(Into::into)
}

pub(crate) fn decode_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visibility_round_trip() {
        assert_eq!(Visibility::parse("public"), Visibility::Public);
        assert_eq!(Visibility::parse("private"), Visibility::Private);
        // Unknown values fall back to private
        assert_eq!(Visibility::parse("friends"), Visibility::Private);
        assert_eq!(Visibility::Public.as_str(), "public");
    }

    #[test]
    fn test_tags_round_trip() {
        let tags = vec!["rust".to_string(), "databases".to_string()];
        let encoded = encode_tags(&tags).unwrap();
        assert_eq!(decode_tags(&encoded).unwrap(), tags);

        assert!(decode_tags("[]").unwrap().is_empty());
    }

    #[test]
    fn test_json_column_round_trip() {
        let value = serde_json::json!({"blocks": [{"kind": "quote", "text": "hi"}]});
        let encoded = encode_json(Some(&value)).unwrap().unwrap();
        assert_eq!(decode_json(Some(&encoded)).unwrap().unwrap(), value);

        assert!(encode_json(None).unwrap().is_none());
        assert!(decode_json(None).unwrap().is_none());
    }

    #[test]
    fn test_annotation_serialization_uses_api_field_names() {
        let now = Utc::now();
        let annotation = Annotation {
            id: "a-1".to_string(),
            article_id: Some("article-9".to_string()),
            url: None,
            user_id: "u-1".to_string(),
            text: "first".to_string(),
            rich_text: None,
            annotation_type: DEFAULT_ANNOTATION_TYPE.to_string(),
            tags: vec![],
            sentiment: 0.0,
            visibility: Visibility::Private,
            selection: None,
            parent_id: None,
            is_reply: false,
            reply_count: 0,
            collection_id: None,
            is_deleted: false,
            version: 1,
            reaction_count: 0,
            created_at: now,
            updated_at: now,
        };

        let json = serde_json::to_string(&annotation).unwrap();
        assert!(json.contains("\"articleId\""));
        assert!(json.contains("\"userId\""));
        assert!(json.contains("\"replyCount\""));
        assert!(json.contains("\"visibility\":\"private\""));
        // Absent optionals are omitted, not null
        assert!(!json.contains("\"url\""));
        assert!(!json.contains("\"parentId\""));
    }
}
