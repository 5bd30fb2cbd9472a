//! Content service types
//!
//! Defines the namespace enumeration, request keys and the binary metadata
//! returned by the content service.

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::errors::ContentError;

/// Partition of the content domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Site content, token `tcm`
    Sites,
    /// Documentation content, token `ish`
    Docs,
}

impl Namespace {
    /// Parse a URI namespace token
    pub fn from_token(token: &str) -> Result<Self, ContentError> {
        match token {
            "tcm" => Ok(Namespace::Sites),
            "ish" => Ok(Namespace::Docs),
            other => Err(ContentError::UnsupportedNamespace(other.to_string())),
        }
    }

    /// Token used in URIs and cached file names
    pub fn token(&self) -> &'static str {
        match self {
            Namespace::Sites => "tcm",
            Namespace::Docs => "ish",
        }
    }

    /// Numeric id expected by the GraphQL API
    pub fn graphql_id(&self) -> u8 {
        match self {
            Namespace::Sites => 1,
            Namespace::Docs => 2,
        }
    }

    /// Extra cache directory segment, `None` for the default namespace
    pub fn path_segment(&self) -> Option<&'static str> {
        match self {
            Namespace::Sites => None,
            Namespace::Docs => Some(self.token()),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// How a binary is addressed within a publication
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BinaryKey {
    Id(u64),
    Path(String),
}

impl fmt::Display for BinaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinaryKey::Id(id) => write!(f, "id {}", id),
            BinaryKey::Path(path) => write!(f, "path '{}'", path),
        }
    }
}

/// A single ambient claim forwarded to the content service
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    pub uri: String,
    pub value: String,
    #[serde(rename = "type")]
    pub value_type: String,
}

/// Request context forwarded with metadata queries
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ContextData {
    pub claims: Vec<Claim>,
    /// Serve without writing to the media cache. Not sent to the service.
    #[serde(skip)]
    pub no_media_cache: bool,
}

impl ContextData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a string claim
    pub fn with_claim(mut self, uri: impl Into<String>, value: impl Into<String>) -> Self {
        self.claims.push(Claim {
            uri: uri.into(),
            value: value.into(),
            value_type: "STRING".to_string(),
        });
        self
    }

    /// Resolve without downloading into the media cache
    pub fn without_media_cache(mut self) -> Self {
        self.no_media_cache = true;
        self
    }
}

/// Deserialize a publish date given either as RFC 3339 text, epoch
/// milliseconds, or null.
fn deserialize_publish_date<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de;

    struct PublishDateVisitor;

    impl<'de> de::Visitor<'de> for PublishDateVisitor {
        type Value = Option<DateTime<Utc>>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("an RFC 3339 date, epoch milliseconds, or null")
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
            let millis = i64::try_from(value).map_err(de::Error::custom)?;
            de::Visitor::visit_i64(self, millis)
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
            Utc.timestamp_millis_opt(value)
                .single()
                .map(Some)
                .ok_or_else(|| de::Error::custom("timestamp out of range"))
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
            if value.is_empty() {
                return Ok(None);
            }
            DateTime::parse_from_rfc3339(value)
                .map(|d| Some(d.with_timezone(&Utc)))
                .map_err(de::Error::custom)
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }
    }

    deserializer.deserialize_any(PublishDateVisitor)
}

/// A rendition of a binary as reported by the content service
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    #[serde(default)]
    pub download_url: Option<String>,
    /// Storage path relative to the publication's media directory
    #[serde(default, rename = "path")]
    pub storage_path: Option<String>,
    #[serde(default, rename = "type")]
    pub mime_type: Option<String>,
    #[serde(
        default,
        rename = "lastPublishDate",
        deserialize_with = "deserialize_publish_date"
    )]
    pub last_publish: Option<DateTime<Utc>>,
}

impl Variant {
    pub fn new(download_url: &str, storage_path: &str, mime_type: &str, last_publish: DateTime<Utc>) -> Self {
        Self {
            download_url: Some(download_url.to_string()),
            storage_path: Some(storage_path.to_string()),
            mime_type: Some(mime_type.to_string()),
            last_publish: Some(last_publish),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VariantEdge {
    pub node: Variant,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VariantConnection {
    #[serde(default)]
    pub edges: Option<Vec<VariantEdge>>,
}

/// Binary component metadata
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinaryComponent {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_publish_date")]
    pub last_publish_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub variants: Option<VariantConnection>,
}

impl BinaryComponent {
    pub fn new(id: u64, last_publish_date: DateTime<Utc>, variants: Vec<Variant>) -> Self {
        Self {
            id: Some(id),
            last_publish_date: Some(last_publish_date),
            variants: Some(VariantConnection {
                edges: Some(variants.into_iter().map(|node| VariantEdge { node }).collect()),
            }),
        }
    }

    /// Variants in reported order. A variant without its own publish date
    /// inherits the component's.
    pub fn variant_list(&self) -> Vec<Variant> {
        let edges = match self.variants.as_ref().and_then(|v| v.edges.as_ref()) {
            Some(edges) => edges,
            None => return Vec::new(),
        };
        edges
            .iter()
            .map(|edge| {
                let mut variant = edge.node.clone();
                if variant.last_publish.is_none() {
                    variant.last_publish = self.last_publish_date;
                }
                variant
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_tokens() {
        assert_eq!(Namespace::from_token("tcm").unwrap(), Namespace::Sites);
        assert_eq!(Namespace::from_token("ish").unwrap(), Namespace::Docs);
        assert_eq!(Namespace::Docs.token(), "ish");
        assert_eq!(Namespace::Sites.graphql_id(), 1);
        assert_eq!(Namespace::Sites.path_segment(), None);
        assert_eq!(Namespace::Docs.path_segment(), Some("ish"));
    }

    #[test]
    fn test_unknown_namespace_is_an_error() {
        let err = Namespace::from_token("xyz").unwrap_err();
        assert!(matches!(err, ContentError::UnsupportedNamespace(ref t) if t == "xyz"));
    }

    #[test]
    fn test_deserialize_component() {
        let json = r#"{
            "id": 100,
            "lastPublishDate": "2024-03-01T10:00:00.000Z",
            "variants": {
                "edges": [
                    {"node": {"downloadUrl": "http://x/y.png", "path": "/y.png", "type": "image/png"}}
                ]
            }
        }"#;
        let component: BinaryComponent = serde_json::from_str(json).unwrap();
        assert_eq!(component.id, Some(100));
        let variants = component.variant_list();
        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0].download_url.as_deref(), Some("http://x/y.png"));
        assert_eq!(variants[0].storage_path.as_deref(), Some("/y.png"));
        assert_eq!(variants[0].mime_type.as_deref(), Some("image/png"));
        // inherited from the component
        assert_eq!(variants[0].last_publish, component.last_publish_date);
    }

    #[test]
    fn test_deserialize_epoch_millis_and_null_dates() {
        let json = r#"{"id": 1, "lastPublishDate": 1536964279000, "variants": null}"#;
        let component: BinaryComponent = serde_json::from_str(json).unwrap();
        assert_eq!(
            component.last_publish_date.unwrap().timestamp_millis(),
            1536964279000
        );
        assert!(component.variant_list().is_empty());

        let json = r#"{"id": 1, "lastPublishDate": null, "variants": {"edges": null}}"#;
        let component: BinaryComponent = serde_json::from_str(json).unwrap();
        assert!(component.last_publish_date.is_none());
        assert!(component.variant_list().is_empty());
    }

    #[test]
    fn test_variant_fields_are_optional() {
        let json = r#"{"variants": {"edges": [{"node": {}}]}}"#;
        let component: BinaryComponent = serde_json::from_str(json).unwrap();
        let variants = component.variant_list();
        assert_eq!(variants.len(), 1);
        assert!(variants[0].download_url.is_none());
        assert!(variants[0].last_publish.is_none());
    }

    #[test]
    fn test_context_data_serializes_as_claim_list() {
        let ctx = ContextData::new()
            .with_claim("taf:language", "en")
            .without_media_cache();
        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{"uri": "taf:language", "value": "en", "type": "STRING"}])
        );
    }
}
