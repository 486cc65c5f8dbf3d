//! Raw metadata document.
//!
//! Structures here mirror the JSON tree served by the metadata server
//! for a recursive query. No semantic validation happens here: every
//! leaf is optional and values are kept as text, merge rules decide
//! what is usable.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Top-level metadata document.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct RawMetadataDocument {
    #[serde(default)]
    pub instance: InstanceNode,
    #[serde(default)]
    pub project: ProjectNode,
}

impl RawMetadataDocument {
    /// Decode a metadata document from its JSON representation.
    pub fn parse(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }
}

/// Per-instance metadata.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct InstanceNode {
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default, deserialize_with = "lenient_text")]
    pub zone: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub name: Option<String>,
    /// Numeric instance ID, kept in textual form.
    #[serde(default, deserialize_with = "lenient_text")]
    pub id: Option<String>,
}

/// Per-project metadata.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectNode {
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default, deserialize_with = "lenient_text")]
    pub project_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub numeric_project_id: Option<String>,
}

/// Custom metadata attributes, with both current and legacy key names.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Attributes {
    #[serde(rename = "enable-os-inventory", default, deserialize_with = "lenient_text")]
    pub inventory_enabled: Option<String>,
    #[serde(rename = "os-inventory-enabled", default, deserialize_with = "lenient_text")]
    pub inventory_enabled_legacy: Option<String>,

    #[serde(
        rename = "osconfig-enabled-prerelease-features",
        default,
        deserialize_with = "lenient_text"
    )]
    pub prerelease_features: Option<String>,
    #[serde(
        rename = "os-config-enabled-prerelease-features",
        default,
        deserialize_with = "lenient_text"
    )]
    pub prerelease_features_legacy: Option<String>,

    /// Master switch for all features.
    #[serde(rename = "enable-osconfig", default, deserialize_with = "lenient_text")]
    pub osconfig_enabled: Option<String>,
    #[serde(rename = "osconfig-disabled-features", default, deserialize_with = "lenient_text")]
    pub disabled_features: Option<String>,

    /// Legacy-only debug toggle.
    #[serde(rename = "enable-os-config-debug", default, deserialize_with = "lenient_text")]
    pub debug_enabled_legacy: Option<String>,
    #[serde(rename = "osconfig-log-level", default, deserialize_with = "lenient_text")]
    pub log_level: Option<String>,

    #[serde(rename = "osconfig-endpoint", default, deserialize_with = "lenient_text")]
    pub endpoint: Option<String>,
    #[serde(rename = "os-config-endpoint", default, deserialize_with = "lenient_text")]
    pub endpoint_legacy: Option<String>,

    #[serde(rename = "osconfig-poll-interval", default, deserialize_with = "lenient_text")]
    pub poll_interval: Option<String>,
    #[serde(rename = "os-config-poll-interval", default, deserialize_with = "lenient_text")]
    pub poll_interval_legacy: Option<String>,
}

/// Accept strings, numbers and booleans as text; anything else is absent.
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let text = match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    };
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_document() {
        let body = r#"{
            "instance": {
                "attributes": {
                    "enable-osconfig": "true",
                    "osconfig-poll-interval": 15,
                    "unrelated-key": "ignored"
                },
                "zone": "projects/123/zones/us-west1-b",
                "name": "vm-1",
                "id": 5555555555555555555
            },
            "project": {
                "attributes": {"os-config-endpoint": "legacy.example.com:443"},
                "projectId": "my-project",
                "numericProjectId": 123
            }
        }"#;
        let doc = RawMetadataDocument::parse(body).unwrap();

        assert_eq!(doc.instance.attributes.osconfig_enabled.as_deref(), Some("true"));
        assert_eq!(doc.instance.attributes.poll_interval.as_deref(), Some("15"));
        assert_eq!(doc.instance.name.as_deref(), Some("vm-1"));
        assert_eq!(doc.instance.id.as_deref(), Some("5555555555555555555"));
        assert_eq!(
            doc.project.attributes.endpoint_legacy.as_deref(),
            Some("legacy.example.com:443")
        );
        assert_eq!(doc.project.project_id.as_deref(), Some("my-project"));
        assert_eq!(doc.project.numeric_project_id.as_deref(), Some("123"));
    }

    #[test]
    fn missing_nodes_default() {
        let doc = RawMetadataDocument::parse("{}").unwrap();
        assert_eq!(doc, RawMetadataDocument::default());
    }

    #[test]
    fn odd_value_types_are_absent() {
        let body = r#"{"instance": {"attributes": {"enable-osconfig": ["x"], "osconfig-log-level": null}}}"#;
        let doc = RawMetadataDocument::parse(body).unwrap();
        assert_eq!(doc.instance.attributes.osconfig_enabled, None);
        assert_eq!(doc.instance.attributes.log_level, None);
    }

    #[test]
    fn malformed_body_is_an_error() {
        assert!(RawMetadataDocument::parse("").is_err());
        assert!(RawMetadataDocument::parse("{\"instance\": ").is_err());
        assert!(RawMetadataDocument::parse("[1, 2]").is_err());
    }
}
