//! Desired/observed resource representation.
//!
//! Every optional field is an `Option`, so "absent" stays distinct from
//! "present but empty" all the way through comparison. Field names follow the
//! resource's camelCase document shape.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::LabelMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSnapshot {
    #[serde(default)]
    pub spec: ResourceSpec,
    #[serde(default)]
    pub status: ResourceStatus,
}

impl ResourceSnapshot {
    pub fn readiness(&self) -> Option<&str> { self.status.agent_status.as_deref() }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foundation_model: Option<String>,
    #[serde(default, rename = "agentResourceRoleARN", skip_serializing_if = "Option::is_none")]
    pub role_arn: Option<String>,
    #[serde(default, rename = "idleSessionTTLInSeconds", skip_serializing_if = "Option::is_none")]
    pub idle_session_ttl_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_override_configuration: Option<OverrideBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<LabelMap>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_status: Option<String>,
}

/// Override block: a scalar reference plus per-step override entries.
/// `None` elements model malformed (null) entries in the document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideBlock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_lambda: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_configurations: Option<Vec<Option<OverrideEntry>>>,
}

impl OverrideBlock {
    /// Entries the user actually declared: nulls and server defaults dropped.
    pub fn declared_entries(&self) -> Vec<&OverrideEntry> {
        self.prompt_configurations
            .iter()
            .flatten()
            .filter_map(|e| e.as_ref())
            .filter(|e| !e.is_default())
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_creation_mode: Option<CreationMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parser_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_prompt_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inference_configuration: Option<InferenceConfig>,
}

impl OverrideEntry {
    /// Server-injected entry. A missing mode counts as user-declared.
    pub fn is_default(&self) -> bool {
        matches!(self.prompt_creation_mode, Some(CreationMode::Default))
    }

    /// Field-by-field structural equality over the entry schema.
    pub fn same_as(&self, other: &OverrideEntry) -> bool {
        self.prompt_type == other.prompt_type
            && self.prompt_creation_mode == other.prompt_creation_mode
            && self.prompt_state == other.prompt_state
            && self.parser_mode == other.parser_mode
            && self.base_prompt_template == other.base_prompt_template
            && match (&self.inference_configuration, &other.inference_configuration) {
                (None, None) => true,
                (Some(a), Some(b)) => a.same_as(b),
                _ => false,
            }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_length: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, rename = "topK", skip_serializing_if = "Option::is_none")]
    pub top_k: Option<i64>,
    #[serde(default, rename = "topP", skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
}

impl InferenceConfig {
    pub fn same_as(&self, other: &InferenceConfig) -> bool {
        self.maximum_length == other.maximum_length
            && self.stop_sequences == other.stop_sequences
            && same_f64(self.temperature, other.temperature)
            && self.top_k == other.top_k
            && same_f64(self.top_p, other.top_p)
    }
}

// numeric equality, except NaN matches NaN
fn same_f64(a: Option<f64>, b: Option<f64>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(x), Some(y)) => x == y || (x.is_nan() && y.is_nan()),
        _ => false,
    }
}

/// How an override entry came to exist. Only `Default` entries are skipped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CreationMode {
    Default,
    Overridden,
    Other(String),
}

impl From<String> for CreationMode {
    fn from(s: String) -> Self {
        match s.as_str() {
            "DEFAULT" => CreationMode::Default,
            "OVERRIDDEN" => CreationMode::Overridden,
            _ => CreationMode::Other(s),
        }
    }
}

impl From<CreationMode> for String {
    fn from(m: CreationMode) -> Self {
        match m {
            CreationMode::Default => "DEFAULT".to_string(),
            CreationMode::Overridden => "OVERRIDDEN".to_string(),
            CreationMode::Other(s) => s,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_document_shape() {
        let v = serde_json::json!({
            "spec": {
                "description": "d",
                "agentResourceRoleARN": "arn:role",
                "idleSessionTTLInSeconds": 600,
                "promptOverrideConfiguration": {
                    "overrideLambda": "arn:fn",
                    "promptConfigurations": [
                        { "promptType": "ORCHESTRATION", "promptCreationMode": "OVERRIDDEN",
                          "inferenceConfiguration": { "temperature": 0.7, "topP": 0.9, "maximumLength": 2048 } },
                        null,
                        { "promptType": "POST_PROCESSING", "promptCreationMode": "DEFAULT" }
                    ]
                },
                "tags": { "team": "a" }
            },
            "status": { "agentStatus": "NOT_PREPARED" }
        });
        let s: ResourceSnapshot = serde_json::from_value(v).unwrap();
        assert_eq!(s.readiness(), Some("NOT_PREPARED"));
        assert_eq!(s.spec.role_arn.as_deref(), Some("arn:role"));
        assert_eq!(s.spec.idle_session_ttl_seconds, Some(600));
        let block = s.spec.prompt_override_configuration.unwrap();
        assert_eq!(block.prompt_configurations.as_ref().unwrap().len(), 3);
        let declared = block.declared_entries();
        assert_eq!(declared.len(), 1);
        assert_eq!(declared[0].prompt_creation_mode, Some(CreationMode::Overridden));
        assert_eq!(declared[0].inference_configuration.as_ref().unwrap().top_p, Some(0.9));
    }

    #[test]
    fn creation_mode_keeps_unknown_values() {
        let m: CreationMode = serde_json::from_value(serde_json::json!("CUSTOM")).unwrap();
        assert_eq!(m, CreationMode::Other("CUSTOM".into()));
        assert_eq!(serde_json::to_value(&m).unwrap(), serde_json::json!("CUSTOM"));
        assert_eq!(serde_json::to_value(CreationMode::Default).unwrap(), serde_json::json!("DEFAULT"));
    }

    #[test]
    fn same_as_compares_every_field() {
        let a = OverrideEntry {
            prompt_type: Some("ORCHESTRATION".into()),
            prompt_creation_mode: Some(CreationMode::Overridden),
            inference_configuration: Some(InferenceConfig { temperature: Some(0.5), ..Default::default() }),
            ..Default::default()
        };
        let mut b = a.clone();
        assert!(a.same_as(&b));
        b.inference_configuration = Some(InferenceConfig { temperature: Some(0.6), ..Default::default() });
        assert!(!a.same_as(&b));
        b.inference_configuration = None;
        assert!(!a.same_as(&b));
        let mut c = a.clone();
        c.parser_mode = Some("OVERRIDDEN".into());
        assert!(!a.same_as(&c));
    }

    #[test]
    fn nan_temperatures_compare_equal() {
        let a = InferenceConfig { temperature: Some(f64::NAN), ..Default::default() };
        assert!(a.same_as(&a.clone()));
    }

    #[test]
    fn signed_zero_temperatures_compare_equal() {
        let neg = InferenceConfig { temperature: Some(-0.0), top_p: Some(0.0), ..Default::default() };
        let pos = InferenceConfig { temperature: Some(0.0), top_p: Some(-0.0), ..Default::default() };
        assert!(neg.same_as(&pos));
        let other = InferenceConfig { temperature: Some(0.1), ..Default::default() };
        assert!(!neg.same_as(&other));
    }

    #[test]
    fn missing_mode_is_not_default() {
        let e = OverrideEntry::default();
        assert!(!e.is_default());
    }
}
