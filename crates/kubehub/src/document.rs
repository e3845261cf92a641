//! Resource documents (YAML manifests or live objects) -> `ResourceSnapshot`.

use anyhow::{anyhow, Context, Result};
use converge_core::ResourceSnapshot;
use kube::core::DynamicObject;
use serde_json::Value as Json;

fn max_yaml_bytes() -> usize {
    std::env::var("CONVERGE_MAX_YAML_BYTES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(1_000_000) // 1 MiB default
}

/// Reads `spec` and `status`; anything else in the document is ignored.
pub fn snapshot_from_value(v: &Json) -> Result<ResourceSnapshot> {
    if !v.is_object() {
        return Err(anyhow!("resource document must be a mapping"));
    }
    let mut doc = serde_json::Map::new();
    for key in ["spec", "status"] {
        if let Some(part) = v.get(key).filter(|p| !p.is_null()) {
            doc.insert(key.to_string(), part.clone());
        }
    }
    serde_json::from_value(Json::Object(doc)).context("decoding resource spec/status")
}

pub fn snapshot_from_yaml(yaml: &str) -> Result<ResourceSnapshot> {
    if yaml.len() > max_yaml_bytes() {
        return Err(anyhow!("YAML payload too large (>{} bytes)", max_yaml_bytes()));
    }
    let val: serde_yaml::Value = serde_yaml::from_str(yaml).context("parsing YAML")?;
    let json = serde_json::to_value(val).context("converting YAML to JSON")?;
    snapshot_from_value(&json)
}

pub fn snapshot_from_object(obj: &DynamicObject) -> Result<ResourceSnapshot> {
    let v = serde_json::to_value(obj).context("serializing DynamicObject")?;
    snapshot_from_value(&v)
}
