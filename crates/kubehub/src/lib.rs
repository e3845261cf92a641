//! Converge kubehub: Kubernetes-backed label store and promoter.
//!
//! Any served kind can be targeted; the kind is resolved through discovery
//! and the resource id is the object name within the chosen namespace.

#![forbid(unsafe_code)]

use anyhow::{anyhow, Result};
use converge_core::{LabelMap, LabelStore, Promoter, RemoteError, ResourceSnapshot};
use kube::{
    api::{Api, Patch, PatchParams},
    core::{DynamicObject, GroupVersionKind},
    discovery::{Discovery, Scope},
    Client,
};
use serde_json::{json, Map, Value as Json};
use tracing::{debug, info};

pub mod document;
pub mod call_metrics;

pub use document::{snapshot_from_object, snapshot_from_value, snapshot_from_yaml};
pub use call_metrics::PromMetrics;

/// Annotation bumped to ask the resource's controller to prepare it again.
pub const PREPARE_ANNOTATION: &str = "converge.dev/prepare-requested-at";

/// Label keys owned by the store. Labels outside this prefix belong to other
/// tools and are never listed, set or removed.
pub const LABEL_PREFIX: &str = "tags.converge.dev/";

pub async fn client() -> Result<Client> {
    Ok(Client::try_default().await?)
}

pub fn parse_gvk_key(key: &str) -> Result<GroupVersionKind> {
    let parts: Vec<_> = key.split('/').collect();
    match parts.as_slice() {
        [version, kind] => Ok(GroupVersionKind { group: String::new(), version: version.to_string(), kind: kind.to_string() }),
        [group, version, kind] => Ok(GroupVersionKind { group: (*group).to_string(), version: (*version).to_string(), kind: (*kind).to_string() }),
        _ => Err(anyhow!("invalid gvk key: {} (expect v1/Kind or group/v1/Kind)", key)),
    }
}

async fn find_api_resource(client: Client, gvk: &GroupVersionKind) -> Result<(kube::core::ApiResource, bool)> {
    let discovery = Discovery::new(client).run().await?;
    for group in discovery.groups() {
        for (ar, caps) in group.recommended_resources() {
            if ar.group == gvk.group && ar.version == gvk.version && ar.kind == gvk.kind {
                let namespaced = matches!(caps.scope, Scope::Namespaced);
                return Ok((ar.clone(), namespaced));
            }
        }
    }
    Err(anyhow!("GVK not found: {}/{}/{}", gvk.group, gvk.version, gvk.kind))
}

/// Map a kube client error onto the remote-call taxonomy.
pub fn remote_error(e: kube::Error) -> RemoteError {
    match e {
        kube::Error::Api(ae) if ae.code == 404 => RemoteError::NotFound(ae.message),
        kube::Error::Api(ae) => RemoteError::Api { code: ae.code, reason: ae.reason, message: ae.message },
        kube::Error::HyperError(e) => RemoteError::Transport(e.to_string()),
        kube::Error::Service(e) => RemoteError::Transport(e.to_string()),
        other => RemoteError::Other(other.into()),
    }
}

/// Resolved dynamic API for one kind in one namespace (or cluster scope).
#[derive(Clone)]
pub struct KubeTarget {
    api: Api<DynamicObject>,
    params: PatchParams,
}

impl KubeTarget {
    pub async fn resolve(client: Client, gvk_key: &str, namespace: Option<&str>, field_manager: &str) -> Result<Self> {
        let gvk = parse_gvk_key(gvk_key)?;
        let (ar, namespaced) = find_api_resource(client.clone(), &gvk).await?;
        let api: Api<DynamicObject> = if namespaced {
            match namespace {
                Some(ns) => Api::namespaced_with(client, ns, &ar),
                None => return Err(anyhow!("namespace required for namespaced kind")),
            }
        } else {
            Api::all_with(client, &ar)
        };
        debug!(gvk = %gvk_key, ns = ?namespace, "target resolved");
        let params = PatchParams { field_manager: Some(field_manager.to_string()), ..Default::default() };
        Ok(Self { api, params })
    }

    pub async fn get(&self, name: &str) -> Result<DynamicObject, RemoteError> {
        self.api.get(name).await.map_err(remote_error)
    }

    /// Live object as a snapshot; observed labels come from the label store.
    pub async fn snapshot(&self, name: &str) -> Result<ResourceSnapshot> {
        let obj = self.get(name).await?;
        snapshot_from_object(&obj)
    }

    async fn merge(&self, name: &str, body: &Json) -> Result<(), RemoteError> {
        self.api.patch(name, &self.params, &Patch::Merge(body)).await.map_err(remote_error)?;
        Ok(())
    }

    pub fn label_store(&self) -> KubeLabelStore { KubeLabelStore { target: self.clone() } }
    pub fn promoter(&self) -> KubePromoter { KubePromoter { target: self.clone() } }
}

/// Labels live in `.metadata.labels` under [`LABEL_PREFIX`]; the store sees
/// them with the prefix stripped. Mutations are JSON merge patches.
#[derive(Clone)]
pub struct KubeLabelStore {
    target: KubeTarget,
}

#[async_trait::async_trait]
impl LabelStore for KubeLabelStore {
    async fn list_labels(&self, resource_id: &str) -> Result<LabelMap, RemoteError> {
        let obj = self.target.get(resource_id).await?;
        Ok(owned_labels(&obj.metadata.labels.unwrap_or_default()))
    }

    async fn set_labels(&self, resource_id: &str, labels: &LabelMap) -> Result<(), RemoteError> {
        self.target.merge(resource_id, &set_labels_patch(labels)).await
    }

    async fn remove_labels(&self, resource_id: &str, keys: &[String]) -> Result<(), RemoteError> {
        self.target.merge(resource_id, &remove_labels_patch(keys)).await
    }
}

/// Requests a prepare by stamping [`PREPARE_ANNOTATION`]; re-stamping is harmless.
#[derive(Clone)]
pub struct KubePromoter {
    target: KubeTarget,
}

#[async_trait::async_trait]
impl Promoter for KubePromoter {
    async fn promote(&self, resource_id: &str) -> Result<(), RemoteError> {
        let ts = chrono::Utc::now().to_rfc3339();
        self.target.merge(resource_id, &prepare_patch(&ts)).await?;
        info!(resource = %resource_id, at = %ts, "prepare requested");
        Ok(())
    }
}

/// Keys under [`LABEL_PREFIX`], prefix stripped.
pub fn owned_labels(labels: &LabelMap) -> LabelMap {
    labels
        .iter()
        .filter_map(|(k, v)| k.strip_prefix(LABEL_PREFIX).map(|key| (key.to_string(), v.clone())))
        .collect()
}

fn owned_key(key: &str) -> String {
    format!("{LABEL_PREFIX}{key}")
}

pub fn set_labels_patch(labels: &LabelMap) -> Json {
    let m: Map<String, Json> = labels.iter().map(|(k, v)| (owned_key(k), Json::String(v.clone()))).collect();
    json!({ "metadata": { "labels": m } })
}

pub fn remove_labels_patch(keys: &[String]) -> Json {
    let m: Map<String, Json> = keys.iter().map(|k| (owned_key(k), Json::Null)).collect();
    json!({ "metadata": { "labels": m } })
}

fn prepare_patch(ts: &str) -> Json {
    let mut ann = Map::new();
    ann.insert(PREPARE_ANNOTATION.to_string(), Json::String(ts.to_string()));
    json!({ "metadata": { "annotations": ann } })
}
