//! Converge core types: label sets, field deltas, resource snapshots and the
//! collaborator traits the reconcilers are injected with.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

pub mod snapshot;

pub use snapshot::{CreationMode, InferenceConfig, OverrideBlock, OverrideEntry, ResourceSnapshot, ResourceSpec, ResourceStatus};

/// Label key -> value. Ordered only so that output is stable.
pub type LabelMap = BTreeMap<String, String>;

/// Canonical readiness value; anything else blocks the update call.
pub const READY_STATUS: &str = "PREPARED";

/// Fixed operation names reported to [`CallMetrics`], one per call site.
pub mod call_site {
    pub const LIST_LABELS: &str = "ListTagsForResource";
    pub const REMOVE_LABELS: &str = "UntagResource";
    pub const SET_LABELS: &str = "TagResource";
    pub const PREPARE: &str = "PREPARE_AGENT";
}

pub mod prelude {
    pub use super::{
        call_site, CallMetrics, FieldDelta, FieldDeltaSet, LabelDelta, LabelMap, LabelStore, OpCategory, Promoter,
        RemoteError, Settings, READY_STATUS,
    };
    pub use super::snapshot::*;
}

// ---- label delta ----

/// Upsert/remove split between a desired and an observed label set.
///
/// Each side is `None` when it has nothing to do, so callers can skip the
/// matching remote call outright.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelDelta {
    pub to_upsert: Option<LabelMap>,
    pub to_remove: Option<Vec<String>>,
}

impl LabelDelta {
    pub fn is_empty(&self) -> bool {
        self.to_upsert.is_none() && self.to_remove.is_none()
    }

    pub fn upsert_len(&self) -> usize { self.to_upsert.as_ref().map(|m| m.len()).unwrap_or(0) }
    pub fn remove_len(&self) -> usize { self.to_remove.as_ref().map(|v| v.len()).unwrap_or(0) }
}

// ---- field delta ----

/// One detected difference. `desired`/`observed` hold the serialized values of
/// each side at `path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDelta {
    pub path: String,
    pub desired: Json,
    pub observed: Json,
}

/// Ordered, append-only list of field differences for one comparison pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldDeltaSet {
    entries: Vec<FieldDelta>,
}

impl FieldDeltaSet {
    pub fn new() -> Self { Self::default() }

    /// Append a difference. Values that fail to serialize are recorded as null.
    pub fn add<A: Serialize + ?Sized, B: Serialize + ?Sized>(&mut self, path: impl Into<String>, desired: &A, observed: &B) {
        self.entries.push(FieldDelta {
            path: path.into(),
            desired: serde_json::to_value(desired).unwrap_or(Json::Null),
            observed: serde_json::to_value(observed).unwrap_or(Json::Null),
        });
    }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
    pub fn len(&self) -> usize { self.entries.len() }
    pub fn iter(&self) -> std::slice::Iter<'_, FieldDelta> { self.entries.iter() }
    pub fn paths(&self) -> impl Iterator<Item = &str> + '_ { self.entries.iter().map(|d| d.path.as_str()) }
    pub fn into_vec(self) -> Vec<FieldDelta> { self.entries }

    /// True if any entry sits at `path` or below it (`Spec.A` matches `Spec.A.B`).
    pub fn different_at(&self, path: &str) -> bool {
        self.entries.iter().any(|d| {
            d.path == path || (d.path.starts_with(path) && d.path.as_bytes().get(path.len()) == Some(&b'.'))
        })
    }
}

impl<'a> IntoIterator for &'a FieldDeltaSet {
    type Item = &'a FieldDelta;
    type IntoIter = std::slice::Iter<'a, FieldDelta>;
    fn into_iter(self) -> Self::IntoIter { self.entries.iter() }
}

// ---- errors ----

/// Failure of a remote collaborator call. Passed through untouched.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("api error {code} ({reason}): {message}")]
    Api { code: u16, reason: String, message: String },
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ---- collaborators ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpCategory {
    Get,
    Update,
}

impl OpCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpCategory::Get => "GET",
            OpCategory::Update => "UPDATE",
        }
    }
}

/// Observer told about every remote call attempt, success or failure.
pub trait CallMetrics: Send + Sync {
    fn record(&self, category: OpCategory, name: &'static str, error: Option<&RemoteError>);
}

/// Remote label store. Both mutations must be idempotent.
#[async_trait::async_trait]
pub trait LabelStore: Send + Sync {
    async fn list_labels(&self, resource_id: &str) -> Result<LabelMap, RemoteError>;
    async fn set_labels(&self, resource_id: &str, labels: &LabelMap) -> Result<(), RemoteError>;
    async fn remove_labels(&self, resource_id: &str, keys: &[String]) -> Result<(), RemoteError>;
}

/// Moves a resource toward its ready state. Safe to call repeatedly.
#[async_trait::async_trait]
pub trait Promoter: Send + Sync {
    async fn promote(&self, resource_id: &str) -> Result<(), RemoteError>;
}

// ---- settings ----

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Status value that counts as ready (`CONVERGE_READY_STATUS`).
    pub ready_status: String,
    /// Field manager name used for patches (`CONVERGE_FIELD_MANAGER`).
    pub field_manager: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self { ready_status: READY_STATUS.to_string(), field_manager: "converge".to_string() }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            ready_status: env_nonempty("CONVERGE_READY_STATUS").unwrap_or(d.ready_status),
            field_manager: env_nonempty("CONVERGE_FIELD_MANAGER").unwrap_or(d.field_manager),
        }
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}
