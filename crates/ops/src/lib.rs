//! Converge ops: one reconciliation pass for a managed resource.
//!
//! Labels are converged first and independently of field drift. A readiness
//! gate in the field delta turns the pass into a prepare request; any other
//! drift is handed back to the caller, which owns the update call itself.

#![forbid(unsafe_code)]

use std::sync::Arc;

use converge_core::{
    call_site, CallMetrics, FieldDeltaSet, LabelStore, OpCategory, Promoter, RemoteError,
    ResourceSnapshot, Settings,
};
use converge_drift::{compare_resource, READINESS_PATH};
use converge_labels::LabelReconciler;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlanAction {
    InSync,
    Update,
    /// Resource is not ready; ask for a prepare instead of updating.
    Prepare,
}

#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub delta: FieldDeltaSet,
    pub action: PlanAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Outcome {
    InSync,
    /// A prepare was requested; check again later.
    Requeue,
    /// Fields that still differ and need the caller's update call.
    NeedsUpdate(Vec<String>),
}

/// Decide what the field side of a pass does. Labels are converged
/// separately against a fresh read, so they are not part of the plan.
pub fn plan(desired: &ResourceSnapshot, observed: &ResourceSnapshot, settings: &Settings) -> Plan {
    let delta = compare_resource(desired, observed, &settings.ready_status);
    let action = if delta.different_at(READINESS_PATH) {
        PlanAction::Prepare
    } else if delta.is_empty() {
        PlanAction::InSync
    } else {
        PlanAction::Update
    };
    Plan { delta, action }
}

/// Ask the promoter to prepare the resource, reporting the call either way.
pub async fn prepare(promoter: &dyn Promoter, metrics: &dyn CallMetrics, resource_id: &str) -> Result<(), RemoteError> {
    let res = promoter.promote(resource_id).await;
    metrics.record(OpCategory::Update, call_site::PREPARE, res.as_ref().err());
    if let Err(e) = &res {
        warn!(resource = %resource_id, error = %e, "prepare failed");
    }
    res
}

pub struct Reconciler {
    labels: LabelReconciler,
    promoter: Arc<dyn Promoter>,
    metrics: Arc<dyn CallMetrics>,
    settings: Settings,
}

impl Reconciler {
    pub fn new(store: Arc<dyn LabelStore>, promoter: Arc<dyn Promoter>, metrics: Arc<dyn CallMetrics>, settings: Settings) -> Self {
        Self { labels: LabelReconciler::new(store, metrics.clone()), promoter, metrics, settings }
    }

    pub fn labels(&self) -> &LabelReconciler { &self.labels }

    /// One pass. Remote failures short-circuit and come back untouched.
    pub async fn reconcile_once(&self, resource_id: &str, desired: &ResourceSnapshot, observed: &ResourceSnapshot) -> Result<Outcome, RemoteError> {
        // `spec.tags == None` leaves labels unmanaged
        if let Some(tags) = desired.spec.tags.as_ref() {
            let current = self.labels.fetch_labels(resource_id).await?;
            self.labels.converge(resource_id, tags, &current).await?;
        }

        let plan = plan(desired, observed, &self.settings);
        let outcome = match plan.action {
            PlanAction::Prepare => {
                prepare(self.promoter.as_ref(), self.metrics.as_ref(), resource_id).await?;
                Outcome::Requeue
            }
            PlanAction::Update => Outcome::NeedsUpdate(plan.delta.paths().map(str::to_string).collect()),
            PlanAction::InSync => Outcome::InSync,
        };
        info!(resource = %resource_id, outcome = ?outcome, drift = plan.delta.len(), "reconcile pass done");
        Ok(outcome)
    }
}
