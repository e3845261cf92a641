//! Converge drift: desired vs observed field comparison.
//!
//! Comparators append into a caller-owned [`FieldDeltaSet`] and never fail;
//! null entries and other malformed input are skipped.

#![forbid(unsafe_code)]

use converge_core::{FieldDeltaSet, OverrideBlock, OverrideEntry, ResourceSnapshot};
use serde::Serialize;

pub const READINESS_PATH: &str = "Spec.AgentStatus";
pub const BLOCK_PATH: &str = "Spec.PromptOverrideConfiguration";
pub const LAMBDA_PATH: &str = "Spec.PromptOverrideConfiguration.OverrideLambda";
pub const ENTRIES_PATH: &str = "Spec.PromptOverrideConfiguration.PromptConfigurations";

/// Record a readiness gate when the observed status is known and not `ready`.
///
/// The entry carries the observed status first and the ready value second.
/// An unknown status records nothing.
pub fn compare_readiness(delta: &mut FieldDeltaSet, observed_status: Option<&str>, ready: &str) {
    if let Some(status) = observed_status {
        if status != ready {
            delta.add(READINESS_PATH, status, ready);
        }
    }
}

/// Compare the override block.
///
/// Presence on only one side is reported once for the whole block. With both
/// present, the lambda reference is compared on its own and the entries are
/// compared after dropping server-injected `DEFAULT` ones.
pub fn compare_config_block(delta: &mut FieldDeltaSet, desired: Option<&OverrideBlock>, observed: Option<&OverrideBlock>) {
    let (d, o) = match (desired, observed) {
        (None, None) => return,
        (Some(d), Some(o)) => (d, o),
        _ => {
            delta.add(BLOCK_PATH, &desired, &observed);
            return;
        }
    };

    compare_scalar(delta, LAMBDA_PATH, d.override_lambda.as_ref(), o.override_lambda.as_ref());

    let d_declared = d.declared_entries();
    let o_declared = o.declared_entries();
    if d_declared.len() != o_declared.len() || !same_entries(&d_declared, &o_declared) {
        // report the unfiltered sequences so the defaults are visible too
        delta.add(ENTRIES_PATH, &d.prompt_configurations, &o.prompt_configurations);
    }
}

/// Full comparison of two snapshots: scalar spec fields in declaration order,
/// then the override block, then readiness. Tags are left to the label
/// reconciler.
pub fn compare_resource(desired: &ResourceSnapshot, observed: &ResourceSnapshot, ready: &str) -> FieldDeltaSet {
    let mut delta = FieldDeltaSet::new();
    let (a, b) = (&desired.spec, &observed.spec);
    compare_scalar(&mut delta, "Spec.Description", a.description.as_ref(), b.description.as_ref());
    compare_scalar(&mut delta, "Spec.Instruction", a.instruction.as_ref(), b.instruction.as_ref());
    compare_scalar(&mut delta, "Spec.FoundationModel", a.foundation_model.as_ref(), b.foundation_model.as_ref());
    compare_scalar(&mut delta, "Spec.AgentResourceRoleARN", a.role_arn.as_ref(), b.role_arn.as_ref());
    compare_scalar(
        &mut delta,
        "Spec.IdleSessionTTLInSeconds",
        a.idle_session_ttl_seconds.as_ref(),
        b.idle_session_ttl_seconds.as_ref(),
    );
    compare_config_block(&mut delta, a.prompt_override_configuration.as_ref(), b.prompt_override_configuration.as_ref());
    compare_readiness(&mut delta, observed.readiness(), ready);
    delta
}

fn compare_scalar<T: PartialEq + Serialize>(delta: &mut FieldDeltaSet, path: &str, desired: Option<&T>, observed: Option<&T>) {
    let differs = match (desired, observed) {
        (None, None) => false,
        (Some(a), Some(b)) => a != b,
        _ => true,
    };
    if differs {
        delta.add(path, &desired, &observed);
    }
}

// order-sensitive, lengths already checked by the caller
fn same_entries(a: &[&OverrideEntry], b: &[&OverrideEntry]) -> bool {
    a.iter().zip(b.iter()).all(|(x, y)| x.same_as(y))
}
