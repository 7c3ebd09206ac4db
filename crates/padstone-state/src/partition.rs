//! Membership-driven filtering of state documents.
//!
//! All functions here work on owned copies or on the document passed in;
//! none of them touch the configuration.

use crate::StateDocument;
use padstone_schema::{Membership, Partition};
use tracing::trace;

/// Drop every member of `membership` from `state`.
///
/// Resource keys are removed from each member scope. Scopes rooted at a member
/// module (and everything nested below them) are removed whole. Non-root scopes
/// left with neither resources nor outputs are pruned. Absent keys are ignored,
/// so applying the same membership twice is a no-op.
pub fn remove_members(state: &mut StateDocument, membership: &Membership) {
    for (scope, members) in membership.scopes() {
        if let Some(module) = state.modules.iter_mut().find(|m| m.path == *scope) {
            for key in &members.resources {
                if module.resources.remove(key).is_some() {
                    trace!("dropped {key} from scope {scope}");
                }
            }
        }
    }
    state.modules.retain(|m| !membership.owns_scope(&m.path));
    state.prune_empty_scopes();
}

/// Split `state` into `(temporary_view, result_view)`.
///
/// The temporary view has every result member removed; the result view has
/// every temporary member removed. Both are independent deep copies.
pub fn split_state(state: &StateDocument, partition: &Partition) -> (StateDocument, StateDocument) {
    let mut temporary = state.clone();
    remove_members(&mut temporary, &partition.result);
    let mut result = state.clone();
    remove_members(&mut result, &partition.temporary);
    (temporary, result)
}

/// `base` without any resource that `other` holds in the same scope.
pub fn difference(base: &StateDocument, other: &StateDocument) -> StateDocument {
    let mut out = base.clone();
    for module in &mut out.modules {
        if let Some(theirs) = other.module(&module.path) {
            module
                .resources
                .retain(|key, _| !theirs.resources.contains_key(key));
        }
    }
    out.prune_empty_scopes();
    out
}

/// Union of two documents of the same build.
///
/// Resources are unioned per scope with `overlay` winning on conflict; `base`
/// outputs are kept and `overlay` outputs added where absent. The serial is
/// one past the larger of the two; lineage comes from `base`.
pub fn merge(base: &StateDocument, overlay: &StateDocument) -> StateDocument {
    let mut out = base.clone();
    for module in &overlay.modules {
        let target = out.module_mut(&module.path);
        for (key, resource) in &module.resources {
            target.resources.insert(key.clone(), resource.clone());
        }
        for (name, value) in &module.outputs {
            target
                .outputs
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }
    }
    out.serial = base.serial.max(overlay.serial) + 1;
    out.checksum = None;
    out.prune_empty_scopes();
    out
}
