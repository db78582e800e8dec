// Reconciliation of received pose updates into local pose slots.
//
// Two strategies, one of which is selected per pass:
//
// - `Indexed`: an update's `object_index` addresses the local slot directly.
//   Chosen whenever ANY update carries an index that fits the slot array;
//   updates with out-of-range indices are ignored for that pass.
// - `EncounterOrder`: fallback when no update carries a usable index —
//   distinct senders are assigned to slots 0, 1, 2, … in the order they were
//   first observed. Callers pass updates latest-per-sender in that order
//   (`client::PoseStore` maintains it).
//
// Blending is `Pose::blend_toward`: smoothing 0 snaps, s in (0, 1) covers a
// fixed fraction of the remaining distance each pass.

use copresence_protocol::{Pose, PoseUpdate};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    Indexed,
    EncounterOrder,
}

/// Pick the strategy for one pass: indexed wins when any update addresses an
/// existing slot.
pub fn select_strategy(slot_count: usize, updates: &[PoseUpdate]) -> Strategy {
    if updates
        .iter()
        .any(|u| (u.object_index as usize) < slot_count)
    {
        Strategy::Indexed
    } else {
        Strategy::EncounterOrder
    }
}

/// Run one reconciliation pass, blending `slots` toward `updates` with the
/// given smoothing factor.
pub fn reconcile(slots: &mut [Pose], updates: &[PoseUpdate], smoothing: f32) {
    match select_strategy(slots.len(), updates) {
        Strategy::Indexed => apply_indexed(slots, updates, smoothing),
        Strategy::EncounterOrder => apply_encounter_order(slots, updates, smoothing),
    }
}

fn apply_indexed(slots: &mut [Pose], updates: &[PoseUpdate], smoothing: f32) {
    for update in updates {
        if let Some(slot) = slots.get_mut(update.object_index as usize) {
            slot.blend_toward(&update.pose, smoothing);
        }
    }
}

fn apply_encounter_order(slots: &mut [Pose], updates: &[PoseUpdate], smoothing: f32) {
    for (slot, update) in slots.iter_mut().zip(updates) {
        slot.blend_toward(&update.pose, smoothing);
    }
}
