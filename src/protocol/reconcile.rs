//! Drift detection between commanded and observed node state
//!
//! The registry cell is the source of truth for color and fade state; the
//! node is the source of truth for sensor input and fade progress. This
//! module decides, per poll, whether a node needs a corrective frame.

use std::time::Duration;

use tracing::debug;

use crate::core::{Color, NodeStatus};
use crate::registry::CellState;

/// Corrective command for an out-of-sync node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correction {
    /// Set the node to a steady color
    Color(Color),
    /// Fade the node toward a target over a duration
    Fade { target: Color, duration: Duration },
}

/// Compares a node's reported status against its desired state
///
/// Returns `None` when the node is in sync and a [`Correction`] otherwise.
/// Two pieces of device-reported state flow back into the model regardless
/// of the sync outcome: the sensor value (always) and fade progress (only
/// while the fade targets agree, so a superseded fade is not absorbed).
pub fn reconcile(status: &NodeStatus, cell: &mut CellState) -> Option<Correction> {
    // Sensor values only ever flow device -> model
    if status.sensor != cell.sensor() {
        debug!(sensor = status.sensor, "absorbing sensor change");
        cell.set_sensor(status.sensor);
    }

    // Node still fading a command the model has moved past
    if status.fading && !cell.is_fading() {
        debug!("fading mismatch, node is fading but model is not");
        return Some(correction_for(cell));
    }

    let desired_target = if cell.is_fading() {
        cell.fade_target()
    } else {
        cell.color()
    };
    if desired_target != status.target {
        debug!(
            ?desired_target,
            reported_target = ?status.target,
            "color mismatch"
        );
        return Some(correction_for(cell));
    }

    // Same fade, different progress: pull the node's position into the
    // model rather than overwriting it, and end the model's fade once the
    // node reports its own is done.
    if cell.is_fading() && status.color != cell.color() {
        cell.set_color(status.color, !status.fading);
    }

    None
}

fn correction_for(cell: &CellState) -> Correction {
    if cell.is_fading() {
        Correction::Fade {
            target: cell.fade_target(),
            duration: cell.fade_duration(),
        }
    } else {
        Correction::Color(cell.color())
    }
}
