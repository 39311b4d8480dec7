//! Desired-state registry for floor cells
//!
//! The registry is the controller's source of truth for what each node
//! should be showing. The bus engine reads color and fade state from it,
//! writes sensor values into it, and absorbs fade progress reported by the
//! hardware back into it.

use std::collections::HashMap;
use std::time::Duration;

use crate::core::{Color, NodeAddress};

/// Desired state of one floor cell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellState {
    color: Color,
    fade_target: Color,
    fade_duration: Duration,
    fading: bool,
    sensor: bool,
}

impl Default for CellState {
    fn default() -> Self {
        CellState {
            color: [0, 0, 0],
            fade_target: [0, 0, 0],
            fade_duration: Duration::ZERO,
            fading: false,
            sensor: false,
        }
    }
}

impl CellState {
    /// Creates a cell holding a steady color
    pub fn with_color(color: Color) -> Self {
        CellState {
            color,
            ..CellState::default()
        }
    }

    /// The color the cell should currently be showing
    pub fn color(&self) -> Color {
        self.color
    }

    /// The color the cell is fading toward
    pub fn fade_target(&self) -> Color {
        self.fade_target
    }

    /// How long the current fade should take
    pub fn fade_duration(&self) -> Duration {
        self.fade_duration
    }

    /// Whether the cell should be fading
    pub fn is_fading(&self) -> bool {
        self.fading
    }

    /// Last sensor value absorbed from the hardware
    pub fn sensor(&self) -> bool {
        self.sensor
    }

    /// Sets a steady color, optionally ending an in-progress fade
    pub fn set_color(&mut self, color: Color, clear_fading: bool) {
        self.color = color;
        if clear_fading {
            self.fading = false;
        }
    }

    /// Starts a fade from the current color toward `target`
    pub fn start_fade(&mut self, target: Color, duration: Duration) {
        self.fade_target = target;
        self.fade_duration = duration;
        self.fading = true;
    }

    /// Records the sensor value reported by the hardware
    pub fn set_sensor(&mut self, value: bool) {
        self.sensor = value;
    }
}

/// Registry of desired cell states, keyed by bus address
pub trait CellRegistry {
    /// Called once per discovered node, before the node is ever polled
    fn register_node(&mut self, addr: NodeAddress);

    /// Looks up the desired state for a node, if one is known
    fn cell_mut(&mut self, addr: NodeAddress) -> Option<&mut CellState>;
}

/// In-memory cell registry
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    cells: HashMap<NodeAddress, CellState>,
}

impl MemoryRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        MemoryRegistry::default()
    }

    /// Inserts or replaces the desired state for an address
    pub fn insert(&mut self, addr: NodeAddress, cell: CellState) {
        self.cells.insert(addr, cell);
    }

    /// Looks up the desired state for an address
    pub fn cell(&self, addr: NodeAddress) -> Option<&CellState> {
        self.cells.get(&addr)
    }

    /// Number of registered cells
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Returns whether no cells are registered
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl CellRegistry for MemoryRegistry {
    fn register_node(&mut self, addr: NodeAddress) {
        self.cells.entry(addr).or_default();
    }

    fn cell_mut(&mut self, addr: NodeAddress) -> Option<&mut CellState> {
        self.cells.get_mut(&addr)
    }
}
