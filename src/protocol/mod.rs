//! Protocol implementation module
//!
//! This module defines the bus frame model, the wire codec, the three-stage
//! polling/addressing engine and the reconciliation algorithm.

pub mod codec;
pub mod frame;
pub mod reconcile;
pub mod session;

pub use self::codec::FrameCodec;
pub use self::frame::{Frame, FrameType};
pub use self::reconcile::{reconcile, Correction};
pub use self::session::{BusEngine, BusEvent, SessionState, Stage};
