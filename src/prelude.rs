//! Convenient imports for consumers of retro-bridge
//!
//! Pull in everything commonly needed in one line:
//! ```rust
//! use retro_bridge::prelude::*;
//! ```

// Host facade
pub use crate::session::{Session, Step};

// Machine collaborator surface
pub use crate::machine::{FrameTurn, GuestLink, HostCommand, Machine};

// Data types crossing the boundary
pub use crate::audio::{AudioSource, Voice};
pub use crate::av::AvFormat;
pub use crate::frame::Frame;
pub use crate::input::{InputBatch, InputSink, KeyEvent, MouseButtons, PointerState};

// Errors
pub use crate::error::{MachineError, SessionError};
