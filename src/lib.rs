// Bridge modules
pub mod audio;
pub mod av;
pub mod barrier;
pub mod error;
pub mod frame;
pub mod input;
pub mod machine;
pub mod session;

pub mod prelude;

#[cfg(test)]
mod session_test;

// Re-exports
pub use error::{MachineError, SessionError};
pub use machine::{FrameTurn, GuestLink, HostCommand, Machine};
pub use session::{Session, Step};
