use std::io;
use thiserror::Error;

/// Fatal conditions a machine reports by returning from its run loop.
/// Both variants travel the cooperative shutdown path; the host sees
/// them through [`crate::session::Session::exit_error`] after
/// observing the exit.
#[derive(Debug, Error)]
pub enum MachineError {
    /// Rejected or missing configuration: an unsupported output format,
    /// an absent system resource, a boot image the machine cannot use.
    #[error("configuration: {0}")]
    Config(String),

    /// Unrecoverable internal failure.
    #[error("{0}")]
    Fatal(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to spawn guest thread")]
    Spawn(#[source] io::Error),

    /// Surface that exists for host compatibility but is intentionally
    /// not implemented, like save states.
    #[error("{0} not supported")]
    Unsupported(&'static str),
}
