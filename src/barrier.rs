use crossbeam_channel::{Receiver, Sender, bounded};

/// Error returned when the peer role's gate has been dropped.
///
/// The barrier itself has no cancellation; a disconnect is how shutdown
/// reaches a role that is parked here (see `session`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disconnected;

/// Creates the two gates of a frame rendezvous.
///
/// Both channels are zero-capacity, so every send is a synchronous
/// handoff: the sender parks until the peer arrives at the matching
/// receive. Each gate is owned by exactly one role and each call does
/// one send plus one receive, which makes strict alternation structural
/// rather than a caller obligation.
pub fn frame_barrier() -> (HostGate, GuestGate) {
    let (resume_tx, resume_rx) = bounded(0);
    let (frame_tx, frame_rx) = bounded(0);
    (
        HostGate {
            resume_tx,
            frame_rx,
        },
        GuestGate {
            resume_rx,
            frame_tx,
        },
    )
}

/// Host role's side of the rendezvous.
pub struct HostGate {
    resume_tx: Sender<()>,
    frame_rx: Receiver<()>,
}

impl HostGate {
    /// Releases the guest for one frame and parks until it hands back.
    pub fn resume_guest_and_wait_for_frame(&self) -> Result<(), Disconnected> {
        self.resume_tx.send(()).map_err(|_| Disconnected)?;
        self.frame_rx.recv().map_err(|_| Disconnected)
    }
}

/// Guest role's side of the rendezvous.
pub struct GuestGate {
    resume_rx: Receiver<()>,
    frame_tx: Sender<()>,
}

impl GuestGate {
    /// Initial wait. The guest starts parked; the host issues the first
    /// resume.
    pub fn wait_for_host(&self) -> Result<(), Disconnected> {
        self.resume_rx.recv().map_err(|_| Disconnected)
    }

    /// Hands the finished frame to the host and parks until the next
    /// resume.
    pub fn resume_host_and_wait_for_guest(&self) -> Result<(), Disconnected> {
        self.frame_tx.send(()).map_err(|_| Disconnected)?;
        self.resume_rx.recv().map_err(|_| Disconnected)
    }
}
