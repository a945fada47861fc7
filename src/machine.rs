use crate::audio::{AudioBridge, Voice};
use crate::av::AvNegotiator;
use crate::barrier::GuestGate;
use crate::error::MachineError;
use crate::frame::FrameStore;
use crate::input::{InputBatch, InputQueue, InputSink};
use crossbeam_channel::Receiver;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Out-of-band requests from the host. These ride a plain channel, not
/// the frame barrier, and the machine drains them at its own pace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostCommand {
    Reset,
}

/// What the guest learns when it hands a finished frame to the host.
pub enum FrameTurn {
    /// Keep simulating. The batch carries everything the host recorded
    /// since the previous handoff.
    Continue(InputBatch),
    /// The host asked for, or forced by disconnecting, a shutdown. The
    /// machine should return from `run`.
    Shutdown,
}

/// The simulation collaborator: a free-running loop that produces
/// frames and audio on its own schedule and synchronizes with the host
/// only through the [`GuestLink`] it is handed.
pub trait Machine: InputSink + Send {
    /// Runs the simulation until the host requests shutdown (return
    /// `Ok`) or the machine hits an unrecoverable condition (return
    /// `Err`, which the session surfaces to the host exactly once).
    fn run(&mut self, link: &GuestLink) -> Result<(), MachineError>;
}

/// Guest-side face of the bridge, owned by the guest thread for the
/// lifetime of one `Machine::run`.
pub struct GuestLink {
    gate: GuestGate,
    input: Arc<InputQueue>,
    frames: Arc<FrameStore>,
    av: Arc<AvNegotiator>,
    audio: Arc<AudioBridge>,
    commands: Receiver<HostCommand>,
    exit_requested: Arc<AtomicBool>,
}

impl GuestLink {
    pub(crate) fn new(
        gate: GuestGate,
        input: Arc<InputQueue>,
        frames: Arc<FrameStore>,
        av: Arc<AvNegotiator>,
        audio: Arc<AudioBridge>,
        commands: Receiver<HostCommand>,
        exit_requested: Arc<AtomicBool>,
    ) -> Self {
        GuestLink {
            gate,
            input,
            frames,
            av,
            audio,
            commands,
            exit_requested,
        }
    }

    /// Publishes a finished XRGB8888 frame and enters the barrier. The
    /// call returns when the host resumes the guest for the next frame;
    /// the returned batch is the only way guest-visible input changes.
    pub fn submit_frame(
        &self,
        pixels: &[u8],
        width: u32,
        height: u32,
        pitch: usize,
    ) -> FrameTurn {
        self.frames.publish(pixels, width, height, pitch);
        if self.gate.resume_host_and_wait_for_guest().is_err() {
            return FrameTurn::Shutdown;
        }
        self.next_turn()
    }

    /// The guest starts parked; the session calls this before handing
    /// control to `Machine::run` so input recorded ahead of the first
    /// step is not skipped.
    pub(crate) fn wait_first_resume(&self) -> FrameTurn {
        if self.gate.wait_for_host().is_err() {
            return FrameTurn::Shutdown;
        }
        self.next_turn()
    }

    fn next_turn(&self) -> FrameTurn {
        if self.exit_requested.load(Ordering::Acquire) {
            return FrameTurn::Shutdown;
        }
        FrameTurn::Continue(self.input.drain())
    }

    /// Reports a resolution change; no-op resizes are filtered before
    /// they reach the host.
    pub fn report_geometry(&self, width: u32, height: u32) {
        self.av.report_geometry(width, height);
    }

    /// Creates the machine's sole output voice and publishes its sample
    /// rate to the host. Panics if a voice already exists or the format
    /// is not stereo signed 16-bit PCM.
    pub fn attach_voice(&self, channels: u16, sample_rate: u32) -> Voice {
        self.audio.attach(channels, sample_rate);
        self.av.report_sample_rate(sample_rate);
        Voice::new(self.audio.clone(), sample_rate)
    }

    /// Non-blocking drain of one pending host command.
    pub fn poll_command(&self) -> Option<HostCommand> {
        self.commands.try_recv().ok()
    }
}
