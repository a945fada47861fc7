use crate::audio::{AudioBridge, AudioSource};
use crate::av::{AvFormat, AvNegotiator};
use crate::barrier::{HostGate, frame_barrier};
use crate::error::SessionError;
use crate::frame::{Frame, FrameStore};
use crate::input::{InputQueue, MouseButtons};
use crate::machine::{FrameTurn, GuestLink, HostCommand, Machine};
use crossbeam_channel::Sender;
use log::{debug, error};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// Outcome of one host frame cycle.
#[derive(Debug, PartialEq)]
pub enum Step {
    /// A fresh frame is readable via [`Session::frame`]. `av_change`
    /// carries the renegotiated format when, and only when, the guest
    /// changed geometry or sample rate since the last step.
    Frame { av_change: Option<AvFormat> },
    /// The guest is gone; [`Session::exit_error`] says why if the exit
    /// was a failure. The thread has been joined.
    Exited,
}

/// One loaded guest instance: the lifecycle controller plus the host
/// facade. All shared surfaces live here; nothing is process-global,
/// so sessions can be loaded back to back (or, in principle, side by
/// side).
pub struct Session {
    gate: Option<HostGate>,
    guest: Option<JoinHandle<()>>,
    commands: Sender<HostCommand>,
    input: Arc<InputQueue>,
    frames: Arc<FrameStore>,
    av: Arc<AvNegotiator>,
    audio: Arc<AudioBridge>,
    exit_requested: Arc<AtomicBool>,
    exited: Arc<AtomicBool>,
    exit_error: Arc<Mutex<Option<String>>>,
}

impl Session {
    /// Spawns the guest thread around `machine`. The guest starts
    /// parked in the barrier; the first [`Session::step`] releases it.
    pub fn load<M: Machine + 'static>(machine: M) -> Result<Session, SessionError> {
        let (host_gate, guest_gate) = frame_barrier();
        let (command_tx, command_rx) = crossbeam_channel::unbounded();

        let input = Arc::new(InputQueue::default());
        let frames = Arc::new(FrameStore::default());
        let av = Arc::new(AvNegotiator::new());
        let audio = Arc::new(AudioBridge::new());
        let exit_requested = Arc::new(AtomicBool::new(false));
        let exited = Arc::new(AtomicBool::new(false));
        let exit_error = Arc::new(Mutex::new(None));

        let link = GuestLink::new(
            guest_gate,
            input.clone(),
            frames.clone(),
            av.clone(),
            audio.clone(),
            command_rx,
            exit_requested.clone(),
        );

        let guest_exited = exited.clone();
        let guest_error = exit_error.clone();
        let guest = thread::Builder::new()
            .name("guest".into())
            .spawn(move || guest_main(machine, link, guest_exited, guest_error))
            .map_err(SessionError::Spawn)?;

        debug!("guest session loaded");
        Ok(Session {
            gate: Some(host_gate),
            guest: Some(guest),
            commands: command_tx,
            input,
            frames,
            av,
            audio,
            exit_requested,
            exited,
            exit_error,
        })
    }

    /// Performs one frame cycle: releases the guest, parks until it
    /// hands a frame back, then checks the exit flag and drains any
    /// format change. Input recorded since the previous step is applied
    /// by the guest the moment it resumes.
    pub fn step(&mut self) -> Step {
        let Some(gate) = &self.gate else {
            return Step::Exited;
        };
        if gate.resume_guest_and_wait_for_frame().is_err() {
            // The guest left the alternation, cleanly or fatally.
            self.finish();
            return Step::Exited;
        }
        if self.exited.load(Ordering::Acquire) {
            self.finish();
            return Step::Exited;
        }
        Step::Frame {
            av_change: self.av.drain_if_changed(),
        }
    }

    /// Queues a key transition for the next step.
    pub fn record_key_event(&self, code: u32, pressed: bool) {
        self.input.record_key_event(code, pressed);
    }

    /// Sets pointer motion and buttons for the next step; the last call
    /// before the step wins.
    pub fn record_pointer_state(&self, dx: i32, dy: i32, buttons: MouseButtons) {
        self.input.record_pointer_state(dx, dy, buttons);
    }

    /// View of the most recent guest frame. Empty before the first
    /// completed step.
    pub fn frame(&self) -> Frame<'_> {
        self.frames.latest()
    }

    /// The format currently in effect, drained or not.
    pub fn av_format(&self) -> AvFormat {
        self.av.current()
    }

    /// Drains queued audio; callable from any thread, independent of
    /// [`Session::step`]. See [`AudioSource::pull`] for the handle form.
    pub fn pull_audio(&self, out: &mut [i16]) -> usize {
        self.audio.pull(out)
    }

    /// Handle for the host's audio callback context.
    pub fn audio_source(&self) -> AudioSource {
        AudioSource::new(self.audio.clone())
    }

    /// Asks the machine to reset. Delivery is best-effort and
    /// asynchronous; the machine polls for it between frames.
    pub fn request_reset(&self) {
        let _ = self.commands.send(HostCommand::Reset);
    }

    pub fn exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    /// The fatal error the guest reported, if its exit was a failure.
    /// Meaningful once [`Step::Exited`] has been observed.
    pub fn exit_error(&self) -> Option<String> {
        self.exit_error.lock().unwrap().clone()
    }

    /// Cooperative shutdown: flag the exit request, release a guest
    /// parked in the barrier by dropping the host gate, and join the
    /// guest thread exactly once. A second call is a no-op.
    pub fn unload(&mut self) {
        if self.guest.is_none() {
            return;
        }
        self.exit_requested.store(true, Ordering::Release);
        self.gate = None;
        self.finish();
    }

    /// Save states are intentionally unsupported; the surface exists so
    /// hosts that probe for it get a definitive answer.
    pub fn serialize_size(&self) -> usize {
        0
    }

    pub fn serialize(&self, _out: &mut [u8]) -> Result<(), SessionError> {
        Err(SessionError::Unsupported("save states"))
    }

    pub fn deserialize(&self, _data: &[u8]) -> Result<(), SessionError> {
        Err(SessionError::Unsupported("save states"))
    }

    fn finish(&mut self) {
        self.gate = None;
        if let Some(guest) = self.guest.take() {
            let _ = guest.join();
            self.exited.store(true, Ordering::Release);
            debug!("guest thread joined");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.unload();
    }
}

fn guest_main<M: Machine>(
    mut machine: M,
    link: GuestLink,
    exited: Arc<AtomicBool>,
    exit_error: Arc<Mutex<Option<String>>>,
) {
    // The protocol starts with the host's resume. Input recorded before
    // that first step is flushed here, ahead of the machine's own loop.
    match link.wait_first_resume() {
        FrameTurn::Continue(batch) => batch.flush_into(&mut machine),
        FrameTurn::Shutdown => {
            exited.store(true, Ordering::Release);
            return;
        }
    }

    if let Err(err) = machine.run(&link) {
        error!("guest terminated: {err}");
        *exit_error.lock().unwrap() = Some(err.to_string());
    }
    exited.store(true, Ordering::Release);
    // Dropping the link disconnects the barrier, which releases a host
    // parked mid-step.
}
