use crate::audio::CHANNELS;
use crate::error::{MachineError, SessionError};
use crate::frame::BYTES_PER_PIXEL;
use crate::input::{InputSink, MouseButtons};
use crate::machine::{FrameTurn, GuestLink, HostCommand, Machine};
use crate::session::{Session, Step};
use anyhow::Result;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Everything the guest observed, shared back to the test body.
#[derive(Default)]
struct Recorded {
    keys: Vec<(u32, bool)>,
    pointers: Vec<(i32, i32, MouseButtons)>,
    resets: u32,
}

enum Act {
    Frame,
    Geometry(u32, u32),
    Voice(u32),
    Audio(Vec<i16>),
    Sleep(Duration),
    Fail(&'static str),
}

/// A machine that plays a fixed script, then keeps producing frames
/// until the host tells it to stop.
struct ScriptedMachine {
    script: Vec<Act>,
    recorded: Arc<Mutex<Recorded>>,
    width: u32,
    height: u32,
    fill: u8,
}

impl ScriptedMachine {
    fn new(script: Vec<Act>) -> (Self, Arc<Mutex<Recorded>>) {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let machine = ScriptedMachine {
            script,
            recorded: recorded.clone(),
            width: 64,
            height: 48,
            fill: 1,
        };
        (machine, recorded)
    }

    fn submit(&mut self, link: &GuestLink) -> FrameTurn {
        let pitch = self.width as usize * BYTES_PER_PIXEL;
        let pixels = vec![self.fill; pitch * self.height as usize];
        self.fill = self.fill.wrapping_add(1);
        link.submit_frame(&pixels, self.width, self.height, pitch)
    }

    fn drain_commands(&mut self, link: &GuestLink) {
        while let Some(cmd) = link.poll_command() {
            match cmd {
                HostCommand::Reset => self.recorded.lock().unwrap().resets += 1,
            }
        }
    }
}

impl InputSink for ScriptedMachine {
    fn key_event(&mut self, code: u32, pressed: bool) {
        self.recorded.lock().unwrap().keys.push((code, pressed));
    }

    fn pointer_event(&mut self, dx: i32, dy: i32, buttons: MouseButtons) {
        self.recorded.lock().unwrap().pointers.push((dx, dy, buttons));
    }
}

impl Machine for ScriptedMachine {
    fn run(&mut self, link: &GuestLink) -> Result<(), MachineError> {
        let mut voice = None;
        for act in std::mem::take(&mut self.script) {
            self.drain_commands(link);
            match act {
                Act::Geometry(w, h) => {
                    self.width = w;
                    self.height = h;
                    link.report_geometry(w, h);
                }
                Act::Voice(rate) => voice = Some(link.attach_voice(CHANNELS, rate)),
                Act::Audio(samples) => {
                    voice.as_ref().expect("attach a voice first").push(&samples);
                }
                Act::Sleep(how_long) => thread::sleep(how_long),
                Act::Fail(msg) => return Err(MachineError::Fatal(msg.into())),
                Act::Frame => match self.submit(link) {
                    FrameTurn::Continue(batch) => batch.flush_into(self),
                    FrameTurn::Shutdown => return Ok(()),
                },
            }
        }
        loop {
            self.drain_commands(link);
            match self.submit(link) {
                FrameTurn::Continue(batch) => batch.flush_into(self),
                FrameTurn::Shutdown => return Ok(()),
            }
        }
    }
}

#[test]
fn input_recorded_before_the_first_step_reaches_the_machine() -> Result<()> {
    init_logging();
    let (machine, recorded) = ScriptedMachine::new(vec![]);
    let mut session = Session::load(machine)?;

    session.record_key_event(0x1C, true);
    session.record_key_event(0x1C, false);
    assert!(matches!(session.step(), Step::Frame { .. }));

    assert_eq!(recorded.lock().unwrap().keys, vec![(0x1C, true), (0x1C, false)]);
    Ok(())
}

#[test]
fn pointer_deltas_do_not_accumulate_across_records() -> Result<()> {
    init_logging();
    let (machine, recorded) = ScriptedMachine::new(vec![]);
    let mut session = Session::load(machine)?;

    session.record_pointer_state(1, 2, MouseButtons::LEFT);
    session.record_pointer_state(3, 4, MouseButtons::RIGHT);
    assert!(matches!(session.step(), Step::Frame { .. }));

    let recorded = recorded.lock().unwrap();
    assert_eq!(recorded.pointers[0], (3, 4, MouseButtons::RIGHT));
    Ok(())
}

#[test]
fn resize_renegotiates_exactly_once_and_frame_dimensions_follow() -> Result<()> {
    init_logging();
    let (machine, _) = ScriptedMachine::new(vec![
        Act::Geometry(100, 100),
        Act::Frame,
        Act::Geometry(320, 240),
        Act::Frame,
    ]);
    let mut session = Session::load(machine)?;

    match session.step() {
        Step::Frame { av_change: Some(format) } => {
            assert_eq!((format.width, format.height), (100, 100));
        }
        other => panic!("expected a renegotiated frame, got {other:?}"),
    }
    assert_eq!(session.frame().width(), 100);

    match session.step() {
        Step::Frame { av_change: Some(format) } => {
            assert_eq!((format.width, format.height), (320, 240));
        }
        other => panic!("expected a renegotiated frame, got {other:?}"),
    }
    {
        let frame = session.frame();
        assert_eq!((frame.width(), frame.height()), (320, 240));
        assert_eq!(frame.pixels().len(), 320 * BYTES_PER_PIXEL * 240);
    }

    // Steady state: no further notifications.
    assert!(matches!(session.step(), Step::Frame { av_change: None }));
    Ok(())
}

#[test]
fn no_op_resize_does_not_renegotiate() -> Result<()> {
    init_logging();
    let (machine, _) = ScriptedMachine::new(vec![
        Act::Geometry(640, 480),
        Act::Frame,
        Act::Geometry(640, 480),
        Act::Frame,
    ]);
    let mut session = Session::load(machine)?;

    assert!(matches!(session.step(), Step::Frame { av_change: Some(_) }));
    assert!(matches!(session.step(), Step::Frame { av_change: None }));
    Ok(())
}

#[test]
fn pushed_audio_is_pullable_from_another_thread() -> Result<()> {
    init_logging();
    let samples: Vec<i16> = (0..400).collect();
    let (machine, _) = ScriptedMachine::new(vec![
        Act::Voice(48_000),
        Act::Audio(samples.clone()),
        Act::Frame,
    ]);
    let mut session = Session::load(machine)?;

    match session.step() {
        Step::Frame { av_change: Some(format) } => assert_eq!(format.sample_rate, 48_000),
        other => panic!("expected a sample rate change, got {other:?}"),
    }

    // Pull from a thread that never touches the barrier.
    let source = session.audio_source();
    let pulled = thread::spawn(move || {
        let mut out = vec![0i16; 400];
        let frames = source.pull(&mut out);
        (frames, out)
    })
    .join()
    .unwrap();

    assert_eq!(pulled.0, 200);
    assert_eq!(pulled.1, samples);
    Ok(())
}

#[test]
fn guest_fatal_failure_unblocks_the_host_and_is_reported_once() -> Result<()> {
    init_logging();
    let (machine, _) = ScriptedMachine::new(vec![Act::Frame, Act::Fail("disk model rejected")]);
    let mut session = Session::load(machine)?;

    assert!(matches!(session.step(), Step::Frame { .. }));

    // The machine dies before producing another frame; the host must
    // not hang here.
    assert_eq!(session.step(), Step::Exited);
    assert!(session.exited());
    let err = session.exit_error().expect("fatal exit carries its reason");
    assert!(err.contains("disk model rejected"));

    // Terminal state is sticky.
    assert_eq!(session.step(), Step::Exited);
    Ok(())
}

#[test]
fn unload_twice_is_a_noop() -> Result<()> {
    init_logging();
    let (machine, _) = ScriptedMachine::new(vec![]);
    let mut session = Session::load(machine)?;

    assert!(matches!(session.step(), Step::Frame { .. }));
    session.unload();
    assert!(session.exited());
    session.unload();
    assert_eq!(session.step(), Step::Exited);
    Ok(())
}

#[test]
fn unload_releases_a_guest_parked_in_the_barrier() -> Result<()> {
    init_logging();
    let (machine, _) = ScriptedMachine::new(vec![]);
    let mut session = Session::load(machine)?;

    // No step: the guest is still parked in its initial wait.
    session.unload();
    assert!(session.exited());
    assert!(session.exit_error().is_none());
    Ok(())
}

#[test]
fn unload_joins_even_when_the_guest_is_mid_frame() -> Result<()> {
    init_logging();
    let (machine, _) = ScriptedMachine::new(vec![
        Act::Frame,
        Act::Sleep(Duration::from_millis(30)),
        Act::Frame,
    ]);
    let mut session = Session::load(machine)?;

    assert!(matches!(session.step(), Step::Frame { .. }));
    // The guest is likely sleeping, not parked; unload must still
    // complete via the cooperative path.
    session.unload();
    assert!(session.exited());
    Ok(())
}

#[test]
fn reset_request_reaches_the_machine_between_frames() -> Result<()> {
    init_logging();
    let (machine, recorded) = ScriptedMachine::new(vec![]);
    let mut session = Session::load(machine)?;

    assert!(matches!(session.step(), Step::Frame { .. }));
    session.request_reset();
    assert!(matches!(session.step(), Step::Frame { .. }));

    assert_eq!(recorded.lock().unwrap().resets, 1);
    Ok(())
}

#[test]
fn sessions_can_be_loaded_back_to_back() -> Result<()> {
    init_logging();
    for round in 0..2 {
        let (machine, recorded) = ScriptedMachine::new(vec![]);
        let mut session = Session::load(machine)?;
        session.record_key_event(round, true);
        assert!(matches!(session.step(), Step::Frame { .. }));
        assert_eq!(recorded.lock().unwrap().keys, vec![(round, true)]);
        session.unload();
    }
    Ok(())
}

#[test]
fn save_states_are_reported_unsupported() -> Result<()> {
    init_logging();
    let (machine, _) = ScriptedMachine::new(vec![]);
    let session = Session::load(machine)?;

    assert_eq!(session.serialize_size(), 0);
    assert!(matches!(
        session.serialize(&mut []),
        Err(SessionError::Unsupported(_))
    ));
    assert!(matches!(
        session.deserialize(&[]),
        Err(SessionError::Unsupported(_))
    ));
    Ok(())
}
