use bitflags::bitflags;
use std::mem;
use std::sync::Mutex;

/// Most key transitions one batch will queue; later events are dropped.
pub const KEY_EVENT_CAPACITY: usize = 64;

bitflags! {
    /// Pointer buttons forwarded to the guest, wheel included.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MouseButtons: u8 {
        const LEFT = 1 << 0;
        const RIGHT = 1 << 1;
        const MIDDLE = 1 << 2;
        const WHEEL_UP = 1 << 3;
        const WHEEL_DOWN = 1 << 4;
    }
}

/// One key transition. `code` is already in the guest's key space;
/// translating from host key codes is the frontend's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub code: u32,
    pub pressed: bool,
}

/// Relative pointer motion plus button state for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PointerState {
    pub dx: i32,
    pub dy: i32,
    pub buttons: MouseButtons,
}

/// Receives one flushed batch: queued keys in FIFO order, then exactly
/// one pointer application.
pub trait InputSink {
    fn key_event(&mut self, code: u32, pressed: bool);
    fn pointer_event(&mut self, dx: i32, dy: i32, buttons: MouseButtons);
}

/// Input accumulated by the host between two rendezvous points.
#[derive(Debug, Clone, Default)]
pub struct InputBatch {
    keys: Vec<KeyEvent>,
    pointer: PointerState,
    dropped_keys: u32,
}

impl InputBatch {
    /// Queues a key transition. Once `KEY_EVENT_CAPACITY` events are
    /// pending the rest of the frame's keys are dropped and counted;
    /// bounded latency wins over completeness here.
    pub fn record_key_event(&mut self, code: u32, pressed: bool) {
        if self.keys.len() == KEY_EVENT_CAPACITY {
            self.dropped_keys += 1;
            log::trace!("input batch full, dropping key {code:#x}");
            return;
        }
        self.keys.push(KeyEvent { code, pressed });
    }

    /// Overwrites the pending pointer state. Deltas do not accumulate
    /// across calls; the last write before the flush wins.
    pub fn record_pointer_state(&mut self, dx: i32, dy: i32, buttons: MouseButtons) {
        self.pointer = PointerState { dx, dy, buttons };
    }

    pub fn keys(&self) -> &[KeyEvent] {
        &self.keys
    }

    pub fn pointer(&self) -> PointerState {
        self.pointer
    }

    pub fn dropped_keys(&self) -> u32 {
        self.dropped_keys
    }

    /// Applies the batch to `sink`: keys first, in the order they were
    /// recorded, then one pointer application. The pointer is delivered
    /// even when untouched, matching a per-frame poll model.
    pub fn flush_into<S: InputSink + ?Sized>(&self, sink: &mut S) {
        for ev in &self.keys {
            sink.key_event(ev.code, ev.pressed);
        }
        let p = self.pointer;
        sink.pointer_event(p.dx, p.dy, p.buttons);
    }
}

/// The shared handoff point between the host thread and the guest
/// thread. The host records while the guest runs; the guest takes the
/// whole batch exactly once when it resumes from the barrier.
#[derive(Default)]
pub struct InputQueue {
    pending: Mutex<InputBatch>,
}

impl InputQueue {
    pub fn record_key_event(&self, code: u32, pressed: bool) {
        self.pending.lock().unwrap().record_key_event(code, pressed);
    }

    pub fn record_pointer_state(&self, dx: i32, dy: i32, buttons: MouseButtons) {
        self.pending
            .lock()
            .unwrap()
            .record_pointer_state(dx, dy, buttons);
    }

    /// Atomically takes everything recorded so far, leaving an empty
    /// batch behind.
    pub fn drain(&self) -> InputBatch {
        mem::take(&mut *self.pending.lock().unwrap())
    }
}
