use log::{debug, trace};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// The only on-wire audio format: interleaved signed 16-bit PCM, two
/// channels.
pub const CHANNELS: u16 = 2;
pub const BYTES_PER_FRAME: usize = 4;

/// Ring capacity in bytes (16384 sample frames, ~370 ms at 44.1 kHz).
pub const RING_CAPACITY: usize = 64 * 1024;

/// Fixed-capacity circular byte buffer. Cursor math stays in whole
/// sample frames so neither side ever sees a torn frame.
struct SampleRing {
    buf: Box<[u8]>,
    read: usize,
    pending: usize,
    dropped_frames: u64,
}

impl SampleRing {
    fn new() -> Self {
        SampleRing {
            buf: vec![0u8; RING_CAPACITY].into_boxed_slice(),
            read: 0,
            pending: 0,
            dropped_frames: 0,
        }
    }

    /// Copies whole frames in, trimmed to the writable space. Returns
    /// the byte count accepted; the rest is dropped and counted.
    fn push(&mut self, bytes: &[u8]) -> usize {
        let writable = RING_CAPACITY - self.pending;
        let take = bytes.len().min(writable) / BYTES_PER_FRAME * BYTES_PER_FRAME;
        self.dropped_frames += ((bytes.len() - take) / BYTES_PER_FRAME) as u64;

        let write = (self.read + self.pending) % RING_CAPACITY;
        let first = take.min(RING_CAPACITY - write);
        self.buf[write..write + first].copy_from_slice(&bytes[..first]);
        self.buf[..take - first].copy_from_slice(&bytes[first..take]);
        self.pending += take;
        take
    }

    /// Copies out as many whole frames as are pending and fit in `out`.
    fn pull(&mut self, out: &mut [u8]) -> usize {
        let want = out.len() / BYTES_PER_FRAME * BYTES_PER_FRAME;
        let take = want.min(self.pending);

        let first = take.min(RING_CAPACITY - self.read);
        out[..first].copy_from_slice(&self.buf[self.read..self.read + first]);
        out[first..take].copy_from_slice(&self.buf[..take - first]);
        self.read = (self.read + take) % RING_CAPACITY;
        self.pending -= take;
        take
    }
}

/// Bridges the guest's push-style sample production to the host's
/// pull-style audio callback. This runs outside the frame barrier: the
/// only synchronization between producer and consumer is the ring lock,
/// which is never held while a barrier lock is.
pub struct AudioBridge {
    ring: Mutex<SampleRing>,
    voice_attached: AtomicBool,
}

impl AudioBridge {
    pub(crate) fn new() -> Self {
        AudioBridge {
            ring: Mutex::new(SampleRing::new()),
            voice_attached: AtomicBool::new(false),
        }
    }

    /// Registers the guest's sole output voice.
    ///
    /// Panics on a second attach or a non-stereo request; both are
    /// protocol violations, not runtime conditions.
    pub(crate) fn attach(&self, channels: u16, sample_rate: u32) {
        assert_eq!(
            channels, CHANNELS,
            "only {CHANNELS}-channel signed 16-bit PCM voices are supported"
        );
        let was_attached = self.voice_attached.swap(true, Ordering::AcqRel);
        assert!(!was_attached, "an output voice is already attached");
        debug!("audio voice attached at {sample_rate} Hz");
    }

    pub(crate) fn detach(&self) {
        // Taking the ring lock first guarantees no pull is in flight
        // when the attachment clears.
        let ring = self.ring.lock().unwrap();
        if ring.dropped_frames > 0 {
            debug!(
                "audio voice detached, {} frames dropped on overflow",
                ring.dropped_frames
            );
        } else {
            debug!("audio voice detached");
        }
        self.voice_attached.store(false, Ordering::Release);
    }

    /// Producer side. Accepts up to the writable whole-frame space and
    /// returns the number of frames taken; overflow is trimmed, never
    /// written past capacity.
    pub(crate) fn push(&self, samples: &[i16]) -> usize {
        let bytes: &[u8] = bytemuck::cast_slice(samples);
        let mut ring = self.ring.lock().unwrap();
        let accepted = ring.push(bytes);
        if accepted < bytes.len() / BYTES_PER_FRAME * BYTES_PER_FRAME {
            trace!(
                "audio ring full, dropped {} frames",
                (bytes.len() - accepted) / BYTES_PER_FRAME
            );
        }
        accepted / BYTES_PER_FRAME
    }

    /// Consumer side. Fills `out` with as many whole frames as are
    /// pending, returns the frame count delivered, and never blocks
    /// waiting for more.
    pub fn pull(&self, out: &mut [i16]) -> usize {
        let out_bytes: &mut [u8] = bytemuck::cast_slice_mut(out);
        self.ring.lock().unwrap().pull(out_bytes) / BYTES_PER_FRAME
    }

    pub fn pending_frames(&self) -> usize {
        self.ring.lock().unwrap().pending / BYTES_PER_FRAME
    }

    pub fn dropped_frames(&self) -> u64 {
        self.ring.lock().unwrap().dropped_frames
    }

    pub fn voice_attached(&self) -> bool {
        self.voice_attached.load(Ordering::Acquire)
    }
}

/// Exclusive handle to the guest's output voice. Dropping it detaches.
pub struct Voice {
    bridge: Arc<AudioBridge>,
    sample_rate: u32,
}

impl Voice {
    pub(crate) fn new(bridge: Arc<AudioBridge>, sample_rate: u32) -> Self {
        Voice {
            bridge,
            sample_rate,
        }
    }

    /// Pushes interleaved stereo samples; returns frames accepted.
    pub fn push(&self, samples: &[i16]) -> usize {
        self.bridge.push(samples)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for Voice {
    fn drop(&mut self) {
        self.bridge.detach();
    }
}

/// Cloneable host-side pull handle, safe to use from whatever thread or
/// callback context the host plays audio on.
#[derive(Clone)]
pub struct AudioSource {
    bridge: Arc<AudioBridge>,
}

impl AudioSource {
    pub(crate) fn new(bridge: Arc<AudioBridge>) -> Self {
        AudioSource { bridge }
    }

    /// See [`AudioBridge::pull`].
    pub fn pull(&self, out: &mut [i16]) -> usize {
        self.bridge.pull(out)
    }
}
