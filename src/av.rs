use log::debug;
use std::sync::Mutex;

/// Geometry presented until the guest first reports its own.
pub const BASE_WIDTH: u32 = 720;
pub const BASE_HEIGHT: u32 = 400;

pub const DEFAULT_FPS: f64 = 60.0;
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Output format as last reported by the guest.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AvFormat {
    pub width: u32,
    pub height: u32,
    /// Largest geometry seen so far, for hosts that size their surface
    /// once.
    pub max_width: u32,
    pub max_height: u32,
    pub fps: f64,
    pub sample_rate: u32,
}

impl Default for AvFormat {
    fn default() -> Self {
        AvFormat {
            width: BASE_WIDTH,
            height: BASE_HEIGHT,
            max_width: BASE_WIDTH,
            max_height: BASE_HEIGHT,
            fps: DEFAULT_FPS,
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}

#[derive(Default)]
struct AvState {
    format: AvFormat,
    dirty: bool,
}

/// Tracks the guest's output format and whether the host has consumed
/// the latest change. Guest-side writes and the host-side drain share
/// one short-lived lock; it is never held across a barrier wait.
#[derive(Default)]
pub struct AvNegotiator {
    state: Mutex<AvState>,
}

impl AvNegotiator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Guest-side. Reporting the current geometry again is not a change
    /// and leaves the dirty flag alone.
    pub fn report_geometry(&self, width: u32, height: u32) {
        let mut s = self.state.lock().unwrap();
        if s.format.width == width && s.format.height == height {
            return;
        }
        debug!(
            "geometry change {}x{} -> {}x{}",
            s.format.width, s.format.height, width, height
        );
        s.format.width = width;
        s.format.height = height;
        s.format.max_width = s.format.max_width.max(width);
        s.format.max_height = s.format.max_height.max(height);
        s.dirty = true;
    }

    /// Guest-side. Same-rate reports are suppressed like no-op resizes.
    pub fn report_sample_rate(&self, rate: u32) {
        let mut s = self.state.lock().unwrap();
        if s.format.sample_rate == rate {
            return;
        }
        debug!("sample rate change {} -> {}", s.format.sample_rate, rate);
        s.format.sample_rate = rate;
        s.dirty = true;
    }

    /// Host-side. Returns the current format exactly once per change;
    /// multiple guest-side writes between drains coalesce into one
    /// notification carrying the final values.
    pub fn drain_if_changed(&self) -> Option<AvFormat> {
        let mut s = self.state.lock().unwrap();
        if !s.dirty {
            return None;
        }
        s.dirty = false;
        Some(s.format)
    }

    pub fn current(&self) -> AvFormat {
        self.state.lock().unwrap().format
    }
}
