#[cfg(feature = "desktop")]
pub mod capture;

#[cfg(feature = "desktop")]
pub use capture::ThreadedCamera;

use std::sync::atomic::{AtomicU32, Ordering};

/// One captured frame, packed RGB8, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, rgb: Vec<u8>) -> Self {
        Self { width, height, rgb }
    }

    /// Byte length of a packed RGB8 buffer of this size.
    pub fn rgb_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 3
    }
}

/// A live camera stream the sampler can read from.
///
/// `dimensions()` stays `(0, 0)` until the device has delivered its first
/// frame; callers skip sampling until then. Dropping the source releases
/// the device.
pub trait CameraSource: Send {
    fn dimensions(&self) -> (u32, u32);

    /// Latest frame, or `None` while the device is still initializing.
    fn current_frame(&self) -> Option<Frame>;

    fn is_ready(&self) -> bool {
        let (w, h) = self.dimensions();
        w > 0 && h > 0
    }
}

impl<T: CameraSource + ?Sized> CameraSource for Box<T> {
    fn dimensions(&self) -> (u32, u32) {
        (**self).dimensions()
    }

    fn current_frame(&self) -> Option<Frame> {
        (**self).current_frame()
    }
}

/// Synthetic source: a diagonal gradient that shifts on every read.
pub struct TestPatternCamera {
    width: u32,
    height: u32,
    phase: AtomicU32,
}

impl TestPatternCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            phase: AtomicU32::new(0),
        }
    }
}

impl CameraSource for TestPatternCamera {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn current_frame(&self) -> Option<Frame> {
        if !self.is_ready() {
            return None;
        }
        let phase = self.phase.fetch_add(4, Ordering::Relaxed);
        let mut rgb = Vec::with_capacity(Frame::rgb_len(self.width, self.height));
        for y in 0..self.height {
            for x in 0..self.width {
                let v = x.wrapping_add(y).wrapping_add(phase) as u8;
                rgb.extend_from_slice(&[v, v / 2, 255 - v]);
            }
        }
        Some(Frame::new(self.width, self.height, rgb))
    }
}
