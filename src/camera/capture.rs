use opencv::{
    core::Mat,
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureAPIs},
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use super::{CameraSource, Frame};
use crate::error::CameraError;

/// OpenCV capture running on its own thread, keeping only the latest frame.
///
/// The device is held until the value is dropped; drop stops the thread and
/// waits for it to release the capture.
pub struct ThreadedCamera {
    index: i32,
    latest: Arc<Mutex<Option<Frame>>>,
    /// Packed `width << 32 | height` of the last frame, 0 until one arrives
    dims: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ThreadedCamera {
    pub fn start(index: i32, width: Option<u32>, height: Option<u32>) -> Result<Self, CameraError> {
        // Opened here so acquisition errors reach the caller; if anything
        // below fails `capture` is dropped, which releases the device.
        let mut capture = open_capture(index)?;
        let set = |capture: &mut VideoCapture, prop: i32, value: u32| {
            capture
                .set(prop, value as f64)
                .map_err(|e| CameraError::Capture(e.to_string()))
        };
        if let Some(w) = width {
            set(&mut capture, videoio::CAP_PROP_FRAME_WIDTH, w)?;
        }
        if let Some(h) = height {
            set(&mut capture, videoio::CAP_PROP_FRAME_HEIGHT, h)?;
        }
        set(&mut capture, videoio::CAP_PROP_BUFFERSIZE, 1)?;

        let latest = Arc::new(Mutex::new(None::<Frame>));
        let dims = Arc::new(AtomicU64::new(0));
        let running = Arc::new(AtomicBool::new(true));

        let latest_ref = Arc::clone(&latest);
        let dims_ref = Arc::clone(&dims);
        let running_ref = Arc::clone(&running);

        let handle = thread::Builder::new()
            .name(format!("camera-{index}"))
            .spawn(move || {
                while running_ref.load(Ordering::Relaxed) {
                    let mut mat = Mat::default();
                    match capture.read(&mut mat) {
                        Ok(true) if !mat.empty() => match mat_to_frame(&mat) {
                            Ok(frame) => {
                                let packed = ((frame.width as u64) << 32) | frame.height as u64;
                                if let Ok(mut slot) = latest_ref.lock() {
                                    *slot = Some(frame);
                                }
                                dims_ref.store(packed, Ordering::Release);
                            }
                            Err(e) => tracing::warn!("[cam{index}] {e}"),
                        },
                        Ok(_) => thread::sleep(Duration::from_millis(5)),
                        Err(e) => {
                            tracing::warn!("[cam{index}] read error: {e}");
                            thread::sleep(Duration::from_millis(100));
                        }
                    }
                }
                if let Err(e) = capture.release() {
                    tracing::warn!("[cam{index}] release failed: {e}");
                }
                tracing::info!("[cam{index}] released");
            })
            .map_err(|e| CameraError::Capture(format!("failed to spawn capture thread: {e}")))?;

        tracing::info!("[cam{index}] opened");
        Ok(Self {
            index,
            latest,
            dims,
            running,
            handle: Some(handle),
        })
    }
}

impl CameraSource for ThreadedCamera {
    fn dimensions(&self) -> (u32, u32) {
        let packed = self.dims.load(Ordering::Acquire);
        ((packed >> 32) as u32, packed as u32)
    }

    fn current_frame(&self) -> Option<Frame> {
        self.latest.lock().ok()?.clone()
    }
}

impl Drop for ThreadedCamera {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            join_capture(self.index, handle);
        }
    }
}

/// Waits for the capture thread; returns false if it panicked.
fn join_capture(index: i32, handle: thread::JoinHandle<()>) -> bool {
    match handle.join() {
        Ok(()) => true,
        Err(_) => {
            tracing::warn!("[cam{index}] capture thread panicked");
            false
        }
    }
}

fn open_capture(index: i32) -> Result<VideoCapture, CameraError> {
    let capture = VideoCapture::new(index, VideoCaptureAPIs::CAP_ANY as i32)
        .map_err(|e| classify_open_error(index, e.to_string()))?;
    let opened = capture
        .is_opened()
        .map_err(|e| classify_open_error(index, e.to_string()))?;
    if !opened {
        return Err(CameraError::DeviceUnavailable {
            index,
            reason: "device did not open".to_string(),
        });
    }
    Ok(capture)
}

fn classify_open_error(index: i32, message: String) -> CameraError {
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("not authorized") || lower.contains("denied") {
        CameraError::PermissionDenied(message)
    } else {
        CameraError::DeviceUnavailable { index, reason: message }
    }
}

/// BGR/BGRA Mat -> packed RGB frame
fn mat_to_frame(mat: &Mat) -> Result<Frame, CameraError> {
    let code = if mat.channels() == 4 {
        imgproc::COLOR_BGRA2RGB
    } else {
        imgproc::COLOR_BGR2RGB
    };
    let mut rgb = Mat::default();
    imgproc::cvt_color_def(mat, &mut rgb, code).map_err(|e| CameraError::Capture(e.to_string()))?;
    let bytes = rgb
        .data_bytes()
        .map_err(|e| CameraError::Capture(e.to_string()))?
        .to_vec();
    Ok(Frame::new(rgb.cols() as u32, rgb.rows() as u32, bytes))
}
