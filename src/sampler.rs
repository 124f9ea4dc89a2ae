use crate::camera::CameraSource;
use crate::encode::jpeg_encode;
use crate::protocol::AnalyzeRequest;
use crate::state::{Gate, ModeState, RequestTag};

/// At-most-one-request guard.
#[derive(Debug, Default)]
pub struct SamplingState {
    in_flight: bool,
}

impl SamplingState {
    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// Marks a request as issued. Returns false if one already is.
    pub fn try_begin(&mut self) -> bool {
        if self.in_flight {
            return false;
        }
        self.in_flight = true;
        true
    }

    pub fn settle(&mut self) {
        self.in_flight = false;
    }
}

/// What one tick decided.
#[derive(Debug)]
pub enum TickOutcome {
    /// Manual mode without a pose; result cleared
    Blocked,
    /// Previous request still pending
    Busy,
    /// Camera not delivering frames yet
    NoFrame,
    /// Capture or encode failed; nothing sent
    Skipped,
    /// In-flight is now set; the caller must issue the request and call
    /// `settle` once it finishes, whatever the outcome
    Submit(Submission),
}

#[derive(Debug)]
pub struct Submission {
    pub request: AnalyzeRequest,
    pub tag: RequestTag,
}

/// Gating, capture and encoding for each analysis tick.
pub struct FrameSampler<C> {
    camera: Option<C>,
    jpeg_quality: u8,
    sampling: SamplingState,
}

impl<C: CameraSource> FrameSampler<C> {
    /// `camera` is `None` when acquisition failed; ticks then never submit.
    pub fn new(camera: Option<C>, jpeg_quality: u8) -> Self {
        Self {
            camera,
            jpeg_quality,
            sampling: SamplingState::default(),
        }
    }

    pub fn in_flight(&self) -> bool {
        self.sampling.in_flight()
    }

    pub fn settle(&mut self) {
        self.sampling.settle();
    }

    pub fn has_camera(&self) -> bool {
        self.camera.is_some()
    }

    /// Reads `state` as it is now; never a snapshot from an earlier tick.
    pub fn tick(&mut self, state: &mut ModeState) -> TickOutcome {
        if state.gate() == Gate::Blocked {
            return TickOutcome::Blocked;
        }
        if self.sampling.in_flight() {
            return TickOutcome::Busy;
        }

        let camera = match &self.camera {
            Some(camera) if camera.is_ready() => camera,
            _ => return TickOutcome::NoFrame,
        };
        let frame = match camera.current_frame() {
            Some(frame) => frame,
            None => return TickOutcome::NoFrame,
        };

        let jpeg = match jpeg_encode(&frame, self.jpeg_quality) {
            Ok(jpeg) => jpeg,
            Err(e) => {
                tracing::warn!("[sampler] {e}");
                return TickOutcome::Skipped;
            }
        };

        let request = AnalyzeRequest::new(jpeg, state.mode(), state.pose());
        let tag = state.tag();
        if !self.sampling.try_begin() {
            return TickOutcome::Busy;
        }
        tracing::debug!(
            "[sampler] submit {}x{} jpeg={}B mode={} pose={:?}",
            frame.width,
            frame.height,
            request.jpeg.len(),
            request.mode,
            request.pose_name
        );
        TickOutcome::Submit(Submission { request, tag })
    }
}
