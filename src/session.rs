//! The capture / submit / apply loop.
//!
//! One task owns `ModeState` and reacts to three event sources: the sampling
//! interval, user commands, and completion of the single in-flight request.
//! The request itself runs on a spawned task so ticks and commands keep
//! flowing while it is pending.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;

use crate::camera::CameraSource;
use crate::catalog::PosesCatalog;
use crate::client::AnalysisService;
use crate::config::StalePolicy;
use crate::error::ClientError;
use crate::presentation::View;
use crate::protocol::AnalysisResult;
use crate::sampler::{FrameSampler, Submission, TickOutcome};
use crate::state::{Applied, ModeState, RequestTag};

/// User actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Auto,
    Manual,
    SelectPose(String),
    Quit,
}

type Pending = (RequestTag, JoinHandle<Result<AnalysisResult, ClientError>>);

pub struct Session<C, S> {
    state: ModeState,
    sampler: FrameSampler<C>,
    service: Arc<S>,
    catalog: PosesCatalog,
    interval: Duration,
    stale_policy: StalePolicy,
    view_tx: watch::Sender<View>,
}

impl<C, S> Session<C, S>
where
    C: CameraSource,
    S: AnalysisService + 'static,
{
    pub fn new(
        sampler: FrameSampler<C>,
        service: Arc<S>,
        catalog: PosesCatalog,
        interval: Duration,
        stale_policy: StalePolicy,
    ) -> Self {
        let state = ModeState::new();
        let (view_tx, _) = watch::channel(View::build(&state, &catalog));
        Self {
            state,
            sampler,
            service,
            catalog,
            interval,
            stale_policy,
            view_tx,
        }
    }

    /// Receives a new `View` whenever the rendered state changes.
    pub fn subscribe(&self) -> watch::Receiver<View> {
        self.view_tx.subscribe()
    }

    /// Runs until `Command::Quit` or until every command sender is gone.
    /// A request still pending at that point is aborted. Returns the final
    /// state.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) -> ModeState {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut pending: Option<Pending> = None;

        tracing::info!("[session] sampling every {}ms", self.interval.as_millis());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(submitted) = self.on_tick() {
                        pending = Some(submitted);
                    }
                }
                command = commands.recv() => {
                    match command {
                        Some(Command::Quit) | None => break,
                        Some(command) => self.on_command(command),
                    }
                }
                joined = wait_pending(&mut pending) => {
                    if let Some((tag, _)) = pending.take() {
                        self.on_settled(&tag, joined);
                    }
                }
            }
            self.publish();
        }

        if let Some((_, handle)) = pending.take() {
            handle.abort();
            self.sampler.settle();
        }
        tracing::info!("[session] stopped");
        self.state
    }

    fn on_tick(&mut self) -> Option<Pending> {
        match self.sampler.tick(&mut self.state) {
            TickOutcome::Submit(Submission { request, tag }) => {
                let service = Arc::clone(&self.service);
                let handle = tokio::spawn(async move { service.analyze(request).await });
                Some((tag, handle))
            }
            outcome => {
                tracing::trace!("[session] tick: {outcome:?}");
                None
            }
        }
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Auto => {
                self.state.switch_to_auto();
                tracing::info!("[session] mode: auto");
            }
            Command::Manual => {
                self.state.switch_to_manual();
                tracing::info!("[session] mode: manual");
            }
            Command::SelectPose(pose) => {
                if !self.catalog.contains(&pose) {
                    tracing::warn!("[session] unknown pose {pose:?}");
                } else if self.state.select_pose(&pose) {
                    tracing::info!("[session] pose: {pose}");
                } else {
                    tracing::warn!("[session] pose selection ignored in auto mode");
                }
            }
            Command::Quit => {}
        }
    }

    /// Runs for every settled request, successful or not.
    fn on_settled(
        &mut self,
        tag: &RequestTag,
        joined: Result<Result<AnalysisResult, ClientError>, JoinError>,
    ) {
        self.sampler.settle();
        match joined {
            Ok(Ok(result)) => {
                let pose = result.pose_name.clone();
                let score = result.score;
                match self.state.apply_tagged(tag, result, self.stale_policy) {
                    Applied::Applied => {
                        tracing::debug!("[session] result {pose} score={score:.1}");
                    }
                    Applied::Stale => {
                        tracing::debug!("[session] discarded stale result {pose}");
                    }
                }
            }
            Ok(Err(e)) => tracing::warn!("[session] analysis failed: {e}"),
            Err(e) => tracing::warn!("[session] analysis task ended: {e}"),
        }
        // manual mode without a pose never keeps a result, even one that
        // arrived between ticks
        self.state.gate();
    }

    fn publish(&self) {
        let next = View::build(&self.state, &self.catalog);
        self.view_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

async fn wait_pending(
    pending: &mut Option<Pending>,
) -> Result<Result<AnalysisResult, ClientError>, JoinError> {
    match pending {
        Some((_, handle)) => handle.await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::TestPatternCamera;
    use crate::presentation::SELECT_POSE;
    use crate::protocol::{AnalyzeRequest, Mode};
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use crate::camera::Frame;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::Semaphore;

    /// Replays scripted replies; the last one repeats. Each call waits for a
    /// permit from `gate` and then `latency`.
    struct ScriptedService {
        replies: Mutex<VecDeque<Result<AnalysisResult, u16>>>,
        requests: Mutex<Vec<AnalyzeRequest>>,
        active: AtomicUsize,
        max_active: AtomicUsize,
        latency: Duration,
        gate: Semaphore,
    }

    impl ScriptedService {
        fn new(replies: Vec<Result<AnalysisResult, u16>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
                latency: Duration::from_millis(10),
                gate: Semaphore::new(Semaphore::MAX_PERMITS),
            }
        }

        fn with_latency(mut self, latency: Duration) -> Self {
            self.latency = latency;
            self
        }

        /// Requests block until `release` is called.
        fn held(mut self) -> Self {
            self.gate = Semaphore::new(0);
            self
        }

        fn release(&self) {
            self.gate.add_permits(1);
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        fn requests(&self) -> Vec<AnalyzeRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AnalysisService for ScriptedService {
        async fn list_poses(&self) -> Result<Vec<String>, ClientError> {
            Ok(poses())
        }

        async fn analyze(&self, request: AnalyzeRequest) -> Result<AnalysisResult, ClientError> {
            self.requests.lock().unwrap().push(request);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);

            let permit = self.gate.acquire().await.expect("gate closed");
            permit.forget();
            tokio::time::sleep(self.latency).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            let reply = {
                let mut replies = self.replies.lock().unwrap();
                if replies.len() > 1 {
                    replies.pop_front()
                } else {
                    replies.front().cloned()
                }
            };
            match reply.expect("no scripted reply") {
                Ok(result) => Ok(result),
                Err(status) => Err(ClientError::Status {
                    url: "http://test/api/analyze".into(),
                    status,
                    detail: "scripted".into(),
                }),
            }
        }
    }

    fn poses() -> Vec<String> {
        vec!["tree".into(), "warrior_ii".into(), "cobra".into()]
    }

    fn result(pose: &str, score: f64) -> AnalysisResult {
        AnalysisResult {
            pose_name: pose.into(),
            score,
            hints: vec!["straighten back leg".into()],
            angles: HashMap::from([("left_knee".to_string(), 170.0)]),
        }
    }

    struct Harness {
        service: Arc<ScriptedService>,
        commands: mpsc::Sender<Command>,
        views: watch::Receiver<View>,
        task: JoinHandle<ModeState>,
    }

    /// Test pattern that records when it is dropped.
    struct ReleaseTrackingCamera {
        inner: TestPatternCamera,
        released: Arc<AtomicBool>,
    }

    impl ReleaseTrackingCamera {
        fn new() -> (Self, Arc<AtomicBool>) {
            let released = Arc::new(AtomicBool::new(false));
            let camera = Self {
                inner: TestPatternCamera::new(32, 24),
                released: Arc::clone(&released),
            };
            (camera, released)
        }
    }

    impl CameraSource for ReleaseTrackingCamera {
        fn dimensions(&self) -> (u32, u32) {
            self.inner.dimensions()
        }

        fn current_frame(&self) -> Option<Frame> {
            self.inner.current_frame()
        }
    }

    impl Drop for ReleaseTrackingCamera {
        fn drop(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    fn start(service: ScriptedService, policy: StalePolicy) -> Harness {
        start_with_camera(TestPatternCamera::new(32, 24), service, policy)
    }

    fn start_with_camera<C>(camera: C, service: ScriptedService, policy: StalePolicy) -> Harness
    where
        C: CameraSource + 'static,
    {
        let service = Arc::new(service);
        let sampler = FrameSampler::new(Some(camera), 80);
        let session = Session::new(
            sampler,
            Arc::clone(&service),
            PosesCatalog::new(poses()),
            Duration::from_secs(1),
            policy,
        );
        let views = session.subscribe();
        let (commands, rx) = mpsc::channel(8);
        let task = tokio::spawn(session.run(rx));
        Harness { service, commands, views, task }
    }

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    impl Harness {
        async fn send(&self, command: Command) {
            self.commands.send(command).await.unwrap();
            advance(1).await;
        }

        async fn finish(self) -> ModeState {
            self.commands.send(Command::Quit).await.unwrap();
            self.task.await.unwrap()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_result_pins_and_displays() {
        let h = start(
            ScriptedService::new(vec![Ok(result("warrior_ii", 7.2))]),
            StalePolicy::Apply,
        );
        advance(500).await;

        let view = h.views.borrow().clone();
        assert_eq!(view.score, "7.2");
        assert_eq!(view.status, "warrior_ii");

        let requests = h.service.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].mode, Mode::Auto);
        assert_eq!(requests[0].pose_name, None);

        let state = h.finish().await;
        assert_eq!(state.pose(), Some("warrior_ii"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_auto_result_keeps_pin() {
        let h = start(
            ScriptedService::new(vec![Ok(result("warrior_ii", 7.2)), Ok(result("tree", 3.0))]),
            StalePolicy::Apply,
        );
        advance(1500).await;
        assert_eq!(h.service.calls(), 2);
        let state = h.finish().await;
        assert_eq!(state.pose(), Some("warrior_ii"));
        assert_eq!(state.result().unwrap().pose_name, "tree");
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_without_pose_never_requests() {
        let h = start(
            ScriptedService::new(vec![Ok(result("tree", 1.0))]).held(),
            StalePolicy::Apply,
        );
        // first tick fires at t=0 before the command arrives
        h.send(Command::Manual).await;
        h.service.release();
        let before = h.service.calls();

        advance(10_000).await;
        assert_eq!(h.service.calls(), before);
        assert_eq!(h.views.borrow().status, SELECT_POSE);

        let state = h.finish().await;
        assert_eq!(state.mode(), Mode::Manual);
        assert!(state.result().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_with_pose_sends_pose() {
        let h = start(
            ScriptedService::new(vec![Ok(result("tree", 4.0))]).held(),
            StalePolicy::Apply,
        );
        h.send(Command::Manual).await;
        h.send(Command::SelectPose("tree".into())).await;
        h.service.gate.add_permits(100);
        advance(2500).await;

        let requests = h.service.requests();
        let manual: Vec<_> = requests.iter().filter(|r| r.mode == Mode::Manual).collect();
        assert!(!manual.is_empty());
        assert!(manual.iter().all(|r| r.pose_name.as_deref() == Some("tree")));

        let state = h.finish().await;
        assert_eq!(state.pose(), Some("tree"));
        assert_eq!(state.result().unwrap().score, 4.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_pose_rejected() {
        let h = start(ScriptedService::new(vec![Ok(result("tree", 1.0))]), StalePolicy::Apply);
        h.send(Command::Manual).await;
        h.send(Command::SelectPose("lotus".into())).await;
        let state = h.finish().await;
        assert_eq!(state.pose(), None);
        assert!(state.is_blocked());
    }

    #[tokio::test(start_paused = true)]
    async fn test_at_most_one_request_in_flight() {
        // responses take 3.5 ticks
        let h = start(
            ScriptedService::new(vec![Ok(result("tree", 1.0))])
                .with_latency(Duration::from_millis(3500)),
            StalePolicy::Apply,
        );
        advance(20_000).await;
        assert_eq!(h.service.max_active.load(Ordering::SeqCst), 1);
        let calls = h.service.calls();
        assert!((4..=6).contains(&calls), "calls = {calls}");
        h.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_result_after_switch_to_auto_repins() {
        // Documented race: a manual response that lands after switching to
        // auto is applied, and its pose becomes the auto pin.
        let h = start(
            ScriptedService::new(vec![Ok(result("tree", 2.0))]).held(),
            StalePolicy::Apply,
        );
        h.send(Command::Manual).await;
        h.send(Command::SelectPose("tree".into())).await;
        h.service.release(); // the t=0 auto request
        advance(1000).await; // manual request for "tree" is now pending
        assert!(h
            .service
            .requests()
            .iter()
            .any(|r| r.pose_name.as_deref() == Some("tree")));

        h.send(Command::Auto).await;
        assert!(h.views.borrow().score == "--");
        h.service.release();
        advance(50).await;

        let state = h.finish().await;
        assert_eq!(state.mode(), Mode::Auto);
        assert_eq!(state.pose(), Some("tree"));
        assert_eq!(state.result().unwrap().pose_name, "tree");
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_result_discarded_under_discard_policy() {
        let h = start(
            ScriptedService::new(vec![Ok(result("tree", 2.0))]).held(),
            StalePolicy::Discard,
        );
        h.send(Command::Manual).await;
        h.send(Command::SelectPose("tree".into())).await;
        h.service.release();
        advance(1000).await;

        h.send(Command::Auto).await;
        h.service.release();
        advance(50).await;

        let state = h.finish().await;
        assert_eq!(state.mode(), Mode::Auto);
        assert_eq!(state.pose(), None);
        assert!(state.result().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_keeps_previous_result() {
        let h = start(
            ScriptedService::new(vec![Ok(result("warrior_ii", 7.2)), Err(500)]),
            StalePolicy::Apply,
        );
        advance(500).await;
        assert_eq!(h.views.borrow().score, "7.2");

        advance(3000).await;
        // the failing request is retried on every tick
        assert_eq!(h.service.calls(), 4);
        assert_eq!(h.views.borrow().score, "7.2");

        let state = h.finish().await;
        assert_eq!(state.mode(), Mode::Auto);
        assert_eq!(state.pose(), Some("warrior_ii"));
        assert_eq!(state.result().unwrap().score, 7.2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mode_switch_clears_view() {
        let h = start(ScriptedService::new(vec![Ok(result("tree", 1.0))]), StalePolicy::Apply);
        advance(500).await;
        assert_eq!(h.views.borrow().score, "1.0");
        h.send(Command::Manual).await;
        assert_eq!(h.views.borrow().score, "--");
        h.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_landing_while_blocked_is_dropped() {
        let h = start(
            ScriptedService::new(vec![Ok(result("tree", 1.0))]).held(),
            StalePolicy::Apply,
        );
        advance(100).await;
        assert_eq!(h.service.calls(), 1);
        h.send(Command::Manual).await;
        h.service.release();
        advance(50).await;
        assert_eq!(h.views.borrow().status, SELECT_POSE);
        let state = h.finish().await;
        assert!(state.result().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_quit_with_request_pending() {
        let h = start(ScriptedService::new(vec![Ok(result("tree", 1.0))]).held(), StalePolicy::Apply);
        advance(100).await;
        assert_eq!(h.service.calls(), 1);
        let state = h.finish().await;
        assert!(state.result().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_sender_stops_session() {
        let Harness { commands, task, .. } =
            start(ScriptedService::new(vec![Ok(result("tree", 1.0))]), StalePolicy::Apply);
        drop(commands);
        let state = task.await.unwrap();
        assert_eq!(state.mode(), Mode::Auto);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quit_releases_camera_with_request_pending() {
        let (camera, released) = ReleaseTrackingCamera::new();
        let h = start_with_camera(
            camera,
            ScriptedService::new(vec![Ok(result("tree", 1.0))]).held(),
            StalePolicy::Apply,
        );
        advance(100).await;
        assert_eq!(h.service.calls(), 1);
        assert!(!released.load(Ordering::SeqCst));

        h.finish().await;
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_sender_releases_camera() {
        let (camera, released) = ReleaseTrackingCamera::new();
        let Harness { commands, task, .. } = start_with_camera(
            camera,
            ScriptedService::new(vec![Ok(result("tree", 1.0))]).held(),
            StalePolicy::Apply,
        );
        advance(100).await;
        assert!(!released.load(Ordering::SeqCst));

        drop(commands);
        task.await.unwrap();
        assert!(released.load(Ordering::SeqCst));
    }
}
