use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pose_capture_common::config::RenderConfig;
use pose_capture_common::frame::TimestampedFrame;
use pose_capture_source::FrameReceiver;
use serde::Serialize;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::estimator::PoseEstimator;
use crate::render::render_overlay;
use crate::trigger::{CaptureTrigger, TriggerReason};

use super::debounce::CaptureDebounce;
use super::sink::{CaptureSink, SnapshotReceiver};

/// Detection lifecycle.
///
/// `Loading -> Running -> Captured` when a terminal trigger fires, or
/// `Running -> Stopped` on request. `Captured` and `Stopped` end detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Loading,
    Running,
    Captured,
    Stopped,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Captured | SessionStatus::Stopped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    /// Capture the current frame regardless of pose.
    Capture,
    /// Drop the current snapshot.
    Clear,
    /// Halt detection and release the estimator.
    Stop,
    /// Leave the run loop.
    Shutdown,
}

/// What one detection cycle did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CycleOutcome {
    /// Session inactive or no estimator.
    Skipped,
    EstimationFailed,
    /// Poses were evaluated without a capture.
    Evaluated { poses: usize },
    Captured(TriggerReason),
    /// Estimation was interrupted or resolved after a stop; the result was dropped.
    Discarded,
}

pub type StatusReceiver = watch::Receiver<SessionStatus>;
pub type OverlayReceiver = watch::Receiver<Option<Arc<Vec<u8>>>>;

/// Cross-task control of a running [`Session`].
#[derive(Clone)]
pub struct SessionHandle {
    active: Arc<AtomicBool>,
    interrupt: Arc<Notify>,
    commands: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Queue a command. Returns false once the session loop is gone.
    pub async fn send(&self, command: SessionCommand) -> bool {
        self.commands.send(command).await.is_ok()
    }

    /// Clear the active flag and cancel any in-flight estimation, then
    /// queue `Stop`.
    pub async fn stop(&self) -> bool {
        self.active.store(false, Ordering::SeqCst);
        self.interrupt.notify_one();
        self.send(SessionCommand::Stop).await
    }
}

/// One detection session: a single task that owns the estimator, trigger
/// and capture sink, and runs one estimate/draw/trigger cycle per frame.
pub struct Session {
    active: Arc<AtomicBool>,
    interrupt: Arc<Notify>,
    estimator: Option<Box<dyn PoseEstimator>>,
    trigger: Box<dyn CaptureTrigger>,
    debounce: CaptureDebounce,
    sink: CaptureSink,
    render: Option<RenderConfig>,
    commands: mpsc::Receiver<SessionCommand>,
    status_tx: watch::Sender<SessionStatus>,
    overlay_tx: watch::Sender<Option<Arc<Vec<u8>>>>,
    cycles: u64,
}

impl Session {
    /// Build a session in `Loading`. Detection begins with [`Session::start`].
    pub fn new(
        trigger: Box<dyn CaptureTrigger>,
        debounce: CaptureDebounce,
        sink: CaptureSink,
        render: Option<RenderConfig>,
    ) -> (Self, SessionHandle) {
        let active = Arc::new(AtomicBool::new(false));
        let interrupt = Arc::new(Notify::new());
        let (commands_tx, commands) = mpsc::channel(16);
        let (status_tx, _) = watch::channel(SessionStatus::Loading);
        let (overlay_tx, _) = watch::channel(None);

        let handle = SessionHandle {
            active: Arc::clone(&active),
            interrupt: Arc::clone(&interrupt),
            commands: commands_tx,
        };
        let session = Self {
            active,
            interrupt,
            estimator: None,
            trigger,
            debounce,
            sink,
            render,
            commands,
            status_tx,
            overlay_tx,
            cycles: 0,
        };
        (session, handle)
    }

    pub fn status(&self) -> SessionStatus {
        *self.status_tx.borrow()
    }

    pub fn subscribe_status(&self) -> StatusReceiver {
        self.status_tx.subscribe()
    }

    pub fn subscribe_overlay(&self) -> OverlayReceiver {
        self.overlay_tx.subscribe()
    }

    pub fn subscribe_snapshot(&self) -> SnapshotReceiver {
        self.sink.subscribe()
    }

    /// Hand over the loaded estimator and enter `Running`.
    pub fn start(&mut self, estimator: Box<dyn PoseEstimator>) {
        info!(
            estimator = estimator.name(),
            trigger = self.trigger.name(),
            "detection running"
        );
        self.estimator = Some(estimator);
        self.active.store(true, Ordering::SeqCst);
        self.status_tx.send_replace(SessionStatus::Running);
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn dispose_estimator(&mut self) {
        if let Some(mut estimator) = self.estimator.take() {
            estimator.dispose();
            info!(estimator = estimator.name(), "estimator disposed");
        }
    }

    /// End detection with `status`. An earlier terminal status is kept.
    pub fn halt(&mut self, status: SessionStatus) {
        self.active.store(false, Ordering::SeqCst);
        self.dispose_estimator();
        let current = self.status();
        if current.is_terminal() {
            return;
        }
        let capture = self.sink.state();
        info!(
            from = ?current,
            to = ?status,
            cycles = self.cycles,
            triggered = capture.triggered,
            snapshot_seq = capture.image.as_ref().map(|s| s.seq),
            "detection halted"
        );
        self.status_tx.send_replace(status);
    }

    /// Run one estimate/draw/trigger cycle on `frame`.
    pub async fn run_cycle(&mut self, frame: &TimestampedFrame) -> CycleOutcome {
        if !self.is_active() {
            return CycleOutcome::Skipped;
        }
        let Some(estimator) = self.estimator.as_mut() else {
            return CycleOutcome::Skipped;
        };

        let interrupt = Arc::clone(&self.interrupt);
        let result = tokio::select! {
            result = estimator.estimate(frame) => Some(result),
            _ = interrupt.notified() => None,
        };

        let result = match result {
            Some(result) if self.is_active() => result,
            interrupted => {
                debug!(
                    seq = frame.seq,
                    interrupted = interrupted.is_none(),
                    "estimation dropped after stop"
                );
                self.halt(SessionStatus::Stopped);
                return CycleOutcome::Discarded;
            }
        };

        let poses = match result {
            Ok(poses) => poses,
            Err(e) => {
                warn!(error = %e, seq = frame.seq, "pose estimation failed");
                return CycleOutcome::EstimationFailed;
            }
        };
        self.cycles += 1;
        debug!(seq = frame.seq, poses = poses.len(), "poses estimated");

        if let Some(render) = &self.render {
            match render_overlay(frame, &poses, render) {
                Ok(jpeg) => {
                    self.overlay_tx.send_replace(Some(Arc::new(jpeg)));
                }
                Err(e) => warn!(error = %e, seq = frame.seq, "failed to render overlay"),
            }
        }

        let evaluated = CycleOutcome::Evaluated { poses: poses.len() };
        let Some(reason) = self.trigger.should_capture(&poses) else {
            return evaluated;
        };

        let terminal = self.trigger.is_terminal();
        if !terminal && !self.debounce.ready(Instant::now()) {
            debug!(seq = frame.seq, trigger = reason.as_str(), "capture debounced");
            return evaluated;
        }

        if self.sink.capture(reason).await.is_none() {
            return evaluated;
        }
        if terminal {
            self.halt(SessionStatus::Captured);
        }
        CycleOutcome::Captured(reason)
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        debug!(?command, "session command");
        match command {
            SessionCommand::Capture => {
                self.sink.capture(TriggerReason::Manual).await;
            }
            SessionCommand::Clear => {
                self.sink.clear();
                self.debounce.reset();
            }
            SessionCommand::Stop => self.halt(SessionStatus::Stopped),
            SessionCommand::Shutdown => {}
        }
    }

    /// Drive the session until `Shutdown` or until the frame source ends.
    ///
    /// Commands are still served after detection has halted, so a manual
    /// capture or clear works in `Captured` and `Stopped`.
    pub async fn run(mut self, mut frames: FrameReceiver) -> SessionStatus {
        let mut commands_open = true;
        let mut first_frame = true;
        loop {
            tokio::select! {
                biased;
                command = self.commands.recv(), if commands_open => match command {
                    Some(SessionCommand::Shutdown) => {
                        info!("session shutdown requested");
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => commands_open = false,
                },
                changed = frames.changed() => {
                    if changed.is_err() {
                        info!(cycles = self.cycles, "frame source ended");
                        break;
                    }
                    let frame = frames.borrow_and_update().clone();
                    let Some(frame) = frame else {
                        continue;
                    };
                    if std::mem::take(&mut first_frame) {
                        log_frame_size(&frame);
                    }
                    match self.run_cycle(&frame).await {
                        CycleOutcome::Captured(reason) if self.status() == SessionStatus::Captured => {
                            info!(trigger = reason.as_str(), seq = frame.seq, "detection finished");
                        }
                        CycleOutcome::Evaluated { poses: 0 } => {
                            debug!(seq = frame.seq, "no person in frame");
                        }
                        _ => {}
                    }
                }
            }
        }
        self.halt(SessionStatus::Stopped);
        self.status()
    }
}

fn log_frame_size(frame: &TimestampedFrame) {
    match frame.dimensions() {
        Ok((width, height)) => info!(width, height, seq = frame.seq, "first frame received"),
        Err(e) => warn!(error = %e, seq = frame.seq, "first frame is not a readable image"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::EstimatorError;
    use crate::storage::CaptureStorage;
    use crate::trigger::angle::ArmAngleTrigger;
    use crate::trigger::visibility::FullBodyTrigger;
    use async_trait::async_trait;
    use pose_capture_common::pose::{Keypoint, Pose, Side, BODY_PARTS};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct Probe {
        calls: AtomicUsize,
        disposed: AtomicBool,
    }

    enum Behaviour {
        Return(Vec<Pose>),
        Fail,
        Hang,
        /// Signal `started`, then wait for `release` before returning.
        Gated {
            started: Arc<Notify>,
            release: Arc<Notify>,
            poses: Vec<Pose>,
        },
    }

    struct FakeEstimator {
        probe: Arc<Probe>,
        behaviour: Behaviour,
    }

    #[async_trait]
    impl PoseEstimator for FakeEstimator {
        async fn estimate(&mut self, _frame: &TimestampedFrame) -> Result<Vec<Pose>, EstimatorError> {
            self.probe.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behaviour {
                Behaviour::Return(poses) => Ok(poses.clone()),
                Behaviour::Fail => Err(EstimatorError::Status(500)),
                Behaviour::Hang => std::future::pending().await,
                Behaviour::Gated {
                    started,
                    release,
                    poses,
                } => {
                    started.notify_one();
                    release.notified().await;
                    Ok(poses.clone())
                }
            }
        }

        fn dispose(&mut self) {
            self.probe.disposed.store(true, Ordering::SeqCst);
        }
    }

    fn full_body() -> Pose {
        Pose::new(
            BODY_PARTS
                .iter()
                .enumerate()
                .map(|(i, name)| Keypoint::new(*name, 10.0 + i as f32, 20.0 + i as f32, 0.9))
                .collect(),
        )
    }

    /// Left elbow bent at 60 degrees.
    fn bent_arm() -> Pose {
        Pose::new(vec![
            Keypoint::new("left_shoulder", 100.0, 0.0, 0.9),
            Keypoint::new("left_elbow", 100.0, 100.0, 0.9),
            Keypoint::new("left_wrist", 186.6, 50.0, 0.9),
        ])
    }

    struct Fixture {
        session: Session,
        handle: SessionHandle,
        frames_tx: watch::Sender<Option<TimestampedFrame>>,
        probe: Arc<Probe>,
        _dir: tempfile::TempDir,
    }

    fn fixture(trigger: Box<dyn CaptureTrigger>, debounce_ms: u64, behaviour: Behaviour) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let (frames_tx, frames_rx) = watch::channel(None);
        let storage = Arc::new(CaptureStorage::local(dir.path()));
        let sink = CaptureSink::new(frames_rx, storage, None, "cam".into(), String::new(), 0);
        let (mut session, handle) = Session::new(
            trigger,
            CaptureDebounce::from_millis(debounce_ms),
            sink,
            None,
        );
        let probe = Arc::new(Probe::default());
        session.start(Box::new(FakeEstimator {
            probe: Arc::clone(&probe),
            behaviour,
        }));
        Fixture {
            session,
            handle,
            frames_tx,
            probe,
            _dir: dir,
        }
    }

    fn push(tx: &watch::Sender<Option<TimestampedFrame>>, seq: u64) -> TimestampedFrame {
        let frame = TimestampedFrame::new(vec![0xFF, 0xD8, seq as u8], 1_000 + seq as i64, seq);
        tx.send_replace(Some(frame.clone()));
        frame
    }

    #[tokio::test]
    async fn full_body_capture_stops_estimation() {
        let mut f = fixture(
            Box::new(FullBodyTrigger::new(0.6)),
            1000,
            Behaviour::Return(vec![full_body()]),
        );
        assert_eq!(f.session.status(), SessionStatus::Running);

        let frame = push(&f.frames_tx, 1);
        assert_eq!(
            f.session.run_cycle(&frame).await,
            CycleOutcome::Captured(TriggerReason::FullBody)
        );
        assert_eq!(f.session.status(), SessionStatus::Captured);
        assert!(f.probe.disposed.load(Ordering::SeqCst));

        for seq in 2..5 {
            let frame = push(&f.frames_tx, seq);
            assert_eq!(f.session.run_cycle(&frame).await, CycleOutcome::Skipped);
        }
        assert_eq!(f.probe.calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.session.sink.state().image.as_ref().unwrap().seq, 1);
    }

    #[tokio::test]
    async fn partial_body_keeps_running() {
        let mut partial = full_body();
        partial.keypoints.retain(|k| k.name != "right_ankle");
        let mut f = fixture(
            Box::new(FullBodyTrigger::new(0.6)),
            1000,
            Behaviour::Return(vec![partial]),
        );
        let frame = push(&f.frames_tx, 1);
        assert_eq!(
            f.session.run_cycle(&frame).await,
            CycleOutcome::Evaluated { poses: 1 }
        );
        assert_eq!(f.session.status(), SessionStatus::Running);
        assert!(!f.session.sink.state().triggered);
    }

    #[tokio::test]
    async fn arm_angle_captures_are_debounced() {
        let mut f = fixture(
            Box::new(ArmAngleTrigger::new(0.6, 45.0, 90.0)),
            60_000,
            Behaviour::Return(vec![bent_arm()]),
        );
        let frame = push(&f.frames_tx, 1);
        match f.session.run_cycle(&frame).await {
            CycleOutcome::Captured(TriggerReason::ArmAngle { side, angle_deg }) => {
                assert_eq!(side, Side::Left);
                assert!((angle_deg - 60.0).abs() < 0.1, "{angle_deg}");
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        let frame = push(&f.frames_tx, 2);
        assert_eq!(
            f.session.run_cycle(&frame).await,
            CycleOutcome::Evaluated { poses: 1 }
        );
        assert_eq!(f.session.status(), SessionStatus::Running);
        assert_eq!(f.session.sink.state().image.as_ref().unwrap().seq, 1);
    }

    #[tokio::test]
    async fn zero_debounce_overwrites_every_frame() {
        let mut f = fixture(
            Box::new(ArmAngleTrigger::new(0.6, 45.0, 90.0)),
            0,
            Behaviour::Return(vec![bent_arm()]),
        );
        for seq in 1..4 {
            let frame = push(&f.frames_tx, seq);
            assert!(matches!(
                f.session.run_cycle(&frame).await,
                CycleOutcome::Captured(_)
            ));
        }
        assert_eq!(f.session.sink.state().image.as_ref().unwrap().seq, 3);
    }

    #[tokio::test]
    async fn estimation_error_is_skipped() {
        let mut f = fixture(
            Box::new(ArmAngleTrigger::new(0.6, 45.0, 90.0)),
            0,
            Behaviour::Fail,
        );
        for seq in 1..3 {
            let frame = push(&f.frames_tx, seq);
            assert_eq!(
                f.session.run_cycle(&frame).await,
                CycleOutcome::EstimationFailed
            );
        }
        assert_eq!(f.probe.calls.load(Ordering::SeqCst), 2);
        assert_eq!(f.session.status(), SessionStatus::Running);
    }

    #[tokio::test]
    async fn stop_during_estimation_discards_result() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let mut f = fixture(
            Box::new(FullBodyTrigger::new(0.6)),
            0,
            Behaviour::Gated {
                started: Arc::clone(&started),
                release: Arc::clone(&release),
                poses: vec![full_body()],
            },
        );
        let frame = push(&f.frames_tx, 1);
        let handle = f.handle.clone();

        let (outcome, _) = tokio::join!(f.session.run_cycle(&frame), async {
            started.notified().await;
            handle.stop().await;
            release.notify_one();
        });

        assert_eq!(outcome, CycleOutcome::Discarded);
        assert!(f.probe.disposed.load(Ordering::SeqCst));
        assert!(!f.session.sink.state().triggered);
        assert_eq!(f.session.status(), SessionStatus::Stopped);

        let frame = push(&f.frames_tx, 2);
        assert_eq!(f.session.run_cycle(&frame).await, CycleOutcome::Skipped);
        assert_eq!(f.probe.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hung_estimator_stalls_the_cycle() {
        let mut f = fixture(Box::new(FullBodyTrigger::new(0.6)), 0, Behaviour::Hang);
        let frame = push(&f.frames_tx, 1);
        let res = tokio::time::timeout(Duration::from_millis(50), f.session.run_cycle(&frame)).await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn stop_and_shutdown_interrupt_hung_estimator() {
        let f = fixture(Box::new(FullBodyTrigger::new(0.6)), 0, Behaviour::Hang);
        let mut status = f.session.subscribe_status();
        let frames = f.frames_tx.subscribe();
        let task = tokio::spawn(f.session.run(frames));

        push(&f.frames_tx, 1);
        while f.probe.calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(f.handle.stop().await);
        tokio::time::timeout(
            Duration::from_millis(500),
            status.wait_for(|s| *s == SessionStatus::Stopped),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(f.probe.disposed.load(Ordering::SeqCst));

        assert!(f.handle.send(SessionCommand::Shutdown).await);
        let ended = tokio::time::timeout(Duration::from_millis(500), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ended, SessionStatus::Stopped);
    }

    #[tokio::test]
    async fn halt_keeps_earlier_terminal_status() {
        let mut f = fixture(
            Box::new(FullBodyTrigger::new(0.6)),
            0,
            Behaviour::Return(vec![full_body()]),
        );
        let frame = push(&f.frames_tx, 1);
        f.session.run_cycle(&frame).await;
        f.session.halt(SessionStatus::Stopped);
        assert_eq!(f.session.status(), SessionStatus::Captured);
    }

    #[tokio::test]
    async fn run_loop_serves_commands_and_ends_with_source() {
        let f = fixture(
            Box::new(FullBodyTrigger::new(0.6)),
            0,
            Behaviour::Return(Vec::new()),
        );
        let mut snapshots = f.session.subscribe_snapshot();
        let mut status = f.session.subscribe_status();
        let frames = f.frames_tx.subscribe();
        let task = tokio::spawn(f.session.run(frames));

        push(&f.frames_tx, 1);
        assert!(f.handle.send(SessionCommand::Capture).await);
        snapshots.changed().await.unwrap();
        let snap = snapshots.borrow_and_update().clone().unwrap();
        assert_eq!(snap.reason, TriggerReason::Manual);

        assert!(f.handle.stop().await);
        status.wait_for(|s| *s == SessionStatus::Stopped).await.unwrap();
        assert!(f.probe.disposed.load(Ordering::SeqCst));

        assert!(f.handle.send(SessionCommand::Clear).await);
        snapshots.changed().await.unwrap();
        assert!(snapshots.borrow().is_none());

        drop(f.frames_tx);
        assert_eq!(task.await.unwrap(), SessionStatus::Stopped);
    }
}
