use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use thiserror::Error;

use crate::capture::capture_stats::{CaptureStats, CaptureStatsSnapshot};
use crate::capture::domain::capture_error::CaptureError;
use crate::capture::domain::frame_grabber::FrameGrabber;
use crate::detection::domain::detection_error::DetectionError;
use crate::detection::domain::detection_request::DetectionRequest;
use crate::detection::domain::detection_result::DetectionResult;
use crate::detection::domain::detection_service::DetectionService;
use crate::shared::constants::{
    CAPTURE_POLL_INTERVAL, MAX_CAPTURE_FPS, MAX_CONSECUTIVE_CAPTURE_FAILURES, MIN_CAPTURE_FPS,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureState {
    Stopped,
    Running,
}

/// A detection result paired with the frame it was computed from.
#[derive(Clone, Debug)]
pub struct FrameResult {
    pub frame_path: PathBuf,
    pub result: DetectionResult,
}

/// Errors reported through the `on_error` callback of a running session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error("detection failed for {}: {error}", .frame_path.display())]
    Detection {
        frame_path: PathBuf,
        error: DetectionError,
    },
}

type ResultHandler = Arc<dyn Fn(FrameResult) + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(SessionError) + Send + Sync>;

pub fn clamp_fps(target_fps: u32) -> u32 {
    target_fps.clamp(MIN_CAPTURE_FPS, MAX_CAPTURE_FPS)
}

pub fn frame_interval(fps: u32) -> Duration {
    Duration::from_millis(1000 / u64::from(clamp_fps(fps)))
}

struct Session {
    /// `None` once stop has been requested.
    stop_tx: Option<Sender<()>>,
    handle: JoinHandle<()>,
}

/// Periodically grabs camera frames and feeds them to a [`DetectionService`].
///
/// Frames are never queued: a frame captured while detection is still busy
/// is discarded. Each attempt writes a fresh `frame_<n>.jpg`; the counter
/// carries over across restarts, so an in-flight detection never sees its
/// input overwritten.
pub struct FrameCaptureScheduler {
    grabber: Arc<dyn FrameGrabber>,
    detector: Arc<dyn DetectionService>,
    base_request: DetectionRequest,
    frame_dir: PathBuf,
    retain_frames: bool,
    running: Arc<AtomicBool>,
    next_frame: Arc<AtomicU64>,
    session: Mutex<Option<Session>>,
    stats: Mutex<Arc<CaptureStats>>,
}

impl FrameCaptureScheduler {
    /// `base_request` supplies thresholds and model; its image path is
    /// replaced by each captured frame.
    pub fn new(
        grabber: Arc<dyn FrameGrabber>,
        detector: Arc<dyn DetectionService>,
        base_request: DetectionRequest,
        frame_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            grabber,
            detector,
            base_request,
            frame_dir: frame_dir.into(),
            retain_frames: false,
            running: Arc::new(AtomicBool::new(false)),
            next_frame: Arc::new(AtomicU64::new(0)),
            session: Mutex::new(None),
            stats: Mutex::new(Arc::new(CaptureStats::new())),
        }
    }

    /// Keep frame files on disk after they have been used.
    pub fn retain_frames(mut self, retain: bool) -> Self {
        self.retain_frames = retain;
        self
    }

    pub fn state(&self) -> CaptureState {
        if self.running.load(Ordering::Acquire) {
            CaptureState::Running
        } else {
            CaptureState::Stopped
        }
    }

    /// Counters for the current (or most recent) session.
    pub fn stats(&self) -> CaptureStatsSnapshot {
        self.current_stats().snapshot()
    }

    pub fn summary_string(&self) -> Option<String> {
        self.current_stats().summary_string()
    }

    /// Start capturing at `target_fps`, clamped to the supported range.
    pub fn start<R, E>(
        &self,
        target_fps: u32,
        on_frame_result: R,
        on_error: E,
    ) -> Result<(), CaptureError>
    where
        R: Fn(FrameResult) + Send + Sync + 'static,
        E: Fn(SessionError) + Send + Sync + 'static,
    {
        let previous = {
            let mut session = self.lock_session();
            match session.take() {
                Some(previous)
                    if (previous.stop_tx.is_some() && self.running.load(Ordering::Acquire))
                        || previous.handle.thread().id() == thread::current().id() =>
                {
                    *session = Some(previous);
                    return Err(CaptureError::AlreadyRunning);
                }
                previous => previous,
            }
        };
        // Ended on its own, or was stopped from one of its own callbacks.
        // Joined without the lock so those callbacks can still call stop().
        if let Some(previous) = previous {
            let _ = previous.handle.join();
        }

        let mut session = self.lock_session();
        if session.is_some() {
            return Err(CaptureError::AlreadyRunning);
        }

        std::fs::create_dir_all(&self.frame_dir).map_err(|source| CaptureError::FrameDir {
            path: self.frame_dir.clone(),
            source,
        })?;

        let fps = clamp_fps(target_fps);
        if fps != target_fps {
            log::warn!("Capture rate {target_fps} fps clamped to {fps} fps");
        }

        let stats = Arc::new(CaptureStats::new());
        if let Ok(mut slot) = self.stats.lock() {
            *slot = stats.clone();
        }

        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let cadence = CadenceLoop {
            grabber: self.grabber.clone(),
            dispatcher: Dispatcher {
                detector: self.detector.clone(),
                base_request: self.base_request.clone(),
                retain_frames: self.retain_frames,
                stats,
                on_frame_result: Arc::new(on_frame_result),
                on_error: Arc::new(on_error),
            },
            frame_dir: self.frame_dir.clone(),
            interval: frame_interval(fps),
            running: self.running.clone(),
            next_frame: self.next_frame.clone(),
        };

        self.running.store(true, Ordering::Release);
        log::info!(
            "Capture started at {fps} fps, frames in {}",
            self.frame_dir.display()
        );
        let handle = thread::spawn(move || cadence.run(stop_rx));
        *session = Some(Session {
            stop_tx: Some(stop_tx),
            handle,
        });
        Ok(())
    }

    /// Stop capturing and wait for the cadence thread to exit. Any in-flight
    /// grab is cancelled. Detections already submitted still complete.
    ///
    /// From a callback running on the cadence thread this only requests the
    /// stop; the loop exits once the callback returns and the next `start`
    /// joins it.
    pub fn stop(&self) {
        let session = {
            let mut slot = self.lock_session();
            let Some(current) = slot.as_mut() else {
                return;
            };
            current.stop_tx = None;
            if current.handle.thread().id() == thread::current().id() {
                log::info!("Capture stop requested from capture thread");
                return;
            }
            slot.take()
        };

        if let Some(session) = session {
            let _ = session.handle.join();
            log::info!("Capture stopped");
        }
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<Session>> {
        match self.session.lock() {
            Ok(session) => session,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn current_stats(&self) -> Arc<CaptureStats> {
        match self.stats.lock() {
            Ok(stats) => stats.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Drop for FrameCaptureScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

struct CadenceLoop {
    grabber: Arc<dyn FrameGrabber>,
    dispatcher: Dispatcher,
    frame_dir: PathBuf,
    interval: Duration,
    running: Arc<AtomicBool>,
    next_frame: Arc<AtomicU64>,
}

impl CadenceLoop {
    fn run(self, stop_rx: Receiver<()>) {
        let _running = RunningFlag(self.running.clone());
        let mut attempts: u64 = 0;
        let mut last_attempt: Option<Instant> = None;
        let mut consecutive_failures: u32 = 0;

        loop {
            if last_attempt.map_or(true, |at| at.elapsed() >= self.interval) {
                let index = self.next_frame.fetch_add(1, Ordering::Relaxed);
                let frame_path = self.frame_dir.join(format!("frame_{index}.jpg"));
                attempts += 1;

                let outcome = self.grabber.grab(&frame_path, &stop_rx);
                last_attempt = Some(Instant::now());

                match outcome {
                    Ok(()) if stop_requested(&stop_rx) => {
                        self.dispatcher.remove_frame(&frame_path);
                        break;
                    }
                    Ok(()) => {
                        consecutive_failures = 0;
                        self.dispatcher.stats.record_captured();
                        self.dispatcher.dispatch(frame_path);
                    }
                    Err(CaptureError::Cancelled) => break,
                    Err(e) => {
                        consecutive_failures += 1;
                        self.dispatcher.stats.record_capture_failure();
                        let _ = std::fs::remove_file(&frame_path);
                        let fatal = e.is_fatal();
                        log::warn!("Frame capture failed: {e}");
                        (self.dispatcher.on_error)(e.into());

                        if fatal {
                            break;
                        }
                        if consecutive_failures >= MAX_CONSECUTIVE_CAPTURE_FAILURES {
                            let lost = CaptureError::DeviceLost {
                                failures: consecutive_failures,
                            };
                            log::error!("{lost}");
                            (self.dispatcher.on_error)(lost.into());
                            break;
                        }
                    }
                }
            }

            match stop_rx.recv_timeout(CAPTURE_POLL_INTERVAL) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        log::debug!("Capture loop exited after {attempts} attempts");
    }
}

/// Clears the running flag when the cadence thread exits, panics included.
struct RunningFlag(Arc<AtomicBool>);

impl Drop for RunningFlag {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn stop_requested(stop_rx: &Receiver<()>) -> bool {
    !matches!(stop_rx.try_recv(), Err(TryRecvError::Empty))
}

#[derive(Clone)]
struct Dispatcher {
    detector: Arc<dyn DetectionService>,
    base_request: DetectionRequest,
    retain_frames: bool,
    stats: Arc<CaptureStats>,
    on_frame_result: ResultHandler,
    on_error: ErrorHandler,
}

impl Dispatcher {
    fn dispatch(&self, frame_path: PathBuf) {
        if self.detector.is_processing() {
            self.discard(&frame_path);
            return;
        }

        let request = match self.base_request.with_image(&frame_path) {
            Ok(request) => request,
            Err(e) => {
                log::warn!("Cannot build request for {}: {e}", frame_path.display());
                self.discard(&frame_path);
                return;
            }
        };

        let this = self.clone();
        self.detector.submit(
            request,
            Box::new(move |outcome| this.complete(frame_path, outcome)),
        );
    }

    fn complete(&self, frame_path: PathBuf, outcome: Result<DetectionResult, DetectionError>) {
        match outcome {
            Err(DetectionError::Busy) => {
                self.discard(&frame_path);
                return;
            }
            Ok(result) => {
                self.stats.record_submitted();
                self.stats.record_detections(result.detections.len());
                (self.on_frame_result)(FrameResult {
                    frame_path: frame_path.clone(),
                    result,
                });
            }
            Err(error) => {
                self.stats.record_submitted();
                self.stats.record_detection_error();
                (self.on_error)(SessionError::Detection {
                    frame_path: frame_path.clone(),
                    error,
                });
            }
        }
        self.remove_frame(&frame_path);
    }

    fn discard(&self, frame_path: &Path) {
        log::debug!("Detection busy, discarding {}", frame_path.display());
        self.stats.record_discarded();
        self.remove_frame(frame_path);
    }

    fn remove_frame(&self, frame_path: &Path) {
        if self.retain_frames {
            return;
        }
        if let Err(e) = std::fs::remove_file(frame_path) {
            log::debug!("Could not remove {}: {e}", frame_path.display());
        }
    }
}
