use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crossbeam_channel::Receiver;

use crate::capture::domain::capture_error::CaptureError;
use crate::capture::domain::frame_grabber::FrameGrabber;
use crate::process::executable_resolver::{ResolvedExecutable, WorkerCommand};
use crate::process::process_invoker::{ProcessInvoker, ProcessOutcome};
use crate::shared::constants::{
    CAMERA_TEST_SCRIPT_NAME, CAPTURE_SCRIPT_NAME, DEFAULT_WORKER_TIMEOUT,
};

/// Grabs frames by running `<program> capture_frame.py <device> <path>`.
///
/// Owns its own [`ProcessInvoker`], separate from the detection worker's.
pub struct ProcessFrameGrabber {
    capture: WorkerCommand,
    probe: WorkerCommand,
    device_id: u32,
    timeout: Duration,
    invoker: ProcessInvoker,
}

impl ProcessFrameGrabber {
    pub fn new(runtime: &ResolvedExecutable, script_dir: &Path, device_id: u32) -> Self {
        Self::from_commands(
            WorkerCommand::in_dir(runtime, script_dir, CAPTURE_SCRIPT_NAME),
            WorkerCommand::in_dir(runtime, script_dir, CAMERA_TEST_SCRIPT_NAME),
            device_id,
        )
    }

    pub fn from_commands(capture: WorkerCommand, probe: WorkerCommand, device_id: u32) -> Self {
        Self {
            capture,
            probe,
            device_id,
            timeout: DEFAULT_WORKER_TIMEOUT,
            invoker: ProcessInvoker::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Checks that the camera opens and yields a frame.
    pub fn probe_device(&self) -> Result<(), CaptureError> {
        let args = self.probe.args([self.device_id.to_string()]);
        log::info!("Probing camera {}", self.device_id);
        match self.invoker.run(&self.probe.program, &args, self.timeout) {
            ProcessOutcome::Completed { exit_code: 0, .. } => Ok(()),
            outcome => Err(to_capture_error(outcome, None)),
        }
    }
}

impl FrameGrabber for ProcessFrameGrabber {
    fn grab(&self, output: &Path, cancel: &Receiver<()>) -> Result<(), CaptureError> {
        // Success is judged by the file existing, so a leftover must go first.
        if let Err(e) = std::fs::remove_file(output) {
            if e.kind() != io::ErrorKind::NotFound {
                log::warn!("Could not clear stale frame {}: {e}", output.display());
            }
        }
        let args = self.capture.args([
            OsString::from(self.device_id.to_string()),
            output.as_os_str().to_os_string(),
        ]);
        let outcome =
            self.invoker
                .run_cancellable(&self.capture.program, &args, self.timeout, cancel);

        match outcome {
            ProcessOutcome::Completed { exit_code: 0, .. } if output.exists() => Ok(()),
            outcome => Err(to_capture_error(outcome, Some(output.to_path_buf()))),
        }
    }
}

fn to_capture_error(outcome: ProcessOutcome, output: Option<PathBuf>) -> CaptureError {
    match outcome {
        ProcessOutcome::Completed { exit_code: 0, .. } => match output {
            Some(path) => CaptureError::FrameMissing(path),
            None => CaptureError::GrabFailed {
                code: 0,
                stderr: String::new(),
            },
        },
        ProcessOutcome::Completed {
            exit_code, stderr, ..
        } => CaptureError::GrabFailed {
            code: exit_code,
            stderr: stderr.trim().to_string(),
        },
        ProcessOutcome::TimedOut { after } => CaptureError::GrabTimedOut(after),
        ProcessOutcome::FailedToStart(failure) => {
            CaptureError::GrabberUnavailable(failure.to_string())
        }
        ProcessOutcome::Crashed { description } => CaptureError::GrabCrashed(description),
        ProcessOutcome::Cancelled => CaptureError::Cancelled,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// `sh` stands in for the interpreter; `$1` is the device, `$2` the path.
    fn grabber(dir: &TempDir, capture_body: &str, probe_body: &str) -> ProcessFrameGrabber {
        let capture = dir.path().join("capture.sh");
        let probe = dir.path().join("probe.sh");
        std::fs::write(&capture, capture_body).unwrap();
        std::fs::write(&probe, probe_body).unwrap();
        ProcessFrameGrabber::from_commands(
            WorkerCommand::new("sh", capture),
            WorkerCommand::new("sh", probe),
            0,
        )
    }

    #[test]
    fn test_grab_writes_frame() {
        let dir = tempfile::tempdir().unwrap();
        let grabber = grabber(&dir, "echo \"$1\" > \"$2\"\n", "exit 0\n");
        let frame = dir.path().join("frame_0.jpg");

        grabber.grab(&frame, &crossbeam_channel::never()).unwrap();

        assert_eq!(std::fs::read_to_string(&frame).unwrap(), "0\n");
    }

    #[test]
    fn test_exit_zero_without_file_is_frame_missing() {
        let dir = tempfile::tempdir().unwrap();
        let grabber = grabber(&dir, "exit 0\n", "exit 0\n");
        let frame = dir.path().join("frame_0.jpg");

        let err = grabber.grab(&frame, &crossbeam_channel::never()).unwrap_err();

        assert!(matches!(err, CaptureError::FrameMissing(p) if p == frame));
    }

    #[test]
    fn test_leftover_frame_does_not_count_as_grab() {
        let dir = tempfile::tempdir().unwrap();
        let grabber = grabber(&dir, "exit 0\n", "exit 0\n");
        let frame = dir.path().join("frame_0.jpg");
        std::fs::write(&frame, b"old session").unwrap();

        let err = grabber.grab(&frame, &crossbeam_channel::never()).unwrap_err();

        assert!(matches!(err, CaptureError::FrameMissing(p) if p == frame));
        assert!(!frame.exists());
    }

    #[test]
    fn test_grab_replaces_leftover_frame() {
        let dir = tempfile::tempdir().unwrap();
        let grabber = grabber(&dir, "echo new > \"$2\"\n", "exit 0\n");
        let frame = dir.path().join("frame_0.jpg");
        std::fs::write(&frame, b"old session").unwrap();

        grabber.grab(&frame, &crossbeam_channel::never()).unwrap();

        assert_eq!(std::fs::read_to_string(&frame).unwrap(), "new\n");
    }

    #[test]
    fn test_non_zero_exit_carries_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let grabber = grabber(
            &dir,
            "echo 'Error: Could not open camera 0' >&2\nexit 1\n",
            "exit 0\n",
        );
        let frame = dir.path().join("frame_0.jpg");

        let err = grabber.grab(&frame, &crossbeam_channel::never()).unwrap_err();

        assert!(!err.is_fatal());
        assert!(err.to_string().contains("Could not open camera 0"));
    }

    #[test]
    fn test_missing_runtime_is_fatal() {
        let grabber = ProcessFrameGrabber::from_commands(
            WorkerCommand::new("yolo-relay-missing-runtime", "capture_frame.py"),
            WorkerCommand::new("yolo-relay-missing-runtime", "test_camera.py"),
            0,
        );
        let err = grabber
            .grab(Path::new("/tmp/never.jpg"), &crossbeam_channel::never())
            .unwrap_err();
        assert!(matches!(err, CaptureError::GrabberUnavailable(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_slow_grab_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let grabber =
            grabber(&dir, "sleep 10\n", "exit 0\n").with_timeout(Duration::from_millis(150));
        let err = grabber
            .grab(&dir.path().join("f.jpg"), &crossbeam_channel::never())
            .unwrap_err();
        assert!(matches!(err, CaptureError::GrabTimedOut(_)));
    }

    #[test]
    fn test_probe_device() {
        let dir = tempfile::tempdir().unwrap();
        let ok = grabber(&dir, "exit 0\n", "[ \"$1\" = 0 ]\n");
        assert!(ok.probe_device().is_ok());

        let dir = tempfile::tempdir().unwrap();
        let missing = grabber(&dir, "exit 0\n", "exit 1\n");
        assert!(matches!(
            missing.probe_device(),
            Err(CaptureError::GrabFailed { code: 1, .. })
        ));
    }
}
