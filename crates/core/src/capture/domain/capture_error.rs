use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture is already running")]
    AlreadyRunning,
    #[error("failed to create frame directory {path}: {source}")]
    FrameDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("frame grabber unavailable: {0}")]
    GrabberUnavailable(String),
    #[error("frame grab timed out after {}s", .0.as_secs_f64())]
    GrabTimedOut(Duration),
    #[error("frame grab failed with exit code {code}: {stderr}")]
    GrabFailed { code: i32, stderr: String },
    #[error("frame grabber crashed: {0}")]
    GrabCrashed(String),
    #[error("frame grab reported success but {0} was not written")]
    FrameMissing(PathBuf),
    #[error("frame grab cancelled")]
    Cancelled,
    #[error("camera lost after {failures} consecutive failed grabs")]
    DeviceLost { failures: u32 },
}

impl CaptureError {
    /// Environment-fatal errors end the capture loop; everything else is
    /// treated as a transient hiccup.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CaptureError::GrabberUnavailable(_)
                | CaptureError::FrameDir { .. }
                | CaptureError::DeviceLost { .. }
        )
    }
}
