use std::path::Path;

use crossbeam_channel::Receiver;

use crate::capture::domain::capture_error::CaptureError;

/// Domain interface for grabbing a single camera frame to a file.
///
/// `cancel` fires (message or disconnection) when the caller is stopping;
/// implementations should abandon the grab promptly and return
/// [`CaptureError::Cancelled`].
pub trait FrameGrabber: Send + Sync {
    fn grab(&self, output: &Path, cancel: &Receiver<()>) -> Result<(), CaptureError>;
}
