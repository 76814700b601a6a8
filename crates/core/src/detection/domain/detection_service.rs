use crate::detection::domain::detection_error::DetectionError;
use crate::detection::domain::detection_request::DetectionRequest;
use crate::detection::domain::detection_result::DetectionResult;

/// Completion handler for one submission. `Ok` carries a successful result,
/// `Err` every failure, including a rejected (busy) submission.
pub type DetectionCallback = Box<dyn FnOnce(Result<DetectionResult, DetectionError>) + Send>;

/// Domain interface for single-flight detection.
///
/// At most one submission is in progress at a time; a submission made while
/// another is running is rejected with [`DetectionError::Busy`] rather than
/// queued. The callback is invoked exactly once per `submit`.
pub trait DetectionService: Send + Sync {
    fn submit(&self, request: DetectionRequest, on_done: DetectionCallback);

    fn is_processing(&self) -> bool;
}
