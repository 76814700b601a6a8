use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EncodingError {
    #[error("{name} must be a finite value between 0.0 and 1.0, got {value}")]
    ThresholdOutOfRange { name: &'static str, value: f64 },
    #[error("image path is not valid UTF-8: {0}")]
    NonUtf8Path(String),
    #[error("failed to serialize request: {0}")]
    Serialize(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("malformed worker response: {reason}")]
    Malformed { reason: String },
}

impl DecodeError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        DecodeError::Malformed {
            reason: reason.into(),
        }
    }
}

/// Every way a submitted detection can fail. Delivered once per submission.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectionError {
    #[error("busy: a detection is already in progress")]
    Busy,
    #[error("invalid request: {0}")]
    Encoding(#[from] EncodingError),
    #[error("failed to start worker process: {0}")]
    FailedToStart(String),
    #[error("worker process crashed: {0}")]
    Crashed(String),
    #[error("worker process timed out after {}s", .0.as_secs_f64())]
    TimedOut(Duration),
    #[error("worker process failed with exit code {code}: {output}")]
    NonZeroExit { code: i32, output: String },
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("worker reported an error: {0}")]
    Application(String),
    #[error("detection cancelled")]
    Cancelled,
}

impl DetectionError {
    /// True when the host environment (missing interpreter, broken install)
    /// is at fault rather than the worker itself.
    pub fn is_environment_problem(&self) -> bool {
        matches!(self, DetectionError::FailedToStart(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_zero_exit_message_has_code_and_output() {
        let err = DetectionError::NonZeroExit {
            code: 1,
            output: "model not found".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("exit code 1"));
        assert!(msg.contains("model not found"));
    }

    #[test]
    fn test_timed_out_message() {
        let err = DetectionError::TimedOut(Duration::from_secs(30));
        assert_eq!(err.to_string(), "worker process timed out after 30s");
    }

    #[test]
    fn test_environment_problem_classification() {
        assert!(DetectionError::FailedToStart("not found".into()).is_environment_problem());
        assert!(!DetectionError::Crashed("signal 11".into()).is_environment_problem());
        assert!(!DetectionError::Busy.is_environment_problem());
    }

    #[test]
    fn test_decode_error_is_transparent() {
        let err: DetectionError = DecodeError::malformed("not JSON").into();
        assert_eq!(err.to_string(), "malformed worker response: not JSON");
    }
}
