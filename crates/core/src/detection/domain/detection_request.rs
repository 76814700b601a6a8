use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RequestError {
    #[error("image path is empty")]
    EmptyImagePath,
    #[error("model name is empty")]
    EmptyModelName,
    #[error("{name} must be between 0.0 and 1.0, got {value}")]
    ThresholdOutOfRange { name: &'static str, value: f64 },
}

/// One detection job for the external worker.
///
/// Built through [`DetectionRequest::new`], which rejects out-of-range
/// thresholds at the boundary so the codec never has to clamp.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionRequest {
    image_path: PathBuf,
    confidence_threshold: f64,
    iou_threshold: f64,
    model_name: String,
    save_annotated: bool,
}

impl DetectionRequest {
    pub fn new(
        image_path: impl Into<PathBuf>,
        confidence_threshold: f64,
        iou_threshold: f64,
        model_name: impl Into<String>,
        save_annotated: bool,
    ) -> Result<Self, RequestError> {
        let image_path = image_path.into();
        let model_name = model_name.into();

        if image_path.as_os_str().is_empty() {
            return Err(RequestError::EmptyImagePath);
        }
        if model_name.trim().is_empty() {
            return Err(RequestError::EmptyModelName);
        }
        check_threshold("confidence_threshold", confidence_threshold)?;
        check_threshold("iou_threshold", iou_threshold)?;

        Ok(Self {
            image_path,
            confidence_threshold,
            iou_threshold,
            model_name,
            save_annotated,
        })
    }

    /// Same thresholds and model, different image. Used for camera frames.
    pub fn with_image(&self, image_path: impl Into<PathBuf>) -> Result<Self, RequestError> {
        Self::new(
            image_path,
            self.confidence_threshold,
            self.iou_threshold,
            self.model_name.clone(),
            self.save_annotated,
        )
    }

    pub fn image_path(&self) -> &Path {
        &self.image_path
    }

    pub fn confidence_threshold(&self) -> f64 {
        self.confidence_threshold
    }

    pub fn iou_threshold(&self) -> f64 {
        self.iou_threshold
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn save_annotated(&self) -> bool {
        self.save_annotated
    }
}

/// Accepts values in `[0, 1]`; NaN and infinities are rejected.
pub fn check_threshold(name: &'static str, value: f64) -> Result<(), RequestError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(RequestError::ThresholdOutOfRange { name, value })
    }
}
