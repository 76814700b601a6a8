use std::fmt;
use std::path::PathBuf;

/// Axis-aligned box in source-image pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        debug_assert!(width >= 0 && height >= 0, "box extent must be non-negative");
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub class_name: String,
    pub confidence: f64,
    pub bounding_box: BoundingBox,
}

/// Outcome of one worker invocation, in worker-assigned detection order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionResult {
    pub detections: Vec<Detection>,
    pub processing_time_ms: u64,
    pub success: bool,
    /// Set only when `success` is false.
    pub error_message: Option<String>,
    /// Entries the worker reported that failed strict parsing.
    pub dropped_detections: usize,
    pub model_used: Option<String>,
    pub device_used: Option<String>,
    pub annotated_image_path: Option<PathBuf>,
}

impl DetectionResult {
    /// A well-formed response that carries a worker-reported error.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
            ..Self::default()
        }
    }

    /// One-line summary, e.g. `Detected 3 objects in 120ms`.
    pub fn headline(&self) -> String {
        format!(
            "Detected {} objects in {}ms",
            self.detections.len(),
            self.processing_time_ms
        )
    }
}

impl fmt::Display for DetectionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.success {
            let message = self.error_message.as_deref().unwrap_or("unknown error");
            return write!(f, "Detection failed: {message}");
        }

        writeln!(f, "Detection completed in {}ms", self.processing_time_ms)?;
        writeln!(f, "Objects detected: {}", self.detections.len())?;
        for (i, det) in self.detections.iter().enumerate() {
            let b = det.bounding_box;
            writeln!(
                f,
                "  #{:<3} {:<16} {:5.1}%  box=({}, {}, {}, {})",
                i + 1,
                det.class_name,
                det.confidence * 100.0,
                b.x,
                b.y,
                b.width,
                b.height
            )?;
        }
        if self.dropped_detections > 0 {
            writeln!(
                f,
                "  ({} malformed entries ignored)",
                self.dropped_detections
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person() -> Detection {
        Detection {
            class_name: "person".to_string(),
            confidence: 0.93,
            bounding_box: BoundingBox::new(10, 20, 100, 200),
        }
    }

    #[test]
    fn test_failed_sets_message_and_clears_success() {
        let result = DetectionResult::failed("model not found");
        assert!(!result.success);
        assert_eq!(result.error_message.as_deref(), Some("model not found"));
        assert!(result.detections.is_empty());
    }

    #[test]
    fn test_headline() {
        let result = DetectionResult {
            detections: vec![person(), person()],
            processing_time_ms: 120,
            success: true,
            ..Default::default()
        };
        assert_eq!(result.headline(), "Detected 2 objects in 120ms");
    }

    #[test]
    fn test_display_lists_detections() {
        let result = DetectionResult {
            detections: vec![person()],
            processing_time_ms: 120,
            success: true,
            dropped_detections: 1,
            ..Default::default()
        };
        let text = result.to_string();
        assert!(text.contains("Detection completed in 120ms"));
        assert!(text.contains("person"));
        assert!(text.contains("93.0%"));
        assert!(text.contains("box=(10, 20, 100, 200)"));
        assert!(text.contains("1 malformed entries ignored"));
    }

    #[test]
    fn test_display_failure() {
        let text = DetectionResult::failed("boom").to_string();
        assert_eq!(text, "Detection failed: boom");
    }
}
