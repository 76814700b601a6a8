//! Wire format shared with the detection worker.
//!
//! Requests are a compact JSON object passed as a single argument; responses
//! are a JSON object read from the worker's stdout.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::detection::domain::detection_error::{DecodeError, EncodingError};
use crate::detection::domain::detection_request::DetectionRequest;
use crate::detection::domain::detection_result::{BoundingBox, Detection, DetectionResult};

/// Field order here is the field order on the wire.
#[derive(Serialize)]
struct WireRequest<'a> {
    image_path: &'a str,
    confidence_threshold: f64,
    iou_threshold: f64,
    model_name: &'a str,
    save_annotated: bool,
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    processing_time: Option<u64>,
    #[serde(default)]
    detections: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    model_used: Option<String>,
    #[serde(default)]
    device_used: Option<String>,
    #[serde(default)]
    annotated_image_path: Option<String>,
}

#[derive(Deserialize)]
struct WireDetection {
    class: String,
    confidence: f64,
    bbox: Vec<f64>,
}

pub fn encode(request: &DetectionRequest) -> Result<String, EncodingError> {
    let confidence_threshold = finite_unit("confidence_threshold", request.confidence_threshold())?;
    let iou_threshold = finite_unit("iou_threshold", request.iou_threshold())?;
    let image_path = request
        .image_path()
        .to_str()
        .ok_or_else(|| EncodingError::NonUtf8Path(request.image_path().display().to_string()))?;

    let wire = WireRequest {
        image_path,
        confidence_threshold,
        iou_threshold,
        model_name: request.model_name(),
        save_annotated: request.save_annotated(),
    };
    serde_json::to_string(&wire).map_err(|e| EncodingError::Serialize(e.to_string()))
}

/// Parses worker stdout.
///
/// A response with an `error` field decodes to an unsuccessful
/// [`DetectionResult`]; only unparsable text is a [`DecodeError`]. Detection
/// entries that are not well formed are dropped and counted in
/// `dropped_detections`.
pub fn decode(raw: &str) -> Result<DetectionResult, DecodeError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(DecodeError::malformed("empty response"));
    }

    let response: WireResponse =
        serde_json::from_str(text).map_err(|e| DecodeError::malformed(e.to_string()))?;

    if let Some(message) = response.error {
        let mut result = DetectionResult::failed(message);
        result.processing_time_ms = response.processing_time.unwrap_or(0);
        result.model_used = response.model_used;
        result.device_used = response.device_used;
        return Ok(result);
    }

    let success = response
        .success
        .ok_or_else(|| DecodeError::malformed("missing `success` field"))?;

    let raw_detections = response.detections.unwrap_or_default();
    let total = raw_detections.len();
    let detections: Vec<Detection> = raw_detections
        .into_iter()
        .enumerate()
        .filter_map(|(i, value)| match parse_detection(value) {
            Ok(det) => Some(det),
            Err(reason) => {
                log::warn!("Dropping detection #{i} from worker response: {reason}");
                None
            }
        })
        .collect();
    let dropped_detections = total - detections.len();

    Ok(DetectionResult {
        detections,
        processing_time_ms: response.processing_time.unwrap_or(0),
        success,
        error_message: if success {
            None
        } else {
            Some("worker reported failure without a message".to_string())
        },
        dropped_detections,
        model_used: response.model_used,
        device_used: response.device_used,
        annotated_image_path: response.annotated_image_path.map(PathBuf::from),
    })
}

fn finite_unit(name: &'static str, value: f64) -> Result<f64, EncodingError> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(EncodingError::ThresholdOutOfRange { name, value })
    }
}

fn parse_detection(value: serde_json::Value) -> Result<Detection, String> {
    let wire: WireDetection = serde_json::from_value(value).map_err(|e| e.to_string())?;

    if !(0.0..=1.0).contains(&wire.confidence) {
        return Err(format!("confidence {} outside [0, 1]", wire.confidence));
    }
    if wire.bbox.len() != 4 {
        return Err(format!(
            "bbox has {} components, expected 4",
            wire.bbox.len()
        ));
    }

    let [x, y, width, height] = [wire.bbox[0], wire.bbox[1], wire.bbox[2], wire.bbox[3]]
        .map(to_pixel);
    let (x, y, width, height) = (x?, y?, width?, height?);
    if width < 0 || height < 0 {
        return Err(format!("negative box extent {width}x{height}"));
    }

    Ok(Detection {
        class_name: wire.class,
        confidence: wire.confidence,
        bounding_box: BoundingBox::new(x, y, width, height),
    })
}

fn to_pixel(value: f64) -> Result<i32, String> {
    let rounded = value.round();
    if rounded.is_finite() && rounded >= i32::MIN as f64 && rounded <= i32::MAX as f64 {
        Ok(rounded as i32)
    } else {
        Err(format!("box component {value} is not a pixel coordinate"))
    }
}
