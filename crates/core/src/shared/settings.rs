use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detection::domain::detection_request::{DetectionRequest, RequestError};
use crate::shared::constants::{
    DEFAULT_CAPTURE_FPS, DEFAULT_CONFIDENCE, DEFAULT_IOU, DEFAULT_MODEL_NAME,
    DEFAULT_WORKER_TIMEOUT, FRAME_DIR_NAME,
};

/// User configuration, persisted as JSON under the platform config dir.
///
/// Missing fields fall back to their defaults so older files keep loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub model_name: String,
    pub confidence: f64,
    pub iou: f64,
    pub fps: u32,
    pub device_id: u32,
    /// Interpreter to use instead of probing `PATH`.
    pub python_executable: Option<String>,
    pub script_dir: Option<PathBuf>,
    pub timeout_secs: u64,
    pub frame_dir: Option<PathBuf>,
    pub retain_frames: bool,
    pub save_annotated: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_MODEL_NAME.to_string(),
            confidence: DEFAULT_CONFIDENCE,
            iou: DEFAULT_IOU,
            fps: DEFAULT_CAPTURE_FPS,
            device_id: 0,
            python_executable: None,
            script_dir: None,
            timeout_secs: DEFAULT_WORKER_TIMEOUT.as_secs(),
            frame_dir: None,
            retain_frames: false,
            save_annotated: false,
        }
    }
}

impl Settings {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("YoloRelay").join("settings.json"))
    }

    pub fn load() -> Self {
        Self::config_path()
            .map(|path| Self::load_from(&path))
            .unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> Self {
        fs::read_to_string(path)
            .ok()
            .and_then(|json| match serde_json::from_str(&json) {
                Ok(settings) => Some(settings),
                Err(e) => {
                    log::warn!("Ignoring unreadable settings {}: {e}", path.display());
                    None
                }
            })
            .unwrap_or_default()
    }

    pub fn save(&self) {
        if let Some(path) = Self::config_path() {
            self.save_to(&path);
        }
    }

    pub fn save_to(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        if let Ok(json) = serde_json::to_string_pretty(self) {
            if let Err(e) = fs::write(path, json) {
                log::warn!("Could not save settings to {}: {e}", path.display());
            }
        }
    }

    pub fn worker_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    /// Configured frame directory, or `<system temp>/yolo_frames`.
    pub fn frame_dir(&self) -> PathBuf {
        self.frame_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(FRAME_DIR_NAME))
    }

    pub fn request_for(
        &self,
        image_path: impl Into<PathBuf>,
    ) -> Result<DetectionRequest, RequestError> {
        DetectionRequest::new(
            image_path,
            self.confidence,
            self.iou,
            self.model_name.clone(),
            self.save_annotated,
        )
    }
}
