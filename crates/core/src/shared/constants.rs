use std::time::Duration;

/// Worker script that answers a single detection request.
pub const DETECTION_SCRIPT_NAME: &str = "detection_server.py";
/// Worker script that grabs one camera frame to a file.
pub const CAPTURE_SCRIPT_NAME: &str = "capture_frame.py";
/// Worker script that checks whether a camera device opens and yields a frame.
pub const CAMERA_TEST_SCRIPT_NAME: &str = "test_camera.py";

/// Interpreter names probed in order at startup.
pub const PYTHON_CANDIDATES: &[&str] = &["python3", "python", "py"];
pub const PYTHON_FALLBACK: &str = "python";
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Covers both "never produced output" and "hung after partial output".
pub const DEFAULT_WORKER_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_CONFIDENCE: f64 = 0.5;
pub const DEFAULT_IOU: f64 = 0.45;
pub const DEFAULT_MODEL_NAME: &str = "yolov5s";
pub const KNOWN_MODELS: &[&str] = &["yolov5s", "yolov5m", "yolov5l", "yolov5x"];

pub const MIN_CAPTURE_FPS: u32 = 1;
pub const MAX_CAPTURE_FPS: u32 = 10;
pub const DEFAULT_CAPTURE_FPS: u32 = 5;
pub const CAPTURE_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Consecutive failed grabs after which the device is considered gone.
pub const MAX_CONSECUTIVE_CAPTURE_FAILURES: u32 = 10;

/// Subdirectory of the system temp dir that receives captured frames.
pub const FRAME_DIR_NAME: &str = "yolo_frames";

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "tif", "webp"];
