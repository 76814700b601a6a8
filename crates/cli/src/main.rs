use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand};
use crossbeam_channel::{select, Receiver};

use yolo_relay_core::capture::domain::capture_error::CaptureError;
use yolo_relay_core::capture::frame_capture_scheduler::{
    CaptureState, FrameCaptureScheduler, FrameResult, SessionError,
};
use yolo_relay_core::capture::infrastructure::process_frame_grabber::ProcessFrameGrabber;
use yolo_relay_core::detection::infrastructure::detection_orchestrator::DetectionOrchestrator;
use yolo_relay_core::process::executable_resolver::{
    self, ResolvedExecutable, WorkerCommand,
};
use yolo_relay_core::shared::constants::{DETECTION_SCRIPT_NAME, IMAGE_EXTENSIONS, KNOWN_MODELS};
use yolo_relay_core::shared::settings::Settings;

/// Object detection through an external YOLO worker process.
#[derive(Parser)]
#[command(name = "yolo-relay")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    options: Options,
}

#[derive(Subcommand)]
enum Command {
    /// Detect objects in a single image.
    Detect {
        /// Image file to analyse.
        image: PathBuf,
    },
    /// Capture camera frames and detect objects until Enter is pressed.
    Live {
        /// Stop automatically after this many seconds.
        #[arg(long)]
        duration: Option<u64>,
    },
    /// Check that the camera can be opened.
    ProbeCamera,
}

/// Overrides for the saved settings. Unset flags keep the saved value.
#[derive(Args)]
struct Options {
    /// Model name (yolov5s, yolov5m, yolov5l, yolov5x).
    #[arg(long, global = true)]
    model: Option<String>,

    /// Detection confidence threshold (0.0-1.0).
    #[arg(long, global = true)]
    confidence: Option<f64>,

    /// Non-maximum suppression IoU threshold (0.0-1.0).
    #[arg(long, global = true)]
    iou: Option<f64>,

    /// Live capture rate, clamped to 1-10 frames per second.
    #[arg(long, global = true)]
    fps: Option<u32>,

    /// Camera device index.
    #[arg(long, global = true)]
    device: Option<u32>,

    /// Python interpreter to use instead of searching PATH.
    #[arg(long, global = true)]
    python: Option<String>,

    /// Directory containing the worker scripts.
    #[arg(long, global = true)]
    script_dir: Option<PathBuf>,

    /// Per-invocation worker timeout in seconds.
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Directory for captured frames.
    #[arg(long, global = true)]
    frame_dir: Option<PathBuf>,

    /// Ask the worker to write an annotated copy of the image.
    #[arg(long, global = true)]
    save_annotated: bool,

    /// Keep captured frames on disk.
    #[arg(long, global = true)]
    retain_frames: bool,

    /// Persist the effective options as the new defaults.
    #[arg(long, global = true)]
    save_settings: bool,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let settings = apply_overrides(Settings::load(), &cli.options);
    validate(&settings)?;
    if cli.options.save_settings {
        settings.save();
        log::info!("Settings saved");
    }

    let runtime = resolve_runtime(&settings);
    let script_dir = resolve_script_dir(&settings)?;

    match cli.command {
        Command::Detect { image } => run_detect(&image, &settings, &runtime, &script_dir),
        Command::Live { duration } => run_live(
            duration.map(Duration::from_secs),
            &settings,
            &runtime,
            &script_dir,
        ),
        Command::ProbeCamera => run_probe(&settings, &runtime, &script_dir),
    }
}

fn run_detect(
    image: &Path,
    settings: &Settings,
    runtime: &ResolvedExecutable,
    script_dir: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    if !image.exists() {
        return Err(format!("Image file not found: {}", image.display()).into());
    }
    if !is_image(image) {
        return Err(format!("Not a supported image file: {}", image.display()).into());
    }

    let request = settings.request_for(image)?;
    let orchestrator = build_orchestrator(settings, runtime, script_dir);
    log::info!(
        "Detecting objects in {} with {}",
        image.display(),
        settings.model_name
    );

    let result = orchestrator.submit_and_wait(request).map_err(|e| {
        if e.is_environment_problem() {
            format!("{e} (is Python with the detection dependencies installed?)")
        } else {
            e.to_string()
        }
    })?;

    print!("{result}");
    if let Some(annotated) = &result.annotated_image_path {
        println!("Annotated image: {}", annotated.display());
    }
    Ok(())
}

fn run_live(
    duration: Option<Duration>,
    settings: &Settings,
    runtime: &ResolvedExecutable,
    script_dir: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let grabber = Arc::new(
        ProcessFrameGrabber::new(runtime, script_dir, settings.device_id)
            .with_timeout(settings.worker_timeout()),
    );
    grabber.probe_device()?;

    let orchestrator = Arc::new(build_orchestrator(settings, runtime, script_dir));
    let scheduler = FrameCaptureScheduler::new(
        grabber,
        orchestrator.clone(),
        settings.request_for("frame.jpg")?,
        settings.frame_dir(),
    )
    .retain_frames(settings.retain_frames);

    let fatal: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let fatal_sink = fatal.clone();
    scheduler.start(settings.fps, print_frame_result, move |e: SessionError| {
        if let SessionError::Capture(ref capture) = e {
            if capture.is_fatal() {
                if let Ok(mut slot) = fatal_sink.lock() {
                    *slot = Some(e.to_string());
                }
                return;
            }
        }
        eprintln!("Warning: {e}");
    })?;

    match duration {
        Some(d) => eprintln!("Capturing for {}s...", d.as_secs()),
        None => eprintln!("Capturing... press Enter to stop."),
    }
    wait_for_stop(&scheduler, duration);

    scheduler.stop();
    orchestrator.cancel();
    if let Some(summary) = scheduler.summary_string() {
        log::info!("{summary}");
        eprintln!("{summary}");
    }

    let fatal = fatal.lock().ok().and_then(|mut slot| slot.take());
    match fatal {
        Some(message) => Err(message.into()),
        None => Ok(()),
    }
}

fn run_probe(
    settings: &Settings,
    runtime: &ResolvedExecutable,
    script_dir: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let grabber = ProcessFrameGrabber::new(runtime, script_dir, settings.device_id)
        .with_timeout(settings.worker_timeout());
    match grabber.probe_device() {
        Ok(()) => {
            println!("Camera {} is available", settings.device_id);
            Ok(())
        }
        Err(CaptureError::GrabFailed { stderr, .. }) if !stderr.is_empty() => {
            Err(format!("Camera {} is not usable: {stderr}", settings.device_id).into())
        }
        Err(e) => Err(e.into()),
    }
}

fn print_frame_result(frame: FrameResult) {
    let name = frame
        .frame_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let classes: Vec<String> = frame
        .result
        .detections
        .iter()
        .map(|d| format!("{} {:.0}%", d.class_name, d.confidence * 100.0))
        .collect();
    println!("{name}: {} [{}]", frame.result.headline(), classes.join(", "));
}

/// Blocks until Enter, the optional duration elapsing, or the capture loop
/// ending on its own. A closed stdin never counts as Enter.
fn wait_for_stop(scheduler: &FrameCaptureScheduler, duration: Option<Duration>) {
    let (enter, deadline) = match duration {
        Some(d) => (crossbeam_channel::never(), crossbeam_channel::after(d)),
        None => {
            let (enter_tx, enter_rx) = crossbeam_channel::bounded::<()>(1);
            thread::spawn(move || {
                let mut line = String::new();
                if is_enter(std::io::stdin().lock().read_line(&mut line)) {
                    let _ = enter_tx.send(());
                }
            });
            (enter_rx, crossbeam_channel::never())
        }
    };
    wait_until(&enter, &deadline, || scheduler.state() == CaptureState::Stopped);
}

/// Returns on a message from `enter`, on `deadline`, or once `stopped`
/// holds. A disconnected `enter` only stops being watched.
fn wait_until(enter: &Receiver<()>, deadline: &Receiver<Instant>, stopped: impl Fn() -> bool) {
    let closed = crossbeam_channel::never();
    let mut enter_open = true;

    loop {
        let watched = if enter_open { enter } else { &closed };
        select! {
            recv(watched) -> msg => {
                if msg.is_ok() {
                    return;
                }
                log::warn!("stdin closed; capturing until the camera stops or the process is interrupted");
                enter_open = false;
            }
            recv(deadline) -> _ => return,
            default(Duration::from_millis(200)) => {
                if stopped() {
                    return;
                }
            }
        }
    }
}

/// A line was read; `Ok(0)` is end of input.
fn is_enter(read: std::io::Result<usize>) -> bool {
    matches!(read, Ok(n) if n > 0)
}

fn build_orchestrator(
    settings: &Settings,
    runtime: &ResolvedExecutable,
    script_dir: &Path,
) -> DetectionOrchestrator {
    let command = WorkerCommand::in_dir(runtime, script_dir, DETECTION_SCRIPT_NAME);
    DetectionOrchestrator::with_timeout(command, settings.worker_timeout())
}

fn resolve_runtime(settings: &Settings) -> ResolvedExecutable {
    match &settings.python_executable {
        Some(program) => ResolvedExecutable {
            program: program.into(),
            probed: false,
        },
        None => executable_resolver::resolve_python(),
    }
}

fn resolve_script_dir(settings: &Settings) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let dir = settings
        .script_dir
        .clone()
        .or_else(executable_resolver::default_script_dir)
        .ok_or("Cannot locate the worker scripts; pass --script-dir")?;
    if !dir.is_dir() {
        log::warn!("Script directory {} does not exist", dir.display());
    }
    Ok(dir)
}

fn apply_overrides(mut settings: Settings, options: &Options) -> Settings {
    if let Some(model) = &options.model {
        settings.model_name = model.clone();
    }
    if let Some(confidence) = options.confidence {
        settings.confidence = confidence;
    }
    if let Some(iou) = options.iou {
        settings.iou = iou;
    }
    if let Some(fps) = options.fps {
        settings.fps = fps;
    }
    if let Some(device) = options.device {
        settings.device_id = device;
    }
    if let Some(python) = &options.python {
        settings.python_executable = Some(python.clone());
    }
    if let Some(dir) = &options.script_dir {
        settings.script_dir = Some(dir.clone());
    }
    if let Some(timeout) = options.timeout {
        settings.timeout_secs = timeout;
    }
    if let Some(dir) = &options.frame_dir {
        settings.frame_dir = Some(dir.clone());
    }
    settings.save_annotated |= options.save_annotated;
    settings.retain_frames |= options.retain_frames;
    settings
}

fn validate(settings: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    if !(0.0..=1.0).contains(&settings.confidence) {
        return Err(format!(
            "Confidence must be between 0.0 and 1.0, got {}",
            settings.confidence
        )
        .into());
    }
    if !(0.0..=1.0).contains(&settings.iou) {
        return Err(format!("IoU must be between 0.0 and 1.0, got {}", settings.iou).into());
    }
    if settings.model_name.trim().is_empty() {
        return Err("Model name must not be empty".into());
    }
    if !KNOWN_MODELS.contains(&settings.model_name.as_str()) {
        log::warn!(
            "Unknown model '{}'; known models: {}",
            settings.model_name,
            KNOWN_MODELS.join(", ")
        );
    }
    if settings.timeout_secs == 0 {
        return Err("Timeout must be at least 1 second".into());
    }
    Ok(())
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_line_read_is_enter() {
        assert!(is_enter(Ok(1)));
    }

    #[test]
    fn test_closed_stdin_is_not_enter() {
        assert!(!is_enter(Ok(0)));
        assert!(!is_enter(Err(io::Error::new(io::ErrorKind::Other, "closed"))));
    }

    #[test]
    fn test_closed_stdin_keeps_waiting_until_capture_stops() {
        let (enter_tx, enter_rx) = crossbeam_channel::bounded::<()>(1);
        drop(enter_tx);
        let stop_at = Instant::now() + Duration::from_millis(500);

        let started = Instant::now();
        wait_until(&enter_rx, &crossbeam_channel::never(), || {
            Instant::now() >= stop_at
        });

        assert!(started.elapsed() >= Duration::from_millis(500));
    }

    #[test]
    fn test_enter_ends_wait() {
        let (enter_tx, enter_rx) = crossbeam_channel::bounded::<()>(1);
        enter_tx.send(()).unwrap();

        let started = Instant::now();
        wait_until(&enter_rx, &crossbeam_channel::never(), || false);

        assert!(started.elapsed() < Duration::from_millis(200));
    }

    #[test]
    fn test_duration_ends_wait_with_closed_stdin() {
        let (_, enter_rx) = crossbeam_channel::bounded::<()>(1);
        let deadline = crossbeam_channel::after(Duration::from_millis(100));

        let started = Instant::now();
        wait_until(&enter_rx, &deadline, || false);

        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_overrides_replace_saved_values() {
        let cli = Cli::parse_from([
            "yolo-relay",
            "--model",
            "yolov5l",
            "--fps",
            "3",
            "--retain-frames",
            "detect",
            "a.jpg",
        ]);
        let settings = apply_overrides(Settings::default(), &cli.options);
        assert_eq!(settings.model_name, "yolov5l");
        assert_eq!(settings.fps, 3);
        assert!(settings.retain_frames);
        assert!(validate(&settings).is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range_threshold() {
        let settings = Settings {
            iou: 1.2,
            ..Default::default()
        };
        assert!(validate(&settings).is_err());
    }
}
