use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Lock-free counters for one capture session.
///
/// Updated from the cadence thread and from detection callbacks, read from
/// anywhere via [`CaptureStats::snapshot`].
pub struct CaptureStats {
    captured: AtomicU64,
    submitted: AtomicU64,
    discarded: AtomicU64,
    capture_failures: AtomicU64,
    detection_errors: AtomicU64,
    detections: AtomicU64,
    started_at: Instant,
}

/// Point-in-time copy of [`CaptureStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CaptureStatsSnapshot {
    /// Frames successfully written by the grabber.
    pub captured: u64,
    /// Frames handed to the detection service.
    pub submitted: u64,
    /// Frames dropped because detection was busy.
    pub discarded: u64,
    pub capture_failures: u64,
    pub detection_errors: u64,
    /// Objects reported across all completed detections.
    pub detections: u64,
}

impl CaptureStats {
    pub fn new() -> Self {
        Self {
            captured: AtomicU64::new(0),
            submitted: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            capture_failures: AtomicU64::new(0),
            detection_errors: AtomicU64::new(0),
            detections: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn record_captured(&self) {
        self.captured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_capture_failure(&self) {
        self.capture_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_detection_error(&self) {
        self.detection_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_detections(&self, count: usize) {
        self.detections.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CaptureStatsSnapshot {
        CaptureStatsSnapshot {
            captured: self.captured.load(Ordering::Relaxed),
            submitted: self.submitted.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            capture_failures: self.capture_failures.load(Ordering::Relaxed),
            detection_errors: self.detection_errors.load(Ordering::Relaxed),
            detections: self.detections.load(Ordering::Relaxed),
        }
    }

    /// Returns the formatted summary, or `None` if nothing was captured or
    /// attempted.
    pub fn summary_string(&self) -> Option<String> {
        self.snapshot()
            .summary_string(self.started_at.elapsed().as_secs_f64())
    }
}

impl Default for CaptureStats {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureStatsSnapshot {
    pub fn attempts(&self) -> u64 {
        self.captured + self.capture_failures
    }

    /// Share of captured frames that reached the detector, in percent.
    pub fn submit_ratio(&self) -> f64 {
        if self.captured == 0 {
            0.0
        } else {
            self.submitted as f64 / self.captured as f64 * 100.0
        }
    }

    pub fn summary_string(&self, elapsed_secs: f64) -> Option<String> {
        if self.attempts() == 0 {
            return None;
        }

        let mut lines = vec![format!(
            "Capture summary ({} frames, {elapsed_secs:.1}s total):",
            self.captured
        )];
        lines.push(format!(
            "  submitted: {:5}  ({:4.1}%)",
            self.submitted,
            self.submit_ratio()
        ));
        lines.push(format!("  discarded: {:5}", self.discarded));
        lines.push(format!("  detections: {}", self.detections));
        if self.capture_failures > 0 {
            lines.push(format!("  capture failures: {}", self.capture_failures));
        }
        if self.detection_errors > 0 {
            lines.push(format!("  detection errors: {}", self.detection_errors));
        }
        if elapsed_secs > 0.0 {
            let fps = self.captured as f64 / elapsed_secs;
            lines.push(format!("  Capture rate: {fps:.1} fps"));
        }

        Some(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_new_stats_are_zero() {
        let stats = CaptureStats::new();
        assert_eq!(stats.snapshot(), CaptureStatsSnapshot::default());
        assert!(stats.summary_string().is_none());
    }

    #[test]
    fn test_counters_accumulate() {
        let stats = CaptureStats::new();
        stats.record_captured();
        stats.record_captured();
        stats.record_captured();
        stats.record_submitted();
        stats.record_discarded();
        stats.record_discarded();
        stats.record_capture_failure();
        stats.record_detection_error();
        stats.record_detections(4);

        let snap = stats.snapshot();
        assert_eq!(snap.captured, 3);
        assert_eq!(snap.submitted, 1);
        assert_eq!(snap.discarded, 2);
        assert_eq!(snap.capture_failures, 1);
        assert_eq!(snap.detection_errors, 1);
        assert_eq!(snap.detections, 4);
        assert_eq!(snap.attempts(), 4);
    }

    #[test]
    fn test_submit_ratio() {
        let snap = CaptureStatsSnapshot {
            captured: 8,
            submitted: 2,
            ..Default::default()
        };
        assert_relative_eq!(snap.submit_ratio(), 25.0);
        assert_relative_eq!(CaptureStatsSnapshot::default().submit_ratio(), 0.0);
    }

    #[test]
    fn test_summary_contains_counts_and_rate() {
        let snap = CaptureStatsSnapshot {
            captured: 20,
            submitted: 5,
            discarded: 15,
            capture_failures: 1,
            ..Default::default()
        };
        let summary = snap.summary_string(4.0).unwrap();
        assert!(summary.starts_with("Capture summary (20 frames, 4.0s total):"));
        assert!(summary.contains("discarded:    15"));
        assert!(summary.contains("capture failures: 1"));
        assert!(!summary.contains("detection errors"));
        assert!(summary.contains("Capture rate: 5.0 fps"));
    }

    #[test]
    fn test_summary_for_failures_only() {
        let snap = CaptureStatsSnapshot {
            capture_failures: 3,
            ..Default::default()
        };
        assert!(snap.summary_string(1.0).is_some());
    }
}
