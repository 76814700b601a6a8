pub mod capture_stats;
pub mod domain;
pub mod frame_capture_scheduler;
pub mod infrastructure;
