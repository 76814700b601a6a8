pub mod detection_orchestrator;
pub mod request_codec;
