pub mod detection_error;
pub mod detection_request;
pub mod detection_result;
pub mod detection_service;
