pub mod process_frame_grabber;
