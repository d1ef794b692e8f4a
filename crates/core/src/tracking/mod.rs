pub mod face_tracker;
pub mod tracker_config;
pub mod tracker_delegate;
pub mod tracker_error;
