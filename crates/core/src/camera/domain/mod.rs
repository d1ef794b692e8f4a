pub mod camera_source;
pub mod image_writer;
pub mod preview_sink;
