pub mod ffmpeg_camera;
pub mod image_file_preview;
pub mod image_file_writer;
#[cfg(all(feature = "v4l", target_os = "linux"))]
pub mod v4l_camera;
