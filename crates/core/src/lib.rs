pub mod camera;
pub mod detection;
pub mod shared;
pub mod tracking;
