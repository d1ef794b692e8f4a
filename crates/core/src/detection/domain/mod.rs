pub mod distance_estimator;
pub mod distance_smoother;
pub mod face_detector;
