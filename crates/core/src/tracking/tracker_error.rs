use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackerError {
    #[error("tracker is already running")]
    AlreadyRunning,
    #[error("tracker is not running")]
    NotRunning,
    #[error("invalid {name} {value}: {reason}")]
    InvalidSetting {
        name: &'static str,
        value: f64,
        reason: &'static str,
    },
    #[error("camera error: {0}")]
    Camera(String),
    #[error("{0} thread panicked")]
    ThreadPanicked(&'static str),
}

impl TrackerError {
    pub(crate) fn invalid(name: &'static str, value: impl Into<f64>, reason: &'static str) -> Self {
        Self::InvalidSetting {
            name,
            value: value.into(),
            reason,
        }
    }
}
