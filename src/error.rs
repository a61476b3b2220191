use thiserror::Error;

use crate::utils::Rect;

/// Failures surfaced by the magnifier driver.
///
/// None of these are retried: the driver halts, reports through the host
/// and releases whatever it acquired.
#[derive(Debug, Error)]
pub enum MagnifierError {
    #[error("failed to initialize magnification subsystem: {0}")]
    InitializationFailure(String),

    #[error("failed to create magnifier surface {index}: {reason}")]
    SurfaceCreationFailure { index: usize, reason: String },

    #[error("magnifier surface {index} rejected source rectangle {rect}: {reason}")]
    SampleRejected {
        index: usize,
        rect: Rect,
        reason: String,
    },

    #[error("invalid viewport: {0}")]
    InvalidViewport(String),
}

pub type Result<T> = std::result::Result<T, MagnifierError>;
