use thiserror::Error;

/// Failures that stop a detection session from being created.
///
/// Everything that goes wrong once a session is running is contained inside
/// the loop and reported through the observer instead.
#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("invalid detector configuration: {0}")]
    InvalidConfig(String),
}
