// Batch readiness detection library modules

pub mod cancel;
pub mod config;
pub mod error;
pub mod fs;
pub mod generate;
pub mod observer;
pub mod release;
pub mod report;
pub mod retry;
pub mod scan;
pub mod session;
pub mod stable;

// Re-export commonly used types
pub use cancel::{CancelHandle, CancelToken};
pub use config::DetectorConfig;
pub use error::DetectorError;
pub use release::FileStatus;
pub use report::DetectionReport;
pub use session::{DetectionOutcome, DetectionSession, OutcomeKind};
