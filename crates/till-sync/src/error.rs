//! # Sync Error Types
//!
//! Batch-level failures only. A payload that fails is reported in the
//! batch's [`SyncReport`](crate::SyncReport), never as an `Err`.

use thiserror::Error;

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    /// The batch was rejected before any payload was applied.
    #[error("Batch of {size} payloads exceeds the limit of {max}")]
    BatchTooLarge { size: usize, max: usize },

    /// The operator context is unusable for the whole batch.
    #[error("Invalid sync request: {0}")]
    InvalidRequest(String),
}

impl SyncError {
    /// Machine code, in the same style as engine error codes.
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::BatchTooLarge { .. } => "BATCH_TOO_LARGE",
            SyncError::InvalidRequest(_) => "VALIDATION_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_too_large_message() {
        let err = SyncError::BatchTooLarge { size: 250, max: 200 };
        assert_eq!(err.code(), "BATCH_TOO_LARGE");
        assert!(err.to_string().contains("250"));
        assert!(err.to_string().contains("200"));
    }
}
