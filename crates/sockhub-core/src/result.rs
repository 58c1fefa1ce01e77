//! Convenience result type alias for SockHub.

use crate::error::AppError;

/// A specialized `Result` type for SockHub operations.
pub type AppResult<T> = Result<T, AppError>;
