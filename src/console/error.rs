//! Console registration error types

use thiserror::Error;

/// Errors from console registration and lifecycle operations.
///
/// Printing itself never fails with an error: a denied or failed emission is
/// reported as an outcome and retried later.
#[derive(Debug, Error)]
pub enum ConsoleError {
    /// E01: Console table is full
    #[error("console table full ({0} consoles)")]
    TableFull(usize),
    /// E02: A console with this name is already registered
    #[error("console '{0}' already registered")]
    Duplicate(String),
    /// E03: No console with this name
    #[error("console '{0}' not registered")]
    NotRegistered(String),
    /// E04: Console has neither an atomic nor a threaded write path
    #[error("console '{0}' has no write path")]
    NoWritePath(String),
    /// E05: Console worker thread could not be started
    #[error("failed to spawn console worker: {0}")]
    WorkerSpawn(#[from] std::io::Error),
}

impl ConsoleError {
    /// Get error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::TableFull(_) => "E01",
            Self::Duplicate(_) => "E02",
            Self::NotRegistered(_) => "E03",
            Self::NoWritePath(_) => "E04",
            Self::WorkerSpawn(_) => "E05",
        }
    }
}
