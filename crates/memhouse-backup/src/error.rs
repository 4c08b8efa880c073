//! Replication Error Types
//!
//! The two-way split mirrors how remote failures differ in practice:
//!
//! - `Transport`: the backup could not be reached at all (connection refused,
//!   session dropped, timeout). The data may or may not have arrived.
//! - `Client`: the backup was reached and rejected the request (unknown
//!   segment, segment not open, malformed arguments).
//!
//! Recovery treats both the same way (warn, try the next candidate backup);
//! the write path treats both as fatal to the master.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BackupError>;

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("backup client error: {0}")]
    Client(String),
}
