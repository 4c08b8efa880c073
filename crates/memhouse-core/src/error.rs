//! Framing Error Types
//!
//! Errors raised while encoding or decoding segment entry framing. Higher
//! layers wrap these in their own error enums (`#[from]`), so `?` works all
//! the way up.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("truncated framing: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("entry type {0} is reserved for segment framing")]
    ReservedType(u8),
}
