//! # Error Types
//!
//! This module provides the error types used throughout the sdikit library.
//! It defines a central error type `SdiError` that encapsulates all possible
//! errors that can occur while decoding, encoding or transporting SDI
//! payloads.
//!
//! ## Example Usage
//!
//! ```rust
//! use sdikit::error::{Result, SdiError};
//!
//! fn process_line(samples: &[u16]) -> Result<()> {
//!     if samples.is_empty() {
//!         return Err(SdiError::InvalidData("Empty SDI line".to_string()));
//!     }
//!
//!     // Process line...
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// Primary error type for the sdikit library
#[derive(Error, Debug)]
pub enum SdiError {
    /// I/O errors that occur during file or network operations
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors that occur during parsing of wire formats
    #[error("parser error: {0}")]
    Parser(String),

    /// Errors for invalid or malformed input data
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Errors for a flow definition a stage cannot accept
    #[error("incompatible flow definition: {0}")]
    Format(String),

    /// Errors related to transport protocols (RTP, HBRMT, RFC 4175)
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// A specialized Result type for sdikit operations.
///
/// This type is used throughout the sdikit library to handle operations
/// that can produce a `SdiError`.
pub type Result<T> = std::result::Result<T, SdiError>;
