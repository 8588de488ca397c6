//! Error types for rcxlink.

use std::io;
use thiserror::Error;

/// Result type for rcxlink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for rcxlink operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (device node, socket, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Command bytes or expected reply exceed the configured maxima.
    #[error("Request error: {0}")]
    Request(String),

    /// Reply length or content does not match the command's contract.
    #[error("Reply error: {0}")]
    Reply(String),

    /// The target reported insufficient memory for a chunk download.
    #[error("Target out of memory")]
    MemFull,

    /// The progress callback asked to stop the transfer.
    #[error("Transfer aborted")]
    Abort,

    /// Fast mode was requested but the transport cannot provide it.
    #[error("Transport does not support fast mode")]
    PipeMode,

    /// USB tower support is not available on this platform.
    #[error("USB tower transport is not supported on this platform")]
    UsbUnsupported,

    /// TCP tunnel support was not compiled into this build.
    #[error("TCP tunnel transport is not available in this build")]
    TcpUnsupported,

    /// Communication timeout.
    #[error("Timeout: {0}")]
    Timeout(String),
}
