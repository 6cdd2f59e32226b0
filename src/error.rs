//! Error types for ventio.

use std::io;

use thiserror::Error;

use crate::codec::escape_crlf;
use crate::frame::FrameKind;

/// Main error type for all ventio operations.
#[derive(Debug, Error)]
pub enum VentioError {
    /// A frame field is outside its allowed range.
    #[error("the {field} must be between {min} and {max} (inclusive), but was {value}")]
    OutOfRange {
        /// Name of the offending field.
        field: &'static str,
        /// Lower bound of the allowed range.
        min: u16,
        /// Upper bound of the allowed range.
        max: u16,
        /// The rejected value.
        value: u16,
    },

    /// A response was constructed with a request kind.
    #[error("invalid frame kind for a response: {0:?}")]
    InvalidResponseKind(FrameKind),

    /// The codec only encodes request frames.
    #[error("can't encode a frame of kind {0:?}")]
    EncodeUnsupported(FrameKind),

    /// Wire data did not match the response grammar.
    #[error("unable to decode the following data: {}", escape_crlf(.data))]
    DecodeMismatch {
        /// The offending wire data.
        data: String,
    },

    /// The device answered with `?` instead of a payload.
    ///
    /// This is a well-formed response; the device rejected the requested
    /// function. Distinguishable from [`VentioError::DecodeMismatch`].
    #[error(
        "device answered with a questionmark instead of data (was the function valid?): {}",
        escape_crlf(.data)
    )]
    QuestionMark {
        /// The offending wire data.
        data: String,
    },

    /// Opening the serial port failed.
    #[error("failed to open serial port {port}")]
    OpenPort {
        /// Name of the port that failed to open.
        port: String,
        #[source]
        source: io::Error,
    },

    /// Configuring the read timeout failed after the port was opened.
    ///
    /// The port is closed before this error is returned; if that close
    /// failed as well, its error is attached in `close_error`.
    #[error("failed to set the read timeout for serial port {port}")]
    SetReadTimeout {
        /// Name of the affected port.
        port: String,
        #[source]
        source: io::Error,
        /// Error from the subsequent close, if that failed too.
        close_error: Option<io::Error>,
    },

    /// No bytes arrived on the serial line before the read timeout.
    ///
    /// Callers may treat this as "the bus is silent" rather than a fault.
    #[error("no data arrived on the serial line before the read timeout")]
    NoDataOnSerial,

    /// Reading a full CR-terminated frame failed part-way.
    #[error("failed to read a full frame from the serial port, got so far: {}", escape_crlf(.partial))]
    ReadFrame {
        /// Bytes received before the failure.
        partial: String,
        #[source]
        source: io::Error,
    },

    /// Writing an encoded frame to the serial port failed.
    #[error("failed to send serial message: {}", escape_crlf(.data))]
    WriteFrame {
        /// The encoded wire data that could not be written.
        data: String,
        #[source]
        source: io::Error,
    },

    /// Closing the serial port failed.
    #[error("failed to close serial port")]
    ClosePort(#[source] io::Error),

    /// A frame operation was attempted before opening the port.
    #[error("serial port not yet opened")]
    PortNotOpened,

    /// Sources can only be added before the scheduler is started.
    #[error("cannot add sources after starting the scheduler")]
    SchedulerStarted,

    /// The serial manager was started more than once.
    #[error("the serial manager has already been started")]
    ManagerStarted,

    /// The serial manager's worker is not running.
    #[error("the serial manager is not running")]
    ManagerNotRunning,

    /// A required environment variable is not set.
    #[error("missing required environment variable {0}")]
    MissingEnvVar(String),

    /// An environment variable with the project prefix is not recognized.
    #[error("unknown environment variable with project prefix: {0}")]
    UnknownEnvVar(String),

    /// An environment variable holds a value that cannot be parsed.
    #[error("invalid value {value:?} for environment variable {name}: {reason}")]
    InvalidEnvVar {
        /// Name of the variable.
        name: String,
        /// The rejected value.
        value: String,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Result type alias using VentioError.
pub type Result<T> = std::result::Result<T, VentioError>;
