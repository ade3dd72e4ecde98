//! Error types for every layer of the acquisition core.
//!
//! Mirrors the teacher's split between a low-level wire error and a
//! higher-level connection error: [`WireError`] covers frame/struct decode
//! failures, [`DeviceError`] covers handshake/session failures,
//! [`CaptureError`] is the typed code table from spec §4.6/§7, and
//! [`CliError`] covers the external-CLI adapter (C9).

use thiserror::Error;

/// Errors arising from frame and struct wire-format parsing.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("frame too short ({len} bytes, minimum {min})")]
    FrameTooShort { len: usize, min: usize },

    #[error("missing start marker (expected 0x55 0xAA, got {got:02X?})")]
    MissingStart { got: Vec<u8> },

    #[error("missing end marker (expected 0xAA 0x55)")]
    MissingEnd,

    #[error("invalid escape sequence 0xF0 0x{code:02X} at offset {offset}")]
    InvalidEscape { code: u8, offset: usize },

    #[error("payload too short for {what}: need {need} bytes, got {got}{}", format_raw_suffix(raw))]
    PayloadTooShort {
        what: &'static str,
        need: usize,
        got: usize,
        raw: Vec<u8>,
    },

    #[error("{what} length mismatch: expected {expected}, got {got}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("invalid string payload: {0}")]
    InvalidString(#[from] std::string::FromUtf8Error),
}

impl WireError {
    pub(crate) fn payload_too_short(what: &'static str, need: usize, got: usize) -> Self {
        Self::PayloadTooShort { what, need, got, raw: Vec::new() }
    }

    /// Attach raw payload bytes to a decode-phase error for diagnostics.
    pub fn with_raw(self, payload: &[u8]) -> Self {
        match self {
            Self::PayloadTooShort { what, need, got, .. } => {
                Self::PayloadTooShort { what, need, got, raw: payload.to_vec() }
            }
            other => other,
        }
    }
}

fn format_raw_suffix(raw: &[u8]) -> String {
    if raw.is_empty() {
        return String::new();
    }
    let limit = 16;
    let hex: String = raw.iter().take(limit).map(|b| format!(" {b:02X}")).collect();
    let ellipsis = if raw.len() > limit { " ..." } else { "" };
    format!(" |{hex}{ellipsis}")
}

/// Errors from the device session: connection, handshake, and out-of-band commands.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    #[error("invalid connection string: {0:?}")]
    InvalidAddress(String),

    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(std::time::Duration),

    #[error("handshake response incomplete: expected {expected} lines, got {got}")]
    HandshakeIncomplete { expected: usize, got: usize },

    #[error("unparsable handshake line {line_no} ({field}): {text:?}")]
    HandshakeLineUnparsable { line_no: usize, field: &'static str, text: String },

    #[error("handshake value out of range: {field}={value}")]
    HandshakeValueOutOfRange { field: &'static str, value: i64 },

    #[error("unsupported device version {found:?}, minimum {minimum:?}")]
    UnsupportedVersion { found: (u32, u32), minimum: (u32, u32) },

    #[error("command timed out after {0:?}")]
    CommandTimeout(std::time::Duration),

    #[error("unexpected response to command: {0:?}")]
    UnexpectedResponse(String),

    #[error("operation not supported over this transport")]
    NotSupported,

    #[error("device is disconnected")]
    Disconnected,
}

/// Typed failure codes returned synchronously from `startCapture` (spec §6/§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureErrorCode {
    Busy,
    BadParams,
    HardwareError,
    UnexpectedError,
}

/// Asynchronous-phase and validation errors for a single capture (C6).
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("device is busy capturing")]
    Busy,

    #[error("invalid capture parameters: {0}")]
    BadParams(String),

    #[error("no connected device")]
    HardwareError,

    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    #[error("unexpected protocol response: {0}")]
    UnexpectedError(String),

    #[error("payload parse error: {0}")]
    Parse(#[from] WireError),
}

impl CaptureError {
    /// Map to the coarse error-code table exposed by `startCapture` (spec §6).
    pub fn code(&self) -> CaptureErrorCode {
        match self {
            CaptureError::Busy => CaptureErrorCode::Busy,
            CaptureError::BadParams(_) => CaptureErrorCode::BadParams,
            CaptureError::HardwareError => CaptureErrorCode::HardwareError,
            CaptureError::Device(_) | CaptureError::UnexpectedError(_) | CaptureError::Parse(_) => {
                CaptureErrorCode::UnexpectedError
            }
        }
    }
}

/// Errors from the external-CLI adapter (C9).
#[derive(Debug, Error)]
pub enum CliError {
    #[error("failed to launch {tool}: {source}")]
    Spawn { tool: String, source: std::io::Error },

    #[error("{tool} exited with status {status}: {stderr}")]
    NonZeroExit { tool: String, status: i32, stderr: String },

    #[error("I/O error reading output file {path}: {source}")]
    OutputIo { path: String, source: std::io::Error },

    #[error("malformed output row {row}: {detail}")]
    MalformedRow { row: usize, detail: String },

    #[error("output channel count {got} does not match requested {expected}")]
    ChannelCountMismatch { expected: usize, got: usize },
}

pub type WireResult<T> = std::result::Result<T, WireError>;
pub type DeviceResult<T> = std::result::Result<T, DeviceError>;
pub type CaptureResult<T> = std::result::Result<T, CaptureError>;
pub type CliResult<T> = std::result::Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_error_code_mapping() {
        assert_eq!(CaptureError::Busy.code(), CaptureErrorCode::Busy);
        assert_eq!(
            CaptureError::BadParams("x".into()).code(),
            CaptureErrorCode::BadParams
        );
        assert_eq!(CaptureError::HardwareError.code(), CaptureErrorCode::HardwareError);
        assert_eq!(
            CaptureError::UnexpectedError("x".into()).code(),
            CaptureErrorCode::UnexpectedError
        );
    }
}
