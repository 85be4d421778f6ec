//! Error types for the vendor library.

use thiserror::Error;

/// Result type alias for vendor operations.
pub type VendorResult<T> = Result<T, VendorError>;

/// Status returned to the Bluetooth stack for a failed operation.
pub const STATUS_FAIL: i32 = -1;

/// Status returned to the Bluetooth stack for a successful operation.
pub const STATUS_OK: i32 = 0;

/// Errors that can occur while driving the controller.
#[derive(Debug, Error)]
pub enum VendorError {
    /// Serial port error from the serialport crate.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Standard I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while loading or saving settings.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// `init` was called without a callback table.
    #[error("No callback table registered")]
    NoCallbacks,

    /// The transport had no command buffer to lend.
    #[error("No HCI command buffer available")]
    NoBuffer,

    /// The transport refused to send a command.
    #[error("Transport rejected command 0x{opcode:04X}")]
    XmitRejected { opcode: u16 },

    /// An HCI event reported a failure status.
    #[error("Event 0x{event:02X} reported status 0x{status:02X}")]
    EventStatus { event: u8, status: u8 },

    /// Command parameters do not fit in one HCI command.
    #[error("Command parameters of {size} bytes exceed maximum {max_size}")]
    CommandTooLarge { size: usize, max_size: usize },

    /// The board data file could not be read.
    #[error("Board data unavailable at {path}")]
    BdDataUnavailable { path: String },

    /// The board data file is not valid hex.
    #[error("Malformed board data: {reason}")]
    MalformedBdData { reason: String },

    /// No patch file matched the chip identifier.
    #[error("No patch file for chip {id}")]
    PatchNotFound { id: String },

    /// A matching patch path exceeds the configured maximum.
    #[error("Patch path length {len} exceeds maximum {max}")]
    PatchPathTooLong { len: usize, max: usize },

    /// A binary patch record ended early.
    #[error("Patch file truncated at offset {offset}")]
    TruncatedPatch { offset: u64 },

    /// A text patch command line could not be parsed.
    #[error("Malformed patch line: {line}")]
    MalformedPatchLine { line: String },

    /// The kernel notification socket could not be set up.
    #[error("Wake channel error: {reason}")]
    ChannelError { reason: String },

    /// The wake channel is not running.
    #[error("Wake channel is closed")]
    ChannelClosed,

    /// CTS did not follow BT_WAKE in time.
    #[error("CTS did not reach {level} within {timeout_ms}ms")]
    WakeTimeout { level: &'static str, timeout_ms: u64 },

    /// A device ioctl failed.
    #[error("ioctl {request} failed: {source}")]
    Ioctl {
        request: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// No bluetooth rfkill switch was found.
    #[error("No bluetooth rfkill entry found")]
    RfkillNotFound,

    /// Serial port is busy (in use by another process).
    #[error("Port '{port}' is busy or in use by another process")]
    PortBusy { port: String },

    /// Permission denied accessing serial port.
    #[error("Permission denied for port '{port}'")]
    PortPermissionDenied { port: String },

    /// The serial port has not been opened.
    #[error("Serial port is not open")]
    PortNotOpen,

    /// SCO configuration is not part of this build.
    #[error("SCO configuration not included")]
    ScoNotIncluded,

    /// The operation is not supported in the current configuration.
    #[error("Operation {op} not supported")]
    Unsupported { op: &'static str },
}

impl VendorError {
    /// Integer status handed back through the stack interface.
    pub fn status(&self) -> i32 {
        STATUS_FAIL
    }

    /// Get a stable error code for logs and bug reports.
    pub fn error_code(&self) -> &'static str {
        match self {
            VendorError::Serial(_) => "BTV-001",
            VendorError::Io(_) => "BTV-002",
            VendorError::Json(_) => "BTV-003",
            VendorError::NoCallbacks => "BTV-010",
            VendorError::NoBuffer => "BTV-011",
            VendorError::XmitRejected { .. } => "BTV-012",
            VendorError::EventStatus { .. } => "BTV-013",
            VendorError::CommandTooLarge { .. } => "BTV-014",
            VendorError::BdDataUnavailable { .. } => "BTV-020",
            VendorError::MalformedBdData { .. } => "BTV-021",
            VendorError::PatchNotFound { .. } => "BTV-030",
            VendorError::PatchPathTooLong { .. } => "BTV-031",
            VendorError::TruncatedPatch { .. } => "BTV-032",
            VendorError::MalformedPatchLine { .. } => "BTV-033",
            VendorError::ChannelError { .. } => "BTV-040",
            VendorError::ChannelClosed => "BTV-041",
            VendorError::WakeTimeout { .. } => "BTV-042",
            VendorError::Ioctl { .. } => "BTV-043",
            VendorError::RfkillNotFound => "BTV-050",
            VendorError::PortBusy { .. } => "BTV-051",
            VendorError::PortPermissionDenied { .. } => "BTV-052",
            VendorError::PortNotOpen => "BTV-053",
            VendorError::ScoNotIncluded => "BTV-060",
            VendorError::Unsupported { .. } => "BTV-099",
        }
    }
}
