//! Constants for the Intel HCI vendor command set.

use std::time::Duration;

// ============================================================================
// HCI Framing
// ============================================================================

/// Opcode (2) + parameter length (1).
pub const HCI_CMD_PREAMBLE_SIZE: usize = 3;

/// Largest command buffer the transport is asked for.
pub const HCI_CMD_MAX_LEN: usize = 258;

/// Largest parameter block a single command can carry.
pub const HCI_CMD_MAX_PARAM_LEN: usize = 255;

// ============================================================================
// Standard Opcodes
// ============================================================================

/// HCI_Reset (OGF 0x03, OCF 0x0003).
pub const HCI_RESET: u16 = 0x0C03;

// ============================================================================
// Intel Vendor Opcodes (OGF 0x3F)
// ============================================================================

/// Read firmware/hardware identity.
pub const HCI_INTEL_READ_SW_VERSION: u16 = 0xFC05;

/// Change the controller UART baud rate.
pub const HCI_INTEL_SET_UART_BAUD: u16 = 0xFC06;

/// Enter or leave manufacture mode.
pub const HCI_INTEL_MANUFACTURE_MODE: u16 = 0xFC11;

/// Write sleep mode (LPM) parameters.
pub const HCI_INTEL_WRITE_SLEEP_MODE: u16 = 0xFC27;

/// Write board data (BD data) into the controller.
pub const HCI_INTEL_WRITE_BD_DATA: u16 = 0xFC2F;

/// Write a block of patch data into controller memory.
pub const HCI_INTEL_MEM_WRITE: u16 = 0xFC8E;

// ============================================================================
// Command Parameters
// ============================================================================

/// Manufacture mode on payload.
pub const MANUFACTURE_MODE_ON: [u8; 2] = [0x01, 0x00];

/// First byte of the manufacture mode off payload. The second byte is the
/// patch activation flag.
pub const MANUFACTURE_MODE_OFF: u8 = 0x00;

/// Parameter length of the board data command.
pub const BD_DATA_PARAM_SIZE: usize = 80;

/// Maximum number of hex characters read from the board data file.
pub const BD_DATA_MAX_HEX_CHARS: usize = 1024;

/// Default location of the board data file.
pub const BD_DATA_DEFAULT_PATH: &str = "/system/etc/bluetooth/bddata";

/// Maximum data bytes per memory write command.
pub const PATCH_MAX_LENGTH: usize = 244;

/// Memory write mode byte.
pub const MEM_WRITE_MODE_BYTE: u8 = 0x00;

/// Address (4) + mode (1) + length (1).
pub const MEM_WRITE_HEADER_SIZE: usize = 6;

/// End-of-stream sentinel address in binary patch files.
pub const PATCH_END_ADDRESS: u32 = 0xFFFF_FFFF;

/// SET_UART_BAUD parameter for 2 Mbaud.
pub const UART_BAUD_2M_PARAM: u8 = 0x0A;

/// Host side baud rate matching [`UART_BAUD_2M_PARAM`].
pub const UART_BAUD_2M: u32 = 2_000_000;

/// Parameter length of WRITE_SLEEP_MODE.
pub const LPM_CMD_PARAM_SIZE: usize = 12;

// ============================================================================
// Events
// ============================================================================

/// Command Complete event code.
pub const HCI_COMMAND_COMPLETE_EVT: u8 = 0x0E;

/// Command Status event code.
pub const HCI_COMMAND_STATUS_EVT: u8 = 0x0F;

/// Vendor debug event code.
pub const HCI_VENDOR_EVT: u8 = 0xFF;

/// Byte offset of the status in a Command Complete event.
pub const HCI_EVT_CMD_CMPL_STATUS_OFFSET: usize = 5;

/// Byte offset of the status in a Command Status event.
pub const HCI_EVT_CMD_STATUS_STATUS_OFFSET: usize = 2;

/// Byte offset of the sub-event code in a vendor event.
pub const HCI_EVT_VENDOR_SUBEVENT_OFFSET: usize = 2;

/// Byte offset of the status in a vendor event.
pub const HCI_EVT_VENDOR_STATUS_OFFSET: usize = 3;

/// Hardware variant byte in the READ_SW_VERSION response.
pub const HCI_EVT_READ_HW_VARIANT: usize = 7;

/// Hardware revision byte in the READ_SW_VERSION response.
pub const HCI_EVT_READ_HW_REVISION: usize = 8;

/// First identity byte of a READ_SW_VERSION response used for `.seq` names.
pub const HCI_EVT_VERSION_ID_START: usize = 6;

/// Number of identity bytes used for `.seq` names.
pub const HCI_EVT_VERSION_ID_LEN: usize = 9;

/// Vendor sub-event codes carried in byte 2 of an [`HCI_VENDOR_EVT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VendorSubEvent {
    /// Controller finished booting.
    Startup = 0x00,
    /// Controller booted with default board data.
    DefaultBdData = 0x05,
    /// Board data write finished.
    WriteBdDataComplete = 0x19,
}

impl VendorSubEvent {
    /// Parse a sub-event code from a byte value.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(VendorSubEvent::Startup),
            0x05 => Some(VendorSubEvent::DefaultBdData),
            0x19 => Some(VendorSubEvent::WriteBdDataComplete),
            _ => None,
        }
    }
}

/// Memory status reported with [`VendorSubEvent::DefaultBdData`] that means
/// the controller wants board data.
pub const MEMORY_STATUS_INVALID: u8 = 0x02;

/// HCI success status.
pub const HCI_SUCCESS: u8 = 0x00;

// ============================================================================
// Patch Files
// ============================================================================

/// Binary patch extension.
pub const PATCH_EXT_BINARY: &str = ".pbn";

/// Text patch extension.
pub const PATCH_EXT_TEXT: &str = ".seq";

/// Default patch search directory.
pub const FW_PATCHFILE_LOCATION: &str = "/system/vendor/firmware/";

/// Longest patch path accepted by the locator.
pub const FW_PATCHFILE_PATH_MAXLEN: usize = 248;

/// Settlement delay before patch download when nothing is configured.
pub const DEFAULT_SETTLEMENT_DELAY: Duration = Duration::from_millis(100);

/// Per-chip settlement delays.
pub const FW_SETTLEMENT_TABLE: &[(&str, u64)] = &[("BCM43241", 200)];

// ============================================================================
// Serial
// ============================================================================

/// Default UART device.
pub const BLUETOOTH_UART_DEVICE_PORT: &str = "/dev/ttyIFX1";

/// Baud rate used while the controller is in its boot configuration.
pub const USERIAL_BAUD_RATE: u32 = 115_200;

/// Serial read timeout.
pub const USERIAL_READ_TIMEOUT: Duration = Duration::from_millis(1000);

/// Number of HCI channels the stack asks fds for.
pub const CH_MAX: usize = 4;

// ============================================================================
// Low Power Mode
// ============================================================================

/// Multiplier applied to the host stack idle threshold.
pub const LPM_IDLE_TIMEOUT_MULTIPLE: u32 = 10;

/// Default wait for CTS to follow BT_WAKE.
pub const CTS_WAIT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Poll period of the wake listener thread.
pub const LISTENER_POLL_TIMEOUT: Duration = Duration::from_millis(1000);

/// Poll period of the ioctl based CTS waiter.
pub const CTS_POLL_INTERVAL: Duration = Duration::from_millis(5);
