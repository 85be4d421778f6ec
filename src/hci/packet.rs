//! HCI command framing and event decoding.
//!
//! Commands are framed as `[opcode lo, opcode hi, param_len, params...]`.
//! Events arrive as `[event_code, param_len, params...]`.

use super::config::*;
use super::error::{VendorError, VendorResult};

// ============================================================================
// Transport Buffers
// ============================================================================

/// A buffer lent by the transport for one command or carrying one event.
///
/// Ownership moves to the transport on submit and back to the transport on
/// release; the firmware sequence never reuses a buffer across steps.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HciBuffer {
    data: Vec<u8>,
    capacity: usize,
}

impl HciBuffer {
    /// Create an empty buffer able to hold `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Wrap received event bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let capacity = bytes.len();
        Self {
            data: bytes,
            capacity,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Serialize a command into this buffer, replacing previous contents.
    pub fn write_command(&mut self, command: &HciCommand) -> VendorResult<()> {
        let size = command.encoded_len();
        if size > self.capacity {
            return Err(VendorError::CommandTooLarge {
                size,
                max_size: self.capacity,
            });
        }
        self.data.clear();
        self.data.extend_from_slice(&command.opcode.to_le_bytes());
        self.data.push(command.params.len() as u8);
        self.data.extend_from_slice(&command.params);
        Ok(())
    }
}

// ============================================================================
// Commands
// ============================================================================

/// An HCI command ready to be written into a transport buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HciCommand {
    opcode: u16,
    params: Vec<u8>,
}

impl HciCommand {
    /// Build a command, rejecting parameter blocks over 255 bytes.
    pub fn new(opcode: u16, params: Vec<u8>) -> VendorResult<Self> {
        if params.len() > HCI_CMD_MAX_PARAM_LEN {
            return Err(VendorError::CommandTooLarge {
                size: params.len(),
                max_size: HCI_CMD_MAX_PARAM_LEN,
            });
        }
        Ok(Self { opcode, params })
    }

    pub fn reset() -> Self {
        Self {
            opcode: HCI_RESET,
            params: Vec::new(),
        }
    }

    pub fn read_sw_version() -> Self {
        Self {
            opcode: HCI_INTEL_READ_SW_VERSION,
            params: Vec::new(),
        }
    }

    pub fn manufacture_on() -> Self {
        Self {
            opcode: HCI_INTEL_MANUFACTURE_MODE,
            params: MANUFACTURE_MODE_ON.to_vec(),
        }
    }

    /// Leave manufacture mode. `patch_flag` tells the controller whether to
    /// run the downloaded patch.
    pub fn manufacture_off(patch_flag: u8) -> Self {
        Self {
            opcode: HCI_INTEL_MANUFACTURE_MODE,
            params: vec![MANUFACTURE_MODE_OFF, patch_flag],
        }
    }

    pub fn set_uart_baud(baud_param: u8) -> Self {
        Self {
            opcode: HCI_INTEL_SET_UART_BAUD,
            params: vec![baud_param],
        }
    }

    pub fn write_bd_data(bd_data: &[u8; BD_DATA_PARAM_SIZE]) -> Self {
        Self {
            opcode: HCI_INTEL_WRITE_BD_DATA,
            params: bd_data.to_vec(),
        }
    }

    pub fn write_sleep_mode(params: &[u8; LPM_CMD_PARAM_SIZE]) -> Self {
        Self {
            opcode: HCI_INTEL_WRITE_SLEEP_MODE,
            params: params.to_vec(),
        }
    }

    /// Build a memory write of at most [`PATCH_MAX_LENGTH`] bytes.
    ///
    /// Payload: [address(4, LE), mode(1), length(1), data...]
    pub fn mem_write(address: u32, data: &[u8]) -> VendorResult<Self> {
        if data.len() > PATCH_MAX_LENGTH {
            return Err(VendorError::CommandTooLarge {
                size: data.len(),
                max_size: PATCH_MAX_LENGTH,
            });
        }
        let mut params = Vec::with_capacity(MEM_WRITE_HEADER_SIZE + data.len());
        params.extend_from_slice(&address.to_le_bytes());
        params.push(MEM_WRITE_MODE_BYTE);
        params.push(data.len() as u8);
        params.extend_from_slice(data);
        Ok(Self {
            opcode: HCI_INTEL_MEM_WRITE,
            params,
        })
    }

    pub fn opcode(&self) -> u16 {
        self.opcode
    }

    pub fn params(&self) -> &[u8] {
        &self.params
    }

    /// Size of the framed command.
    pub fn encoded_len(&self) -> usize {
        HCI_CMD_PREAMBLE_SIZE + self.params.len()
    }

    /// Framed command bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&self.opcode.to_le_bytes());
        out.push(self.params.len() as u8);
        out.extend_from_slice(&self.params);
        out
    }
}

// ============================================================================
// Events
// ============================================================================

/// Read-only view over received event bytes.
#[derive(Debug, Clone, Copy)]
pub struct HciEvent<'a> {
    bytes: &'a [u8],
}

impl<'a> HciEvent<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn code(&self) -> Option<u8> {
        self.bytes.first().copied()
    }

    pub fn byte(&self, index: usize) -> Option<u8> {
        self.bytes.get(index).copied()
    }

    /// Sub-event code if this is a vendor debug event.
    pub fn vendor_subevent(&self) -> Option<u8> {
        if self.code() == Some(HCI_VENDOR_EVT) {
            self.byte(HCI_EVT_VENDOR_SUBEVENT_OFFSET)
        } else {
            None
        }
    }

    pub fn is_vendor(&self, subevent: VendorSubEvent) -> bool {
        self.vendor_subevent() == Some(subevent as u8)
    }

    /// Decode the status carried by this event.
    ///
    /// Command Complete and Command Status carry an HCI status byte; vendor
    /// events are checked per sub-event; anything else counts as success.
    pub fn status(&self) -> u8 {
        const FAILURE: u8 = 0x01;
        let Some(code) = self.code() else {
            return FAILURE;
        };
        match code {
            HCI_COMMAND_COMPLETE_EVT => self
                .byte(HCI_EVT_CMD_CMPL_STATUS_OFFSET)
                .unwrap_or(FAILURE),
            HCI_COMMAND_STATUS_EVT => self
                .byte(HCI_EVT_CMD_STATUS_STATUS_OFFSET)
                .unwrap_or(FAILURE),
            HCI_VENDOR_EVT => match self.vendor_subevent().and_then(VendorSubEvent::from_byte) {
                Some(VendorSubEvent::Startup) => HCI_SUCCESS,
                Some(VendorSubEvent::WriteBdDataComplete) => {
                    self.byte(HCI_EVT_VENDOR_STATUS_OFFSET).unwrap_or(FAILURE)
                }
                Some(VendorSubEvent::DefaultBdData) => {
                    if self.byte(HCI_EVT_VENDOR_STATUS_OFFSET) == Some(MEMORY_STATUS_INVALID) {
                        HCI_SUCCESS
                    } else {
                        FAILURE
                    }
                }
                None => FAILURE,
            },
            _ => HCI_SUCCESS,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status() == HCI_SUCCESS
    }
}
