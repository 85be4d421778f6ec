use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::hci::config::*;
use crate::hci::HciBuffer;
use crate::traits::{EventRoute, VendorCallbacks, VendorOpResult};
use crate::upio::LineLevel;

/// Command Complete event: `[0x0E, len, 0x01, opcode lo, opcode hi, status, extra..]`
pub fn command_complete(opcode: u16, status: u8, extra: &[u8]) -> HciBuffer {
    let [lo, hi] = opcode.to_le_bytes();
    let mut bytes = vec![HCI_COMMAND_COMPLETE_EVT, (4 + extra.len()) as u8, 0x01, lo, hi, status];
    bytes.extend_from_slice(extra);
    HciBuffer::from_bytes(bytes)
}

/// Vendor event: `[0xFF, len, subevent, payload..]`
pub fn vendor_event(subevent: VendorSubEvent, payload: &[u8]) -> HciBuffer {
    let mut bytes = vec![HCI_VENDOR_EVT, (1 + payload.len()) as u8, subevent as u8];
    bytes.extend_from_slice(payload);
    HciBuffer::from_bytes(bytes)
}

pub fn default_bd_data() -> HciBuffer {
    vendor_event(VendorSubEvent::DefaultBdData, &[MEMORY_STATUS_INVALID])
}

pub fn bd_data_complete(status: u8) -> HciBuffer {
    vendor_event(VendorSubEvent::WriteBdDataComplete, &[status])
}

pub fn startup() -> HciBuffer {
    vendor_event(VendorSubEvent::Startup, &[])
}

/// Builder for binary patch streams
pub struct BinaryPatchBuilder {
    bytes: Vec<u8>,
}

impl BinaryPatchBuilder {
    pub fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    pub fn record(mut self, address: u32, data: &[u8]) -> Self {
        self.bytes.extend_from_slice(&address.to_le_bytes());
        self.bytes.extend_from_slice(&(data.len() as u32).to_le_bytes());
        self.bytes.extend_from_slice(data);
        self
    }

    /// Stream terminated by the end-of-patch sentinel
    pub fn build(mut self) -> Vec<u8> {
        self.bytes.extend_from_slice(&PATCH_END_ADDRESS.to_le_bytes());
        self.bytes
    }

    /// Stream without sentinel, cut `missing` bytes short
    pub fn build_truncated(mut self, missing: usize) -> Vec<u8> {
        let len = self.bytes.len().saturating_sub(missing);
        self.bytes.truncate(len);
        self.bytes
    }
}

impl Default for BinaryPatchBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a [`RecordingCallbacks`] has seen
#[derive(Debug, Default, Clone)]
pub struct Recorded {
    /// Framed commands in submit order
    pub sent: Vec<(u16, Vec<u8>, EventRoute)>,
    pub allocs: usize,
    /// Unused command buffers handed back
    pub released_commands: usize,
    /// Event buffers handed back
    pub released_events: usize,
    pub rejected: usize,
    pub fwcfg: Vec<VendorOpResult>,
    pub lpm: Vec<VendorOpResult>,
    pub scocfg: Vec<VendorOpResult>,
    pub epilog: Vec<VendorOpResult>,
    pub host_wake: Vec<LineLevel>,
    pub registered: Vec<EventRoute>,
    pub deregistered: usize,
}

/// Callback table that records calls instead of talking to a stack
#[derive(Default)]
pub struct RecordingCallbacks {
    recorded: Mutex<Recorded>,
    no_buffers: AtomicBool,
    reject_xmit: AtomicBool,
}

impl RecordingCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_no_buffers(&self, value: bool) {
        self.no_buffers.store(value, Ordering::SeqCst);
    }

    pub fn set_reject_xmit(&self, value: bool) {
        self.reject_xmit.store(value, Ordering::SeqCst);
    }

    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap()
    }

    pub fn recorded(&self) -> Recorded {
        self.lock().clone()
    }

    pub fn sent_opcodes(&self) -> Vec<u16> {
        self.lock().sent.iter().map(|(op, _, _)| *op).collect()
    }

    pub fn sent_routes(&self) -> Vec<EventRoute> {
        self.lock().sent.iter().map(|(_, _, route)| *route).collect()
    }

    /// Parameters of the `index`th submitted command
    pub fn sent_params(&self, index: usize) -> Vec<u8> {
        self.lock().sent[index].1[HCI_CMD_PREAMBLE_SIZE..].to_vec()
    }

    pub fn last_params(&self) -> Option<Vec<u8>> {
        self.lock()
            .sent
            .last()
            .map(|(_, frame, _)| frame[HCI_CMD_PREAMBLE_SIZE..].to_vec())
    }

    /// `(address, data)` of every MEM_WRITE
    pub fn mem_writes(&self) -> Vec<(u32, Vec<u8>)> {
        self.lock()
            .sent
            .iter()
            .filter(|(op, _, _)| *op == HCI_INTEL_MEM_WRITE)
            .map(|(_, frame, _)| {
                let params = &frame[HCI_CMD_PREAMBLE_SIZE..];
                let address = u32::from_le_bytes([params[0], params[1], params[2], params[3]]);
                (address, params[MEM_WRITE_HEADER_SIZE..].to_vec())
            })
            .collect()
    }

    /// Patch flag of every manufacture-mode-off command
    pub fn manufacture_off_flags(&self) -> Vec<u8> {
        self.lock()
            .sent
            .iter()
            .filter(|(op, frame, _)| {
                *op == HCI_INTEL_MANUFACTURE_MODE
                    && frame[HCI_CMD_PREAMBLE_SIZE] == MANUFACTURE_MODE_OFF
            })
            .map(|(_, frame, _)| frame[HCI_CMD_PREAMBLE_SIZE + 1])
            .collect()
    }

    pub fn fwcfg_results(&self) -> Vec<VendorOpResult> {
        self.lock().fwcfg.clone()
    }

    pub fn lpm_results(&self) -> Vec<VendorOpResult> {
        self.lock().lpm.clone()
    }

    /// Every allocated command buffer was either submitted or released.
    pub fn assert_buffers_balanced(&self) {
        let r = self.lock();
        assert_eq!(
            r.allocs,
            r.sent.len() + r.rejected + r.released_commands,
            "command buffers leaked: {:?}",
            *r
        );
    }
}

impl VendorCallbacks for RecordingCallbacks {
    fn alloc(&self, size: usize) -> Option<HciBuffer> {
        if self.no_buffers.load(Ordering::SeqCst) {
            return None;
        }
        self.lock().allocs += 1;
        Some(HciBuffer::with_capacity(size))
    }

    fn dealloc(&self, buffer: HciBuffer) {
        // Command buffers are only ever released before anything is written.
        let mut r = self.lock();
        if buffer.is_empty() {
            r.released_commands += 1;
        } else {
            r.released_events += 1;
        }
    }

    fn xmit(&self, opcode: u16, buffer: HciBuffer, route: EventRoute) -> bool {
        let mut r = self.lock();
        if self.reject_xmit.load(Ordering::SeqCst) {
            r.rejected += 1;
            return false;
        }
        r.sent.push((opcode, buffer.as_bytes().to_vec(), route));
        true
    }

    fn fwcfg_cb(&self, result: VendorOpResult) {
        self.lock().fwcfg.push(result);
    }

    fn lpm_cb(&self, result: VendorOpResult) {
        self.lock().lpm.push(result);
    }

    fn scocfg_cb(&self, result: VendorOpResult) {
        self.lock().scocfg.push(result);
    }

    fn epilog_cb(&self, result: VendorOpResult) {
        self.lock().epilog.push(result);
    }

    fn set_host_wake_state(&self, level: LineLevel) {
        self.lock().host_wake.push(level);
    }

    fn register_internal_events(&self, route: EventRoute) -> bool {
        self.lock().registered.push(route);
        true
    }

    fn deregister_internal_events(&self) {
        self.lock().deregistered += 1;
    }
}
