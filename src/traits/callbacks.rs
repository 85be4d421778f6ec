use crate::hci::HciBuffer;
use crate::upio::LineLevel;

#[cfg(test)]
use mockall::automock;

/// Outcome reported through the single-shot completion callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VendorOpResult {
    Success,
    Fail,
}

/// Which component a submitted command's completion event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventRoute {
    HwConfig,
    Lpm,
    Epilog,
}

/// Callback table the Bluetooth stack hands to the vendor library at init.
///
/// The stack owns the HCI buffer pool and the transmit path. Completion
/// events for a submitted command come back through
/// [`crate::BtVendor::on_event`] tagged with the [`EventRoute`] given at
/// submit time.
#[cfg_attr(test, automock)]
pub trait VendorCallbacks: Send + Sync {
    /// Borrow a command buffer of at least `size` bytes.
    fn alloc(&self, size: usize) -> Option<HciBuffer>;

    /// Return a buffer to the pool.
    fn dealloc(&self, buffer: HciBuffer);

    /// Submit a command. Ownership of `buffer` moves to the transport.
    fn xmit(&self, opcode: u16, buffer: HciBuffer, route: EventRoute) -> bool;

    /// Firmware configuration finished.
    fn fwcfg_cb(&self, result: VendorOpResult);

    /// LPM mode change finished.
    fn lpm_cb(&self, result: VendorOpResult);

    /// SCO configuration finished.
    fn scocfg_cb(&self, result: VendorOpResult);

    /// Epilog finished.
    fn epilog_cb(&self, result: VendorOpResult);

    /// HOST_WAKE changed level.
    fn set_host_wake_state(&self, level: LineLevel);

    /// Deliver unsolicited controller events to `route` until deregistered.
    fn register_internal_events(&self, route: EventRoute) -> bool;

    fn deregister_internal_events(&self);
}
