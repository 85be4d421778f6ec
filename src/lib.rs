//! Intel Bluetooth HCI vendor library.
//!
//! Brings an Intel Bluetooth controller from reset to operational state on
//! behalf of a host Bluetooth stack, then manages its low power handshake.
//!
//! # Lifecycle
//!
//! 1. **Init** - the stack hands over its callback table and the local address
//! 2. **Power** - rfkill switches the radio on
//! 3. **Serial open** - the UART is opened and its fd returned per channel
//! 4. **Firmware configuration** - manufacture mode, board data, patch download
//! 5. **Low power mode** - sleep parameters plus the BT_WAKE/CTS handshake
//! 6. **Epilog** - optional HCI_Reset before shutdown
//!
//! # Example
//!
//! ```ignore
//! use libbt_vendor::{BtVendor, SettingsManager, VendorOp};
//!
//! let config = SettingsManager::new(Path::new("/etc/bluetooth")).load()?;
//! let vendor = BtVendor::init(Some(callbacks), local_address, config)?;
//! vendor.op(VendorOp::PowerCtrl(true))?;
//! vendor.op(VendorOp::UserialOpen)?;
//! vendor.op(VendorOp::FwCfg)?;
//! // completion events: vendor.on_event(route, buffer)
//! ```

pub mod firmware;
pub mod hci;
pub mod lpm;
pub mod settings;
pub mod traits;
pub mod upio;
mod vendor;

#[cfg(test)]
mod test_helpers;

pub use hci::{HciBuffer, HciCommand, HciEvent, VendorError, VendorResult, STATUS_FAIL, STATUS_OK};
pub use settings::{SettingsManager, VendorConfig};
pub use traits::{EventRoute, VendorCallbacks, VendorOpResult};
pub use upio::LineLevel;
pub use vendor::{op_status, BtVendor, OpOutcome, SignalSourceFactory, VendorOp};
