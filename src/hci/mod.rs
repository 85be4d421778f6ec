//! HCI plumbing shared by every component of the vendor library.
//!
//! # Command Set
//!
//! The firmware sequence talks to the controller with a handful of Intel
//! vendor commands:
//! 1. **Manufacture mode on** - unlock patch loading
//! 2. **Write BD data** - board calibration data (UART parts only)
//! 3. **Read SW version** - identify the chip and pick a patch
//! 4. **Memory write** - stream the patch into controller RAM
//! 5. **Manufacture mode off** - leave manufacture mode, optionally activating the patch
//!
//! Low power mode uses **Write sleep mode** once firmware is running.

pub mod config;
mod error;
mod packet;
mod userial;

pub use error::{VendorError, VendorResult, STATUS_FAIL, STATUS_OK};
pub use packet::{HciBuffer, HciCommand, HciEvent};
pub use userial::UserialPort;
