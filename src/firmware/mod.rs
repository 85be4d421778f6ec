//! Controller firmware configuration.
//!
//! # Sequence
//!
//! 1. Enter manufacture mode (after the default-BD-data event).
//! 2. Write board data (AG6xx only).
//! 3. Read the software version and derive the chip id.
//! 4. Locate and stream the patch, record by record or command by command.
//! 5. Leave manufacture mode with the patch flag and wait for STARTUP.
//!
//! A missing patch is not an error: the controller runs its ROM firmware.

pub mod bddata;
pub mod chip;
pub mod hw_config;
pub mod patch_locator;
pub mod patch_reader;
pub mod state;

pub use bddata::load_bd_data;
pub use chip::{Ag6xxUart, Boot, ChipFamily, ChipKind, Wp2Usb};
pub use hw_config::{FirmwareOptions, HostBaudFn, HwConfig};
pub use patch_locator::PatchLocator;
pub use patch_reader::{
    BinaryPatchReader, PatchFormat, PatchRecord, PatchStream, TextPatchReader,
};
pub use state::{HwConfigState, PatchState};
