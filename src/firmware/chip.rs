//! Chip families supported by the firmware sequence.
//!
//! The two families differ in how the sequence starts, whether board data
//! is written, how the chip identifier is derived from the version response
//! and how the patch is encoded on disk.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::patch_reader::PatchFormat;
use super::state::PatchState;
use crate::hci::config::*;
use crate::hci::HciEvent;

/// How a configuration cycle is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boot {
    /// Wait for the controller's unsolicited default-BD-data event.
    AwaitDefaultBdData,
    /// Send HCI_Reset and wait for the default-BD-data event it triggers.
    Reset,
}

/// Per-family behaviour of the firmware sequence.
pub trait ChipFamily: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn boot(&self) -> Boot;

    /// Value of the patch flag before any patch is downloaded.
    fn default_patch_state(&self) -> PatchState;

    /// Whether board data is written after entering manufacture mode.
    fn writes_bd_data(&self) -> bool;

    /// Whether manufacture mode is only entered on the default-BD-data event.
    fn gates_manufacture_on(&self) -> bool;

    /// Whether the link is a UART that can be switched to high speed.
    fn has_uart(&self) -> bool;

    fn patch_format(&self) -> PatchFormat;

    fn patch_extension(&self) -> &'static str;

    /// Patch file name stem from a READ_SW_VERSION response.
    fn chip_id(&self, version: &HciEvent<'_>) -> Option<String>;
}

/// AG6xx family on a UART link, binary patches.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ag6xxUart;

impl ChipFamily for Ag6xxUart {
    fn name(&self) -> &'static str {
        "AG6xx UART"
    }

    fn boot(&self) -> Boot {
        Boot::AwaitDefaultBdData
    }

    fn default_patch_state(&self) -> PatchState {
        PatchState::Disabled
    }

    fn writes_bd_data(&self) -> bool {
        true
    }

    fn gates_manufacture_on(&self) -> bool {
        false
    }

    fn has_uart(&self) -> bool {
        true
    }

    fn patch_format(&self) -> PatchFormat {
        PatchFormat::Binary
    }

    fn patch_extension(&self) -> &'static str {
        PATCH_EXT_BINARY
    }

    /// `(hw_variant << 8) | hw_revision` in lower-case hex, e.g. `a00`.
    fn chip_id(&self, version: &HciEvent<'_>) -> Option<String> {
        let variant = version.byte(HCI_EVT_READ_HW_VARIANT)?;
        let revision = version.byte(HCI_EVT_READ_HW_REVISION)?;
        let dev_id = u16::from(variant) << 8 | u16::from(revision);
        Some(format!("{:x}", dev_id))
    }
}

/// WP2 family on USB, text patches.
#[derive(Debug, Default, Clone, Copy)]
pub struct Wp2Usb;

impl ChipFamily for Wp2Usb {
    fn name(&self) -> &'static str {
        "WP2 USB"
    }

    fn boot(&self) -> Boot {
        Boot::Reset
    }

    fn default_patch_state(&self) -> PatchState {
        PatchState::NotApplicable
    }

    fn writes_bd_data(&self) -> bool {
        false
    }

    fn gates_manufacture_on(&self) -> bool {
        true
    }

    fn has_uart(&self) -> bool {
        false
    }

    fn patch_format(&self) -> PatchFormat {
        PatchFormat::Text
    }

    fn patch_extension(&self) -> &'static str {
        PATCH_EXT_TEXT
    }

    /// Nine identity bytes of the response as lower-case hex pairs.
    fn chip_id(&self, version: &HciEvent<'_>) -> Option<String> {
        let end = HCI_EVT_VERSION_ID_START + HCI_EVT_VERSION_ID_LEN;
        let bytes = version.bytes().get(HCI_EVT_VERSION_ID_START..end)?;
        Some(bytes.iter().map(|b| format!("{:02x}", b)).collect())
    }
}

/// Chip family selector as stored in settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChipKind {
    #[default]
    Ag6xxUart,
    Wp2Usb,
}

impl ChipKind {
    pub fn family(self) -> Box<dyn ChipFamily> {
        match self {
            ChipKind::Ag6xxUart => Box::new(Ag6xxUart),
            ChipKind::Wp2Usb => Box::new(Wp2Usb),
        }
    }
}
