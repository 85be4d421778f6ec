use serde::{Deserialize, Serialize};

/// Step of the firmware configuration sequence.
///
/// `SetBaudHs`/`SetHostBaud` only run when a high speed UART is configured,
/// `BdData`/`BdDataStatus` only for chips that take board data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HwConfigState {
    /// Idle, or waiting for the controller's first unsolicited event.
    #[default]
    Init,
    /// Controller is being switched to the high speed baud rate.
    SetBaudHs,
    /// Host UART is being retuned to match the controller.
    SetHostBaud,
    ManufactureOn,
    BdData,
    /// Waiting for the board data write to be acknowledged.
    BdDataStatus,
    ReadSwVersion,
    FindPatch,
    /// Settlement delay before the first patch write.
    DlMinidriver,
    /// Fetch the next patch record (or line).
    DlFwPatch,
    /// Continue writing the current binary record.
    DlFwPatch1,
    ManufactureOff,
    ManufactureOffComplete,
    /// Waiting for the controller startup event.
    Success,
}

impl HwConfigState {
    /// Human-readable label used in log lines.
    pub fn message(&self) -> &'static str {
        match self {
            HwConfigState::Init => "idle",
            HwConfigState::SetBaudHs => "switching controller baud rate",
            HwConfigState::SetHostBaud => "switching host baud rate",
            HwConfigState::ManufactureOn => "entering manufacture mode",
            HwConfigState::BdData => "writing board data",
            HwConfigState::BdDataStatus => "waiting for board data status",
            HwConfigState::ReadSwVersion => "reading software version",
            HwConfigState::FindPatch => "looking for firmware patch",
            HwConfigState::DlMinidriver => "settling before patch download",
            HwConfigState::DlFwPatch => "downloading firmware patch",
            HwConfigState::DlFwPatch1 => "downloading firmware patch record",
            HwConfigState::ManufactureOff => "leaving manufacture mode",
            HwConfigState::ManufactureOffComplete => "waiting for manufacture mode exit",
            HwConfigState::Success => "waiting for controller startup",
        }
    }

    /// Whether a patch file may be open in this state.
    pub fn is_downloading(&self) -> bool {
        matches!(
            self,
            HwConfigState::DlMinidriver | HwConfigState::DlFwPatch | HwConfigState::DlFwPatch1
        )
    }
}

/// Patch activation flag sent with manufacture mode off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[repr(u8)]
pub enum PatchState {
    /// Leave manufacture mode without a reset.
    NotApplicable = 0x00,
    /// Reset with patches deactivated.
    Disabled = 0x01,
    /// Reset with the downloaded patch activated.
    Enabled = 0x02,
}

impl PatchState {
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn is_enabled(self) -> bool {
        self == PatchState::Enabled
    }
}
