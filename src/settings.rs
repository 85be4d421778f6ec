//! Vendor library configuration with JSON persistence.
//!
//! This module provides:
//! - `VendorConfig`, everything the library reads at init
//! - Persistence to a JSON file in a configuration directory
//! - Conversion into the firmware sequence options
//!
//! Keys are camelCase. The key spellings of the old `bt_vendor.conf`
//! (`UartPort`, `FwPatchFilePath`, `FwPatchFileName`,
//! `FwPatchSettlementDelay`) are accepted on load.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::firmware::{ChipKind, FirmwareOptions};
use crate::hci::config::*;
use crate::hci::VendorResult;
use crate::lpm::LpmParams;
use crate::upio::rfkill::RFKILL_SYSFS_ROOT;

/// Vendor library configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct VendorConfig {
    pub chip_family: ChipKind,

    /// Serial device the controller is attached to.
    #[serde(alias = "UartPort")]
    pub uart_port: String,

    #[serde(alias = "FwPatchFilePath")]
    pub fw_patch_file_path: String,

    /// Skip the chip id search and use this patch file.
    #[serde(alias = "FwPatchFileName")]
    pub fw_patch_file_name: Option<String>,

    #[serde(alias = "FwPatchSettlementDelay")]
    pub fw_patch_settlement_delay_ms: Option<u64>,

    pub bddata_path: String,

    pub lpm: LpmParams,

    pub lpm_idle_timeout_multiple: u32,

    /// How long BT_WAKE may wait for CTS to follow.
    pub cts_wait_timeout_ms: u64,

    /// Switch AG6xx UART links to 2 Mbaud during configuration.
    pub uart_high_speed: bool,

    pub sco_config_included: bool,

    /// Finish the epilog with HCI_Reset.
    pub end_with_hci_reset: bool,

    /// Leave radio power alone on POWER_CTRL.
    pub rfkill_disabled: bool,

    pub rfkill_root: String,
}

impl Default for VendorConfig {
    fn default() -> Self {
        Self {
            chip_family: ChipKind::default(),
            uart_port: BLUETOOTH_UART_DEVICE_PORT.to_string(),
            fw_patch_file_path: FW_PATCHFILE_LOCATION.to_string(),
            fw_patch_file_name: None,
            fw_patch_settlement_delay_ms: None,
            bddata_path: BD_DATA_DEFAULT_PATH.to_string(),
            lpm: LpmParams::default(),
            lpm_idle_timeout_multiple: LPM_IDLE_TIMEOUT_MULTIPLE,
            cts_wait_timeout_ms: CTS_WAIT_TIMEOUT.as_millis() as u64,
            uart_high_speed: false,
            sco_config_included: false,
            end_with_hci_reset: false,
            rfkill_disabled: false,
            rfkill_root: RFKILL_SYSFS_ROOT.to_string(),
        }
    }
}

impl VendorConfig {
    /// Options for the firmware configuration sequence.
    pub fn firmware_options(&self) -> FirmwareOptions {
        FirmwareOptions {
            patch_dir: self.fw_patch_file_path.clone(),
            patch_name: self.fw_patch_file_name.clone(),
            bddata_path: PathBuf::from(&self.bddata_path),
            settlement_delay: self.fw_patch_settlement_delay_ms.map(Duration::from_millis),
            uart_high_speed: self.uart_high_speed,
        }
    }

    pub fn cts_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.cts_wait_timeout_ms)
    }

    /// Check if this configuration differs from defaults.
    pub fn has_non_default_settings(&self) -> bool {
        *self != Self::default()
    }
}

/// Settings file name stored in the configuration directory.
const SETTINGS_FILENAME: &str = "bt_vendor.json";

/// Manages persistence of the vendor configuration to a JSON file.
pub struct SettingsManager {
    settings_file_path: PathBuf,
}

impl SettingsManager {
    /// Create a settings manager for the given configuration directory.
    pub fn new(config_dir: &Path) -> Self {
        let settings_file_path = config_dir.join(SETTINGS_FILENAME);
        Self { settings_file_path }
    }

    /// Load settings from disk, returning defaults if the file doesn't exist.
    pub fn load(&self) -> VendorResult<VendorConfig> {
        if !self.settings_file_path.exists() {
            return Ok(VendorConfig::default());
        }

        let contents = fs::read_to_string(&self.settings_file_path)?;

        // Handle empty file gracefully
        if contents.trim().is_empty() {
            return Ok(VendorConfig::default());
        }

        Ok(serde_json::from_str(&contents)?)
    }

    /// Save settings to disk.
    pub fn save(&self, settings: &VendorConfig) -> VendorResult<()> {
        if let Some(parent) = self.settings_file_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(settings)?;
        fs::write(&self.settings_file_path, contents)?;
        Ok(())
    }

    /// Get the path where settings are stored.
    pub fn settings_path(&self) -> &Path {
        &self.settings_file_path
    }
}
