//! Bluetooth power through the rfkill class in sysfs.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::hci::{VendorError, VendorResult};

pub const RFKILL_SYSFS_ROOT: &str = "/sys/class/rfkill";

const RFKILL_TYPE_BLUETOOTH: &str = "bluetooth";

/// Power switch for the Bluetooth radio.
#[derive(Debug, Clone)]
pub struct Rfkill {
    root: PathBuf,
    state_path: Option<PathBuf>,
}

impl Rfkill {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            state_path: None,
        }
    }

    /// Find the `rfkill{N}` entry whose type is bluetooth.
    fn locate(&self) -> VendorResult<PathBuf> {
        let entries = fs::read_dir(&self.root).map_err(|e| {
            debug!("rfkill: cannot read {}: {}", self.root.display(), e);
            VendorError::RfkillNotFound
        })?;

        let mut candidates: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| index_of(p).is_some())
            .collect();
        candidates.sort_by_key(|p| index_of(p));

        candidates
            .into_iter()
            .find(|dir| {
                fs::read_to_string(dir.join("type"))
                    .map(|t| t.trim() == RFKILL_TYPE_BLUETOOTH)
                    .unwrap_or(false)
            })
            .map(|dir| dir.join("state"))
            .ok_or(VendorError::RfkillNotFound)
    }

    /// Turn the radio on or off.
    pub fn set_power(&mut self, on: bool) -> VendorResult<()> {
        let state_path = match &self.state_path {
            Some(path) => path.clone(),
            None => {
                let path = self.locate()?;
                self.state_path = Some(path.clone());
                path
            }
        };

        fs::write(&state_path, if on { "1" } else { "0" })?;
        info!("rfkill: bluetooth power {}", if on { "on" } else { "off" });
        Ok(())
    }
}

fn index_of(path: &Path) -> Option<u32> {
    path.file_name()?
        .to_str()?
        .strip_prefix("rfkill")?
        .parse()
        .ok()
}
