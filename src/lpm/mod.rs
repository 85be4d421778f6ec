//! Low power mode.
//!
//! Sleep parameters go to the controller in one WRITE_SLEEP_MODE command.
//! The BT_WAKE handshake is delegated to the wake channel when its listener
//! runs, and to plain ioctls otherwise.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::hci::config::*;
use crate::hci::{HciBuffer, HciCommand, HciEvent, VendorError, VendorResult};
use crate::traits::{EventRoute, VendorCallbacks, VendorOpResult};
use crate::upio::{DeviceControl, IoctlCtsWaiter, LineLevel, Upio, UpioLine, WakeChannel};

/// Parameters of the WRITE_SLEEP_MODE command, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LpmParams {
    pub sleep_mode: u8,
    /// Host idle time before sleep, in units of the idle multiplier.
    pub host_stack_idle_threshold: u8,
    pub host_controller_idle_threshold: u8,
    pub bt_wake_polarity: u8,
    pub host_wake_polarity: u8,
    pub allow_host_sleep_during_sco: u8,
    pub combine_sleep_mode_and_lpm: u8,
    pub enable_uart_txd_tri_state: u8,
    pub sleep_guard_time: u8,
    pub wakeup_guard_time: u8,
    pub txd_config: u8,
    pub pulsed_host_wake: u8,
}

impl Default for LpmParams {
    fn default() -> Self {
        Self {
            sleep_mode: 1,
            host_stack_idle_threshold: 1,
            host_controller_idle_threshold: 1,
            bt_wake_polarity: 1,
            host_wake_polarity: 1,
            allow_host_sleep_during_sco: 1,
            combine_sleep_mode_and_lpm: 1,
            enable_uart_txd_tri_state: 0,
            sleep_guard_time: 0,
            wakeup_guard_time: 0,
            txd_config: 0,
            pulsed_host_wake: 0,
        }
    }
}

impl LpmParams {
    pub fn to_bytes(&self) -> [u8; LPM_CMD_PARAM_SIZE] {
        [
            self.sleep_mode,
            self.host_stack_idle_threshold,
            self.host_controller_idle_threshold,
            self.bt_wake_polarity,
            self.host_wake_polarity,
            self.allow_host_sleep_during_sco,
            self.combine_sleep_mode_and_lpm,
            self.enable_uart_txd_tri_state,
            self.sleep_guard_time,
            self.wakeup_guard_time,
            self.txd_config,
            self.pulsed_host_wake,
        ]
    }
}

/// Low power mode state for one controller.
pub struct LpmController {
    params: LpmParams,
    idle_multiplier: u32,
    cts_timeout: Duration,
    lines: Arc<Mutex<Upio>>,
}

impl LpmController {
    pub fn new(params: LpmParams) -> Self {
        Self {
            params,
            idle_multiplier: LPM_IDLE_TIMEOUT_MULTIPLE,
            cts_timeout: CTS_WAIT_TIMEOUT,
            lines: Arc::new(Mutex::new(Upio::new())),
        }
    }

    pub fn with_idle_multiplier(mut self, multiplier: u32) -> Self {
        self.idle_multiplier = multiplier;
        self
    }

    pub fn with_cts_timeout(mut self, timeout: Duration) -> Self {
        self.cts_timeout = timeout;
        self
    }

    /// Line mirror shared with the host-wake listener.
    pub fn lines(&self) -> Arc<Mutex<Upio>> {
        Arc::clone(&self.lines)
    }

    fn lock_lines(&self) -> MutexGuard<'_, Upio> {
        self.lines.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Idle time before the stack may let the controller sleep.
    pub fn idle_timeout(&self) -> u32 {
        u32::from(self.params.host_stack_idle_threshold) * self.idle_multiplier
    }

    /// Submit WRITE_SLEEP_MODE with the configured parameters (`on`) or
    /// zeros. The result arrives later through [`Self::on_event`].
    pub fn enable(&self, callbacks: &dyn VendorCallbacks, on: bool) -> VendorResult<()> {
        let payload = if on {
            self.params.to_bytes()
        } else {
            [0u8; LPM_CMD_PARAM_SIZE]
        };
        let command = HciCommand::write_sleep_mode(&payload);

        let mut buf = callbacks.alloc(HCI_CMD_MAX_LEN).ok_or(VendorError::NoBuffer)?;
        if let Err(e) = buf.write_command(&command) {
            callbacks.dealloc(buf);
            return Err(e);
        }

        if !callbacks.xmit(command.opcode(), buf, EventRoute::Lpm) {
            return Err(VendorError::XmitRejected {
                opcode: command.opcode(),
            });
        }
        self.lock_lines().set(UpioLine::LpmMode, LineLevel::from(on));
        info!("lpm: {} requested", if on { "enable" } else { "disable" });
        Ok(())
    }

    /// Completion of WRITE_SLEEP_MODE. Releases the event.
    pub fn on_event(&self, callbacks: &dyn VendorCallbacks, event: HciBuffer) {
        let status = HciEvent::new(event.as_bytes()).byte(HCI_EVT_CMD_CMPL_STATUS_OFFSET);
        callbacks.dealloc(event);

        let result = if status == Some(HCI_SUCCESS) {
            VendorOpResult::Success
        } else {
            warn!("lpm: sleep mode command failed, status {:?}", status);
            VendorOpResult::Fail
        };
        callbacks.lpm_cb(result);
    }

    /// Drive BT_WAKE without waiting for CTS. Unchanged levels are skipped.
    pub fn wake_set_state(&self, device: &dyn DeviceControl, level: LineLevel) -> VendorResult<()> {
        if !self.lock_lines().set(UpioLine::BtWake, level) {
            return Ok(());
        }
        device.set_bt_wake(level)
    }

    /// Drive BT_WAKE and wait until CTS follows.
    pub fn set_bt_wake_state(
        &self,
        device: &dyn DeviceControl,
        wake: Option<&WakeChannel>,
        level: LineLevel,
    ) -> VendorResult<()> {
        match wake {
            Some(channel) if channel.is_running() => {
                channel.set_wake_and_wait_for_cts(device, level)?
            }
            _ => {
                debug!("lpm: no wake listener, polling CTS");
                IoctlCtsWaiter::new(device, self.cts_timeout).set_wake_and_wait_for_cts(level)?
            }
        }
        self.lock_lines().set(UpioLine::BtWake, level);
        Ok(())
    }

    /// Current CTS level, from the listener when it has seen one.
    pub fn cts_state(
        &self,
        device: &dyn DeviceControl,
        wake: Option<&WakeChannel>,
    ) -> VendorResult<LineLevel> {
        match wake.and_then(WakeChannel::cts_state) {
            Some(level) => Ok(level),
            None => device.cts(),
        }
    }

    pub fn set_rts_state(&self, device: &dyn DeviceControl, level: LineLevel) -> VendorResult<()> {
        device.set_rts(level)
    }

    pub fn host_wake(&self) -> Option<LineLevel> {
        self.lock_lines().level(UpioLine::HostWake)
    }
}
