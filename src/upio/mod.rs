//! Wake and flow-control lines between host and controller.
//!
//! BT_WAKE is driven by the host through a driver ioctl. The driver reports
//! CTS and HOST_WAKE changes back over a netlink socket, read by a listener
//! thread owned by [`WakeChannel`].

pub mod ioctl;
pub mod netlink;
pub mod rfkill;

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};

use crate::hci::config::{CTS_WAIT_TIMEOUT, LISTENER_POLL_TIMEOUT};
use crate::hci::{VendorError, VendorResult};

pub use ioctl::{DeviceControl, FdDeviceControl, IoctlCtsWaiter};
pub use netlink::NetlinkSocket;
pub use rfkill::Rfkill;

#[cfg(test)]
pub use ioctl::MockDeviceControl;

/// Electrical level of a handshake line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineLevel {
    High,
    Low,
}

impl LineLevel {
    pub fn name(self) -> &'static str {
        match self {
            LineLevel::High => "high",
            LineLevel::Low => "low",
        }
    }

    pub(crate) fn as_arg(self) -> libc::c_ulong {
        match self {
            LineLevel::High => 1,
            LineLevel::Low => 0,
        }
    }

    pub(crate) fn from_arg(arg: libc::c_ulong) -> Self {
        if arg != 0 {
            LineLevel::High
        } else {
            LineLevel::Low
        }
    }
}

impl From<bool> for LineLevel {
    fn from(asserted: bool) -> Self {
        if asserted {
            LineLevel::High
        } else {
            LineLevel::Low
        }
    }
}

impl fmt::Display for LineLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Notification from the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum LineSignal {
    HostWakeHigh = 0,
    HostWakeLow = 1,
    CtsHigh = 2,
    CtsLow = 3,
}

impl LineSignal {
    pub fn from_raw(value: u32) -> Option<Self> {
        match value {
            0 => Some(LineSignal::HostWakeHigh),
            1 => Some(LineSignal::HostWakeLow),
            2 => Some(LineSignal::CtsHigh),
            3 => Some(LineSignal::CtsLow),
            _ => None,
        }
    }

    pub fn level(self) -> LineLevel {
        match self {
            LineSignal::HostWakeHigh | LineSignal::CtsHigh => LineLevel::High,
            LineSignal::HostWakeLow | LineSignal::CtsLow => LineLevel::Low,
        }
    }

    pub fn is_cts(self) -> bool {
        matches!(self, LineSignal::CtsHigh | LineSignal::CtsLow)
    }
}

/// Where the listener reads driver notifications from.
pub trait SignalSource {
    /// Wait up to `timeout` for one notification. `Ok(None)` on timeout or
    /// an unrecognised message; `Err` ends the listener.
    fn next_signal(&mut self, timeout: Duration) -> io::Result<Option<LineSignal>>;
}

impl<S: SignalSource + ?Sized> SignalSource for Box<S> {
    fn next_signal(&mut self, timeout: Duration) -> io::Result<Option<LineSignal>> {
        (**self).next_signal(timeout)
    }
}

/// Called from the listener thread on every HOST_WAKE change.
pub type HostWakeFn = Arc<dyn Fn(LineLevel) + Send + Sync>;

struct Shared {
    cts: Mutex<Option<LineLevel>>,
    cts_changed: Condvar,
    running: AtomicBool,
}

impl Shared {
    fn lock_cts(&self) -> MutexGuard<'_, Option<LineLevel>> {
        self.cts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Notification listener plus the CTS state it maintains.
pub struct WakeChannel {
    shared: Arc<Shared>,
    listener: Option<JoinHandle<()>>,
    cts_timeout: Duration,
    poll_timeout: Duration,
}

impl WakeChannel {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                cts: Mutex::new(None),
                cts_changed: Condvar::new(),
                running: AtomicBool::new(false),
            }),
            listener: None,
            cts_timeout: CTS_WAIT_TIMEOUT,
            poll_timeout: LISTENER_POLL_TIMEOUT,
        }
    }

    pub fn with_cts_timeout(mut self, timeout: Duration) -> Self {
        self.cts_timeout = timeout;
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Last CTS level reported by the driver.
    pub fn cts_state(&self) -> Option<LineLevel> {
        *self.shared.lock_cts()
    }

    /// Spawn the listener thread reading from `source`.
    pub fn start_listener<S>(&mut self, mut source: S, on_host_wake: HostWakeFn) -> VendorResult<()>
    where
        S: SignalSource + Send + 'static,
    {
        if self.is_running() {
            return Err(VendorError::ChannelError {
                reason: "listener already running".to_string(),
            });
        }
        if let Some(stale) = self.listener.take() {
            let _ = stale.join();
        }

        *self.shared.lock_cts() = None;
        self.shared.running.store(true, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let poll = self.poll_timeout;
        let handle = thread::Builder::new()
            .name("bt_vendor_lpm".to_string())
            .spawn(move || listen(&shared, &mut source, poll, on_host_wake.as_ref()))
            .map_err(|e| {
                self.shared.running.store(false, Ordering::SeqCst);
                VendorError::ChannelError {
                    reason: format!("listener thread: {}", e),
                }
            })?;

        self.listener = Some(handle);
        info!("upio: wake listener started");
        Ok(())
    }

    /// Drive BT_WAKE to `level` and block until CTS reports the same level.
    ///
    /// A CTS notification that arrived before the call is honoured: the
    /// state is checked under the lock before waiting.
    pub fn set_wake_and_wait_for_cts(
        &self,
        device: &dyn DeviceControl,
        level: LineLevel,
    ) -> VendorResult<()> {
        if !self.is_running() {
            return Err(VendorError::ChannelClosed);
        }

        device.set_bt_wake(level)?;

        let guard = self.shared.lock_cts();
        let (guard, _) = self
            .shared
            .cts_changed
            .wait_timeout_while(guard, self.cts_timeout, |cts| {
                *cts != Some(level) && self.shared.running.load(Ordering::SeqCst)
            })
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if *guard == Some(level) {
            debug!("upio: CTS {} after BT_WAKE {}", level, level);
            Ok(())
        } else if !self.is_running() {
            Err(VendorError::ChannelClosed)
        } else {
            Err(VendorError::WakeTimeout {
                level: level.name(),
                timeout_ms: self.cts_timeout.as_millis() as u64,
            })
        }
    }

    /// Ask the listener to exit and wait for it.
    ///
    /// The listener notices on its next poll, so this can block for one
    /// poll timeout.
    pub fn stop_listener(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.cts_changed.notify_all();
        if let Some(handle) = self.listener.take() {
            if handle.join().is_err() {
                warn!("upio: wake listener panicked");
            }
            info!("upio: wake listener stopped");
        }
    }
}

impl Default for WakeChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WakeChannel {
    fn drop(&mut self) {
        self.stop_listener();
    }
}

fn listen(
    shared: &Shared,
    source: &mut dyn SignalSource,
    poll: Duration,
    on_host_wake: &(dyn Fn(LineLevel) + Send + Sync),
) {
    while shared.running.load(Ordering::SeqCst) {
        match source.next_signal(poll) {
            Ok(None) => continue,
            Ok(Some(signal)) if signal.is_cts() => {
                debug!("upio: CTS {}", signal.level());
                *shared.lock_cts() = Some(signal.level());
                shared.cts_changed.notify_all();
            }
            Ok(Some(signal)) => {
                debug!("upio: HOST_WAKE {}", signal.level());
                on_host_wake(signal.level());
            }
            Err(e) => {
                warn!("upio: wake listener receive failed: {}", e);
                break;
            }
        }
    }
    shared.running.store(false, Ordering::SeqCst);
    shared.cts_changed.notify_all();
    debug!("upio: wake listener exiting");
}

// ============================================================================
// Line State Mirror
// ============================================================================

/// Lines whose last driven level is tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpioLine {
    LpmMode,
    BtWake,
    HostWake,
}

/// Last known level of each line. Only real transitions are logged.
#[derive(Debug, Default)]
pub struct Upio {
    levels: [Option<LineLevel>; 3],
}

impl Upio {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(line: UpioLine) -> usize {
        match line {
            UpioLine::LpmMode => 0,
            UpioLine::BtWake => 1,
            UpioLine::HostWake => 2,
        }
    }

    pub fn level(&self, line: UpioLine) -> Option<LineLevel> {
        self.levels[Self::slot(line)]
    }

    /// Record `level` for `line`; returns whether it changed.
    pub fn set(&mut self, line: UpioLine, level: LineLevel) -> bool {
        let slot = &mut self.levels[Self::slot(line)];
        if *slot == Some(level) {
            return false;
        }
        debug!("upio: {:?} -> {}", line, level);
        *slot = Some(level);
        true
    }
}
