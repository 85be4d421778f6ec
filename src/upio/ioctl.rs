//! Line control ioctls exposed by the Bluetooth UART driver.
//!
//! Every request carries one `unsigned long` argument and uses magic `'i'`.

use std::os::unix::io::RawFd;
use std::thread;
use std::time::{Duration, Instant};

use libc::{c_int, c_ulong};
use log::{debug, trace};

#[cfg(test)]
use mockall::automock;

use super::LineLevel;
use crate::hci::config::CTS_POLL_INTERVAL;
use crate::hci::{VendorError, VendorResult};

// ============================================================================
// Request Codes
// ============================================================================

const IOC_NONE: c_ulong = 0;
const IOC_WRITE: c_ulong = 1;
const IOC_READ: c_ulong = 2;

const IOC_MAGIC: c_ulong = b'i' as c_ulong;
const IOC_ARG_SIZE: c_ulong = std::mem::size_of::<c_ulong>() as c_ulong;

const fn ioc(dir: c_ulong, nr: c_ulong, size: c_ulong) -> c_ulong {
    (dir << 30) | (size << 16) | (IOC_MAGIC << 8) | nr
}

pub const IOCTL_SET_POWER_STATE: c_ulong = ioc(IOC_READ | IOC_WRITE, 1, IOC_ARG_SIZE);
pub const IOCTL_SET_BT_WAKEUP: c_ulong = ioc(IOC_WRITE, 2, IOC_ARG_SIZE);
pub const IOCTL_GET_HOST_WAKEUP: c_ulong = ioc(IOC_READ, 3, IOC_ARG_SIZE);
pub const IOCTL_SET_RTS: c_ulong = ioc(IOC_WRITE, 4, IOC_ARG_SIZE);
pub const IOCTL_GET_RTS: c_ulong = ioc(IOC_READ, 5, IOC_ARG_SIZE);
pub const IOCTL_GET_CTS: c_ulong = ioc(IOC_READ, 6, IOC_ARG_SIZE);
pub const IOCTL_SET_TEMP_MEAS: c_ulong = ioc(IOC_WRITE, 7, IOC_ARG_SIZE);
pub const IOCTL_GET_TEMP_MEAS: c_ulong = ioc(IOC_READ, 8, IOC_ARG_SIZE);
pub const IOCTL_DISABLE_SIGNALING: c_ulong = ioc(IOC_NONE, 9, 0);

// ============================================================================
// Device Control
// ============================================================================

/// Per-line control of the Bluetooth device.
#[cfg_attr(test, automock)]
pub trait DeviceControl: Send + Sync {
    fn set_power_state(&self, state: u32) -> VendorResult<()>;

    fn set_bt_wake(&self, level: LineLevel) -> VendorResult<()>;

    fn set_rts(&self, level: LineLevel) -> VendorResult<()>;

    fn cts(&self) -> VendorResult<LineLevel>;
}

/// [`DeviceControl`] over the serial port's file descriptor.
#[derive(Debug, Clone, Copy)]
pub struct FdDeviceControl {
    fd: RawFd,
}

impl FdDeviceControl {
    pub fn new(fd: RawFd) -> Self {
        Self { fd }
    }

    fn write(&self, name: &'static str, request: c_ulong, value: c_ulong) -> VendorResult<()> {
        let mut arg = value;
        self.call(name, request, &mut arg)
    }

    fn read(&self, name: &'static str, request: c_ulong) -> VendorResult<c_ulong> {
        let mut arg: c_ulong = 0;
        self.call(name, request, &mut arg)?;
        Ok(arg)
    }

    fn call(&self, name: &'static str, request: c_ulong, arg: &mut c_ulong) -> VendorResult<()> {
        trace!("ioctl: {} (0x{:08X}) on fd {}", name, request, self.fd);
        // SAFETY: ioctl on a caller-owned fd with a pointer to a live c_ulong,
        // which is the argument size encoded in every request code.
        let ret: c_int = unsafe { libc::ioctl(self.fd, request as _, arg as *mut c_ulong) };
        if ret < 0 {
            return Err(VendorError::Ioctl {
                request: name,
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(())
    }
}

impl DeviceControl for FdDeviceControl {
    fn set_power_state(&self, state: u32) -> VendorResult<()> {
        self.write("SET_POWER_STATE", IOCTL_SET_POWER_STATE, state as c_ulong)
    }

    fn set_bt_wake(&self, level: LineLevel) -> VendorResult<()> {
        self.write("SET_BT_WAKEUP", IOCTL_SET_BT_WAKEUP, level.as_arg())
    }

    fn set_rts(&self, level: LineLevel) -> VendorResult<()> {
        self.write("SET_RTS", IOCTL_SET_RTS, level.as_arg())
    }

    fn cts(&self) -> VendorResult<LineLevel> {
        self.read("GET_CTS", IOCTL_GET_CTS).map(LineLevel::from_arg)
    }
}

// ============================================================================
// CTS Polling
// ============================================================================

/// Wake handshake for drivers without a notification channel: drive
/// BT_WAKE, then poll GET_CTS until it follows.
pub struct IoctlCtsWaiter<'a> {
    device: &'a dyn DeviceControl,
    timeout: Duration,
    interval: Duration,
}

impl<'a> IoctlCtsWaiter<'a> {
    pub fn new(device: &'a dyn DeviceControl, timeout: Duration) -> Self {
        Self {
            device,
            timeout,
            interval: CTS_POLL_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn set_wake_and_wait_for_cts(&self, level: LineLevel) -> VendorResult<()> {
        self.device.set_bt_wake(level)?;
        let deadline = Instant::now() + self.timeout;
        loop {
            if self.device.cts()? == level {
                debug!("ioctl: CTS reached {}", level);
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(VendorError::WakeTimeout {
                    level: level.name(),
                    timeout_ms: self.timeout.as_millis() as u64,
                });
            }
            thread::sleep(self.interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::Sequence;

    #[test]
    fn test_request_codes() {
        let size = std::mem::size_of::<c_ulong>() as c_ulong;
        assert_eq!(IOCTL_SET_BT_WAKEUP, (1 << 30) | (size << 16) | (0x69 << 8) | 2);
        assert_eq!(IOCTL_GET_CTS, (2 << 30) | (size << 16) | (0x69 << 8) | 6);
        assert_eq!(IOCTL_SET_POWER_STATE, (3 << 30) | (size << 16) | (0x69 << 8) | 1);
        assert_eq!(IOCTL_DISABLE_SIGNALING, (0x69 << 8) | 9);
    }

    #[test]
    fn test_waiter_returns_once_cts_follows() {
        let mut device = MockDeviceControl::new();
        let mut seq = Sequence::new();
        device
            .expect_set_bt_wake()
            .withf(|l| *l == LineLevel::High)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        device
            .expect_cts()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|| Ok(LineLevel::Low));
        device
            .expect_cts()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(LineLevel::High));

        let waiter = IoctlCtsWaiter::new(&device, Duration::from_secs(1))
            .with_interval(Duration::from_millis(1));
        assert!(waiter.set_wake_and_wait_for_cts(LineLevel::High).is_ok());
    }

    #[test]
    fn test_waiter_times_out() {
        let mut device = MockDeviceControl::new();
        device.expect_set_bt_wake().returning(|_| Ok(()));
        device.expect_cts().returning(|| Ok(LineLevel::High));

        let waiter = IoctlCtsWaiter::new(&device, Duration::from_millis(20))
            .with_interval(Duration::from_millis(1));
        assert!(matches!(
            waiter.set_wake_and_wait_for_cts(LineLevel::Low),
            Err(VendorError::WakeTimeout { level: "low", .. })
        ));
    }

    #[test]
    fn test_waiter_propagates_ioctl_failure() {
        let mut device = MockDeviceControl::new();
        device.expect_set_bt_wake().returning(|_| {
            Err(VendorError::Ioctl {
                request: "SET_BT_WAKEUP",
                source: std::io::Error::from_raw_os_error(libc::ENOTTY),
            })
        });

        let waiter = IoctlCtsWaiter::new(&device, Duration::from_millis(20));
        assert!(matches!(
            waiter.set_wake_and_wait_for_cts(LineLevel::High),
            Err(VendorError::Ioctl { .. })
        ));
    }

    #[test]
    fn test_fd_control_on_bad_fd_fails() {
        let device = FdDeviceControl::new(-1);
        assert!(matches!(
            device.cts(),
            Err(VendorError::Ioctl { request: "GET_CTS", .. })
        ));
    }
}
