//! UART transport to the controller.
//!
//! The stack receives the raw fd of this port for every HCI channel; the
//! vendor library keeps the port itself so it can retune the baud rate and
//! issue device ioctls on the same fd.

use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

use log::{debug, info, warn};
use serialport::{SerialPort, TTYPort};

use super::config::{USERIAL_BAUD_RATE, USERIAL_READ_TIMEOUT};
use super::error::{VendorError, VendorResult};

/// An open controller UART.
pub struct UserialPort {
    port: TTYPort,
    name: String,
}

impl UserialPort {
    /// Open the controller UART at the boot baud rate.
    pub fn open(port_name: &str) -> VendorResult<Self> {
        Self::open_with_baud(port_name, USERIAL_BAUD_RATE)
    }

    /// Open the UART raw, 8N1, with RTS/CTS flow control.
    ///
    /// Retries a few times on transient errors; the tty node can show up
    /// before the line discipline is ready after power-on.
    pub fn open_with_baud(port_name: &str, baud_rate: u32) -> VendorResult<Self> {
        const MAX_OPEN_RETRIES: u32 = 5;
        const RETRY_DELAY_MS: u64 = 100;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match serialport::new(port_name, baud_rate)
                .timeout(USERIAL_READ_TIMEOUT)
                .data_bits(serialport::DataBits::Eight)
                .parity(serialport::Parity::None)
                .stop_bits(serialport::StopBits::One)
                .flow_control(serialport::FlowControl::Hardware)
                .open_native()
            {
                Ok(port) => {
                    port.clear(serialport::ClearBuffer::All).ok();
                    info!(
                        "userial: opened {} at {} baud, fd {}",
                        port_name,
                        baud_rate,
                        port.as_raw_fd()
                    );
                    return Ok(Self {
                        port,
                        name: port_name.to_string(),
                    });
                }
                Err(e) => {
                    let err_str = e.to_string().to_lowercase();
                    let is_transient = err_str.contains("temporarily unavailable")
                        || err_str.contains("interrupted");

                    if is_transient && attempt < MAX_OPEN_RETRIES {
                        debug!("userial: open {} retry {}: {}", port_name, attempt, e);
                        std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS));
                        continue;
                    }

                    warn!("userial: unable to open {}: {}", port_name, e);
                    return Err(match e.kind() {
                        serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                            VendorError::PortPermissionDenied {
                                port: port_name.to_string(),
                            }
                        }
                        _ if err_str.contains("busy") || err_str.contains("in use") => {
                            VendorError::PortBusy {
                                port: port_name.to_string(),
                            }
                        }
                        _ => VendorError::Serial(e),
                    });
                }
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fd(&self) -> RawFd {
        self.port.as_raw_fd()
    }

    pub fn baud_rate(&self) -> VendorResult<u32> {
        Ok(self.port.baud_rate()?)
    }

    /// Retune the host side of the link.
    pub fn set_baud_rate(&mut self, baud_rate: u32) -> VendorResult<()> {
        self.port.set_baud_rate(baud_rate)?;
        self.port.clear(serialport::ClearBuffer::Input)?;
        debug!("userial: {} now at {} baud", self.name, baud_rate);
        Ok(())
    }

    /// Flush pending bytes and close the port.
    pub fn close(self) {
        if let Err(e) = self.port.clear(serialport::ClearBuffer::All) {
            debug!("userial: flush on close of {} failed: {}", self.name, e);
        }
        info!("userial: closed {}", self.name);
    }
}
