//! Vendor operation dispatcher.
//!
//! [`BtVendor`] is the context the Bluetooth stack holds between `init` and
//! `cleanup`. Every operation either returns a status or triggers exactly
//! one completion callback.

use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, error, info, warn};

use crate::firmware::HwConfig;
use crate::hci::config::*;
use crate::hci::{
    HciBuffer, HciCommand, HciEvent, UserialPort, VendorError, VendorResult, STATUS_OK,
};
use crate::lpm::LpmController;
use crate::settings::VendorConfig;
use crate::traits::{EventRoute, VendorCallbacks, VendorOpResult};
use crate::upio::{
    DeviceControl, FdDeviceControl, LineLevel, NetlinkSocket, Rfkill, SignalSource, UpioLine,
    WakeChannel,
};

/// Opens the notification source for the wake listener.
pub type SignalSourceFactory =
    Box<dyn Fn() -> VendorResult<Box<dyn SignalSource + Send>> + Send + Sync>;

/// Operations the stack can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VendorOp {
    /// Radio power on (`true`) or off.
    PowerCtrl(bool),
    /// Start firmware configuration; completes through `fwcfg_cb`.
    FwCfg,
    ScoCfg,
    UserialOpen,
    UserialClose,
    GetLpmIdleTimeout,
    /// Enable or disable low power mode; completes through `lpm_cb`.
    LpmSetMode(bool),
    /// Assert or deassert BT_WAKE without waiting.
    LpmWakeSetState(bool),
    LpmSetDeviceState(u32),
    /// Assert or deassert BT_WAKE and wait for CTS.
    LpmSetBtWakeState(bool),
    LpmGetCtsState,
    LpmSetRtsState(bool),
    /// Last operation before shutdown; completes through `epilog_cb`.
    Epilog,
}

/// Value produced by a successful operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpOutcome {
    Done,
    /// One descriptor per HCI channel, all the same UART.
    Channels([RawFd; CH_MAX]),
    IdleTimeout(u32),
    Cts(LineLevel),
}

/// Integer status the stack interface expects for an operation result.
pub fn op_status(result: &VendorResult<OpOutcome>) -> i32 {
    match result {
        Ok(_) => STATUS_OK,
        Err(e) => e.status(),
    }
}

/// Vendor library context.
pub struct BtVendor {
    callbacks: Arc<dyn VendorCallbacks>,
    local_address: [u8; 6],
    config: VendorConfig,
    hw_config: HwConfig,
    lpm: LpmController,
    port: Arc<Mutex<Option<UserialPort>>>,
    wake: Mutex<Option<WakeChannel>>,
    rfkill: Mutex<Rfkill>,
    device: Option<Arc<dyn DeviceControl>>,
    signal_source: SignalSourceFactory,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl BtVendor {
    /// Build the context. Fails without a callback table.
    pub fn init(
        callbacks: Option<Arc<dyn VendorCallbacks>>,
        local_address: [u8; 6],
        config: VendorConfig,
    ) -> VendorResult<Self> {
        let callbacks = callbacks.ok_or_else(|| {
            error!("vendor: init without callback table");
            VendorError::NoCallbacks
        })?;

        let port: Arc<Mutex<Option<UserialPort>>> = Arc::new(Mutex::new(None));
        let baud_port = Arc::clone(&port);
        let hw_config = HwConfig::new(config.chip_family.family(), config.firmware_options())
            .with_host_baud(Box::new(move |baud| match lock(&*baud_port).as_mut() {
                Some(port) => port.set_baud_rate(baud),
                None => Err(VendorError::PortNotOpen),
            }));

        let lpm = LpmController::new(config.lpm)
            .with_idle_multiplier(config.lpm_idle_timeout_multiple)
            .with_cts_timeout(config.cts_wait_timeout());

        info!(
            "vendor: init {} on {}, address {}",
            hw_config.family().name(),
            config.uart_port,
            format_address(&local_address)
        );

        Ok(Self {
            callbacks,
            local_address,
            rfkill: Mutex::new(Rfkill::new(&config.rfkill_root)),
            config,
            hw_config,
            lpm,
            port,
            wake: Mutex::new(None),
            device: None,
            signal_source: Box::new(|| {
                let socket = NetlinkSocket::open()?;
                socket.send_init()?;
                Ok(Box::new(socket) as Box<dyn SignalSource + Send>)
            }),
        })
    }

    /// Use `device` for line ioctls instead of the open UART.
    pub fn with_device_control(mut self, device: Arc<dyn DeviceControl>) -> Self {
        self.device = Some(device);
        self
    }

    /// Replace the netlink socket feeding the wake listener.
    pub fn with_signal_source(mut self, factory: SignalSourceFactory) -> Self {
        self.signal_source = factory;
        self
    }

    pub fn local_address(&self) -> [u8; 6] {
        self.local_address
    }

    pub fn config(&self) -> &VendorConfig {
        &self.config
    }

    pub fn hw_config(&self) -> &HwConfig {
        &self.hw_config
    }

    /// Run one operation.
    pub fn op(&self, op: VendorOp) -> VendorResult<OpOutcome> {
        debug!("vendor: op {:?}", op);
        let result = self.dispatch(op);
        if let Err(e) = &result {
            error!("vendor: {:?} failed [{}]: {}", op, e.error_code(), e);
        }
        result
    }

    fn dispatch(&self, op: VendorOp) -> VendorResult<OpOutcome> {
        match op {
            VendorOp::PowerCtrl(on) => {
                if self.config.rfkill_disabled {
                    debug!("vendor: rfkill disabled, power request ignored");
                } else {
                    lock(&self.rfkill).set_power(on)?;
                }
                Ok(OpOutcome::Done)
            }

            VendorOp::FwCfg => {
                self.hw_config.start(self.callbacks.as_ref());
                Ok(OpOutcome::Done)
            }

            VendorOp::ScoCfg => {
                if !self.config.sco_config_included {
                    return Err(VendorError::ScoNotIncluded);
                }
                self.callbacks.scocfg_cb(VendorOpResult::Success);
                Ok(OpOutcome::Done)
            }

            VendorOp::UserialOpen => {
                let mut port = lock(&self.port);
                let fd = match port.as_ref() {
                    Some(open) => open.fd(),
                    None => {
                        let open = UserialPort::open(&self.config.uart_port)?;
                        let fd = open.fd();
                        *port = Some(open);
                        fd
                    }
                };
                Ok(OpOutcome::Channels([fd; CH_MAX]))
            }

            VendorOp::UserialClose => {
                if let Some(port) = lock(&self.port).take() {
                    port.close();
                }
                Ok(OpOutcome::Done)
            }

            VendorOp::GetLpmIdleTimeout => Ok(OpOutcome::IdleTimeout(self.lpm.idle_timeout())),

            VendorOp::LpmSetMode(enable) => {
                if enable {
                    self.start_wake_listener()?;
                    if let Err(e) = self.lpm.enable(self.callbacks.as_ref(), true) {
                        self.stop_wake_listener();
                        return Err(e);
                    }
                } else {
                    let result = self.lpm.enable(self.callbacks.as_ref(), false);
                    self.stop_wake_listener();
                    result?;
                }
                Ok(OpOutcome::Done)
            }

            VendorOp::LpmWakeSetState(asserted) => {
                let device = self.device()?;
                self.lpm.wake_set_state(device.as_ref(), LineLevel::from(asserted))?;
                Ok(OpOutcome::Done)
            }

            VendorOp::LpmSetDeviceState(state) => {
                self.device()?.set_power_state(state)?;
                Ok(OpOutcome::Done)
            }

            VendorOp::LpmSetBtWakeState(asserted) => {
                let device = self.device()?;
                let wake = lock(&self.wake);
                self.lpm
                    .set_bt_wake_state(device.as_ref(), wake.as_ref(), LineLevel::from(asserted))?;
                Ok(OpOutcome::Done)
            }

            VendorOp::LpmGetCtsState => {
                let device = self.device()?;
                let wake = lock(&self.wake);
                let level = self.lpm.cts_state(device.as_ref(), wake.as_ref())?;
                Ok(OpOutcome::Cts(level))
            }

            VendorOp::LpmSetRtsState(asserted) => {
                let device = self.device()?;
                self.lpm.set_rts_state(device.as_ref(), LineLevel::from(asserted))?;
                Ok(OpOutcome::Done)
            }

            VendorOp::Epilog => {
                if self.config.end_with_hci_reset {
                    self.send_epilog_reset()?;
                } else {
                    self.callbacks.epilog_cb(VendorOpResult::Success);
                }
                Ok(OpOutcome::Done)
            }
        }
    }

    /// Deliver a completion event for a command submitted on `route`.
    pub fn on_event(&self, route: EventRoute, event: HciBuffer) {
        match route {
            EventRoute::HwConfig => self.hw_config.handle_event(self.callbacks.as_ref(), event),
            EventRoute::Lpm => self.lpm.on_event(self.callbacks.as_ref(), event),
            EventRoute::Epilog => {
                let ok = HciEvent::new(event.as_bytes()).is_success();
                self.callbacks.dealloc(event);
                let result = if ok {
                    VendorOpResult::Success
                } else {
                    VendorOpResult::Fail
                };
                info!("vendor: epilog done ({:?})", result);
                self.callbacks.epilog_cb(result);
            }
        }
    }

    /// Stop the wake listener and close the UART.
    pub fn cleanup(&self) {
        self.stop_wake_listener();
        if let Some(port) = lock(&self.port).take() {
            port.close();
        }
        info!("vendor: cleanup");
    }

    fn device(&self) -> VendorResult<Arc<dyn DeviceControl>> {
        if let Some(device) = &self.device {
            return Ok(Arc::clone(device));
        }
        match lock(&self.port).as_ref() {
            Some(port) => Ok(Arc::new(FdDeviceControl::new(port.fd()))),
            None => Err(VendorError::PortNotOpen),
        }
    }

    fn start_wake_listener(&self) -> VendorResult<()> {
        let mut wake = lock(&self.wake);
        if matches!(wake.as_ref(), Some(channel) if channel.is_running()) {
            return Ok(());
        }

        let source = (self.signal_source)()?;
        let mut channel = WakeChannel::new().with_cts_timeout(self.config.cts_wait_timeout());
        let callbacks = Arc::clone(&self.callbacks);
        let lines = self.lpm.lines();
        channel.start_listener(
            source,
            Arc::new(move |level| {
                lock(&*lines).set(UpioLine::HostWake, level);
                callbacks.set_host_wake_state(level);
            }),
        )?;
        *wake = Some(channel);
        Ok(())
    }

    fn stop_wake_listener(&self) {
        if let Some(mut channel) = lock(&self.wake).take() {
            channel.stop_listener();
        }
    }

    fn send_epilog_reset(&self) -> VendorResult<()> {
        let command = HciCommand::reset();
        let mut buf = self
            .callbacks
            .alloc(HCI_CMD_MAX_LEN)
            .ok_or(VendorError::NoBuffer)?;
        if let Err(e) = buf.write_command(&command) {
            self.callbacks.dealloc(buf);
            return Err(e);
        }
        if !self.callbacks.xmit(command.opcode(), buf, EventRoute::Epilog) {
            warn!("vendor: epilog reset rejected");
            return Err(VendorError::XmitRejected {
                opcode: command.opcode(),
            });
        }
        Ok(())
    }
}

fn format_address(addr: &[u8; 6]) -> String {
    addr.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firmware::{ChipKind, HwConfigState};
    use crate::hci::STATUS_FAIL;
    use crate::test_helpers::fixtures::*;
    use crate::test_helpers::TestContext;
    use crate::upio::{LineSignal, MockDeviceControl};
    use std::io;
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    const ADDRESS: [u8; 6] = [0x00, 0x11, 0x22, 0x33, 0x44, 0x55];

    struct ChannelSource(mpsc::Receiver<LineSignal>);

    impl SignalSource for ChannelSource {
        fn next_signal(&mut self, timeout: Duration) -> io::Result<Option<LineSignal>> {
            match self.0.recv_timeout(timeout) {
                Ok(signal) => Ok(Some(signal)),
                Err(mpsc::RecvTimeoutError::Timeout) => Ok(None),
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    Err(io::ErrorKind::BrokenPipe.into())
                }
            }
        }
    }

    fn vendor(config: VendorConfig) -> (BtVendor, Arc<RecordingCallbacks>) {
        let cbs = Arc::new(RecordingCallbacks::new());
        let callbacks: Arc<dyn VendorCallbacks> = cbs.clone();
        let vendor = BtVendor::init(Some(callbacks), ADDRESS, config).unwrap();
        (vendor, cbs)
    }

    /// Wire the listener to a channel the test can push signals into.
    fn with_test_source(vendor: BtVendor) -> (BtVendor, mpsc::Sender<LineSignal>) {
        let (tx, rx) = mpsc::channel();
        let rx = Mutex::new(Some(rx));
        let vendor = vendor.with_signal_source(Box::new(move || {
            let rx = rx.lock().unwrap().take().ok_or(VendorError::ChannelError {
                reason: "source already taken".into(),
            })?;
            Ok(Box::new(ChannelSource(rx)) as Box<dyn SignalSource + Send>)
        }));
        (vendor, tx)
    }

    fn wait_for(cond: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(3);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_init_requires_callbacks() {
        let result = BtVendor::init(None, ADDRESS, VendorConfig::default());
        assert!(matches!(result, Err(VendorError::NoCallbacks)));
        assert_eq!(result.err().map(|e| e.status()), Some(STATUS_FAIL));
    }

    #[test]
    fn test_init_keeps_address() {
        let (vendor, _) = vendor(VendorConfig::default());
        assert_eq!(vendor.local_address(), ADDRESS);
        assert_eq!(format_address(&ADDRESS), "00:11:22:33:44:55");
    }

    #[test]
    fn test_power_ctrl_writes_rfkill() {
        let ctx = TestContext::new();
        ctx.create_rfkill(0, "bluetooth", "0");
        let config = VendorConfig {
            rfkill_root: ctx.root().to_string_lossy().into_owned(),
            ..VendorConfig::default()
        };
        let (vendor, _) = vendor(config);

        assert_eq!(vendor.op(VendorOp::PowerCtrl(true)).unwrap(), OpOutcome::Done);
        assert_eq!(ctx.read_file("rfkill0/state"), "1");
        vendor.op(VendorOp::PowerCtrl(false)).unwrap();
        assert_eq!(ctx.read_file("rfkill0/state"), "0");
    }

    #[test]
    fn test_power_ctrl_without_rfkill_fails() {
        let ctx = TestContext::new();
        let config = VendorConfig {
            rfkill_root: ctx.root().to_string_lossy().into_owned(),
            ..VendorConfig::default()
        };
        let (vendor, _) = vendor(config);

        let result = vendor.op(VendorOp::PowerCtrl(true));
        assert!(matches!(result, Err(VendorError::RfkillNotFound)));
        assert_eq!(op_status(&result), STATUS_FAIL);
    }

    #[test]
    fn test_power_ctrl_disabled_is_noop() {
        let config = VendorConfig {
            rfkill_disabled: true,
            rfkill_root: "/nonexistent".into(),
            ..VendorConfig::default()
        };
        let (vendor, _) = vendor(config);

        assert_eq!(op_status(&vendor.op(VendorOp::PowerCtrl(true))), STATUS_OK);
    }

    #[test]
    fn test_sco_cfg() {
        let (vendor, cbs) = vendor(VendorConfig::default());
        assert!(matches!(
            vendor.op(VendorOp::ScoCfg),
            Err(VendorError::ScoNotIncluded)
        ));
        assert!(cbs.recorded().scocfg.is_empty());

        let (vendor, cbs) = self::vendor(VendorConfig {
            sco_config_included: true,
            ..VendorConfig::default()
        });
        vendor.op(VendorOp::ScoCfg).unwrap();
        assert_eq!(cbs.recorded().scocfg, vec![VendorOpResult::Success]);
    }

    #[test]
    fn test_idle_timeout() {
        let mut config = VendorConfig::default();
        config.lpm.host_stack_idle_threshold = 4;
        let (vendor, _) = vendor(config);

        assert_eq!(
            vendor.op(VendorOp::GetLpmIdleTimeout).unwrap(),
            OpOutcome::IdleTimeout(40)
        );
    }

    #[test]
    fn test_epilog_without_reset() {
        let (vendor, cbs) = vendor(VendorConfig::default());
        vendor.op(VendorOp::Epilog).unwrap();

        assert_eq!(cbs.recorded().epilog, vec![VendorOpResult::Success]);
        assert!(cbs.sent_opcodes().is_empty());
    }

    #[test]
    fn test_epilog_with_reset() {
        let (vendor, cbs) = vendor(VendorConfig {
            end_with_hci_reset: true,
            ..VendorConfig::default()
        });
        vendor.op(VendorOp::Epilog).unwrap();

        assert_eq!(cbs.sent_opcodes(), vec![HCI_RESET]);
        assert_eq!(cbs.sent_routes(), vec![EventRoute::Epilog]);
        assert!(cbs.recorded().epilog.is_empty());

        vendor.on_event(EventRoute::Epilog, command_complete(HCI_RESET, 0, &[]));
        assert_eq!(cbs.recorded().epilog, vec![VendorOpResult::Success]);
        cbs.assert_buffers_balanced();
    }

    #[test]
    fn test_fw_cfg_routes_events_to_state_machine() {
        let ctx = TestContext::new();
        ctx.create_dir("fw");
        let config = VendorConfig {
            chip_family: ChipKind::Wp2Usb,
            fw_patch_file_path: ctx.path("fw").to_string_lossy().into_owned(),
            fw_patch_settlement_delay_ms: Some(0),
            ..VendorConfig::default()
        };
        let (vendor, cbs) = vendor(config);

        vendor.op(VendorOp::FwCfg).unwrap();
        assert_eq!(cbs.sent_opcodes(), vec![HCI_RESET]);
        assert_eq!(cbs.sent_routes(), vec![EventRoute::HwConfig]);

        vendor.on_event(EventRoute::HwConfig, default_bd_data());
        assert_eq!(vendor.hw_config().state(), HwConfigState::ReadSwVersion);
    }

    #[test]
    fn test_lpm_mode_round_trip() {
        let (vendor, cbs) = vendor(VendorConfig::default());
        let (vendor, tx) = with_test_source(vendor);

        vendor.op(VendorOp::LpmSetMode(true)).unwrap();
        assert_eq!(cbs.sent_opcodes(), vec![HCI_INTEL_WRITE_SLEEP_MODE]);
        assert_eq!(cbs.sent_routes(), vec![EventRoute::Lpm]);

        vendor.on_event(
            EventRoute::Lpm,
            command_complete(HCI_INTEL_WRITE_SLEEP_MODE, 0, &[]),
        );
        assert_eq!(cbs.lpm_results(), vec![VendorOpResult::Success]);

        tx.send(LineSignal::HostWakeHigh).unwrap();
        wait_for(|| cbs.recorded().host_wake == vec![LineLevel::High]);
        assert_eq!(vendor.lpm.host_wake(), Some(LineLevel::High));

        vendor.op(VendorOp::LpmSetMode(false)).unwrap();
        assert_eq!(cbs.sent_params(1), vec![0u8; LPM_CMD_PARAM_SIZE]);
        assert!(lock(&vendor.wake).is_none());
    }

    #[test]
    fn test_lpm_disable_without_buffer_still_stops_listener() {
        let (vendor, cbs) = vendor(VendorConfig::default());
        let (vendor, tx) = with_test_source(vendor);

        vendor.op(VendorOp::LpmSetMode(true)).unwrap();
        assert!(lock(&vendor.wake).is_some());

        cbs.set_no_buffers(true);
        let result = vendor.op(VendorOp::LpmSetMode(false));
        assert!(matches!(result, Err(VendorError::NoBuffer)));
        assert!(lock(&vendor.wake).is_none());
        // The listener dropped its receiver on exit.
        assert!(tx.send(LineSignal::CtsHigh).is_err());
    }

    #[test]
    fn test_lpm_enable_rejected_stops_listener() {
        let (vendor, cbs) = vendor(VendorConfig::default());
        let (vendor, tx) = with_test_source(vendor);
        cbs.set_reject_xmit(true);

        let result = vendor.op(VendorOp::LpmSetMode(true));
        assert!(matches!(
            result,
            Err(VendorError::XmitRejected {
                opcode: HCI_INTEL_WRITE_SLEEP_MODE
            })
        ));
        assert!(lock(&vendor.wake).is_none());
        assert!(tx.send(LineSignal::CtsHigh).is_err());
        assert!(cbs.lpm_results().is_empty());
    }

    #[test]
    fn test_lpm_enable_fails_without_channel() {
        let (vendor, cbs) = vendor(VendorConfig::default());
        let vendor = vendor.with_signal_source(Box::new(|| {
            Err(VendorError::ChannelError {
                reason: "no netlink".into(),
            })
        }));

        let result = vendor.op(VendorOp::LpmSetMode(true));
        assert!(matches!(result, Err(VendorError::ChannelError { .. })));
        assert!(cbs.sent_opcodes().is_empty());
    }

    #[test]
    fn test_bt_wake_waits_for_cts_from_listener() {
        let (vendor, _cbs) = vendor(VendorConfig::default());
        let (vendor, tx) = with_test_source(vendor);

        let tx_for_device = Mutex::new(tx.clone());
        let mut device = MockDeviceControl::new();
        device
            .expect_set_bt_wake()
            .withf(|level| *level == LineLevel::High)
            .times(1)
            .returning(move |_| {
                tx_for_device
                    .lock()
                    .unwrap()
                    .send(LineSignal::CtsHigh)
                    .unwrap();
                Ok(())
            });
        let vendor = vendor.with_device_control(Arc::new(device));

        vendor.op(VendorOp::LpmSetMode(true)).unwrap();
        vendor.op(VendorOp::LpmSetBtWakeState(true)).unwrap();
        assert_eq!(
            vendor.op(VendorOp::LpmGetCtsState).unwrap(),
            OpOutcome::Cts(LineLevel::High)
        );
        vendor.cleanup();
    }

    #[test]
    fn test_line_ops_go_to_device() {
        let mut device = MockDeviceControl::new();
        device
            .expect_set_power_state()
            .withf(|s| *s == 1)
            .times(1)
            .returning(|_| Ok(()));
        device
            .expect_set_rts()
            .withf(|l| *l == LineLevel::Low)
            .times(1)
            .returning(|_| Ok(()));
        device.expect_set_bt_wake().times(1).returning(|_| Ok(()));
        device.expect_cts().returning(|| Ok(LineLevel::Low));
        let (vendor, _) = vendor(VendorConfig::default());
        let vendor = vendor.with_device_control(Arc::new(device));

        vendor.op(VendorOp::LpmSetDeviceState(1)).unwrap();
        vendor.op(VendorOp::LpmSetRtsState(false)).unwrap();
        vendor.op(VendorOp::LpmWakeSetState(true)).unwrap();
        vendor.op(VendorOp::LpmWakeSetState(true)).unwrap();
        assert_eq!(
            vendor.op(VendorOp::LpmGetCtsState).unwrap(),
            OpOutcome::Cts(LineLevel::Low)
        );
    }

    #[test]
    fn test_line_ops_need_open_port() {
        let (vendor, _) = vendor(VendorConfig::default());
        assert!(matches!(
            vendor.op(VendorOp::LpmSetDeviceState(0)),
            Err(VendorError::PortNotOpen)
        ));
    }

    #[test]
    fn test_userial_open_missing_port() {
        let (vendor, _) = vendor(VendorConfig {
            uart_port: "/dev/does-not-exist-btvendor".into(),
            ..VendorConfig::default()
        });

        let result = vendor.op(VendorOp::UserialOpen);
        assert_eq!(op_status(&result), STATUS_FAIL);
        assert_eq!(op_status(&vendor.op(VendorOp::UserialClose)), STATUS_OK);
        vendor.cleanup();
    }
}
