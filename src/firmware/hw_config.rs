//! Firmware configuration sequence.
//!
//! Driven one HCI event at a time by the transport. Each event is decoded,
//! a fresh command buffer is borrowed, and [`HwConfig::transition`] decides
//! the next state and the command (if any) to submit. States that only do
//! local work (patch lookup, settlement delay, record headers) chain into
//! the following state within the same event.

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, error, info, trace, warn};

use super::bddata::load_bd_data;
use super::chip::{Boot, ChipFamily};
use super::patch_locator::PatchLocator;
use super::patch_reader::PatchStream;
use super::state::{HwConfigState, PatchState};
use crate::hci::config::*;
use crate::hci::{HciBuffer, HciCommand, HciEvent, VendorError, VendorResult};
use crate::traits::{EventRoute, VendorCallbacks, VendorOpResult};

/// Retunes the host UART during a high speed switch.
pub type HostBaudFn = Box<dyn Fn(u32) -> VendorResult<()> + Send + Sync>;

/// File locations and tuning for the firmware sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareOptions {
    pub patch_dir: String,
    /// Use this file instead of searching by chip id.
    pub patch_name: Option<String>,
    pub bddata_path: PathBuf,
    /// Overrides the per-chip settlement delay.
    pub settlement_delay: Option<Duration>,
    pub uart_high_speed: bool,
}

impl Default for FirmwareOptions {
    fn default() -> Self {
        Self {
            patch_dir: FW_PATCHFILE_LOCATION.to_string(),
            patch_name: None,
            bddata_path: PathBuf::from(BD_DATA_DEFAULT_PATH),
            settlement_delay: None,
            uart_high_speed: false,
        }
    }
}

#[derive(Debug)]
struct ControlBlock {
    state: HwConfigState,
    patch: Option<PatchStream>,
    patch_state: PatchState,
    chip_id: Option<String>,
    address: u32,
    remaining_bytes: u32,
    commands_sent: usize,
    /// Set when the download broke off; the cycle still leaves manufacture
    /// mode but reports failure.
    failure: Option<VendorError>,
}

impl ControlBlock {
    fn new(patch_state: PatchState) -> Self {
        Self {
            state: HwConfigState::Init,
            patch: None,
            patch_state,
            chip_id: None,
            address: 0,
            remaining_bytes: 0,
            commands_sent: 0,
            failure: None,
        }
    }
}

#[derive(Debug)]
enum Action {
    Send(HciCommand),
    /// Release the command buffer and wait for the next event.
    Wait,
    /// Cycle finished.
    Complete,
}

#[derive(Debug)]
struct Transition {
    next: HwConfigState,
    action: Action,
}

impl Transition {
    fn send(next: HwConfigState, command: HciCommand) -> Self {
        Self {
            next,
            action: Action::Send(command),
        }
    }

    fn wait(next: HwConfigState) -> Self {
        Self {
            next,
            action: Action::Wait,
        }
    }
}

enum Progress {
    Proceeding,
    Finished,
}

/// Firmware configuration state machine for one controller.
pub struct HwConfig {
    family: Box<dyn ChipFamily>,
    options: FirmwareOptions,
    host_baud: Option<HostBaudFn>,
    cb: Mutex<ControlBlock>,
}

impl HwConfig {
    pub fn new(family: Box<dyn ChipFamily>, options: FirmwareOptions) -> Self {
        let patch_state = family.default_patch_state();
        Self {
            family,
            options,
            host_baud: None,
            cb: Mutex::new(ControlBlock::new(patch_state)),
        }
    }

    /// Install the hook used to retune the host UART to 2 Mbaud.
    pub fn with_host_baud(mut self, host_baud: HostBaudFn) -> Self {
        self.host_baud = Some(host_baud);
        self
    }

    pub fn family(&self) -> &dyn ChipFamily {
        self.family.as_ref()
    }

    pub fn state(&self) -> HwConfigState {
        self.lock().state
    }

    pub fn patch_state(&self) -> PatchState {
        self.lock().patch_state
    }

    pub fn has_open_patch(&self) -> bool {
        self.lock().patch.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, ControlBlock> {
        self.cb.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Begin a configuration cycle.
    ///
    /// Failures are reported through `fwcfg_cb`, never returned.
    pub fn start(&self, callbacks: &dyn VendorCallbacks) {
        let mut cb = self.lock();
        *cb = ControlBlock::new(self.family.default_patch_state());
        info!("fwcfg: starting {} configuration", self.family.name());

        let result = match self.family.boot() {
            Boot::AwaitDefaultBdData => {
                if callbacks.register_internal_events(EventRoute::HwConfig) {
                    Ok(())
                } else {
                    Err(VendorError::Unsupported {
                        op: "internal event registration",
                    })
                }
            }
            Boot::Reset => {
                cb.state = HwConfigState::ManufactureOn;
                callbacks
                    .alloc(HCI_CMD_MAX_LEN)
                    .ok_or(VendorError::NoBuffer)
                    .and_then(|buf| Self::submit(callbacks, buf, &HciCommand::reset()))
            }
        };

        if let Err(e) = result {
            self.abort(&mut cb, callbacks, e);
        }
    }

    /// Consume one event. The event buffer is always released.
    pub fn handle_event(&self, callbacks: &dyn VendorCallbacks, event: HciBuffer) {
        let mut cb = self.lock();
        let outcome = self.dispatch(&mut cb, callbacks, &HciEvent::new(event.as_bytes()));
        callbacks.dealloc(event);

        match outcome {
            Ok(Progress::Proceeding) => {}
            Ok(Progress::Finished) => self.finish(&mut cb, callbacks),
            Err(e) => self.abort(&mut cb, callbacks, e),
        }
    }

    fn dispatch(
        &self,
        cb: &mut ControlBlock,
        callbacks: &dyn VendorCallbacks,
        evt: &HciEvent<'_>,
    ) -> VendorResult<Progress> {
        if cb.state == HwConfigState::Init && evt.is_vendor(VendorSubEvent::DefaultBdData) {
            callbacks.deregister_internal_events();
            cb.state = self.first_manufacture_state();
        }

        let status = evt.status();
        if status != HCI_SUCCESS {
            return Err(VendorError::EventStatus {
                event: evt.code().unwrap_or_default(),
                status,
            });
        }

        let buf = callbacks.alloc(HCI_CMD_MAX_LEN).ok_or(VendorError::NoBuffer)?;
        let transition = match self.transition(cb, evt) {
            Ok(t) => t,
            Err(e) => {
                callbacks.dealloc(buf);
                return Err(e);
            }
        };

        debug!("fwcfg: {:?} -> {:?}", cb.state, transition.next);
        cb.state = transition.next;

        match transition.action {
            Action::Send(command) => {
                Self::submit(callbacks, buf, &command)?;
                Ok(Progress::Proceeding)
            }
            Action::Wait => {
                callbacks.dealloc(buf);
                Ok(Progress::Proceeding)
            }
            Action::Complete => {
                callbacks.dealloc(buf);
                Ok(Progress::Finished)
            }
        }
    }

    fn first_manufacture_state(&self) -> HwConfigState {
        if self.options.uart_high_speed && self.family.has_uart() {
            HwConfigState::SetBaudHs
        } else {
            HwConfigState::ManufactureOn
        }
    }

    /// Decide the next state for `evt`, chaining through local-only states.
    fn transition(&self, cb: &mut ControlBlock, evt: &HciEvent<'_>) -> VendorResult<Transition> {
        use HwConfigState::*;

        let mut state = cb.state;
        loop {
            trace!("fwcfg: {}", state.message());
            state = match state {
                Init => return Ok(Transition::wait(Init)),

                SetBaudHs => {
                    return Ok(Transition::send(
                        SetHostBaud,
                        HciCommand::set_uart_baud(UART_BAUD_2M_PARAM),
                    ))
                }

                SetHostBaud => {
                    if let Some(set_baud) = &self.host_baud {
                        set_baud(UART_BAUD_2M)?;
                    }
                    ManufactureOn
                }

                ManufactureOn => {
                    if self.family.gates_manufacture_on()
                        && !evt.is_vendor(VendorSubEvent::DefaultBdData)
                    {
                        return Ok(Transition::wait(ManufactureOn));
                    }
                    let next = if self.family.writes_bd_data() {
                        BdData
                    } else {
                        ReadSwVersion
                    };
                    return Ok(Transition::send(next, HciCommand::manufacture_on()));
                }

                BdData => match load_bd_data(&self.options.bddata_path) {
                    Ok(bd_data) => {
                        return Ok(Transition::send(
                            BdDataStatus,
                            HciCommand::write_bd_data(&bd_data),
                        ))
                    }
                    Err(e) => {
                        cb.failure = Some(e);
                        return Ok(self.manufacture_off(cb));
                    }
                },

                BdDataStatus => {
                    if !evt.is_vendor(VendorSubEvent::WriteBdDataComplete) {
                        return Ok(Transition::wait(BdDataStatus));
                    }
                    ReadSwVersion
                }

                ReadSwVersion => {
                    return Ok(Transition::send(FindPatch, HciCommand::read_sw_version()))
                }

                FindPatch => match self.open_patch(evt) {
                    Some((chip_id, stream)) => {
                        cb.chip_id = Some(chip_id);
                        cb.patch = Some(stream);
                        DlMinidriver
                    }
                    None => return Ok(self.manufacture_off(cb)),
                },

                DlMinidriver => {
                    let delay = self.settlement_delay(cb.chip_id.as_deref());
                    if !delay.is_zero() {
                        debug!("fwcfg: settling {}ms before download", delay.as_millis());
                        std::thread::sleep(delay);
                    }
                    DlFwPatch
                }

                DlFwPatch => match cb.patch.as_mut() {
                    Some(PatchStream::Binary(reader)) => match reader.next_record() {
                        Ok(Some(record)) => {
                            cb.address = record.address;
                            cb.remaining_bytes = record.length;
                            DlFwPatch1
                        }
                        Ok(None) => {
                            info!("fwcfg: firmware patch download done");
                            cb.patch_state = PatchState::Enabled;
                            return Ok(self.manufacture_off(cb));
                        }
                        Err(e) => {
                            cb.failure = Some(e);
                            return Ok(self.manufacture_off(cb));
                        }
                    },
                    Some(PatchStream::Text(reader)) => match reader.next_command() {
                        Ok(Some(command)) => {
                            cb.commands_sent += 1;
                            return Ok(Transition::send(DlFwPatch, command));
                        }
                        Ok(None) => {
                            if cb.commands_sent > 0 {
                                info!(
                                    "fwcfg: firmware patch download done ({} commands)",
                                    cb.commands_sent
                                );
                                cb.patch_state = PatchState::Enabled;
                            } else {
                                warn!("fwcfg: patch file is empty");
                            }
                            return Ok(self.manufacture_off(cb));
                        }
                        Err(e) => {
                            cb.failure = Some(e);
                            return Ok(self.manufacture_off(cb));
                        }
                    },
                    None => return Ok(self.manufacture_off(cb)),
                },

                DlFwPatch1 => {
                    if cb.remaining_bytes == 0 {
                        DlFwPatch
                    } else {
                        let Some(PatchStream::Binary(reader)) = cb.patch.as_mut() else {
                            return Ok(self.manufacture_off(cb));
                        };
                        let len = (cb.remaining_bytes as usize).min(PATCH_MAX_LENGTH);
                        match reader.read_chunk(len) {
                            Ok(data) => {
                                let command = HciCommand::mem_write(cb.address, &data)?;
                                trace!("fwcfg: mem write 0x{:08X} ({} bytes)", cb.address, len);
                                cb.remaining_bytes -= len as u32;
                                let next = if cb.remaining_bytes > 0 {
                                    cb.address = cb.address.wrapping_add(len as u32);
                                    DlFwPatch1
                                } else {
                                    DlFwPatch
                                };
                                return Ok(Transition::send(next, command));
                            }
                            Err(e) => {
                                cb.failure = Some(e);
                                return Ok(self.manufacture_off(cb));
                            }
                        }
                    }
                }

                ManufactureOff => return Ok(self.manufacture_off(cb)),

                ManufactureOffComplete => return Ok(Transition::wait(Success)),

                Success => {
                    if evt.is_vendor(VendorSubEvent::Startup) {
                        return Ok(Transition {
                            next: Init,
                            action: Action::Complete,
                        });
                    }
                    debug!("fwcfg: startup event not received yet");
                    return Ok(Transition::wait(Success));
                }
            };
        }
    }

    /// Leave manufacture mode with the current patch flag. Closes the patch.
    fn manufacture_off(&self, cb: &mut ControlBlock) -> Transition {
        cb.patch = None;
        if let Some(e) = &cb.failure {
            error!("fwcfg: patch download stopped: {}", e);
        }
        debug!(
            "fwcfg: leaving manufacture mode, patch {:?}",
            cb.patch_state
        );
        Transition::send(
            HwConfigState::ManufactureOffComplete,
            HciCommand::manufacture_off(cb.patch_state.as_byte()),
        )
    }

    /// Derive the chip id and open its patch. `None` means run unpatched.
    fn open_patch(&self, evt: &HciEvent<'_>) -> Option<(String, PatchStream)> {
        let Some(chip_id) = self.family.chip_id(evt) else {
            warn!("fwcfg: version response too short to identify chip");
            return None;
        };

        let locator = PatchLocator::new(
            self.options.patch_dir.clone(),
            self.options.patch_name.clone(),
            self.family.patch_extension(),
        );
        let path = match locator.find(&chip_id) {
            Ok(path) => path,
            Err(e) => {
                info!("fwcfg: {}, continuing without patch", e);
                return None;
            }
        };

        match self.family.patch_format().open(&path) {
            Ok(stream) => {
                info!("fwcfg: downloading {}", path.display());
                Some((chip_id, stream))
            }
            Err(e) => {
                error!("fwcfg: cannot open {}: {}", path.display(), e);
                None
            }
        }
    }

    fn settlement_delay(&self, chip_id: Option<&str>) -> Duration {
        if let Some(delay) = self.options.settlement_delay {
            return delay;
        }
        chip_id
            .and_then(|id| {
                FW_SETTLEMENT_TABLE.iter().find(|(name, _)| {
                    id.len() >= name.len()
                        && id.as_bytes()[..name.len()].eq_ignore_ascii_case(name.as_bytes())
                })
            })
            .map(|(_, ms)| Duration::from_millis(*ms))
            .unwrap_or(DEFAULT_SETTLEMENT_DELAY)
    }

    fn submit(
        callbacks: &dyn VendorCallbacks,
        mut buf: HciBuffer,
        command: &HciCommand,
    ) -> VendorResult<()> {
        if let Err(e) = buf.write_command(command) {
            callbacks.dealloc(buf);
            return Err(e);
        }
        if callbacks.xmit(command.opcode(), buf, EventRoute::HwConfig) {
            Ok(())
        } else {
            Err(VendorError::XmitRejected {
                opcode: command.opcode(),
            })
        }
    }

    fn finish(&self, cb: &mut ControlBlock, callbacks: &dyn VendorCallbacks) {
        let failure = cb.failure.take();
        *cb = ControlBlock::new(self.family.default_patch_state());
        match failure {
            None => {
                info!("fwcfg: firmware configuration done");
                callbacks.fwcfg_cb(VendorOpResult::Success);
            }
            Some(e) => {
                error!(
                    "fwcfg: controller left manufacture mode after error [{}]: {}",
                    e.error_code(),
                    e
                );
                callbacks.fwcfg_cb(VendorOpResult::Fail);
            }
        }
    }

    fn abort(&self, cb: &mut ControlBlock, callbacks: &dyn VendorCallbacks, e: VendorError) {
        error!(
            "fwcfg: aborted in {:?} [{}]: {}",
            cb.state,
            e.error_code(),
            e
        );
        *cb = ControlBlock::new(self.family.default_patch_state());
        callbacks.fwcfg_cb(VendorOpResult::Fail);
    }
}
