use crate::config::{Config, QuirkRule, TimerLine};
use std::collections::{HashMap, VecDeque};

/// One MMIO access, kept around in a small ring buffer so a fault report
/// can show "the peripheral-access log around the fault cycle" per the
/// error-handling design's user-visible failure behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessLogEntry {
    pub cycle: u64,
    pub addr: u16,
    pub value: u8,
    pub is_write: bool,
}

/// Default register contents at reset, transcribed from the reference
/// firmware harness's hardware-state initialiser. Addresses not listed
/// here read as `0x00` until written.
const DEFAULT_REGS: &[(u16, u8)] = &[
    (0xC000, 0x00),
    (0xC001, 0x00),
    (0xC009, 0x60),
    (0x9000, 0x00),
    (0x90E0, 0x00),
    (0x9100, 0x00),
    (0x9105, 0x00),
    (0x91C0, 0x02),
    (0x91D0, 0x00),
    (0x92C0, 0x81),
    (0x92C1, 0x03),
    (0x92C2, 0x40),
    (0x92C5, 0x04),
    (0x92E0, 0x02),
    (0x92F7, 0x40),
    (0xB238, 0x00),
    (0xB254, 0x00),
    (0xB296, 0x02),
    (0xB401, 0x01),
    (0xB480, 0x01),
    (0xC412, 0x02),
    (0xC471, 0x00),
    (0xC47A, 0x00),
    (0xC520, 0x80),
    (0xC620, 0x00),
    (0xC655, 0x08),
    (0xC65A, 0x09),
    (0xC6B3, 0x30),
    (0xCD31, 0x01),
    (0xC800, 0x00),
    (0xC802, 0x00),
    (0xC806, 0x00),
    (0xC80A, 0x00),
    (0xC8A9, 0x00),
    (0xC8AA, 0x00),
    (0xC8B8, 0x00),
    (0xC8D6, 0x04),
    (0xCA00, 0x00),
    (0xCA06, 0x00),
    (0xCA0A, 0x00),
    (0xCA0D, 0x00),
    (0xCA0E, 0x00),
    (0xCA81, 0x00),
    (0xCC11, 0x00),
    (0xCC17, 0x00),
    (0xCC1D, 0x00),
    (0xCC23, 0x00),
    (0xCC33, 0x04),
    (0xCC37, 0x00),
    (0xCC3B, 0x00),
    (0xCC3D, 0x00),
    (0xCC3E, 0x00),
    (0xCC3F, 0x00),
    (0xCE5D, 0xFF),
    (0xCE89, 0x01),
    (0xE40F, 0x00),
    (0xE410, 0x00),
    (0xE41C, 0x00),
    (0xE710, 0x00),
    (0xE717, 0x00),
    (0xE751, 0x00),
    (0xE764, 0x00),
    (0xE795, 0x21),
    (0xE7E3, 0x80),
];

/// USB-setup-packet staging window. Matches the real firmware's field
/// layout named in `examples/original_source/trace/extract_flow.py`'s
/// `addr_to_field` table: `0x9104`=bmReq, `0x9105`=bReq, `0x9106`=wValL,
/// `0x9107`=wValH, `0x9108`=wIdxL, `0x9109`=wIdxH, `0x910A`=wLenL,
/// `0x910B`=wLenH -- an 8-byte window ending at `0x910B`, clear of the
/// CDB window at `0x910D`.
pub const SETUP_PACKET_BASE: u16 = 0x9104;
pub const SETUP_PENDING_FLAG: u16 = 0x9103;
pub const CDB_BASE: u16 = 0x910D;
pub const CDB_PENDING_FLAG: u16 = 0x910C;
pub const DATA_BUFFER_BASE: u16 = 0x8000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbSpeed {
    Full,
    High,
    Super,
}

impl UsbSpeed {
    fn register_value(self) -> u8 {
        match self {
            UsbSpeed::Full => 0x00,
            UsbSpeed::High => 0x01,
            UsbSpeed::Super => 0x02,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbLinkState {
    Disconnected,
    Attached,
    Powered,
    Default,
    Addressed,
    Configured,
}

/// What a peripheral tick wants the CPU's pending-interrupt set to pick
/// up. `Clock` (not `Peripheral`) decides how this maps onto IE/IP.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeripheralEvents {
    pub raise_ext0: bool,
    pub raise_timer: bool,
}

struct PollCounter {
    count: u8,
}

/// MMIO register file plus the auto-ready/auto-clear bookkeeping that
/// lets boot firmware spin on a status register without a real device
/// ever answering it. Grounded in
/// `examples/original_source/emulate/hardware.py` (`HardwareState`).
pub struct Peripheral {
    regs: HashMap<u16, u8>,
    poll_counts: HashMap<u16, PollCounter>,
    poll_thresholds: HashMap<u16, u8>,
    default_poll_threshold: u8,

    cycles: u64,
    usb_connect_delay_cycles: u64,
    usb_connect_armed: Option<(u64, UsbSpeed)>,
    usb_connected: bool,
    link_state: UsbLinkState,

    pd_simulation_enabled: bool,
    pd_message_delay_cycles: u64,
    pd_fired: bool,

    timer_interval_cycles: u64,
    timer_interrupt_line: TimerLine,
    timer_accum: u64,

    quirks: Vec<QuirkRule>,

    uart_tx: Vec<u8>,
    uart_line: Vec<u8>,

    access_log: VecDeque<AccessLogEntry>,
    access_log_len: usize,
}

impl Peripheral {
    pub fn new(config: &Config) -> Self {
        let mut regs = HashMap::new();
        for &(addr, value) in DEFAULT_REGS {
            regs.insert(addr, value);
        }
        Peripheral {
            regs,
            poll_counts: HashMap::new(),
            poll_thresholds: config.poll_thresholds.clone(),
            default_poll_threshold: config.default_poll_threshold,
            cycles: 0,
            usb_connect_delay_cycles: config.usb_connect_delay_cycles,
            usb_connect_armed: None,
            usb_connected: false,
            link_state: UsbLinkState::Disconnected,
            pd_simulation_enabled: config.pd_simulation_enabled,
            pd_message_delay_cycles: config.pd_message_delay_cycles,
            pd_fired: false,
            timer_interval_cycles: config.timer_interval_cycles,
            timer_interrupt_line: config.timer_interrupt_line,
            timer_accum: 0,
            quirks: config.quirks.clone(),
            uart_tx: Vec::new(),
            uart_line: Vec::new(),
            access_log: VecDeque::with_capacity(config.access_log_len),
            access_log_len: config.access_log_len,
        }
    }

    pub fn reset(&mut self, config: &Config) {
        self.regs.clear();
        for &(addr, value) in DEFAULT_REGS {
            self.regs.insert(addr, value);
        }
        self.poll_counts.clear();
        self.cycles = 0;
        self.usb_connect_armed = None;
        self.usb_connected = false;
        self.link_state = UsbLinkState::Disconnected;
        self.pd_fired = false;
        self.timer_accum = 0;
        self.uart_tx.clear();
        self.uart_line.clear();
        self.poll_thresholds = config.poll_thresholds.clone();
        self.access_log.clear();
        self.access_log_len = config.access_log_len;
    }

    fn log_access(&mut self, addr: u16, value: u8, is_write: bool) {
        if self.access_log_len == 0 {
            return;
        }
        if self.access_log.len() >= self.access_log_len {
            self.access_log.pop_front();
        }
        self.access_log.push_back(AccessLogEntry { cycle: self.cycles, addr, value, is_write });
    }

    /// The most recent MMIO accesses, oldest first, up to `access_log_len`
    /// entries (default 16). Used by the facade to annotate a fault.
    pub fn recent_accesses(&self) -> impl Iterator<Item = &AccessLogEntry> {
        self.access_log.iter()
    }

    fn threshold_for(&self, addr: u16) -> u8 {
        self.poll_thresholds
            .get(&addr)
            .copied()
            .unwrap_or(self.default_poll_threshold)
    }

    fn note_poll(&mut self, addr: u16) -> bool {
        let threshold = self.threshold_for(addr);
        let counter = self.poll_counts.entry(addr).or_insert(PollCounter { count: 0 });
        counter.count += 1;
        if counter.count >= threshold {
            counter.count = 0;
            true
        } else {
            false
        }
    }

    pub fn read(&mut self, addr: u16) -> u8 {
        let value = match addr {
            // UART line status: always reports transmit holding register
            // empty / transmitter idle so a polling UART driver never
            // blocks.
            0xC009 => 0x60,
            // Busy/command-engine registers: auto-clear to ready (0x00)
            // after the configured number of polls.
            0xC8B8 | 0xE41C => {
                if self.note_poll(addr) {
                    self.regs.insert(addr, 0x00);
                }
                *self.regs.get(&addr).unwrap_or(&0)
            }
            // Timer CSRs: status-becomes-ready. After the configured
            // number of polls the expired bit (0x02) is OR'd into
            // whatever the firmware last wrote and stays set until an
            // explicit acknowledging write.
            0xCC11 | 0xCC17 | 0xCC1D | 0xCC23 => {
                if self.note_poll(addr) {
                    let current = *self.regs.get(&addr).unwrap_or(&0);
                    self.regs.insert(addr, current | 0x02);
                }
                *self.regs.get(&addr).unwrap_or(&0)
            }
            // Any other MMIO address the harness doesn't model explicitly:
            // reads as 0x00 until the configured poll threshold, then
            // settles at 0xFF permanently. Satisfies the firmware's usual
            // "wait for ready" idiom on registers this emulator doesn't
            // know the real meaning of.
            _ => match self.regs.get(&addr) {
                Some(&value) => value,
                None => {
                    if self.note_poll(addr) {
                        self.regs.insert(addr, 0xFF);
                        0xFF
                    } else {
                        0x00
                    }
                }
            },
        };
        self.log_access(addr, value, false);
        value
    }

    pub fn write(&mut self, addr: u16, value: u8) {
        self.log_access(addr, value, true);
        match addr {
            0xC000 | 0xC001 => self.uart_write(value),
            // PCIe/flash trigger registers: writing arms a one-shot
            // "complete" status the next time it is read.
            0xB254 => {
                self.regs.insert(addr, value);
                self.regs.insert(0xB296, 0x02);
            }
            // Timer CSR: any write resets the poll count; writing with
            // bit 2 set acknowledges/clears both the enable and expired
            // bits rather than storing the literal byte.
            0xCC11 | 0xCC17 | 0xCC1D | 0xCC23 => {
                self.poll_counts.remove(&addr);
                if value & 0x04 != 0 {
                    self.regs.insert(addr, 0x00);
                } else {
                    self.regs.insert(addr, value);
                }
            }
            0xC8B8 | 0xE41C => {
                self.poll_counts.remove(&addr);
                self.regs.insert(addr, value);
            }
            _ => {
                self.regs.insert(addr, value);
            }
        }
    }

    fn uart_write(&mut self, byte: u8) {
        self.uart_tx.push(byte);
        self.uart_line.push(byte);
        if byte == b'\n' || byte == b']' {
            self.flush_uart_line();
        }
    }

    fn flush_uart_line(&mut self) {
        if self.uart_line.is_empty() {
            return;
        }
        log::debug!("uart: {}", String::from_utf8_lossy(&self.uart_line));
        self.uart_line.clear();
    }

    /// All bytes ever written to the UART transmit register, in order.
    pub fn uart_output(&self) -> &[u8] {
        &self.uart_tx
    }

    pub fn connect_usb(&mut self, speed: UsbSpeed) {
        self.usb_connect_armed = Some((self.cycles + self.usb_connect_delay_cycles, speed));
    }

    pub fn link_state(&self) -> UsbLinkState {
        self.link_state
    }

    fn fire_usb_connect(&mut self, speed: UsbSpeed) {
        self.regs.insert(0x9000, 0x81);
        self.regs.insert(0x90E0, speed.register_value());
        self.regs.insert(0x9100, 0x02);
        self.regs.insert(0x9105, 0xFF);
        self.regs.insert(0xC802, 0x04);
        self.regs.insert(0xC80A, 0x40);
        self.regs.insert(0xE40F, 0x01);
        self.regs.insert(0xCA0D, 0x08);
        self.regs.insert(0xCA0E, 0x04);
        self.usb_connected = true;
        self.link_state = UsbLinkState::Configured;
        for quirk in &self.quirks {
            self.regs.insert(quirk.xdata_address, quirk.value);
        }
    }

    fn fire_pd_message(&mut self) {
        self.regs.insert(0xCA0D, 0x0C);
        self.regs.insert(0xCA0E, 0x04);
        self.regs.insert(0xCA06, 0x61); // PD message type - Source_Capabilities
    }

    /// Advance by `delta` cycles, firing any deferred one-shot events
    /// and the periodic timer pulse. Returns which pending-interrupt
    /// lines the clock should raise as a result.
    pub fn tick(&mut self, delta: u64) -> PeripheralEvents {
        let mut events = PeripheralEvents::default();
        self.cycles += delta;

        if let Some((target, speed)) = self.usb_connect_armed {
            if self.cycles >= target {
                self.fire_usb_connect(speed);
                self.usb_connect_armed = None;
                events.raise_ext0 = true;
            }
        }

        if self.usb_connected && self.pd_simulation_enabled && !self.pd_fired {
            if self.cycles >= self.usb_connect_delay_cycles + self.pd_message_delay_cycles {
                self.fire_pd_message();
                self.pd_fired = true;
                events.raise_ext0 = true;
            }
        }

        self.timer_accum += delta;
        if self.timer_accum >= self.timer_interval_cycles {
            self.timer_accum -= self.timer_interval_cycles;
            self.regs.insert(0xC806, 0x01);
            events.raise_timer = true;
        }

        events
    }

    pub fn timer_line(&self) -> TimerLine {
        self.timer_interrupt_line
    }

    pub fn peek(&self, addr: u16) -> u8 {
        *self.regs.get(&addr).unwrap_or(&0)
    }

    pub fn poke(&mut self, addr: u16, value: u8) {
        self.regs.insert(addr, value);
    }
}
