use std::collections::HashMap;

/// Number of consecutive polling reads of a busy-style MMIO register
/// before the peripheral layer flips it to "ready"/"complete" on its own,
/// so that firmware spin-loops make forward progress without a real
/// device ever being attached.
pub type PollThreshold = u8;

/// A data-driven patch applied to the firmware image or to a register's
/// default value before `reset()`. Kept as data (rather than an `if`
/// hard-coded somewhere in the peripheral layer) so a test can add or
/// remove a quirk without touching emulator source.
#[derive(Debug, Clone)]
pub struct QuirkRule {
    pub name: &'static str,
    pub xdata_address: u16,
    pub value: u8,
}

/// Tunables for the whole emulator. Every constant that the original
/// firmware's polling loops depend on lives here instead of inline in
/// `peripheral.rs`, so a test can dial down `usb_connect_delay_cycles`
/// from the default without recompiling.
#[derive(Debug, Clone)]
pub struct Config {
    /// XDATA address -> number of polls before the register self-clears
    /// or self-completes. Addresses not present here fall back to
    /// `default_poll_threshold`.
    pub poll_thresholds: HashMap<u16, PollThreshold>,
    pub default_poll_threshold: PollThreshold,
    /// XDATA address -> number of reads before a "sync flag" byte
    /// auto-clears back to zero (distinct from MMIO busy-polling: this
    /// applies to plain XDATA RAM, per `Memory::read_xdata`).
    pub sync_flag_thresholds: HashMap<u16, u8>,
    /// Cycles after boot before the simulated USB host attach event
    /// fires (raises ext0 and populates the link/PHY registers).
    pub usb_connect_delay_cycles: u64,
    /// Cycles after USB connect before a simulated PD SOURCE_CAP message
    /// arrives, if PD simulation is enabled at all.
    pub pd_message_delay_cycles: u64,
    pub pd_simulation_enabled: bool,
    /// Interval, in cycles, between periodic timer interrupt pulses.
    pub timer_interval_cycles: u64,
    /// Which pending-interrupt line the periodic timer pulse raises.
    pub timer_interrupt_line: TimerLine,
    pub quirks: Vec<QuirkRule>,
    /// Number of recent MMIO accesses the peripheral layer keeps around
    /// for fault diagnostics (spec: "configurable length, default 16").
    pub access_log_len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerLine {
    Timer0,
    Timer1,
    Ext1,
}

impl Default for Config {
    fn default() -> Self {
        // Thresholds transcribed from the reference firmware harness: the
        // command-engine and PCIe/flash busy registers settle after three
        // polls, the one XDATA sync flag the firmware spins on settles
        // after five.
        let mut poll_thresholds = HashMap::new();
        for addr in [0xC8B8u16, 0xCC11, 0xCC17, 0xCC1D, 0xCC23, 0xE41C] {
            poll_thresholds.insert(addr, 3);
        }
        let mut sync_flag_thresholds = HashMap::new();
        sync_flag_thresholds.insert(0x1238u16, 5);

        Config {
            poll_thresholds,
            default_poll_threshold: 3,
            sync_flag_thresholds,
            usb_connect_delay_cycles: 5_000,
            pd_message_delay_cycles: 10_000,
            pd_simulation_enabled: true,
            timer_interval_cycles: 1_000,
            timer_interrupt_line: TimerLine::Timer0,
            quirks: Vec::new(),
            access_log_len: 16,
        }
    }
}

impl Config {
    pub fn poll_threshold(&self, address: u16) -> PollThreshold {
        self.poll_thresholds
            .get(&address)
            .copied()
            .unwrap_or(self.default_poll_threshold)
    }
}
