// The event pump: advances wall-clock cycles past what the CPU alone
// consumed, drives `Peripheral::tick`, and turns the resulting one-shot
// and periodic events into CPU pending-interrupt flags. Kept separate
// from `Peripheral` so register-level state (what hardware.py calls
// `HardwareState`) stays independent of *when* events fire relative to
// the configured interrupt line.

use crate::config::TimerLine;
use crate::cpu::CPU;
use crate::peripheral::Peripheral;

pub struct Clock {
    pub total_cycles: u64,
}

impl Clock {
    pub fn new() -> Self {
        Clock { total_cycles: 0 }
    }

    pub fn reset(&mut self) {
        self.total_cycles = 0;
    }

    /// Advances the clock by `delta` cycles (the cost of the instruction
    /// the CPU just retired) and applies any events the peripheral layer
    /// fires as a result.
    pub fn advance(&mut self, delta: u32, cpu: &mut CPU, peripheral: &mut Peripheral) {
        self.total_cycles += delta as u64;
        let events = peripheral.tick(delta as u64);
        if events.raise_ext0 {
            cpu.raise_ext0();
        }
        if events.raise_timer {
            match peripheral.timer_line() {
                TimerLine::Timer0 => cpu.raise_timer0(),
                TimerLine::Timer1 => cpu.raise_timer1(),
                TimerLine::Ext1 => cpu.raise_ext1(),
            }
        }
    }
}
