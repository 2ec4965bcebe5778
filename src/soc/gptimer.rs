//! General-purpose timer block: eight timers plus the shared enable,
//! disable and status registers. A register façade only, enough for the
//! firmware's early-boot configuration; the timers do not count.

use super::regs::{Access, FieldId, RegisterFile, RegisterOps};

const TIMER_COUNT: usize = 8;
const TIMER_STRIDE: u32 = 0x10;
const BLOCK_BASE: u32 = 0x80;

mod fid {
    pub const CONFIG: u16 = 0;
    pub const COUNTER: u16 = 1;
    pub const PERIOD: u16 = 2;
    pub const WIDTH: u16 = 3;
    pub const ENABLE: u16 = 4;
    pub const DISABLE: u16 = 5;
    pub const STATUS: u16 = 6;
}

#[derive(Debug, Default, Clone, Copy)]
struct Timer {
    config: u16,
    counter: u32,
    period: u32,
    width: u32,
    enabled: bool,
    running: bool,
    overflow: bool,
    interrupt_pending: bool,
}

#[derive(Debug, Default)]
struct TimerState {
    timers: [Timer; TIMER_COUNT],
    selected: usize,
}

impl TimerState {
    fn enable_mask(&self) -> u32 {
        self.timers.iter().enumerate().fold(0, |mask, (i, t)| mask | (t.enabled as u32) << i)
    }

    /// TIMER_STATUS packs four timers per 16-bit half: interrupt bits 0..3,
    /// overflow bits 4..7, run bits 12..15.
    fn status_word(&self) -> u32 {
        let mut status = 0u32;
        for half in 0..2 {
            let shift = half * 16;
            for i in 0..4 {
                let t = &self.timers[half * 4 + i];
                status |= (t.interrupt_pending as u32) << (shift + i);
                status |= (t.overflow as u32) << (shift + 4 + i);
                status |= (t.running as u32) << (shift + 12 + i);
            }
        }
        status
    }

    fn status_write(&mut self, value: u32) {
        for half in 0..2 {
            let shift = half * 16;
            for i in 0..4 {
                let t = &mut self.timers[half * 4 + i];
                if value & 1 << (shift + i) != 0 {
                    t.interrupt_pending = false;
                }
                if value & 1 << (shift + 4 + i) != 0 {
                    t.overflow = false;
                }
                if value & 1 << (shift + 12 + i) != 0 {
                    t.running = false;
                }
            }
        }
    }
}

impl RegisterOps for TimerState {
    fn field_read(&mut self, field: FieldId) -> u32 {
        let t = &self.timers[self.selected];
        match field {
            fid::CONFIG => t.config as u32,
            fid::COUNTER => t.counter,
            fid::PERIOD => t.period,
            fid::WIDTH => t.width,
            fid::ENABLE | fid::DISABLE => self.enable_mask(),
            fid::STATUS => self.status_word(),
            _ => 0,
        }
    }

    fn field_write(&mut self, field: FieldId, value: u32) {
        match field {
            fid::CONFIG => self.timers[self.selected].config = value as u16,
            fid::COUNTER => self.timers[self.selected].counter = value,
            fid::PERIOD => self.timers[self.selected].period = value,
            fid::WIDTH => self.timers[self.selected].width = value,
            fid::ENABLE => {
                for (i, t) in self.timers.iter_mut().enumerate() {
                    if value & 1 << i != 0 {
                        t.enabled = true;
                    }
                }
            }
            fid::DISABLE => {
                for (i, t) in self.timers.iter_mut().enumerate() {
                    if value & 1 << i != 0 {
                        t.enabled = false;
                    }
                }
            }
            fid::STATUS => self.status_write(value),
            _ => {}
        }
    }
}

pub struct GpTimerBlock {
    timer_rf: RegisterFile,
    block_rf: RegisterFile,
    s: TimerState,
}

impl GpTimerBlock {
    pub const MMIO_SIZE: u32 = 0x90;

    pub fn new() -> Self {
        let mut timer_rf = RegisterFile::new();
        timer_rf.register(0x00, "TIMER_CONFIG").field(0, 16, Access::ReadWrite(fid::CONFIG));
        timer_rf.register(0x04, "TIMER_COUNTER").field(0, 32, Access::ReadWrite(fid::COUNTER));
        timer_rf.register(0x08, "TIMER_PERIOD").field(0, 32, Access::ReadWrite(fid::PERIOD));
        timer_rf.register(0x0C, "TIMER_WIDTH").field(0, 32, Access::ReadWrite(fid::WIDTH));
        let mut block_rf = RegisterFile::new();
        block_rf.register(0x00, "TIMER_ENABLE").field(0, 8, Access::ReadWrite(fid::ENABLE));
        block_rf.register(0x04, "TIMER_DISABLE").field(0, 8, Access::ReadWrite(fid::DISABLE));
        block_rf.register(0x08, "TIMER_STATUS").field(0, 32, Access::ReadWrite(fid::STATUS));
        Self { timer_rf, block_rf, s: TimerState::default() }
    }

    pub fn read32(&mut self, offset: u32) -> u32 {
        if offset < BLOCK_BASE {
            self.s.selected = ((offset / TIMER_STRIDE) as usize).min(TIMER_COUNT - 1);
            self.timer_rf.read32(&mut self.s, offset % TIMER_STRIDE)
        } else {
            self.block_rf.read32(&mut self.s, offset - BLOCK_BASE)
        }
    }

    pub fn write32(&mut self, offset: u32, value: u32) {
        if offset < BLOCK_BASE {
            self.s.selected = ((offset / TIMER_STRIDE) as usize).min(TIMER_COUNT - 1);
            self.timer_rf.write32(&mut self.s, offset % TIMER_STRIDE, value);
        } else {
            self.block_rf.write32(&mut self.s, offset - BLOCK_BASE, value);
        }
    }
}

impl Default for GpTimerBlock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_timer_registers_are_independent() {
        let mut block = GpTimerBlock::new();
        block.write32(0x08, 0x1234);
        block.write32(0x10 * 3 + 0x08, 0x5678);
        assert_eq!(block.read32(0x08), 0x1234);
        assert_eq!(block.read32(0x38), 0x5678);
    }

    #[test]
    fn enable_and_disable_masks() {
        let mut block = GpTimerBlock::new();
        block.write32(0x80, 0b1010_0001);
        assert_eq!(block.read32(0x80), 0b1010_0001);
        block.write32(0x84, 0b0010_0000);
        assert_eq!(block.read32(0x84), 0b1000_0001);
    }
}
