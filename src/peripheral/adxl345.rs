//! ADXL345 three-axis accelerometer on the I²C bus.
//!
//! Register-map slave with the stock register set; the host posts raw
//! samples through the event queue and the data-ready interrupt is routed
//! to INT1 or INT2 per INT_MAP, with DATA_FORMAT.INT_INVERT selecting the
//! polarity. Reading any data register consumes the data-ready condition.

use crate::soc::gpio::{GpioPeripheral, PinDirection, PinLevel};
use crate::soc::regs::{Access, FieldId, RegisterFile, RegisterOps};
use crate::soc::twi::{I2cSlave, NextPolicy, RegisterMap};

mod reg {
    pub const DEVID: u32 = 0x00;
    pub const THRESH_TAP: u32 = 0x1D;
    pub const OFSX: u32 = 0x1E;
    pub const OFSY: u32 = 0x1F;
    pub const OFSZ: u32 = 0x20;
    pub const DUR: u32 = 0x21;
    pub const LATENT: u32 = 0x22;
    pub const WINDOW: u32 = 0x23;
    pub const THRESH_ACT: u32 = 0x24;
    pub const THRESH_INACT: u32 = 0x25;
    pub const TIME_INACT: u32 = 0x26;
    pub const ACT_INACT_CTL: u32 = 0x27;
    pub const THRESH_FF: u32 = 0x28;
    pub const TIME_FF: u32 = 0x29;
    pub const TAP_AXES: u32 = 0x2A;
    pub const ACT_TAP_STATUS: u32 = 0x2B;
    pub const BW_RATE: u32 = 0x2C;
    pub const POWER_CTL: u32 = 0x2D;
    pub const INT_ENABLE: u32 = 0x2E;
    pub const INT_MAP: u32 = 0x2F;
    pub const INT_SOURCE: u32 = 0x30;
    pub const DATA_FORMAT: u32 = 0x31;
    pub const DATAX0: u32 = 0x32;
    pub const DATAZ1: u32 = 0x37;
    pub const FIFO_CTL: u32 = 0x38;
    pub const FIFO_STATUS: u32 = 0x39;
}

const DEVICE_ID: u32 = 0xE5;
const DATA_READY_BIT: u8 = 1 << 7;

mod fid {
    pub const PLAIN0: u16 = 0; // THRESH_TAP .. FIFO_CTL block, see PLAIN_REGS
    pub const ACT_TAP_STATUS: u16 = 32;
    pub const FIFO_STATUS: u16 = 33;
    pub const DATA_READY_EN: u16 = 34;
    pub const INT_MAP: u16 = 35;
    pub const DATA_READY: u16 = 36;
    pub const INT_INVERT: u16 = 37;
    pub const DATA0: u16 = 38; // ..=43, X0 X1 Y0 Y1 Z0 Z1
}

/// Simple read/write byte registers, in map order.
const PLAIN_REGS: &[u32] = &[
    reg::THRESH_TAP,
    reg::OFSX,
    reg::OFSY,
    reg::OFSZ,
    reg::DUR,
    reg::LATENT,
    reg::WINDOW,
    reg::THRESH_ACT,
    reg::THRESH_INACT,
    reg::TIME_INACT,
    reg::ACT_INACT_CTL,
    reg::THRESH_FF,
    reg::TIME_FF,
    reg::TAP_AXES,
    reg::BW_RATE,
    reg::POWER_CTL,
    reg::FIFO_CTL,
];

struct AdxlState {
    plain: [u8; PLAIN_REGS.len()],
    accel: [i16; 3],
    int_map: u8,
    data_ready: bool,
    data_ready_int_enabled: bool,
    int_active_low: bool,
}

impl AdxlState {
    fn new() -> Self {
        let mut plain = [0u8; PLAIN_REGS.len()];
        // BW_RATE resets to 100 Hz.
        plain[14] = 0x0A;
        Self {
            plain,
            accel: [0, 0, 256], // 1g on Z
            int_map: 0,
            data_ready: false,
            data_ready_int_enabled: false,
            int_active_low: false,
        }
    }

    fn data_byte(&mut self, index: usize) -> u8 {
        self.data_ready = false;
        let sample = self.accel[index / 2];
        if index % 2 == 0 {
            sample as u8
        } else {
            (sample >> 8) as u8
        }
    }
}

impl RegisterOps for AdxlState {
    fn field_read(&mut self, field: FieldId) -> u32 {
        match field {
            f if (f as usize) < PLAIN_REGS.len() => self.plain[f as usize] as u32,
            fid::ACT_TAP_STATUS | fid::FIFO_STATUS => 0,
            fid::DATA_READY_EN => self.data_ready_int_enabled as u32,
            fid::INT_MAP => self.int_map as u32,
            fid::DATA_READY => self.data_ready as u32,
            fid::INT_INVERT => self.int_active_low as u32,
            f @ fid::DATA0.. if f < fid::DATA0 + 6 => {
                self.data_byte((f - fid::DATA0) as usize) as u32
            }
            _ => 0,
        }
    }

    fn field_write(&mut self, field: FieldId, value: u32) {
        match field {
            f if (f as usize) < PLAIN_REGS.len() => self.plain[f as usize] = value as u8,
            fid::DATA_READY_EN => self.data_ready_int_enabled = value != 0,
            fid::INT_MAP => self.int_map = value as u8,
            fid::INT_INVERT => self.int_active_low = value != 0,
            _ => {}
        }
    }
}

/// The accelerometer: I²C register map plus two interrupt output pins.
pub struct Adxl345 {
    map: RegisterMap,
    s: AdxlState,
    dirty_out: u32,
}

impl Adxl345 {
    pub fn new() -> Self {
        let mut rf = RegisterFile::new();
        rf.register(reg::DEVID, "DEVID").field(0, 8, Access::Const(DEVICE_ID));
        for (index, &offset) in PLAIN_REGS.iter().enumerate() {
            rf.register(offset, "ADXL_REG")
                .field(0, 8, Access::ReadWrite(fid::PLAIN0 + index as u16));
        }
        rf.register(reg::ACT_TAP_STATUS, "ACT_TAP_STATUS")
            .field(0, 8, Access::ReadOnly(fid::ACT_TAP_STATUS));
        rf.register(reg::INT_ENABLE, "INT_ENABLE")
            .field(7, 1, Access::ReadWrite(fid::DATA_READY_EN));
        rf.register(reg::INT_MAP, "INT_MAP").field(0, 8, Access::ReadWrite(fid::INT_MAP));
        rf.register(reg::INT_SOURCE, "INT_SOURCE")
            .field(7, 1, Access::ReadOnly(fid::DATA_READY));
        rf.register(reg::DATA_FORMAT, "DATA_FORMAT")
            .field(5, 1, Access::ReadWrite(fid::INT_INVERT));
        for i in 0..6u32 {
            rf.register(reg::DATAX0 + i, "DATA")
                .field(0, 8, Access::ReadOnly(fid::DATA0 + i as u16));
        }
        rf.register(reg::FIFO_STATUS, "FIFO_STATUS")
            .field(0, 8, Access::ReadOnly(fid::FIFO_STATUS));
        Self {
            map: RegisterMap::new(rf, NextPolicy::IncrementIfPresent),
            s: AdxlState::new(),
            dirty_out: 0,
        }
    }

    /// Host-supplied raw sample; raises the data-ready condition.
    pub fn set_acceleration(&mut self, x: i16, y: i16, z: i16) {
        let before = [self.output_level(0), self.output_level(1)];
        self.s.accel = [x, y, z];
        self.s.data_ready = true;
        self.diff_outputs(before);
    }

    fn diff_outputs(&mut self, before: [PinLevel; 2]) {
        for pin in 0..2 {
            if self.output_level(pin) != before[pin] {
                self.dirty_out |= 1 << pin;
            }
        }
    }
}

impl Default for Adxl345 {
    fn default() -> Self {
        Self::new()
    }
}

impl I2cSlave for Adxl345 {
    fn read(&mut self, buf: &mut [u8]) -> bool {
        let before = [self.output_level(0), self.output_level(1)];
        let ok = self.map.read(&mut self.s, buf);
        self.diff_outputs(before);
        ok
    }

    fn write(&mut self, buf: &[u8]) -> bool {
        let before = [self.output_level(0), self.output_level(1)];
        let ok = self.map.write(&mut self.s, buf);
        self.diff_outputs(before);
        ok
    }

    fn stop(&mut self) {
        self.map.stop();
    }
}

impl GpioPeripheral for Adxl345 {
    fn pin_count(&self) -> usize {
        2
    }

    fn direction(&self, _pin: usize) -> PinDirection {
        PinDirection::Output
    }

    fn output_level(&self, pin: usize) -> PinLevel {
        let idle = PinLevel::from_bool(self.s.int_active_low);
        let asserted = self.s.data_ready && self.s.data_ready_int_enabled;
        let level = PinLevel::from_bool(asserted ^ self.s.int_active_low);
        // INT_MAP bit 7 steers the data-ready source onto INT2 (pin 1).
        let routed_pin = if self.s.int_map & DATA_READY_BIT != 0 { 1 } else { 0 };
        if pin == routed_pin {
            level
        } else {
            idle
        }
    }

    fn set_input(&mut self, _pin: usize, _level: PinLevel) -> bool {
        false
    }

    fn take_output_changes(&mut self) -> u32 {
        std::mem::take(&mut self.dirty_out)
    }
}
