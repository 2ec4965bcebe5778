//! Digital potentiometer readout slave.
//!
//! Exposes the current wiper position as two nibble-aligned read-only
//! registers. The slave itself is owned by the TWI directory, so host
//! updates arrive through a shared [`PotHandle`].

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::soc::regs::{Access, FieldId, RegisterFile, RegisterOps};
use crate::soc::twi::{I2cSlave, NextPolicy, RegisterMap};

mod fid {
    pub const HIGH: u16 = 0;
    pub const LOW: u16 = 1;
}

/// Host-side setter for the wiper position.
#[derive(Clone)]
pub struct PotHandle {
    value: Arc<AtomicU8>,
}

impl PotHandle {
    pub fn set_value(&self, value: u8) {
        self.value.store(value, Ordering::Relaxed);
    }
}

struct PotState {
    value: Arc<AtomicU8>,
}

impl PotState {
    fn value(&self) -> u8 {
        self.value.load(Ordering::Relaxed)
    }
}

impl RegisterOps for PotState {
    fn field_read(&mut self, field: FieldId) -> u32 {
        match field {
            fid::HIGH => ((self.value() & 0xF0) >> 4) as u32,
            fid::LOW => ((self.value() & 0x0F) << 4) as u32,
            _ => 0,
        }
    }

    fn field_write(&mut self, _field: FieldId, _value: u32) {}
}

pub struct Potentiometer {
    map: RegisterMap,
    s: PotState,
}

impl Potentiometer {
    pub fn new() -> (Self, PotHandle) {
        let mut rf = RegisterFile::new();
        rf.register(0x00, "HIGH_VALUE").field(0, 8, Access::ReadOnly(fid::HIGH));
        rf.register(0x01, "LOW_VALUE").field(0, 8, Access::ReadOnly(fid::LOW));
        let value = Arc::new(AtomicU8::new(0));
        let pot = Self {
            map: RegisterMap::new(rf, NextPolicy::IncrementIfPresent),
            s: PotState { value: value.clone() },
        };
        (pot, PotHandle { value })
    }
}

impl I2cSlave for Potentiometer {
    fn read(&mut self, buf: &mut [u8]) -> bool {
        self.map.read(&mut self.s, buf)
    }

    fn write(&mut self, buf: &[u8]) -> bool {
        self.map.write(&mut self.s, buf)
    }

    fn stop(&mut self) {
        self.map.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nibbles_split_across_the_two_registers() {
        let (mut p, handle) = Potentiometer::new();
        handle.set_value(0xA7);
        assert!(p.write(&[0x00]));
        let mut out = [0u8; 2];
        assert!(p.read(&mut out));
        assert_eq!(out, [0x0A, 0x70]);
    }
}
