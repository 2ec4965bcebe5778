//! JTAG identification window. The firmware's early sanity check only
//! cares about the low byte of DSPID (0x02 for the simulated silicon rev).

use super::regs::{Access, RegisterFile, RegisterOps};

struct JtagState;

impl RegisterOps for JtagState {
    fn field_read(&mut self, _field: u16) -> u32 {
        0
    }

    fn field_write(&mut self, _field: u16, _value: u32) {}
}

pub struct JtagId {
    rf: RegisterFile,
    s: JtagState,
}

impl JtagId {
    pub const MMIO_SIZE: u32 = 0x0C;

    pub fn new(dspid: u32) -> Self {
        let mut rf = RegisterFile::new();
        rf.register(0x00, "DSPID").field(0, 32, Access::Const(dspid));
        Self { rf, s: JtagState }
    }

    pub fn read32(&mut self, offset: u32) -> u32 {
        self.rf.read32(&mut self.s, offset)
    }

    pub fn write32(&mut self, offset: u32, value: u32) {
        self.rf.write32(&mut self.s, offset, value);
    }
}
