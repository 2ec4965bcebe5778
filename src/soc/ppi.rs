//! Parallel peripheral interface, used as the video-out DMA sink.
//!
//! Enabling the port declares the frame dimensions to the attached display;
//! DMA rows stream straight through to [`Display::update_row`].

use super::regs::{Access, FieldId, RegisterFile, RegisterOps};
use crate::host::Display;

mod fid {
    pub const PORT_EN: u16 = 0;
    pub const PORT_DIR: u16 = 1;
    pub const XFR_TYPE: u16 = 2;
    pub const PORT_CFG: u16 = 3;
    pub const PACK_EN: u16 = 4;
    pub const DLEN: u16 = 5;
    pub const COUNT: u16 = 6;
    pub const DELAY: u16 = 7;
    pub const FRAME: u16 = 8;
}

struct PpiState {
    enabled: bool,
    output_mode: bool,
    transfer_type: u8,
    port_config: u8,
    packing: bool,
    data_length: u8,
    /// Samples per line minus one, as programmed.
    row_count: u16,
    delay: u16,
    line_count: u16,
    display: Box<dyn Display>,
}

impl RegisterOps for PpiState {
    fn field_read(&mut self, field: FieldId) -> u32 {
        match field {
            fid::PORT_EN => self.enabled as u32,
            fid::PORT_DIR => self.output_mode as u32,
            fid::XFR_TYPE => self.transfer_type as u32,
            fid::PORT_CFG => self.port_config as u32,
            fid::PACK_EN => self.packing as u32,
            fid::DLEN => self.data_length as u32,
            fid::COUNT => self.row_count as u32,
            fid::DELAY => self.delay as u32,
            fid::FRAME => self.line_count as u32,
            _ => 0,
        }
    }

    fn field_write(&mut self, field: FieldId, value: u32) {
        match field {
            fid::PORT_EN => self.enabled = value != 0,
            fid::PORT_DIR => self.output_mode = value != 0,
            fid::XFR_TYPE => self.transfer_type = value as u8,
            fid::PORT_CFG => self.port_config = value as u8,
            fid::PACK_EN => self.packing = value != 0,
            fid::DLEN => self.data_length = value as u8,
            fid::COUNT => self.row_count = value as u16,
            fid::DELAY => self.delay = value as u16,
            fid::FRAME => self.line_count = value as u16,
            _ => {}
        }
    }

    fn register_written(&mut self, offset: u32, _value: u32) {
        if offset == 0x00 && self.enabled {
            self.display.initialize(self.row_count as u32 + 1, self.line_count as u32);
        }
    }
}

pub struct Ppi {
    rf: RegisterFile,
    s: PpiState,
}

impl Ppi {
    pub const MMIO_SIZE: u32 = 0x14;

    pub fn new(display: Box<dyn Display>) -> Self {
        let mut rf = RegisterFile::new();
        rf.register(0x00, "PPI_CONTROL")
            .field(0, 1, Access::ReadWrite(fid::PORT_EN))
            .field(1, 1, Access::ReadWrite(fid::PORT_DIR))
            .field(2, 2, Access::ReadWrite(fid::XFR_TYPE))
            .field(4, 2, Access::ReadWrite(fid::PORT_CFG))
            .field(7, 1, Access::ReadWrite(fid::PACK_EN))
            .field(11, 3, Access::ReadWrite(fid::DLEN));
        rf.register(0x08, "PPI_COUNT").field(0, 16, Access::ReadWrite(fid::COUNT));
        rf.register(0x0C, "PPI_DELAY").field(0, 16, Access::ReadWrite(fid::DELAY));
        rf.register(0x10, "PPI_FRAME").field(0, 16, Access::ReadWrite(fid::FRAME));
        Self {
            rf,
            s: PpiState {
                enabled: false,
                output_mode: false,
                transfer_type: 0,
                port_config: 0,
                packing: false,
                data_length: 0,
                row_count: 0,
                delay: 0,
                line_count: 0,
                display,
            },
        }
    }

    pub fn read32(&mut self, offset: u32) -> u32 {
        self.rf.read32(&mut self.s, offset)
    }

    pub fn write32(&mut self, offset: u32, value: u32) {
        self.rf.write32(&mut self.s, offset, value);
    }

    /// DMA endpoint: frame rows out to the display. Input capture is not
    /// supported, so the read side moves nothing.
    pub fn dma_write(&mut self, x: u32, y: u32, buf: &[u8]) -> usize {
        self.s.display.update_row(x, y, buf);
        buf.len()
    }

    pub fn dma_read(&mut self, _x: u32, _y: u32, _buf: &mut [u8]) -> usize {
        0
    }

    /// Polled once per step to drive the frame-sync GPIO pulse.
    pub fn poll_frame_start(&mut self) -> bool {
        self.s.display.frame_started()
    }

    pub fn display_mut(&mut self) -> &mut dyn Display {
        self.s.display.as_mut()
    }
}
