//! DMA engine: sixteen channels in one MMIO aperture, 64 bytes per slot.
//!
//! A CONFIG write arms the channel and runs the descriptor step for the
//! programmed flow (stop/autobuffer inline, descriptor array from
//! CURR_DESC_PTR, small/large descriptor lists from NEXT_DESC_PTR). Each
//! machine tick a running channel moves one burst between guest memory and
//! its peripheral endpoint, honoring X_MODIFY scatter (element-at-a-time
//! when it differs from the element size) and 2-D row stepping.
//!
//! Memory-to-memory transfers are not supported.

use tracing::warn;

use super::regs::{Access, FieldId, RegisterFile, RegisterOps};
use super::Soc;

/// Bytes moved per channel per tick, at most.
const BURST_BYTES: u32 = 4096;
const CHANNEL_COUNT: usize = 16;
const CHANNEL_STRIDE: u32 = 0x40;

/// Peripheral-map codes of the endpoints this SoC wires up.
pub mod pmap {
    pub const PPI: u8 = 0x0;
    pub const NFC: u8 = 0x2;
    pub const SPORT0_RX: u8 = 0x3;
    pub const SPORT0_TX: u8 = 0x4;
    pub const SPORT1_RX: u8 = 0x5;
    pub const SPORT1_TX: u8 = 0x6;
}

/// FLOW field: what happens when the current buffer drains.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    #[default]
    Stop,
    Autobuffer,
    DescArray,
    DescSmall,
    DescLarge,
}

impl Flow {
    fn from_bits(bits: u32) -> Flow {
        match bits {
            0x1 => Flow::Autobuffer,
            0x4 => Flow::DescArray,
            0x6 => Flow::DescSmall,
            0x7 => Flow::DescLarge,
            _ => Flow::Stop,
        }
    }

    fn bits(self) -> u32 {
        match self {
            Flow::Stop => 0x0,
            Flow::Autobuffer => 0x1,
            Flow::DescArray => 0x4,
            Flow::DescSmall => 0x6,
            Flow::DescLarge => 0x7,
        }
    }
}

mod fid {
    pub const NDPTR: u16 = 0;
    pub const START: u16 = 1;
    pub const DMAEN: u16 = 2;
    pub const WNR: u16 = 3;
    pub const WDSIZE: u16 = 4;
    pub const DMA2D: u16 = 5;
    pub const SYNC: u16 = 6;
    pub const DI_SEL: u16 = 7;
    pub const DI_EN: u16 = 8;
    pub const NDSIZE: u16 = 9;
    pub const FLOW: u16 = 10;
    pub const XCNT: u16 = 11;
    pub const XMOD: u16 = 12;
    pub const YCNT: u16 = 13;
    pub const YMOD: u16 = 14;
    pub const CURR_DESC: u16 = 15;
    pub const CURR_ADDR: u16 = 16;
    pub const DONE: u16 = 17;
    pub const ERR: u16 = 18;
    pub const RUN: u16 = 19;
    pub const CTYPE: u16 = 20;
    pub const PMAP: u16 = 21;
    pub const CURR_X: u16 = 22;
    pub const CURR_Y: u16 = 23;
}

/// Per-channel register and transfer state.
#[derive(Debug, Default)]
pub struct DmaChannel {
    enabled: bool,
    mem_write: bool,
    word_size: u8,
    two_d: bool,
    sync: bool,
    int_each_row: bool,
    int_enable: bool,
    ndsize: u8,
    flow: Flow,

    completed: bool,
    error: bool,
    running: bool,

    mem_to_mem: bool,
    peripheral: u8,

    next_desc_ptr: u32,
    start_addr: u32,
    x_count: u16,
    x_modify: i16,
    y_count: u16,
    y_modify: i16,
    curr_desc_ptr: u32,
    curr_addr: u32,
    curr_x: u16,
    curr_y: u16,

    config_written: bool,
}

impl DmaChannel {
    fn element_bytes(&self) -> u32 {
        1 << self.word_size.min(2)
    }

    pub fn is_active(&self) -> bool {
        self.enabled && self.running && !self.mem_to_mem
    }

    /// Interrupt request level: the DONE latch gated by DI_EN.
    pub fn irq_level(&self) -> bool {
        self.completed && self.int_enable
    }

    pub fn completed(&self) -> bool {
        self.completed
    }

    pub fn error(&self) -> bool {
        self.error
    }

    fn apply_config(&mut self, cfg: u32) {
        self.enabled = cfg & 1 != 0;
        self.mem_write = cfg & 2 != 0;
        self.word_size = ((cfg >> 2) & 3) as u8;
        self.two_d = cfg & (1 << 4) != 0;
        self.sync = cfg & (1 << 5) != 0;
        self.int_each_row = cfg & (1 << 6) != 0;
        self.int_enable = cfg & (1 << 7) != 0;
        self.ndsize = ((cfg >> 8) & 0xF) as u8;
        self.flow = Flow::from_bits((cfg >> 12) & 0x7);
    }

    /// Apply one fetched descriptor element. Logical slots follow the large
    /// model order: NDPL, NDPH, SAL, SAH, CFG, XCNT, XMOD, YCNT, YMOD.
    fn apply_element(&mut self, slot: usize, value: u16) {
        match slot {
            0 => self.next_desc_ptr = (self.next_desc_ptr & 0xFFFF_0000) | value as u32,
            1 => self.next_desc_ptr = (self.next_desc_ptr & 0xFFFF) | (value as u32) << 16,
            2 => self.start_addr = (self.start_addr & 0xFFFF_0000) | value as u32,
            3 => self.start_addr = (self.start_addr & 0xFFFF) | (value as u32) << 16,
            4 => self.apply_config(value as u32),
            5 => self.x_count = value,
            6 => self.x_modify = value as i16,
            7 => self.y_count = value,
            8 => self.y_modify = value as i16,
            _ => {}
        }
    }

    /// Load the next work unit according to FLOW, then reset the current
    /// address and counters.
    fn process_descriptor(&mut self, soc: &mut Soc) {
        if !self.enabled {
            self.running = false;
            return;
        }
        let elem = self.element_bytes();
        if self.start_addr & (elem - 1) != 0 {
            self.error = true;
            self.running = false;
            return;
        }
        if self.ndsize > 0 {
            // Slot the fetched elements start at, and where they come from.
            let (first_slot, fetch_addr) = match self.flow {
                Flow::DescArray => (2, self.curr_desc_ptr),
                Flow::DescSmall | Flow::DescLarge => (0, self.next_desc_ptr),
                Flow::Stop | Flow::Autobuffer => (usize::MAX, 0),
            };
            if first_slot != usize::MAX {
                let count = self.ndsize.min(9) as usize;
                let mut raw = vec![0u8; count * 2];
                soc.read(fetch_addr, &mut raw);
                let mut slot = first_slot;
                for pair in raw.chunks_exact(2) {
                    let value = u16::from_le_bytes([pair[0], pair[1]]);
                    self.apply_element(slot, value);
                    slot += 1;
                    // The small model has no NDPH element.
                    if self.flow == Flow::DescSmall && slot == 1 {
                        slot = 2;
                    }
                }
                match self.flow {
                    Flow::DescArray => self.curr_desc_ptr = fetch_addr + raw.len() as u32,
                    _ => self.curr_desc_ptr = self.next_desc_ptr,
                }
            }
            // The fetched config may have re-checked alignment constraints.
            let elem = self.element_bytes();
            if self.start_addr & (elem - 1) != 0 {
                self.error = true;
                self.running = false;
                return;
            }
        }
        self.curr_addr = self.start_addr;
        self.curr_x = if self.x_count == 0 { 0xFFFF } else { self.x_count };
        self.curr_y = if self.y_count == 0 { 0xFFFF } else { self.y_count };
        self.running = self.enabled;
    }

    /// Move one burst between memory and the peripheral endpoint.
    fn run_burst(&mut self, soc: &mut Soc) {
        let elem = self.element_bytes();
        let total = (self.curr_x as u32 * elem).min(BURST_BYTES) as usize;
        if total == 0 {
            return;
        }
        let x = self.x_count.wrapping_sub(self.curr_x) as u32;
        let y = self.y_count.wrapping_sub(self.curr_y) as u32;
        let mut buf = vec![0u8; total];
        let contiguous = self.x_modify as i32 == elem as i32;

        let moved = if self.mem_write {
            let n = soc.dma_endpoint_read(self.peripheral, x, y, &mut buf);
            if contiguous {
                soc.write(self.curr_addr, &buf[..n]);
            } else {
                for (i, chunk) in buf[..n].chunks_exact(elem as usize).enumerate() {
                    let addr =
                        self.curr_addr.wrapping_add((i as i32 * self.x_modify as i32) as u32);
                    soc.write(addr, chunk);
                }
            }
            n
        } else {
            if contiguous {
                soc.read(self.curr_addr, &mut buf);
            } else {
                for (i, chunk) in buf.chunks_exact_mut(elem as usize).enumerate() {
                    let addr =
                        self.curr_addr.wrapping_add((i as i32 * self.x_modify as i32) as u32);
                    soc.read(addr, chunk);
                }
            }
            soc.dma_endpoint_write(self.peripheral, x, y, &buf)
        };

        let count = (moved as u32 / elem) as u16;
        self.curr_addr = self.curr_addr.wrapping_add((count as i32 * self.x_modify as i32) as u32);
        self.curr_x = self.curr_x.wrapping_sub(count);

        if self.curr_x == 0 {
            if self.two_d && self.curr_y > 1 {
                self.curr_y -= 1;
                self.curr_x = self.x_count;
                self.curr_addr = self
                    .curr_addr
                    .wrapping_add((self.y_modify as i32 - self.x_modify as i32) as u32);
                if self.int_enable && self.int_each_row {
                    self.completed = true;
                }
                return;
            }
            self.completed = true;
            if self.flow == Flow::Stop {
                self.running = false;
            } else {
                self.process_descriptor(soc);
            }
        }
    }
}

impl RegisterOps for DmaChannel {
    fn field_read(&mut self, field: FieldId) -> u32 {
        match field {
            fid::NDPTR => self.next_desc_ptr,
            fid::START => self.start_addr,
            fid::DMAEN => self.enabled as u32,
            fid::WNR => self.mem_write as u32,
            fid::WDSIZE => self.word_size as u32,
            fid::DMA2D => self.two_d as u32,
            fid::SYNC => self.sync as u32,
            fid::DI_SEL => self.int_each_row as u32,
            fid::DI_EN => self.int_enable as u32,
            fid::NDSIZE => self.ndsize as u32,
            fid::FLOW => self.flow.bits(),
            fid::XCNT => self.x_count as u32,
            fid::XMOD => self.x_modify as u16 as u32,
            fid::YCNT => self.y_count as u32,
            fid::YMOD => self.y_modify as u16 as u32,
            fid::CURR_DESC => self.curr_desc_ptr,
            fid::CURR_ADDR => self.curr_addr,
            fid::DONE => self.completed as u32,
            fid::ERR => self.error as u32,
            fid::RUN => self.running as u32,
            fid::CTYPE => self.mem_to_mem as u32,
            fid::PMAP => self.peripheral as u32,
            fid::CURR_X => self.curr_x as u32,
            fid::CURR_Y => self.curr_y as u32,
            _ => 0,
        }
    }

    fn field_write(&mut self, field: FieldId, value: u32) {
        match field {
            fid::NDPTR => self.next_desc_ptr = value,
            fid::START => self.start_addr = value,
            fid::DMAEN => self.enabled = value != 0,
            fid::WNR => self.mem_write = value != 0,
            fid::WDSIZE => self.word_size = value as u8,
            fid::DMA2D => self.two_d = value != 0,
            fid::SYNC => self.sync = value != 0,
            fid::DI_SEL => self.int_each_row = value != 0,
            fid::DI_EN => self.int_enable = value != 0,
            fid::NDSIZE => self.ndsize = value as u8,
            fid::FLOW => self.flow = Flow::from_bits(value),
            fid::XCNT => self.x_count = value as u16,
            fid::XMOD => self.x_modify = value as i16,
            fid::YCNT => self.y_count = value as u16,
            fid::YMOD => self.y_modify = value as i16,
            fid::CURR_DESC => self.curr_desc_ptr = value,
            fid::CURR_ADDR => self.curr_addr = value,
            fid::DONE => self.completed = value != 0,
            fid::ERR => self.error = value != 0,
            fid::PMAP => self.peripheral = value as u8,
            fid::CURR_X => self.curr_x = value as u16,
            fid::CURR_Y => self.curr_y = value as u16,
            _ => {}
        }
    }

    fn register_written(&mut self, offset: u32, _value: u32) {
        if offset == 0x08 {
            self.running = self.enabled;
            self.config_written = true;
        }
    }
}

/// The shared aperture and channel array.
pub struct DmaController {
    rf: RegisterFile,
    pub channels: [DmaChannel; CHANNEL_COUNT],
}

impl DmaController {
    pub const MMIO_SIZE: u32 = 0x400;

    pub fn new() -> Self {
        let mut rf = RegisterFile::new();
        rf.register(0x00, "DMA_NEXT_DESC_PTR").field(0, 32, Access::ReadWrite(fid::NDPTR));
        rf.register(0x04, "DMA_START_ADDR").field(0, 32, Access::ReadWrite(fid::START));
        rf.register(0x08, "DMA_CONFIG")
            .field(0, 1, Access::ReadWrite(fid::DMAEN))
            .field(1, 1, Access::ReadWrite(fid::WNR))
            .field(2, 2, Access::ReadWrite(fid::WDSIZE))
            .field(4, 1, Access::ReadWrite(fid::DMA2D))
            .field(5, 1, Access::ReadWrite(fid::SYNC))
            .field(6, 1, Access::ReadWrite(fid::DI_SEL))
            .field(7, 1, Access::ReadWrite(fid::DI_EN))
            .field(8, 4, Access::ReadWrite(fid::NDSIZE))
            .field(12, 3, Access::ReadWrite(fid::FLOW));
        rf.register(0x10, "DMA_X_COUNT").field(0, 16, Access::ReadWrite(fid::XCNT));
        rf.register(0x14, "DMA_X_MODIFY").field(0, 16, Access::ReadWrite(fid::XMOD));
        rf.register(0x18, "DMA_Y_COUNT").field(0, 16, Access::ReadWrite(fid::YCNT));
        rf.register(0x1C, "DMA_Y_MODIFY").field(0, 16, Access::ReadWrite(fid::YMOD));
        rf.register(0x20, "DMA_CURR_DESC_PTR").field(0, 32, Access::ReadWrite(fid::CURR_DESC));
        rf.register(0x24, "DMA_CURR_ADDR").field(0, 32, Access::ReadWrite(fid::CURR_ADDR));
        rf.register(0x28, "DMA_IRQ_STATUS")
            .field(0, 1, Access::W1c(fid::DONE))
            .field(1, 1, Access::W1c(fid::ERR))
            .field(3, 1, Access::ReadOnly(fid::RUN));
        rf.register(0x2C, "DMA_PERIPHERAL_MAP")
            .field(6, 1, Access::ReadOnly(fid::CTYPE))
            .field(12, 4, Access::ReadWrite(fid::PMAP));
        rf.register(0x30, "DMA_CURR_X_COUNT").field(0, 16, Access::ReadWrite(fid::CURR_X));
        rf.register(0x38, "DMA_CURR_Y_COUNT").field(0, 16, Access::ReadWrite(fid::CURR_Y));

        // Reset peripheral mapping: channel index == map code.
        let channels = std::array::from_fn(|i| DmaChannel {
            peripheral: i as u8,
            ..DmaChannel::default()
        });
        Self { rf, channels }
    }

    pub fn channel(&self, index: usize) -> &DmaChannel {
        &self.channels[index]
    }
}

impl Default for DmaController {
    fn default() -> Self {
        Self::new()
    }
}

impl Soc {
    pub(crate) fn dma_read32(&mut self, offset: u32) -> u32 {
        let index = (offset / CHANNEL_STRIDE) as usize;
        if index >= CHANNEL_COUNT {
            return 0;
        }
        let dma = &mut self.dma;
        dma.rf.read32(&mut dma.channels[index], offset % CHANNEL_STRIDE)
    }

    pub(crate) fn dma_write32(&mut self, offset: u32, value: u32) {
        let index = (offset / CHANNEL_STRIDE) as usize;
        if index >= CHANNEL_COUNT {
            return;
        }
        let dma = &mut self.dma;
        dma.rf.write32(&mut dma.channels[index], offset % CHANNEL_STRIDE, value);
        if std::mem::take(&mut dma.channels[index].config_written) {
            let mut channel = std::mem::take(&mut self.dma.channels[index]);
            channel.process_descriptor(self);
            self.dma.channels[index] = channel;
        }
    }

    /// One burst for every running channel.
    pub(crate) fn dma_tick(&mut self) {
        for index in 0..CHANNEL_COUNT {
            if !self.dma.channels[index].is_active() {
                continue;
            }
            let mut channel = std::mem::take(&mut self.dma.channels[index]);
            channel.run_burst(self);
            self.dma.channels[index] = channel;
        }
    }

    fn dma_endpoint_read(&mut self, map: u8, x: u32, y: u32, buf: &mut [u8]) -> usize {
        match map {
            pmap::PPI => self.ppi.dma_read(x, y, buf),
            pmap::NFC => self.nfc.dma_read(buf),
            pmap::SPORT0_RX | pmap::SPORT0_TX => self.sport[0].dma_read(buf),
            pmap::SPORT1_RX | pmap::SPORT1_TX => self.sport[1].dma_read(buf),
            other => {
                warn!(map = other, "dma: no endpoint attached for peripheral map");
                0
            }
        }
    }

    fn dma_endpoint_write(&mut self, map: u8, x: u32, y: u32, buf: &[u8]) -> usize {
        match map {
            pmap::PPI => self.ppi.dma_write(x, y, buf),
            pmap::NFC => self.nfc.dma_write(buf),
            pmap::SPORT0_RX | pmap::SPORT0_TX => self.sport[0].dma_write(buf),
            pmap::SPORT1_RX | pmap::SPORT1_TX => self.sport[1].dma_write(buf),
            other => {
                warn!(map = other, "dma: no endpoint attached for peripheral map");
                0
            }
        }
    }
}
