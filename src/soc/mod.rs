//! The SoC: bus fabric, peripherals and board wiring.
//!
//! [`Soc`] owns every device and is itself owned by the CPU thread, so all
//! guest-visible mutation happens under one `&mut Soc`. The bus fabric maps
//! physical addresses onto [`DeviceId`]s; 8/16-bit accesses against
//! register windows are emulated by read-modify-write on the containing
//! 32-bit word, reads of unmapped space return zeros, and cross-region
//! accesses split at region boundaries.
//!
//! After every instruction the machine calls [`Soc::tick`] and then
//! [`Soc::forward_interrupts`], which samples each device's request level
//! into the SIC and recomputes the CEC pending vector.

pub mod bus;
pub mod dma;
pub mod ebiu;
pub mod event;
pub mod gpio;
pub mod gptimer;
pub mod jtag;
pub mod nfc;
pub mod otp;
pub mod ppi;
pub mod regs;
pub mod rtc;
pub mod sic;
pub mod sport;
pub mod twi;

use tracing::trace;

use crate::host::Display;
use crate::peripheral::{Adxl345, Mcp230xx, Mcp230xxModel, Mt29f4g08, PotHandle, Potentiometer};
use bus::{Bus, MemoryRegion};
use dma::DmaController;
use ebiu::Ebiu;
use gpio::{GpioBank, GpioNet, GpioNode, NodeId, OrGate, PinLevel};
use gptimer::GpTimerBlock;
use jtag::JtagId;
use nfc::Nfc;
use otp::Otp;
use ppi::Ppi;
use regs::WordPort;
use rtc::Rtc;
use sic::{Cec, Sic};
use sport::Sport;
use twi::{DummySlave, Twi};

/// Physical memory map of the simulated part.
pub mod map {
    pub const SDRAM_BASE: u32 = 0x0000_0000;
    pub const SDRAM_SIZE: u32 = 0x0800_0000;

    pub const BOOT_ROM_BASE: u32 = 0xEF00_0000;
    pub const BOOT_ROM_SIZE: u32 = 0x8000;

    pub const SIC_BASE: u32 = 0xFFC0_0100;
    pub const RTC_BASE: u32 = 0xFFC0_0300;
    pub const GPTIMER_BASE: u32 = 0xFFC0_0600;
    pub const PORTF_BASE: u32 = 0xFFC0_0700;
    pub const SPORT0_BASE: u32 = 0xFFC0_0800;
    pub const SPORT1_BASE: u32 = 0xFFC0_0900;
    pub const EBIU_BASE: u32 = 0xFFC0_0A00;
    pub const DMA_BASE: u32 = 0xFFC0_0C00;
    pub const PPI_BASE: u32 = 0xFFC0_1000;
    pub const TWI_BASE: u32 = 0xFFC0_1400;
    pub const PORTG_BASE: u32 = 0xFFC0_1500;
    pub const PORTH_BASE: u32 = 0xFFC0_1700;
    pub const PORT_MUX_BASE: u32 = 0xFFC0_3200;
    pub const PORT_MUX_SIZE: u32 = 0x100;
    pub const OTP_BASE: u32 = 0xFFC0_3600;
    pub const NFC_BASE: u32 = 0xFFC0_3700;
    pub const MUSB_BASE: u32 = 0xFFC0_3800;
    pub const MUSB_SIZE: u32 = 0x500;

    pub const DATA_A_BASE: u32 = 0xFF80_0000;
    pub const DATA_A_CACHE_BASE: u32 = 0xFF80_4000;
    pub const DATA_B_BASE: u32 = 0xFF90_0000;
    pub const DATA_B_CACHE_BASE: u32 = 0xFF90_4000;
    pub const DATA_SRAM_SIZE: u32 = 0x4000;
    pub const INST_A_BASE: u32 = 0xFFA0_0000;
    pub const INST_A_SIZE: u32 = 0x8000;
    pub const INST_B_BASE: u32 = 0xFFA0_8000;
    pub const INST_B_SIZE: u32 = 0x4000;
    pub const INST_CACHE_BASE: u32 = 0xFFA1_0000;
    pub const INST_CACHE_SIZE: u32 = 0x4000;

    /// Core MMRs (MMU, EVT, CEC windows) owned by the external decoder;
    /// plain backing RAM so early boot pokes land somewhere.
    pub const CORE_MMR_BASE: u32 = 0xFFE0_0000;
    pub const CORE_MMR_SIZE: u32 = 0x4000;
    pub const JTAG_BASE: u32 = 0xFFE0_5000;
}

/// SIC peripheral line assignments.
pub mod irq {
    pub const RTC: u32 = 14;
    pub const DMA0: u32 = 15;
    pub const TWI: u32 = 20;
    pub const DMA1: u32 = 28;
    pub const PORTH_A: u32 = 29;
    pub const DMA2: u32 = 30;
    pub const PORTH_B: u32 = 31;
    pub const PORTG_A: u32 = 40;
    pub const PORTG_B: u32 = 41;
    pub const PORTF_A: u32 = 45;
    pub const PORTF_B: u32 = 46;
    pub const NFC: u32 = 48;
}

/// Bank G pin pulsed by the display frame sync.
pub const FRAME_SYNC_PIN: usize = 3;

/// Number of GPIO expanders on the I²C bus.
pub const EXPANDER_COUNT: usize = 8;
const EXPANDER_I2C_BASE: u8 = 0x20;
const ACCEL_I2C_ADDR: u8 = 0x53;
const POT_I2C_ADDR: u8 = 0x54;
const EXPANDER_INTA: usize = 16;

/// What an address region dispatches to.
#[derive(Debug, Clone, Copy)]
pub enum DeviceId {
    Mem(usize),
    Sic,
    Rtc,
    GpTimer,
    GpioBank(NodeId),
    Sport(usize),
    Ebiu,
    Dma,
    Ppi,
    Twi,
    Otp,
    Nfc,
    Jtag,
}

pub struct Soc {
    pub bus: Bus<DeviceId>,
    pub sic: Sic,
    pub cec: Cec,
    pub gpio: GpioNet,
    pub dma: DmaController,
    pub twi: Twi,
    pub nfc: Nfc,
    pub ppi: Ppi,
    pub sport: [Sport; 2],
    pub rtc: Rtc,
    pub otp: Otp,
    pub gptimer: GpTimerBlock,
    pub ebiu: Ebiu,
    pub jtag: JtagId,
    pub potentiometer: PotHandle,

    /// Guest time in nanoseconds (one instruction quantum each).
    pub now_ns: u64,

    pub portf: NodeId,
    pub portg: NodeId,
    pub porth: NodeId,
    pub expanders: [NodeId; EXPANDER_COUNT],
    pub accel: NodeId,
    pub or_gate: NodeId,
}

impl Soc {
    pub fn new(nand: Mt29f4g08, display: Box<dyn Display>) -> Self {
        let mut bus = Bus::new();

        let mut ram = |bus: &mut Bus<DeviceId>, base: u32, size: u32, publish: bool| {
            let index = bus.add_memory(MemoryRegion::ram(size as usize));
            bus.bind(base, size, DeviceId::Mem(index));
            if publish {
                bus.publish_pages(base, index);
            }
        };
        ram(&mut bus, map::SDRAM_BASE, map::SDRAM_SIZE, true);
        ram(&mut bus, map::DATA_A_BASE, map::DATA_SRAM_SIZE, true);
        ram(&mut bus, map::DATA_A_CACHE_BASE, map::DATA_SRAM_SIZE, true);
        ram(&mut bus, map::DATA_B_BASE, map::DATA_SRAM_SIZE, true);
        ram(&mut bus, map::DATA_B_CACHE_BASE, map::DATA_SRAM_SIZE, true);
        ram(&mut bus, map::INST_A_BASE, map::INST_A_SIZE, true);
        ram(&mut bus, map::INST_B_BASE, map::INST_B_SIZE, true);
        ram(&mut bus, map::INST_CACHE_BASE, map::INST_CACHE_SIZE, true);
        ram(&mut bus, map::PORT_MUX_BASE, map::PORT_MUX_SIZE, false);
        ram(&mut bus, map::MUSB_BASE, map::MUSB_SIZE, false);
        ram(&mut bus, map::CORE_MMR_BASE, map::CORE_MMR_SIZE, false);

        // The vendor mask ROM is not shipped; the window reads as zeros.
        let rom = bus.add_memory(MemoryRegion::rom(vec![0; map::BOOT_ROM_SIZE as usize]));
        bus.bind(map::BOOT_ROM_BASE, map::BOOT_ROM_SIZE, DeviceId::Mem(rom));

        let mut gpio = GpioNet::new();
        let portf = gpio.add_node(GpioNode::Bank(GpioBank::new("PORTF")));
        let portg = gpio.add_node(GpioNode::Bank(GpioBank::new("PORTG")));
        let porth = gpio.add_node(GpioNode::Bank(GpioBank::new("PORTH")));
        let expanders = std::array::from_fn(|_| {
            gpio.add_node(GpioNode::Expander(Mcp230xx::new(Mcp230xxModel::Mcp23017)))
        });
        let or_gate = gpio.add_node(GpioNode::OrGate(OrGate::new(true)));
        let accel = gpio.add_node(GpioNode::Accel(Adxl345::new()));

        // Expander interrupt fan-in per the board schematic.
        gpio.connect(expanders[3], EXPANDER_INTA, expanders[2], 0);
        gpio.connect(expanders[4], EXPANDER_INTA, expanders[2], 1);
        gpio.connect(expanders[6], EXPANDER_INTA, expanders[2], 2);
        gpio.connect(expanders[5], EXPANDER_INTA, expanders[2], 3);
        gpio.connect(or_gate, OrGate::OUTPUT_PIN, portg, 0);
        gpio.connect(expanders[2], EXPANDER_INTA, or_gate, 0);
        gpio.connect(expanders[0], EXPANDER_INTA, or_gate, 1);
        gpio.connect(accel, 0, expanders[0], 1);
        gpio.set_node_input(expanders[0], 6, PinLevel::High);

        let mut twi = Twi::new();
        for (i, &node) in expanders.iter().enumerate() {
            twi.attach_net_slave(EXPANDER_I2C_BASE + i as u8, node);
        }
        twi.attach_net_slave(ACCEL_I2C_ADDR, accel);
        for addr in [0x1A, 0x18, 0x58, 0x09, 0x4A] {
            twi.attach_slave(addr, Box::new(DummySlave::new(0x00)));
        }
        twi.attach_slave(0x64, Box::new(DummySlave::new(0x3C))); // battery gauge
        twi.attach_slave(0x11, Box::new(DummySlave::new(0x80))); // FM tuner
        let (pot, pot_handle) = Potentiometer::new();
        twi.attach_slave(POT_I2C_ADDR, Box::new(pot));

        bus.bind(map::SIC_BASE, Sic::MMIO_SIZE, DeviceId::Sic);
        bus.bind(map::RTC_BASE, Rtc::MMIO_SIZE, DeviceId::Rtc);
        bus.bind(map::GPTIMER_BASE, GpTimerBlock::MMIO_SIZE, DeviceId::GpTimer);
        bus.bind(map::PORTF_BASE, GpioBank::MMIO_SIZE, DeviceId::GpioBank(portf));
        bus.bind(map::SPORT0_BASE, Sport::MMIO_SIZE, DeviceId::Sport(0));
        bus.bind(map::SPORT1_BASE, Sport::MMIO_SIZE, DeviceId::Sport(1));
        bus.bind(map::EBIU_BASE, Ebiu::MMIO_SIZE, DeviceId::Ebiu);
        bus.bind(map::DMA_BASE, DmaController::MMIO_SIZE, DeviceId::Dma);
        bus.bind(map::PPI_BASE, Ppi::MMIO_SIZE, DeviceId::Ppi);
        bus.bind(map::TWI_BASE, Twi::MMIO_SIZE, DeviceId::Twi);
        bus.bind(map::PORTG_BASE, GpioBank::MMIO_SIZE, DeviceId::GpioBank(portg));
        bus.bind(map::PORTH_BASE, GpioBank::MMIO_SIZE, DeviceId::GpioBank(porth));
        bus.bind(map::OTP_BASE, Otp::MMIO_SIZE, DeviceId::Otp);
        bus.bind(map::NFC_BASE, Nfc::MMIO_SIZE, DeviceId::Nfc);
        bus.bind(map::JTAG_BASE, JtagId::MMIO_SIZE, DeviceId::Jtag);

        Self {
            bus,
            sic: Sic::new(),
            cec: Cec::default(),
            gpio,
            dma: DmaController::new(),
            twi,
            nfc: Nfc::new(nand),
            ppi: Ppi::new(display),
            sport: [Sport::new(0), Sport::new(1)],
            rtc: Rtc::new(),
            otp: Otp::new(),
            gptimer: GpTimerBlock::new(),
            ebiu: Ebiu::new(),
            // Firmware only checks the low DSPID byte: 0x02 for this rev.
            jtag: JtagId::new(0x02),
            potentiometer: pot_handle,
            now_ns: 0,
            portf,
            portg,
            porth,
            expanders,
            accel,
            or_gate,
        }
    }

    // -- bus access ------------------------------------------------------

    pub fn read32(&mut self, addr: u32) -> u32 {
        if addr & 3 == 0 {
            if let Some(hook) = self.bus.read_hook(addr) {
                return hook(addr);
            }
        }
        match self.bus.lookup(addr) {
            Some((id, offset)) => self.device_read32(id, offset),
            None => {
                trace!(addr = format_args!("{addr:#010x}"), "read of unmapped address");
                0
            }
        }
    }

    pub fn write32(&mut self, addr: u32, value: u32) {
        if addr & 3 == 0 {
            if let Some(hook) = self.bus.write_hook(addr) {
                hook(addr, value);
                return;
            }
        }
        match self.bus.lookup(addr) {
            Some((id, offset)) => self.device_write32(id, offset, value),
            None => {
                trace!(addr = format_args!("{addr:#010x}"), "write to unmapped address");
            }
        }
    }

    pub fn read16(&mut self, addr: u32) -> u16 {
        let mut buf = [0u8; 2];
        self.read(addr, &mut buf);
        u16::from_le_bytes(buf)
    }

    pub fn write16(&mut self, addr: u32, value: u16) {
        self.write(addr, &value.to_le_bytes());
    }

    pub fn read8(&mut self, addr: u32) -> u8 {
        let mut buf = [0u8; 1];
        self.read(addr, &mut buf);
        buf[0]
    }

    pub fn write8(&mut self, addr: u32, value: u8) {
        self.write(addr, &[value]);
    }

    /// Arbitrary-length read. Splits at region boundaries; unmapped space
    /// reads back as zeros.
    pub fn read(&mut self, addr: u32, buf: &mut [u8]) {
        let mut addr = addr;
        let mut pos = 0usize;
        while pos < buf.len() {
            let remaining = (buf.len() - pos) as u32;
            if let Some((index, offset)) = self.bus.page_lookup(addr, remaining) {
                self.bus.memories[index].read(offset, &mut buf[pos..]);
                return;
            }
            let span = self.bus.span_at(addr, remaining);
            let chunk = &mut buf[pos..pos + span.len as usize];
            match span.target {
                Some((id, offset)) => self.device_read(id, offset, chunk),
                None => chunk.fill(0),
            }
            pos += span.len as usize;
            addr = addr.wrapping_add(span.len);
        }
    }

    /// Arbitrary-length write, the mirror of [`Soc::read`]. Writes to
    /// unmapped space are dropped.
    pub fn write(&mut self, addr: u32, buf: &[u8]) {
        let mut addr = addr;
        let mut pos = 0usize;
        while pos < buf.len() {
            let remaining = (buf.len() - pos) as u32;
            if let Some((index, offset)) = self.bus.page_lookup(addr, remaining) {
                self.bus.memories[index].write(offset, &buf[pos..]);
                return;
            }
            let span = self.bus.span_at(addr, remaining);
            let chunk = &buf[pos..pos + span.len as usize];
            if let Some((id, offset)) = span.target {
                self.device_write(id, offset, chunk);
            }
            pos += span.len as usize;
            addr = addr.wrapping_add(span.len);
        }
    }

    /// Direct view into the backing store for memory-backed addresses, for
    /// callers (exclusive-access emulation, loaders) that want to bypass
    /// dispatch. Register windows have no backing memory and return `None`.
    pub fn map(&mut self, addr: u32) -> Option<&mut [u8]> {
        let (id, offset) = self.bus.lookup(addr)?;
        match id {
            DeviceId::Mem(index) => {
                Some(&mut self.bus.memories[index].as_mut_slice()[offset as usize..])
            }
            _ => None,
        }
    }

    fn device_read32(&mut self, id: DeviceId, offset: u32) -> u32 {
        match id {
            DeviceId::Mem(index) => self.bus.memories[index].read32(offset),
            DeviceId::Sic => self.sic.read32(offset),
            DeviceId::Rtc => self.rtc.read32(offset),
            DeviceId::GpTimer => self.gptimer.read32(offset),
            DeviceId::GpioBank(node) => self.gpio.bank_read32(node, offset),
            DeviceId::Sport(index) => self.sport[index].read32(offset),
            DeviceId::Ebiu => self.ebiu.read32(offset),
            DeviceId::Dma => self.dma_read32(offset),
            DeviceId::Ppi => self.ppi.read32(offset),
            DeviceId::Twi => self.twi.read32(offset),
            DeviceId::Otp => self.otp.read32(offset),
            DeviceId::Nfc => {
                self.nfc.set_now(self.now_ns);
                self.nfc.read32(offset)
            }
            DeviceId::Jtag => self.jtag.read32(offset),
        }
    }

    fn device_write32(&mut self, id: DeviceId, offset: u32, value: u32) {
        match id {
            DeviceId::Mem(index) => self.bus.memories[index].write32(offset, value),
            DeviceId::Sic => self.sic.write32(offset, value),
            DeviceId::Rtc => self.rtc.write32(offset, value),
            DeviceId::GpTimer => self.gptimer.write32(offset, value),
            DeviceId::GpioBank(node) => self.gpio.bank_write32(node, offset, value),
            DeviceId::Sport(index) => self.sport[index].write32(offset, value),
            DeviceId::Ebiu => self.ebiu.write32(offset, value),
            DeviceId::Dma => self.dma_write32(offset, value),
            DeviceId::Ppi => self.ppi.write32(offset, value),
            DeviceId::Twi => {
                self.twi.write32(offset, value);
                if self.twi.take_pending_stop() {
                    let Soc { twi, gpio, .. } = self;
                    twi.stop_current_slave(gpio);
                }
            }
            DeviceId::Otp => self.otp.write32(offset, value),
            DeviceId::Nfc => {
                self.nfc.set_now(self.now_ns);
                self.nfc.write32(offset, value);
            }
            DeviceId::Jtag => self.jtag.write32(offset, value),
        }
    }

    fn device_read(&mut self, id: DeviceId, offset: u32, buf: &mut [u8]) {
        match id {
            DeviceId::Mem(index) => self.bus.memories[index].read(offset, buf),
            _ => regs::read_bytes(&mut DevicePort { soc: self, id }, offset, buf),
        }
    }

    fn device_write(&mut self, id: DeviceId, offset: u32, buf: &[u8]) {
        match id {
            DeviceId::Mem(index) => self.bus.memories[index].write(offset, buf),
            _ => regs::write_bytes(&mut DevicePort { soc: self, id }, offset, buf),
        }
    }

    // -- stepping --------------------------------------------------------

    /// Walk the device list once, after an instruction has executed.
    pub fn tick(&mut self, current_ivg: Option<u8>) {
        self.rtc.tick();
        self.dma_tick();
        self.nfc.tick(self.now_ns);
        let Soc { twi, gpio, .. } = self;
        twi.tick(gpio, current_ivg);
    }

    /// Sample every device's interrupt level into the SIC and recompute the
    /// CEC pending vector.
    pub fn forward_interrupts(&mut self) {
        let (fa, fb) = self.gpio.bank_irq_levels(self.portf);
        let (ga, gb) = self.gpio.bank_irq_levels(self.portg);
        let (ha, hb) = self.gpio.bank_irq_levels(self.porth);
        self.sic.set_line(irq::PORTF_A, fa);
        self.sic.set_line(irq::PORTF_B, fb);
        self.sic.set_line(irq::PORTG_A, ga);
        self.sic.set_line(irq::PORTG_B, gb);
        self.sic.set_line(irq::PORTH_A, ha);
        self.sic.set_line(irq::PORTH_B, hb);
        self.sic.set_line(irq::DMA0, self.dma.channel(0).irq_level());
        self.sic.set_line(irq::DMA1, self.dma.channel(1).irq_level());
        self.sic.set_line(irq::DMA2, self.dma.channel(2).irq_level());
        self.sic.set_line(irq::TWI, self.twi.irq_level());
        self.sic.set_line(irq::RTC, self.rtc.irq_level());
        self.sic.set_line(irq::NFC, self.nfc.irq_level());
        let Soc { sic, cec, .. } = self;
        sic.forward(cec);
    }

    pub fn pending_ivg(&self) -> Option<u8> {
        self.cec.pending_ivg()
    }

    // -- host entry points (always via the event queue) ------------------

    /// Keyboard matrix input: expander `bank`, pin `index`, active low.
    pub fn key_input(&mut self, bank: usize, index: usize, pressed: bool) {
        if bank >= self.expanders.len() {
            return;
        }
        let level = if pressed { PinLevel::Low } else { PinLevel::High };
        self.gpio.set_node_input(self.expanders[bank], index, level);
    }

    /// Accelerometer sample into the ADXL345.
    pub fn set_acceleration(&mut self, x: i16, y: i16, z: i16) {
        if let GpioNode::Accel(accel) = self.gpio.node_mut(self.accel) {
            accel.set_acceleration(x, y, z);
        }
        self.gpio.flush(self.accel);
    }

    /// Frame-sync level onto bank G pin 3.
    pub fn set_frame_sync(&mut self, level: PinLevel) {
        self.gpio.set_node_input(self.portg, FRAME_SYNC_PIN, level);
    }
}

struct DevicePort<'a> {
    soc: &'a mut Soc,
    id: DeviceId,
}

impl WordPort for DevicePort<'_> {
    fn read32(&mut self, offset: u32) -> u32 {
        self.soc.device_read32(self.id, offset)
    }

    fn write32(&mut self, offset: u32, value: u32) {
        self.soc.device_write32(self.id, offset, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HeadlessDisplay;
    use crate::peripheral::NandGeometry;

    fn test_soc() -> (Soc, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let geometry = NandGeometry { total_blocks: 4, ..NandGeometry::MT29F4G08 };
        let chip = Mt29f4g08::open_with(dir.path().join("nand.bin"), geometry).unwrap();
        (Soc::new(chip, Box::new(HeadlessDisplay::new())), dir)
    }

    #[test]
    fn sdram_roundtrip_through_the_fabric() {
        let (mut soc, _dir) = test_soc();
        soc.write32(0x0010_0000, 0xCAFE_F00D);
        assert_eq!(soc.read32(0x0010_0000), 0xCAFE_F00D);
        assert_eq!(soc.read16(0x0010_0002), 0xCAFE);
        assert_eq!(soc.read8(0x0010_0000), 0x0D);
    }

    #[test]
    fn unmapped_reads_zero_fill_and_do_not_panic() {
        let (mut soc, _dir) = test_soc();
        let mut buf = [0xAAu8; 8];
        soc.read(0x9000_0000, &mut buf);
        assert_eq!(buf, [0; 8]);
        soc.write(0x9000_0000, &[1, 2, 3]);
    }

    #[test]
    fn cross_boundary_read_concatenates_regions() {
        let (mut soc, _dir) = test_soc();
        // End of Data A SRAM runs into the Data A cache SRAM.
        soc.write32(map::DATA_A_BASE + map::DATA_SRAM_SIZE - 4, 0x1122_3344);
        soc.write32(map::DATA_A_CACHE_BASE, 0x5566_7788);
        let mut buf = [0u8; 8];
        soc.read(map::DATA_A_BASE + map::DATA_SRAM_SIZE - 4, &mut buf);
        assert_eq!(buf, [0x44, 0x33, 0x22, 0x11, 0x88, 0x77, 0x66, 0x55]);
    }

    #[test]
    fn register_devices_emulate_byte_lanes() {
        let (mut soc, _dir) = test_soc();
        // TWI_CLKDIV low byte then high byte via 8-bit writes.
        soc.write8(map::TWI_BASE, 0x34);
        soc.write8(map::TWI_BASE + 1, 0x12);
        assert_eq!(soc.read32(map::TWI_BASE), 0x1234);
        assert_eq!(soc.read8(map::TWI_BASE + 1), 0x12);
    }

    #[test]
    fn access_hooks_override_aligned_word_dispatch() {
        let (mut soc, _dir) = test_soc();
        soc.write32(0x1000, 0x5555_5555);
        soc.bus.add_read_hook(0x1000, Box::new(|_| 0x9999_9999));
        assert_eq!(soc.read32(0x1000), 0x9999_9999);
        // Byte-granular access still goes to the device.
        assert_eq!(soc.read8(0x1000), 0x55);
    }

    #[test]
    fn jtag_id_reports_the_part_revision() {
        let (mut soc, _dir) = test_soc();
        assert_eq!(soc.read32(map::JTAG_BASE) & 0xFF, 0x02);
    }

    #[test]
    fn boot_rom_window_is_read_only() {
        let (mut soc, _dir) = test_soc();
        soc.write32(map::BOOT_ROM_BASE, 0xFFFF_FFFF);
        assert_eq!(soc.read32(map::BOOT_ROM_BASE), 0);
    }
}
