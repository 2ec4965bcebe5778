//! MT29F4G08-class NAND flash chip.
//!
//! ONFI-style command state machine over a file-backed array. The backing
//! file stores all page data first, then all OOB areas, and is created
//! erased (0xFF-filled) when absent. Programming can only clear bits
//! (`page &= program buffer`); erasing sets a whole 64-page block back to
//! 0xFF. Array operations make the chip busy for a fixed window of guest
//! time; the controller polls readiness against the machine clock.
//!
//! Host I/O failures never surface to the guest: the affected page reads
//! as erased, writes are dropped, and a warning lands in the log.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

/// Array geometry. The production part is fixed; tests shrink the block
/// count to keep backing files small.
#[derive(Debug, Clone, Copy)]
pub struct NandGeometry {
    pub page_size: u32,
    pub oob_size: u32,
    pub pages_per_block: u32,
    pub total_blocks: u32,
}

impl NandGeometry {
    /// The simulated part: 4Gbit, 2048+64 byte pages, 64-page blocks.
    pub const MT29F4G08: NandGeometry = NandGeometry {
        page_size: 2048,
        oob_size: 64,
        pages_per_block: 64,
        total_blocks: 4096,
    };

    pub fn page_total(&self) -> u32 {
        self.page_size + self.oob_size
    }

    pub fn total_pages(&self) -> u32 {
        self.total_blocks * self.pages_per_block
    }

    /// File offset where the OOB areas start (all page data comes first).
    pub fn oob_area_offset(&self) -> u64 {
        self.total_pages() as u64 * self.page_size as u64
    }

    pub fn device_size(&self) -> u64 {
        self.oob_area_offset() + self.total_pages() as u64 * self.oob_size as u64
    }
}

mod cmd {
    pub const READ1: u8 = 0x00;
    pub const READ2: u8 = 0x30;
    pub const RANDOM_READ1: u8 = 0x05;
    pub const RANDOM_READ2: u8 = 0xE0;
    pub const READ_STATUS: u8 = 0x70;
    pub const PAGE_PROGRAM1: u8 = 0x80;
    pub const PAGE_PROGRAM2: u8 = 0x10;
    pub const RANDOM_WRITE: u8 = 0x85;
    pub const BLOCK_ERASE1: u8 = 0x60;
    pub const BLOCK_ERASE2: u8 = 0xD0;
    pub const RESET: u8 = 0xFF;
}

mod status {
    pub const WRITE_ENABLED: u8 = 0x80;
    pub const READY: u8 = 0x40;
}

const ERASED: u8 = 0xFF;
const COLUMN_CYCLES: u8 = 2;
const ADDRESS_CYCLES: u8 = 5;
/// Guest time an array operation keeps the chip busy.
const BUSY_NS: u64 = 100;

pub struct Mt29f4g08 {
    geometry: NandGeometry,
    path: PathBuf,
    file: Option<File>,
    page_buffer: Vec<u8>,
    program_buffer: Vec<u8>,
    current_command: u8,
    status_register: u8,
    address_cycle: u8,
    address: [u8; ADDRESS_CYCLES as usize],
    data_offset: u32,
    busy_until: u64,
}

impl Mt29f4g08 {
    /// Open (or create erased) the production-geometry backing file.
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        Self::open_with(path, NandGeometry::MT29F4G08)
    }

    pub fn open_with(path: impl AsRef<Path>, geometry: NandGeometry) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => file,
            Err(_) => Self::create_erased(&path, &geometry)?,
        };
        let page_total = geometry.page_total() as usize;
        Ok(Self {
            geometry,
            path,
            file: Some(file),
            page_buffer: vec![ERASED; page_total],
            program_buffer: vec![ERASED; page_total],
            current_command: 0,
            status_register: status::READY | status::WRITE_ENABLED,
            address_cycle: 0,
            address: [0; ADDRESS_CYCLES as usize],
            data_offset: 0,
            busy_until: 0,
        })
    }

    fn create_erased(path: &Path, geometry: &NandGeometry) -> std::io::Result<File> {
        let mut file = OpenOptions::new().read(true).write(true).create(true).open(path)?;
        let chunk = vec![ERASED; 1 << 20];
        let mut remaining = geometry.device_size();
        while remaining > 0 {
            let n = remaining.min(chunk.len() as u64) as usize;
            file.write_all(&chunk[..n])?;
            remaining -= n as u64;
        }
        file.flush()?;
        file.seek(SeekFrom::Start(0))?;
        Ok(file)
    }

    pub fn geometry(&self) -> &NandGeometry {
        &self.geometry
    }

    pub fn is_busy(&self, now: u64) -> bool {
        now < self.busy_until
    }

    pub fn is_data_ready(&self) -> bool {
        match self.current_command {
            cmd::READ2 => self.data_offset < self.geometry.page_total(),
            cmd::READ_STATUS => true,
            _ => false,
        }
    }

    fn set_busy(&mut self, now: u64) {
        self.busy_until = now + BUSY_NS;
    }

    fn column(&self) -> u32 {
        self.address[0] as u32 | ((self.address[1] & 0x0F) as u32) << 8
    }

    fn page(&self) -> u32 {
        self.address[2] as u32
            | (self.address[3] as u32) << 8
            | ((self.address[4] & 0x03) as u32) << 16
    }

    fn block(&self) -> u32 {
        self.page() / self.geometry.pages_per_block
    }

    pub fn send_command(&mut self, command: u8, now: u64) {
        self.address_cycle = 0;
        match command {
            cmd::RESET => {
                self.data_offset = 0;
                self.set_busy(now);
            }
            cmd::READ1 | cmd::RANDOM_READ1 => {}
            cmd::READ2 => {
                if self.current_command == cmd::READ1 {
                    self.execute_read(now);
                }
            }
            cmd::RANDOM_READ2 => {
                if self.current_command == cmd::RANDOM_READ1 {
                    self.data_offset = self.column();
                }
            }
            cmd::BLOCK_ERASE1 => {
                // Erase takes the three row-address cycles only.
                self.address_cycle = COLUMN_CYCLES;
            }
            cmd::BLOCK_ERASE2 => {
                if self.current_command == cmd::BLOCK_ERASE1 {
                    self.execute_erase(now);
                }
            }
            cmd::READ_STATUS => {}
            cmd::PAGE_PROGRAM1 => {
                self.data_offset = 0;
                self.program_buffer.fill(ERASED);
            }
            cmd::RANDOM_WRITE => {
                self.data_offset = 0;
            }
            cmd::PAGE_PROGRAM2 => {
                if matches!(self.current_command, cmd::PAGE_PROGRAM1 | cmd::RANDOM_WRITE) {
                    self.execute_program(now);
                }
            }
            other => warn!(command = other, "nand: unknown command"),
        }
        self.current_command = command;
    }

    pub fn send_address(&mut self, byte: u8) {
        if self.address_cycle < ADDRESS_CYCLES {
            self.address[self.address_cycle as usize] = byte;
            self.address_cycle += 1;
        }
        if self.current_command == cmd::RANDOM_WRITE && self.address_cycle == COLUMN_CYCLES {
            self.data_offset = self.column();
        } else if self.current_command == cmd::PAGE_PROGRAM1 && self.address_cycle == ADDRESS_CYCLES
        {
            self.data_offset = self.column();
        }
    }

    pub fn read_data(&mut self) -> u8 {
        if self.current_command == cmd::READ_STATUS {
            return self.status_register;
        }
        if self.data_offset < self.geometry.page_total() {
            let byte = self.page_buffer[self.data_offset as usize];
            self.data_offset += 1;
            byte
        } else {
            ERASED
        }
    }

    pub fn write_data(&mut self, byte: u8) {
        if self.data_offset < self.geometry.page_total() {
            // NAND programming can only pull bits low.
            self.program_buffer[self.data_offset as usize] &= byte;
            self.data_offset += 1;
        }
    }

    /// Stream out of the loaded page buffer. Returns bytes copied.
    pub fn page_read(&mut self, buf: &mut [u8]) -> usize {
        let available = (self.geometry.page_total() - self.data_offset) as usize;
        let n = buf.len().min(available);
        let start = self.data_offset as usize;
        buf[..n].copy_from_slice(&self.page_buffer[start..start + n]);
        self.data_offset += n as u32;
        n
    }

    /// Stream into the program buffer (AND semantics). Returns bytes taken.
    pub fn page_write(&mut self, buf: &[u8]) -> usize {
        let available = (self.geometry.page_total() - self.data_offset) as usize;
        let n = buf.len().min(available);
        let start = self.data_offset as usize;
        for (slot, &byte) in self.program_buffer[start..start + n].iter_mut().zip(buf) {
            *slot &= byte;
        }
        self.data_offset += n as u32;
        n
    }

    fn execute_read(&mut self, now: u64) {
        self.set_busy(now);
        let page = self.page();
        self.load_page(page);
        self.data_offset = self.column();
    }

    fn execute_program(&mut self, now: u64) {
        self.set_busy(now);
        let page = self.page();
        self.save_page(page);
    }

    fn execute_erase(&mut self, now: u64) {
        self.set_busy(now);
        let block = self.block();
        if block >= self.geometry.total_blocks {
            return;
        }
        let Some(file) = self.file.as_mut() else {
            return;
        };
        let g = self.geometry;
        let erased_page = vec![ERASED; g.page_size as usize];
        let erased_oob = vec![ERASED; g.oob_size as usize];
        let first = block * g.pages_per_block;
        for page in first..first + g.pages_per_block {
            let data_ok = file
                .seek(SeekFrom::Start(page as u64 * g.page_size as u64))
                .and_then(|_| file.write_all(&erased_page));
            let oob_ok = file
                .seek(SeekFrom::Start(g.oob_area_offset() + page as u64 * g.oob_size as u64))
                .and_then(|_| file.write_all(&erased_oob));
            if let Err(e) = data_ok.and(oob_ok) {
                warn!(page, error = %e, path = %self.path.display(), "nand: erase write failed");
            }
        }
        if let Err(e) = file.flush() {
            warn!(error = %e, "nand: flush failed");
        }
    }

    fn load_page(&mut self, page: u32) {
        let g = self.geometry;
        if page >= g.total_pages() {
            self.page_buffer.fill(ERASED);
            return;
        }
        let Some(file) = self.file.as_mut() else {
            self.page_buffer.fill(ERASED);
            return;
        };
        let data = file
            .seek(SeekFrom::Start(page as u64 * g.page_size as u64))
            .and_then(|_| file.read_exact(&mut self.page_buffer[..g.page_size as usize]));
        let oob = file
            .seek(SeekFrom::Start(g.oob_area_offset() + page as u64 * g.oob_size as u64))
            .and_then(|_| file.read_exact(&mut self.page_buffer[g.page_size as usize..]));
        if let Err(e) = data.and(oob) {
            warn!(page, error = %e, path = %self.path.display(), "nand: page load failed");
            self.page_buffer.fill(ERASED);
        }
    }

    fn save_page(&mut self, page: u32) {
        let g = self.geometry;
        if page >= g.total_pages() || self.file.is_none() {
            return;
        }
        // Program is read-modify-write: bits already at 0 stay at 0.
        self.load_page(page);
        for (stored, programmed) in self.page_buffer.iter_mut().zip(&self.program_buffer) {
            *stored &= programmed;
        }
        let file = self.file.as_mut().unwrap();
        let data = file
            .seek(SeekFrom::Start(page as u64 * g.page_size as u64))
            .and_then(|_| file.write_all(&self.page_buffer[..g.page_size as usize]));
        let oob = file
            .seek(SeekFrom::Start(g.oob_area_offset() + page as u64 * g.oob_size as u64))
            .and_then(|_| file.write_all(&self.page_buffer[g.page_size as usize..]));
        if let Err(e) = data.and(oob).and_then(|_| file.flush()) {
            warn!(page, error = %e, path = %self.path.display(), "nand: page save failed");
        }
    }
}
