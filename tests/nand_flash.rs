//! NAND scenarios driven through the controller MMIO window and the DMA
//! engine, the way the firmware's flash driver does it.

mod common;

use bfemu::peripheral::Mt29f4g08;

const NFC: u32 = 0xFFC0_3700;
const DMA: u32 = 0xFFC0_0C00;
/// Channel 2 carries the NFC peripheral mapping out of reset.
const CH2: u32 = DMA + 2 * 0x40;

const PAGE_TOTAL: usize = 2112;
const SDRAM_SCRATCH: u32 = 0x0010_0000;

fn nand_command(m: &mut bfemu::Machine, command: u32) {
    m.soc.write32(NFC + 0x44, command);
}

fn nand_addresses(m: &mut bfemu::Machine, bytes: &[u8]) {
    for &b in bytes {
        m.soc.write32(NFC + 0x40, b as u32);
    }
}

#[test]
fn reset_and_read_page_zero_via_dma() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nand.bin");
    drop(Mt29f4g08::open_with(&path, common::small_geometry()).unwrap());

    // Seed page 0 (data then OOB) directly in the backing file.
    let g = common::small_geometry();
    let mut raw = std::fs::read(&path).unwrap();
    for i in 0..g.page_size as usize {
        raw[i] = (i % 251) as u8;
    }
    for i in 0..g.oob_size as usize {
        raw[g.oob_area_offset() as usize + i] = 0xB0 | (i as u8 & 0x0F);
    }
    std::fs::write(&path, &raw).unwrap();

    let mut m = common::machine(&path);
    nand_command(&mut m, 0xFF);
    m.run_ticks(128); // reset busy window

    nand_command(&mut m, 0x00);
    nand_addresses(&mut m, &[0, 0, 0, 0, 0]);
    nand_command(&mut m, 0x30);
    m.run_ticks(128); // page load busy window

    m.soc.write32(CH2 + 0x04, SDRAM_SCRATCH);
    m.soc.write32(CH2 + 0x10, PAGE_TOTAL as u32); // X_COUNT
    m.soc.write32(CH2 + 0x14, 1); // X_MODIFY
    m.soc.write32(CH2 + 0x08, 0b11); // DMAEN | WNR, 8-bit
    m.run_ticks(4);

    let mut out = vec![0u8; PAGE_TOTAL];
    m.soc.read(SDRAM_SCRATCH, &mut out);
    for (i, &b) in out[..2048].iter().enumerate() {
        assert_eq!(b, (i % 251) as u8, "data byte {i}");
    }
    for (i, &b) in out[2048..].iter().enumerate() {
        assert_eq!(b, 0xB0 | (i as u8 & 0x0F), "oob byte {i}");
    }
    assert!(m.soc.dma.channel(2).completed());
}

#[test]
fn erase_program_verify_through_byte_strobes() {
    let dir = tempfile::tempdir().unwrap();
    let mut m = common::machine(&dir.path().join("nand.bin"));

    // Erase block 0.
    nand_command(&mut m, 0x60);
    nand_addresses(&mut m, &[0, 0, 0]);
    nand_command(&mut m, 0xD0);
    m.run_ticks(128);

    // Program columns 0..15 with 0x01..=0x10.
    nand_command(&mut m, 0x80);
    nand_addresses(&mut m, &[0, 0, 0, 0, 0]);
    for value in 1..=16u32 {
        m.soc.write32(NFC + 0x48, value);
    }
    nand_command(&mut m, 0x10);
    m.run_ticks(128);

    // Read back through the byte-level data strobe.
    nand_command(&mut m, 0x00);
    nand_addresses(&mut m, &[0, 0, 0, 0, 0]);
    nand_command(&mut m, 0x30);
    m.run_ticks(128);
    let mut bytes = Vec::new();
    for _ in 0..24 {
        m.soc.write32(NFC + 0x4C, 0);
        bytes.push((m.soc.read32(NFC + 0x2C) & 0xFF) as u8);
    }
    let expected: Vec<u8> = (1..=16).collect();
    assert_eq!(&bytes[..16], &expected[..]);
    assert!(bytes[16..].iter().all(|&b| b == 0xFF));
}

#[test]
fn nfc_interrupt_line_reaches_the_sic() {
    let dir = tempfile::tempdir().unwrap();
    let mut m = common::machine(&dir.path().join("nand.bin"));

    m.run_ticks(1);
    // Clear the reset-latched edges, then unmask (bits are active low).
    m.soc.write32(NFC + 0x08, 0x1F);
    m.soc.write32(NFC + 0x0C, 0x00);
    m.run_ticks(1);

    // A status-read strobe latches RD_RDY and must surface on SIC line 48.
    nand_command(&mut m, 0x70);
    m.soc.write32(NFC + 0x4C, 0);
    m.run_ticks(1);
    let isr1 = m.soc.read32(0xFFC0_0100 + 0x60);
    assert!(isr1 & (1 << (48 - 32)) != 0, "NFC line pending in SIC ISR");
}
