//! Firmware loading through the machine: block placement, fill blocks and
//! the entry-point hand-off.

mod common;

use bfemu::cpu::CoreRegister;
use bfemu::loader::{BlockFlags, LdrImage};

fn header(code: u32, target: u32, count: u32, arg: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    for word in [code, target, count, arg] {
        bytes.extend_from_slice(&word.to_le_bytes());
    }
    bytes
}

#[test]
fn blocks_land_at_their_target_addresses() {
    let dir = tempfile::tempdir().unwrap();
    let mut m = common::machine(&dir.path().join("nand.bin"));

    let mut raw = header(BlockFlags::FIRST.bits(), 0xFFA0_0000, 8, 0);
    raw.extend_from_slice(&[0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17]);
    raw.extend(header(BlockFlags::FILL.bits(), 0x0000_2000, 16, 0xA5A5_A5A5));
    raw.extend(header(BlockFlags::FINAL.bits(), 0x0000_3000, 4, 0));
    raw.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);

    let image = LdrImage::parse(&raw).unwrap();
    m.load_dxe(&image.dxes[0]);

    // Code block into instruction SRAM.
    let mut code = [0u8; 8];
    m.soc.read(0xFFA0_0000, &mut code);
    assert_eq!(code, [0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17]);

    // Fill block materializes the argument pattern.
    let mut filled = [0u8; 20];
    m.soc.read(0x2000, &mut filled);
    assert!(filled[..16].iter().all(|&b| b == 0xA5));
    assert!(filled[16..].iter().all(|&b| b == 0x00));

    // Data block into SDRAM.
    assert_eq!(m.soc.read32(0x3000), 0xEFBE_ADDE);

    // Entry hand-off: PC at the FIRST block, RETS at the return sentinel.
    assert_eq!(m.core().pc(), 0xFFA0_0000);
    assert_eq!(m.core().register(CoreRegister::Rets), bfemu::machine::DXE_RETURN_ADDR);
}

#[test]
fn run_with_idle_core_halts_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let mut m = common::machine(&dir.path().join("nand.bin"));
    let mut raw = header(BlockFlags::FIRST.bits(), 0xFFA0_0000, 4, 0);
    raw.extend_from_slice(&[0; 4]);
    raw.extend(header(BlockFlags::FINAL.bits(), 0, 0, 0));
    let image = LdrImage::parse(&raw).unwrap();
    // The placeholder core halts on its first step; run must return.
    m.run(&image);
    assert_eq!(m.core().pc(), 0xFFA0_0000);
}
