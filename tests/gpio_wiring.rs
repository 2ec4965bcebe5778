//! Board-level pin wiring: keyboard matrix through the expanders, the
//! accelerometer interrupt chain, and the display frame-sync pulse.

mod common;

use bfemu::soc::gpio::PinLevel;
use bfemu::soc::FRAME_SYNC_PIN;
use bfemu::Machine;

const TWI: u32 = 0xFFC0_1400;
const PORTG: u32 = 0xFFC0_1500;

const ENA: u32 = 1 << 7;
const MEN: u32 = 1;
const MDIR: u32 = 1 << 2;

/// Interleaved-layout address of a bank-0 register on the MCP23017.
fn exp_reg(register: u8) -> u8 {
    register * 2
}

/// Two-byte master write: register pointer plus one data byte.
fn twi_write(m: &mut Machine, addr: u32, register: u8, value: u8) {
    m.soc.write32(TWI + 0x04, ENA);
    m.soc.write32(TWI + 0x1C, addr);
    m.soc.write32(TWI + 0x80, register as u32);
    m.soc.write32(TWI + 0x80, value as u32);
    m.soc.write32(TWI + 0x14, MEN | (2 << 6));
    m.run_ticks(4);
    m.soc.write32(TWI + 0x20, 0xFF);
}

/// Pointer write followed by a one-byte master read.
fn twi_read1(m: &mut Machine, addr: u32, register: u8) -> u8 {
    m.soc.write32(TWI + 0x04, ENA);
    m.soc.write32(TWI + 0x1C, addr);
    m.soc.write32(TWI + 0x80, register as u32);
    m.soc.write32(TWI + 0x14, MEN | (1 << 6));
    m.run_ticks(4);
    m.soc.write32(TWI + 0x14, MEN | MDIR | (1 << 6));
    m.run_ticks(4);
    m.soc.write32(TWI + 0x20, 0xFF);
    (m.soc.read32(TWI + 0x88) & 0xFF) as u8
}

#[test]
fn key_press_asserts_the_expander_interrupt() {
    let dir = tempfile::tempdir().unwrap();
    let mut m = common::machine(&dir.path().join("nand.bin"));

    // Keyboard column on expander 0 pin 2: pull-up, change interrupt, and
    // one GPIO read to settle the idle-high level.
    twi_write(&mut m, 0x20, exp_reg(0x02), 0x04); // GPINTEN
    twi_write(&mut m, 0x20, exp_reg(0x06), 0x04); // GPPU
    let idle = twi_read1(&mut m, 0x20, exp_reg(0x09));
    assert_eq!(idle & 0x04, 0x04, "pulled-up column reads high");
    let exp0 = m.soc.expanders[0];
    assert_eq!(m.soc.gpio.output_of(exp0, 16), PinLevel::High, "INTA idle high");

    let handle = m.handle();
    handle.key_event(0, 2, true);
    m.run_ticks(3);
    assert_eq!(m.soc.gpio.output_of(exp0, 16), PinLevel::Low, "INTA asserted");

    // A GPIO read releases the latch (default clear policy) and shows the
    // pressed key as low.
    let held = twi_read1(&mut m, 0x20, exp_reg(0x09));
    assert_eq!(held & 0x04, 0, "pressed key reads low");
    assert_eq!(m.soc.gpio.output_of(exp0, 16), PinLevel::High, "INTA released");

    handle.key_event(0, 2, false);
    m.run_ticks(3);
    assert_eq!(m.soc.gpio.output_of(exp0, 16), PinLevel::Low, "release re-latches");
}

#[test]
fn accelerometer_interrupt_reaches_expander_zero() {
    let dir = tempfile::tempdir().unwrap();
    let mut m = common::machine(&dir.path().join("nand.bin"));

    // Expander 0 pin 1 is wired to the ADXL345 INT1 output.
    twi_write(&mut m, 0x20, exp_reg(0x02), 0x02);
    // Enable the accelerometer's data-ready interrupt.
    twi_write(&mut m, 0x53, 0x2E, 0x80);

    let handle = m.handle();
    handle.set_acceleration(120, -300, 400);
    m.run_ticks(3);

    let exp0 = m.soc.expanders[0];
    assert_eq!(m.soc.gpio.output_of(exp0, 16), PinLevel::Low, "INTA follows data-ready");

    // Reading the sample clears data-ready; the expander latch clears on
    // its own GPIO read.
    assert_eq!(twi_read1(&mut m, 0x53, 0x32), 120);
    let _ = twi_read1(&mut m, 0x20, exp_reg(0x09));
    assert_eq!(m.soc.gpio.output_of(exp0, 16), PinLevel::High);
}

#[test]
fn frame_sync_pulses_bank_g_pin_three() {
    let (mut m, display, _dir) = common::machine_with_display();

    // Bank G pin 3: enabled input, rising-edge triggered, mask A.
    m.soc.write32(PORTG + 0x40, 1 << FRAME_SYNC_PIN);
    m.soc.write32(PORTG + 0x38, 1 << FRAME_SYNC_PIN);
    m.soc.write32(PORTG + 0x10, 1 << FRAME_SYNC_PIN);
    // Seed the line high, then drop the latch from the seeding edge.
    let portg = m.soc.portg;
    m.soc.gpio.set_node_input(portg, FRAME_SYNC_PIN, PinLevel::High);
    m.soc.write32(PORTG + 0x04, 1 << FRAME_SYNC_PIN);
    assert_eq!(m.soc.gpio.bank_irq_levels(portg), (false, false));

    display.lock().unwrap().frame_pending = true;
    // The pulse drives the pin low immediately and high 1000 ns later.
    m.run_ticks(3);
    assert_eq!(m.soc.gpio.bank_irq_levels(portg), (false, false));
    m.run_ticks(1100);
    assert_eq!(m.soc.gpio.bank_irq_levels(portg), (true, false), "rising edge latched");
}
