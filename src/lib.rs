//! Full-machine emulator for an embedded digital audio workstation built
//! around a Blackfin-class (ADSP-BF524) SoC.
//!
//! The crate models the SoC bus fabric and its peripherals: memory
//! regions, the SIC/CEC interrupt fabric, GPIO banks with board-level pin
//! wiring, the 16-channel DMA engine, the TWI master and its I²C slaves,
//! the NAND controller and chip, RTC, OTP, PPI video out and SPORT audio.
//! On top sit the LDR firmware loader and the machine/event loop that
//! couples a host UI thread to the CPU thread.
//!
//! Instruction decoding is an external collaborator behind
//! [`cpu::CpuCore`]; the host window is an external collaborator behind
//! [`host::Display`].

pub mod cpu;
pub mod host;
pub mod loader;
pub mod machine;
pub mod peripheral;
pub mod soc;

pub use machine::{Machine, MachineHandle};
pub use soc::Soc;
