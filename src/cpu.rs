//! The instruction-execution seam.
//!
//! Decoding and executing Blackfin instructions is delegated to an external
//! simulator core behind [`CpuCore`]; this crate only defines the contract
//! the machine loop drives: execute one instruction against the SoC,
//! consume the pending-interrupt level, and expose the handful of registers
//! the firmware loader and boot glue touch.

use crate::soc::Soc;

/// Why a step ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreExit {
    /// Keep stepping.
    Continue,
    /// The core cannot make further progress (breakpoint, missing backend).
    Halted,
}

/// Registers reachable through the boot/loader façade. `P1` shares the
/// data-register file at index 9; no further aliases exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreRegister {
    Fp,
    Sp,
    Rets,
    R0,
    R1,
    R2,
    P1,
}

/// Index into the combined data/pointer register file for registers that
/// live there (RETS is a dedicated cell).
pub(crate) fn dpreg_index(register: CoreRegister) -> Option<usize> {
    match register {
        CoreRegister::Fp => Some(15),
        CoreRegister::Sp => Some(14),
        CoreRegister::R0 => Some(0),
        CoreRegister::R1 => Some(1),
        CoreRegister::R2 => Some(2),
        CoreRegister::P1 => Some(9),
        CoreRegister::Rets => None,
    }
}

/// One guest CPU core.
pub trait CpuCore: Send {
    /// Execute a single instruction; memory traffic goes through the SoC.
    fn step(&mut self, soc: &mut Soc) -> CoreExit;

    /// Highest-priority pending interrupt group, recomputed by the machine
    /// after every step.
    fn set_pending_interrupt(&mut self, _ivg: Option<u8>) {}

    /// IVG currently being serviced, if any (gates e.g. TWI transfers).
    fn current_ivg(&self) -> Option<u8> {
        None
    }

    fn pc(&self) -> u32;
    fn set_pc(&mut self, pc: u32);

    fn register(&self, register: CoreRegister) -> u32;
    fn set_register(&mut self, register: CoreRegister, value: u32);

    /// Wall-time slewed cycle counter (400 MHz nominal).
    fn set_cycles(&mut self, _cycles: u64) {}
}

/// Placeholder core used when no decoder backend is linked: holds register
/// state for the boot glue and halts on the first step.
#[derive(Debug, Default)]
pub struct IdleCore {
    pc: u32,
    rets: u32,
    dpregs: [u32; 16],
}

impl IdleCore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CpuCore for IdleCore {
    fn step(&mut self, _soc: &mut Soc) -> CoreExit {
        CoreExit::Halted
    }

    fn pc(&self) -> u32 {
        self.pc
    }

    fn set_pc(&mut self, pc: u32) {
        self.pc = pc;
    }

    fn register(&self, register: CoreRegister) -> u32 {
        match dpreg_index(register) {
            Some(index) => self.dpregs[index],
            None => self.rets,
        }
    }

    fn set_register(&mut self, register: CoreRegister, value: u32) {
        match dpreg_index(register) {
            Some(index) => self.dpregs[index] = value,
            None => self.rets = value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p1_aliases_data_register_nine() {
        let mut core = IdleCore::new();
        core.set_register(CoreRegister::P1, 0x1234);
        assert_eq!(core.dpregs[9], 0x1234);
        assert_eq!(core.register(CoreRegister::P1), 0x1234);
    }

    #[test]
    fn rets_is_separate_from_the_register_file() {
        let mut core = IdleCore::new();
        core.set_register(CoreRegister::Rets, 0x0800_0000);
        assert_eq!(core.register(CoreRegister::Rets), 0x0800_0000);
        assert!(core.dpregs.iter().all(|&r| r == 0));
    }
}
