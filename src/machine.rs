//! The machine: SoC, CPU core, event queue and clocks.
//!
//! The CPU thread owns the [`Machine`] and single-steps it: execute one
//! instruction, walk the device ticks, drain the event queue, then sample
//! interrupt levels into the SIC/CEC for the next instruction. Host threads
//! interact exclusively through a [`MachineHandle`], which posts closures
//! onto the event queue and flips the stop flag.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::cpu::{CoreExit, CoreRegister, CpuCore, IdleCore};
use crate::loader::{Dxe, LdrImage};
use crate::soc::event::EventQueue;
use crate::soc::gpio::PinLevel;
use crate::soc::Soc;

/// Sentinel RETS value: a DXE returning here has finished.
pub const DXE_RETURN_ADDR: u32 = 0x0800_0000;
/// Boot stack/frame pointer, top of the usable SDRAM window.
pub const BOOT_STACK_POINTER: u32 = 0x0700_0000;
/// Nominal core clock for wall-time cycle slewing.
pub const CORE_CLOCK_HZ: u64 = 400_000_000;

/// Delay between the frame-sync falling and rising edges.
const FRAME_SYNC_PULSE_NS: u64 = 1000;
/// How often the cycle counter is re-slewed to wall time.
const SLEW_INTERVAL: u64 = 4096;

pub type MachineEvents = EventQueue<Machine>;

pub struct Machine {
    pub soc: Soc,
    core: Box<dyn CpuCore>,
    events: Arc<MachineEvents>,
    stop: Arc<AtomicBool>,
    started: Instant,
    steps: u64,
}

impl Machine {
    pub fn new(soc: Soc) -> Self {
        let mut machine = Self {
            soc,
            core: Box::new(IdleCore::new()),
            events: Arc::new(EventQueue::new()),
            stop: Arc::new(AtomicBool::new(false)),
            started: Instant::now(),
            steps: 0,
        };
        machine.init_core_state();
        machine
    }

    /// Attach a real decoder core in place of the idle placeholder.
    pub fn set_core(&mut self, core: Box<dyn CpuCore>) {
        self.core = core;
        self.init_core_state();
    }

    fn init_core_state(&mut self) {
        self.core.set_register(CoreRegister::Sp, BOOT_STACK_POINTER);
        self.core.set_register(CoreRegister::Fp, BOOT_STACK_POINTER);
    }

    pub fn core(&self) -> &dyn CpuCore {
        self.core.as_ref()
    }

    pub fn core_mut(&mut self) -> &mut dyn CpuCore {
        self.core.as_mut()
    }

    /// Cross-thread handle for host input and shutdown.
    pub fn handle(&self) -> MachineHandle {
        MachineHandle { events: self.events.clone(), stop: self.stop.clone() }
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// One instruction step plus all per-step housekeeping.
    pub fn step(&mut self) -> CoreExit {
        let exit = self.core.step(&mut self.soc);
        self.soc.tick(self.core.current_ivg());
        self.soc.now_ns += 1;
        self.steps += 1;
        if self.soc.ppi.poll_frame_start() {
            self.queue_frame_pulse();
        }
        self.drain_events();
        self.soc.forward_interrupts();
        self.core.set_pending_interrupt(self.soc.pending_ivg());
        if self.steps % SLEW_INTERVAL == 0 {
            let cycles = self.started.elapsed().as_micros() as u64 * (CORE_CLOCK_HZ / 1_000_000);
            self.core.set_cycles(cycles);
        }
        exit
    }

    /// Step the machine with no expectation of core progress (tests, idle).
    pub fn run_ticks(&mut self, count: usize) {
        for _ in 0..count {
            self.step();
        }
    }

    fn queue_frame_pulse(&mut self) {
        self.events.post(|machine| machine.soc.set_frame_sync(PinLevel::Low));
        self.events
            .post_delayed(|machine| machine.soc.set_frame_sync(PinLevel::High), FRAME_SYNC_PULSE_NS);
    }

    fn drain_events(&mut self) {
        let events = self.events.clone();
        for event in events.take_due() {
            // A panicking closure must not take the machine down with it.
            if catch_unwind(AssertUnwindSafe(|| event(self))).is_err() {
                warn!("queued event panicked; continuing with the next one");
            }
        }
    }

    /// Copy one DXE's blocks into guest memory and point the core at its
    /// entry block.
    pub fn load_dxe(&mut self, dxe: &Dxe) {
        for block in &dxe.blocks {
            if block.is_fill() {
                let pattern = block.argument.to_le_bytes();
                let mut addr = block.target_address;
                let mut remaining = block.byte_count as usize;
                while remaining > 0 {
                    let n = remaining.min(4);
                    self.soc.write(addr, &pattern[..n]);
                    addr = addr.wrapping_add(n as u32);
                    remaining -= n;
                }
            } else if !block.data.is_empty() {
                self.soc.write(block.target_address, &block.data);
            }
            if block.is_first() {
                self.core.set_register(CoreRegister::Rets, DXE_RETURN_ADDR);
                self.core.set_pc(block.target_address);
            }
        }
    }

    /// Execute every DXE of a firmware image until it returns, the host
    /// requests a stop, or the core halts.
    pub fn run(&mut self, image: &LdrImage) {
        for (index, dxe) in image.dxes.iter().enumerate() {
            self.load_dxe(dxe);
            info!(dxe = index, pc = format_args!("{:#010x}", self.core.pc()), "executing DXE");
            loop {
                if self.stop_requested() {
                    info!("stop requested, leaving run loop");
                    return;
                }
                if self.core.pc() == DXE_RETURN_ADDR {
                    info!(dxe = index, "DXE finished");
                    break;
                }
                if self.step() == CoreExit::Halted {
                    warn!("core halted; no instruction backend is driving the machine");
                    return;
                }
            }
        }
    }
}

/// Cheap cloneable handle the UI/host threads use to reach the machine.
#[derive(Clone)]
pub struct MachineHandle {
    events: Arc<MachineEvents>,
    stop: Arc<AtomicBool>,
}

impl MachineHandle {
    /// Keyboard matrix event, routed to expander `bank` pin `index`.
    pub fn key_event(&self, bank: u8, index: u8, pressed: bool) {
        self.events.post(move |machine: &mut Machine| {
            machine.soc.key_input(bank as usize, index as usize, pressed);
        });
    }

    /// Accelerometer sample, routed into the ADXL345 data registers.
    pub fn set_acceleration(&self, x: i16, y: i16, z: i16) {
        self.events.post(move |machine: &mut Machine| {
            machine.soc.set_acceleration(x, y, z);
        });
    }

    /// Potentiometer wiper position.
    pub fn set_potentiometer(&self, value: u8) {
        self.events.post(move |machine: &mut Machine| {
            machine.soc.potentiometer.set_value(value);
        });
    }

    /// Post an arbitrary closure onto the machine's event queue.
    pub fn post(&self, event: impl FnOnce(&mut Machine) + Send + 'static) {
        self.events.post(event);
    }

    pub fn post_delayed(&self, event: impl FnOnce(&mut Machine) + Send + 'static, delay_ns: u64) {
        self.events.post_delayed(event, delay_ns);
    }

    /// Ask the CPU thread to leave its run loop.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}
