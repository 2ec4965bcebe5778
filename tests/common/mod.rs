//! Shared fixtures for the machine-level tests: a small-geometry NAND chip
//! and a recording display whose state the tests can inspect.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use bfemu::host::{Display, HeadlessDisplay};
use bfemu::peripheral::{Mt29f4g08, NandGeometry};
use bfemu::{Machine, Soc};

/// Four blocks keep the backing file around half a megabyte.
pub fn small_geometry() -> NandGeometry {
    NandGeometry { total_blocks: 4, ..NandGeometry::MT29F4G08 }
}

#[derive(Debug, Default)]
pub struct DisplayState {
    pub initialized: Option<(u32, u32)>,
    /// `(x, y, byte length)` per update_row call.
    pub rows: Vec<(u32, u32, usize)>,
    pub frame_pending: bool,
}

/// Display double that records calls and raises frames on demand.
pub struct RecordingDisplay {
    state: Arc<Mutex<DisplayState>>,
}

impl RecordingDisplay {
    pub fn new() -> (Self, Arc<Mutex<DisplayState>>) {
        let state = Arc::new(Mutex::new(DisplayState::default()));
        (Self { state: state.clone() }, state)
    }
}

impl Display for RecordingDisplay {
    fn initialize(&mut self, width: u32, height: u32) {
        self.state.lock().unwrap().initialized = Some((width, height));
    }

    fn update_row(&mut self, x: u32, y: u32, pixels: &[u8]) {
        self.state.lock().unwrap().rows.push((x, y, pixels.len()));
    }

    fn frame_started(&mut self) -> bool {
        std::mem::take(&mut self.state.lock().unwrap().frame_pending)
    }
}

/// Machine with a recording display and a fresh small NAND backing file.
pub fn machine_with_display() -> (Machine, Arc<Mutex<DisplayState>>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let chip = Mt29f4g08::open_with(dir.path().join("nand.bin"), small_geometry()).unwrap();
    let (display, state) = RecordingDisplay::new();
    let machine = Machine::new(Soc::new(chip, Box::new(display)));
    (machine, state, dir)
}

/// Machine with the headless display, for tests that never look at video.
pub fn machine(path: &std::path::Path) -> Machine {
    let chip = Mt29f4g08::open_with(path, small_geometry()).unwrap();
    Machine::new(Soc::new(chip, Box::new(HeadlessDisplay::new())))
}
