//! emu - headless harness for the Blackfin DAW emulator.
//!
//! Loads a firmware LDR image and the NAND backing file, brings the machine
//! up, and runs the CPU thread while this thread plays the host: pacing at
//! ~60 Hz and feeding accelerometer samples through the event queue.
//! Instruction execution requires an external decoder core attached via
//! `Machine::set_core`; without one the machine halts after bring-up.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::Parser;
use tracing::info;

use bfemu::host::{HeadlessDisplay, UiConfig};
use bfemu::loader::LdrImage;
use bfemu::peripheral::Mt29f4g08;
use bfemu::{Machine, Soc};

#[derive(Parser, Debug)]
#[command(name = "emu")]
#[command(about = "Emulator for a Blackfin-based portable audio workstation")]
struct Args {
    /// Path to the firmware LDR image
    firmware: PathBuf,

    /// Path to the NAND flash backing file (created erased if absent)
    nand: PathBuf,

    /// UI layout description (JSON); validated at startup
    #[arg(long)]
    ui_config: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("Error: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    info!(firmware = %args.firmware.display(), nand = %args.nand.display(), "starting");

    let image = LdrImage::load(&args.firmware)?;
    let blocks: usize = image.dxes.iter().map(|d| d.blocks.len()).sum();
    info!(dxes = image.dxes.len(), blocks, "firmware parsed");

    if let Some(path) = &args.ui_config {
        let config = UiConfig::load(path)?;
        info!(
            background = %config.background,
            keycaps = config.keycaps.len(),
            buttons = config.buttons.len(),
            "UI config loaded"
        );
    }

    let chip = Mt29f4g08::open(&args.nand)?;
    let machine = Machine::new(Soc::new(chip, Box::new(HeadlessDisplay::new())));
    let handle = machine.handle();

    let cpu_thread = std::thread::spawn(move || {
        let mut machine = machine;
        machine.run(&image);
    });

    // Host loop: ~60 Hz, synthetic accelerometer samples in the device's
    // rest ranges until the CPU thread winds down.
    let mut rng = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0x9E3779B9)
        | 1;
    let mut next = move || {
        rng ^= rng << 13;
        rng ^= rng >> 17;
        rng ^= rng << 5;
        rng
    };
    while !cpu_thread.is_finished() {
        std::thread::sleep(Duration::from_millis(16));
        let ax = 50 + (next() % 491) as i16; // 50..=540
        let ay = -50 - (next() % 491) as i16; // -540..=-50
        let az = 75 + (next() % 800) as i16; // 75..=874
        handle.set_acceleration(ax, ay, az);
    }

    handle.stop();
    cpu_thread.join().map_err(|_| "CPU thread panicked")?;
    info!("machine stopped");
    Ok(())
}
