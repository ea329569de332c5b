#[macro_use]
extern crate log;

extern crate structopt;
use structopt::StructOpt;

extern crate simplelog;
use simplelog::{Config, LevelFilter, SimpleLogger};

use std::path::{Path, PathBuf};

use anyhow::Context;

use stm32_serial_bootloader::{Bootloader, Command, MemFlash, MemoryMap, Options, Outcome};

/// Runs the bootloader against an emulated STM32F103xB flash bank, serving
/// the protocol on a serial port (or pty) for host tooling development
#[derive(Clone, Debug, StructOpt)]
pub struct Args {
    /// Serial port to serve the bootloader on
    #[structopt(long, default_value = "/dev/ttyUSB0")]
    port: String,

    /// Serial port baud rate
    #[structopt(long, default_value = "115200")]
    baud: usize,

    /// Flash image, loaded at start and saved after every write or erase
    #[structopt(long, parse(from_os_str))]
    image: Option<PathBuf>,

    /// Device ID reported by GET_ID
    #[structopt(long, default_value = "1040")]
    device_id: u32,

    #[structopt(flatten)]
    options: Options,

    /// Log level for console output
    #[structopt(long, default_value = "info")]
    log_level: LevelFilter,
}

fn load_flash(map: MemoryMap, device_id: u32, image: Option<&Path>) -> anyhow::Result<MemFlash> {
    let path = match image {
        Some(p) if p.exists() => p,
        _ => return Ok(MemFlash::new(map, device_id)),
    };

    let data = std::fs::read(path)
        .with_context(|| format!("reading flash image {}", path.display()))?;
    if data.len() > map.size() as usize {
        warn!(
            "Image is {}, truncating to bank size {}",
            bytefmt::format(data.len() as u64),
            bytefmt::format(map.size() as u64)
        );
    }

    info!(
        "Loaded {} from {}",
        bytefmt::format(data.len() as u64),
        path.display()
    );

    Ok(MemFlash::with_image(map, device_id, &data))
}

fn main() -> anyhow::Result<()> {
    // Parse out arguments
    let o = Args::from_args();

    // Configure logger
    let _ = SimpleLogger::init(o.log_level, Config::default());

    let map = MemoryMap::default();
    let flash = load_flash(map, o.device_id, o.image.as_deref())?;

    info!("Opening serial port {}", o.port);

    let mut b = Bootloader::linux(&o.port, o.baud, flash, map, o.options.clone())
        .map_err(|e| anyhow::anyhow!("opening {}: {:?}", o.port, e))?;

    if let Err(e) = b.start() {
        error!("Error sending start banner: {}", e);
    }

    loop {
        let outcome = b.poll();

        let mutated = match &outcome {
            Outcome::Idle => continue,
            Outcome::Completed { command, report } => {
                if !report.is_ok() {
                    warn!("{:?} failed: {:?}", command, report.failures());
                }
                matches!(command, Command::Write | Command::Erase)
            }
            Outcome::Unrecognized { code, .. } => {
                debug!("Unrecognized command byte 0x{:02x}", code);
                false
            }
            Outcome::Failed { report } => {
                error!("Serial port failure: {:?}", report.failures());
                false
            }
        };

        if let (true, Some(path)) = (mutated, &o.image) {
            std::fs::write(path, b.flash().hal().data())
                .with_context(|| format!("saving flash image {}", path.display()))?;
            debug!("Saved flash image to {}", path.display());
        }
    }
}
