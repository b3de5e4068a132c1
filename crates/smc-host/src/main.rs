//! # SMC Host
//!
//! Loads a program image, selects the first device that accepts it, runs
//! independent Monte-Carlo requests through one dispatcher, and checks each
//! device count against a host recount of the returned samples.
//!
//! ```text
//! smc-host <IMAGE> [ELEMENTS] [debug]
//! ```
//!
//! The emulation mode is read from `XCL_EMULATION_MODE` and only picks the
//! default element count and the device label.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Parser, ValueEnum};
use smc_core::ByteSize;
use smc_dispatch::{
    count_hits, Dispatcher, DispatcherConfig, LogSink, MonteCarloKernel, NotificationSink, NullSink,
};
use smc_mem::HostBuffer;
use smc_queue::{select_device, Device, DeviceConfig, Platform, ProgramImage};

mod logging;

// =============================================================================
// COMMAND LINE
// =============================================================================

/// Emulation mode of the accelerator toolchain
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EmulationMode {
    /// Software emulation
    #[value(name = "sw_emu")]
    SwEmu,
    /// Hardware emulation
    #[value(name = "hw_emu")]
    HwEmu,
    /// Real hardware
    #[value(name = "hw")]
    Hardware,
}

impl EmulationMode {
    fn default_elements(self) -> usize {
        match self {
            Self::HwEmu => 4096,
            Self::SwEmu => 4096 * 8,
            Self::Hardware => 4096 * 4096,
        }
    }

    fn is_emulation(self) -> bool {
        self != Self::Hardware
    }

    fn label(self) -> &'static str {
        match self {
            Self::SwEmu => "sw_emu",
            Self::HwEmu => "hw_emu",
            Self::Hardware => "hw",
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "smc-host",
    about = "Dispatch independent Monte-Carlo requests to an accelerator and verify them"
)]
struct Cli {
    /// Program image to load on the device
    image: PathBuf,

    /// Samples per request (defaults depend on the emulation mode)
    #[arg(value_parser = clap::value_parser!(u32).range(1..=i64::from(i32::MAX)))]
    elements: Option<u32>,

    /// Pass `debug` for verbose logging
    debug: Option<String>,

    /// Emulation mode; unset means hardware
    #[arg(long, env = "XCL_EMULATION_MODE", value_enum)]
    mode: Option<EmulationMode>,

    /// Number of independent requests
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u32).range(1..=1024))]
    runs: u32,

    /// Compute units of the emulated device
    #[arg(long, default_value_t = 2)]
    compute_units: usize,
}

impl Cli {
    fn mode(&self) -> EmulationMode {
        self.mode.unwrap_or(EmulationMode::Hardware)
    }

    fn debug_enabled(&self) -> bool {
        self.debug.as_deref() == Some("debug")
    }

    fn elements(&self) -> usize {
        self.elements
            .map_or_else(|| self.mode().default_elements(), |n| n as usize)
    }
}

// =============================================================================
// RUN
// =============================================================================

fn emulated_platform(cli: &Cli) -> Platform {
    let mode = cli.mode();
    let config = DeviceConfig::default()
        .with_name(format!("smc-emu ({})", mode.label()))
        .with_compute_units(cli.compute_units)
        .with_global_mem(ByteSize::from_gib(16));
    let device = Device::new(config).with_kernel(Arc::new(MonteCarloKernel::new()));
    Platform::new("smc").with_device(device)
}

/// Run every request; `Ok(false)` when a count fails verification
fn run(cli: &Cli) -> Result<bool> {
    let elements = cli.elements();
    let runs = cli.runs as usize;

    if cli.elements.is_some() {
        log::info!("User number of elements enabled");
    }
    if cli.debug_enabled() {
        log::info!("Debug enabled");
    }

    let image = ProgramImage::from_file(&cli.image)
        .with_context(|| format!("reading program image {}", cli.image.display()))?;
    let platform = emulated_platform(cli);
    let selected = select_device(&platform, &image).context("Failed to program any device found")?;

    // Completion notices are printed in emulation, as the vendor flow does.
    let sink: Arc<dyn NotificationSink> = if cli.mode().is_emulation() || cli.debug_enabled() {
        Arc::new(LogSink)
    } else {
        Arc::new(NullSink)
    };
    let config = DispatcherConfig {
        sink,
        ..DispatcherConfig::default()
    };
    let dispatcher = Dispatcher::new(&selected.context, &selected.program, config)
        .context("creating dispatcher")?;

    println!("Running Monte Carlo with {} elements x {} requests", elements, runs);

    let results = HostBuffer::<i32>::zeroed(runs);
    let inputs: Vec<(HostBuffer<f64>, HostBuffer<f64>)> = (0..runs)
        .map(|_| (HostBuffer::zeroed(elements), HostBuffer::zeroed(elements)))
        .collect();

    let handles = inputs
        .iter()
        .enumerate()
        .map(|(slot, (x, y))| dispatcher.submit(elements, slot, x, y, &results))
        .collect::<Result<Vec<_>, _>>()
        .context("submitting requests")?;

    for handle in handles {
        let id = handle.id();
        let completion = handle
            .wait()
            .with_context(|| format!("request {} failed", id))?;
        if let Some(profile) = completion.execution {
            log::debug!(
                "request {}: executed in {:?}, {:?} end to end",
                id,
                profile.execution_time(),
                profile.total_time()
            );
        }
    }

    let counts = results.to_vec();
    let mut passed = true;
    for (i, ((x, y), &count)) in inputs.iter().zip(&counts).enumerate() {
        println!("hw_results[{}] = {}", i, count);
        println!("PI = {}", 4.0 * f64::from(count) / elements as f64);

        let expected = count_hits(&x.read(), &y.read());
        if expected != count {
            log::warn!("request {}: device counted {}, host counted {}", i, count, expected);
            passed = false;
        }
    }

    println!("TEST {}", if passed { "PASSED" } else { "FAILED" });
    Ok(passed)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.debug_enabled());

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
