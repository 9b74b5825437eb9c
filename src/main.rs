use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pet_motion_runtime::config::{BRIDGE_PORT, SIM_LOG_LIMIT};
use pet_motion_runtime::scheduler::{CommandScheduler, SchedulerConfig};
use pet_motion_runtime::servo::{PulseOutput, SerialPwm, ServoDriver, SimulatedPwm};

/// Motion runtime for the quadruped desktop pet
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Serial port of the servo bridge board
    #[arg(long, default_value = BRIDGE_PORT)]
    port: String,

    /// Serial baudrate of the servo bridge
    #[arg(long, default_value_t = pet_motion_runtime::config::BRIDGE_BAUDRATE)]
    baudrate: u32,

    /// Drive an in-memory servo simulator instead of hardware
    #[arg(long)]
    simulate: bool,

    /// Default step delay in ms for actions submitted without parameters
    #[arg(long, value_parser = clap::value_parser!(u16).range(20..=200))]
    speed: Option<u16>,
}

fn start<P: PulseOutput + 'static>(
    output: P,
    args: &Args,
) -> Result<Arc<CommandScheduler>, Box<dyn std::error::Error + Send + Sync>> {
    let mut driver = ServoDriver::new(output)?;
    driver.init()?;

    let scheduler = CommandScheduler::start(driver, SchedulerConfig::default());
    if let Some(speed) = args.speed {
        scheduler.set_speed(speed)?;
    }
    Ok(Arc::new(scheduler))
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let args = Args::parse();

    let scheduler = if args.simulate {
        info!("Using simulated servos");
        start(SimulatedPwm::with_log_limit(SIM_LOG_LIMIT), &args)
    } else {
        info!("Opening servo bridge on {} @ {}", args.port, args.baudrate);
        match SerialPwm::open_with_baudrate(&args.port, args.baudrate) {
            Ok(bridge) => start(bridge, &args),
            Err(e) => Err(e.into()),
        }
    };

    let result = match scheduler {
        Ok(scheduler) => pet_motion_runtime::runtime::run(scheduler).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
