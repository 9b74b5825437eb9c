// Bridge diagnostic: check the servo bridge and sweep one joint
//
// Pings all four channels, then (after confirmation) configures one joint and
// sweeps it 90 -> 60 -> 120 -> 90 through the full driver safeguards.
//
// Usage: cargo run --example bridge_diagnostic -- [port] [joint 0-3]
// Example: cargo run --example bridge_diagnostic -- /dev/ttyACM0 0

use pet_motion_runtime::config::BRIDGE_PORT;
use pet_motion_runtime::servo::{Joint, SerialPwm, ServoDriver};
use std::io::{self, Write};
use std::time::Duration;

fn confirm(prompt: &str) -> io::Result<bool> {
    print!("{} [y/N]: ", prompt);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("debug".parse().unwrap()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let port = args.next().unwrap_or_else(|| BRIDGE_PORT.to_string());
    let joint = args
        .next()
        .and_then(|s| s.parse::<usize>().ok())
        .and_then(Joint::from_index)
        .unwrap_or(Joint::LeftFront);

    println!("Serial port: {}", port);
    println!();

    println!("Step 1: Pinging bridge channels...");
    let mut bridge = SerialPwm::open(&port)?;
    bridge.set_timeout(Duration::from_millis(250))?;
    for channel in Joint::ALL {
        match bridge.ping(channel as u8) {
            Ok(true) => println!("  ✓ {} (GPIO{}) responding", channel, channel.gpio()),
            Ok(false) => println!("  ✗ {} (GPIO{}) no response", channel, channel.gpio()),
            Err(e) => println!("  ✗ {} (GPIO{}) error: {}", channel, channel.gpio(), e),
        }
    }
    println!();

    if !confirm(&format!("Sweep the {} joint? The leg WILL move", joint))? {
        return Ok(());
    }

    println!("Step 2: Configuring channels and sweeping {}...", joint);
    let mut driver = ServoDriver::new(bridge)?;
    driver.init()?;
    for angle in [60, 120, 90] {
        driver.set_angle(joint, angle)?;
        println!("  → {} at {}°", joint, driver.angle(joint));
        std::thread::sleep(Duration::from_millis(500));
    }

    println!();
    println!("✓ Sweep complete");
    Ok(())
}
