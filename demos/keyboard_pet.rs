// Keyboard pet: number keys pick actions, Space stops, +/- speed, Q quit
//
// Usage: cargo run --example keyboard_pet -- [port|sim]
// With "sim" (the default) the servos are simulated and nothing moves.

use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use pet_motion_runtime::actions::ActionId;
use pet_motion_runtime::config::SIM_LOG_LIMIT;
use pet_motion_runtime::scheduler::{CommandScheduler, SchedulerConfig};
use pet_motion_runtime::servo::{PulseOutput, SerialPwm, ServoDriver, SimulatedPwm};
use std::time::Duration;
use tracing::{info, warn};

const SPEEDS_MS: [u16; 3] = [160, 80, 40]; // step delay: slow, normal, fast

fn key_action(key: char) -> Option<ActionId> {
    let action = match key {
        '1' => ActionId::Sit,
        '2' => ActionId::Upright,
        '3' => ActionId::Getdown,
        '4' => ActionId::RelaxedGetdown,
        'w' => ActionId::Advance,
        's' => ActionId::Retreat,
        'a' => ActionId::RotateLeft,
        'd' => ActionId::RotateRight,
        'g' => ActionId::Greet,
        'j' => ActionId::JumpForward,
        'k' => ActionId::JumpBack,
        'r' => ActionId::Swing,
        't' => ActionId::Stretch,
        _ => return None,
    };
    Some(action)
}

fn start<P: PulseOutput + 'static>(
    output: P,
) -> Result<CommandScheduler, Box<dyn std::error::Error + Send + Sync>> {
    let mut driver = ServoDriver::new(output)?;
    driver.init()?;
    Ok(CommandScheduler::start(driver, SchedulerConfig::default()))
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let target = std::env::args().nth(1).unwrap_or_else(|| "sim".to_string());
    let scheduler = if target == "sim" {
        start(SimulatedPwm::with_log_limit(SIM_LOG_LIMIT))?
    } else {
        start(SerialPwm::open(&target)?)?
    };

    info!("Controls: 1-4 poses, WASD walk/turn, G greet, J/K jump, R swing, T stretch");
    info!("Space=stop, +/-=speed, Q=quit");

    enable_raw_mode()?;
    let result = run_keyboard(&scheduler);
    disable_raw_mode()?;

    result
}

fn run_keyboard(scheduler: &CommandScheduler) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut speed_idx: usize = 1;

    loop {
        if !event::poll(Duration::from_millis(50))? {
            continue;
        }
        let Event::Key(KeyEvent { code, kind, .. }) = event::read()? else {
            continue;
        };
        if kind != KeyEventKind::Press {
            continue;
        }

        match code {
            KeyCode::Char('q') | KeyCode::Esc => break,
            KeyCode::Char(' ') => scheduler.stop_current_action()?,
            KeyCode::Char('+') => {
                speed_idx = (speed_idx + 1).min(SPEEDS_MS.len() - 1);
                scheduler.set_speed(SPEEDS_MS[speed_idx])?;
            }
            KeyCode::Char('-') => {
                speed_idx = speed_idx.saturating_sub(1);
                scheduler.set_speed(SPEEDS_MS[speed_idx])?;
            }
            KeyCode::Char(c) => {
                if let Some(action) = key_action(c) {
                    if let Err(e) = scheduler.perform(action, None) {
                        warn!("Could not perform {}: {}", action, e);
                    }
                }
            }
            _ => {}
        }
    }

    Ok(())
}
