mod world;

use std::{error::Error, fs, path::PathBuf};

use clap::Parser;
use oar_core::utils::{
    DriveConfig, DriveController, Drivetrain, Motor, Shutdown, Supervisor, TracingObserver,
    Ultrasonic,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use world::{Line, Side, SimClock, SimEcho, SimPin, SimPwm, World};

/// Raised by Ctrl-C, observed by the supervisor between steps.
static SHUTDOWN: Shutdown = Shutdown::new();

#[derive(Parser)]
#[clap(version = "1.0")]
struct Opts {
    /// JSON drive config; absent fields keep their defaults
    #[clap(long)]
    config: Option<PathBuf>,
    /// simulated run time before an orderly stop
    #[clap(long, default_value_t = 20_000)]
    duration_ms: u64,
    /// seed for obstacle placement and echo dropout
    #[clap(long, default_value_t = 1)]
    seed: u64,
    /// percentage of trigger pulses that get no echo
    #[clap(long, default_value_t = 5)]
    dropout: u32,
    #[clap(long)]
    threshold_cm: Option<f32>,
    #[clap(long)]
    cruise_speed: Option<f32>,
    /// pace sleeps against the wall clock
    #[clap(long)]
    realtime: bool,
}

fn load_config(opts: &Opts) -> Result<DriveConfig, Box<dyn Error>> {
    let mut config = match &opts.config {
        Some(path) => DriveConfig::from_json(&fs::read(path)?)?,
        None => DriveConfig::default(),
    };
    if let Some(threshold_cm) = opts.threshold_cm {
        config.threshold_cm = threshold_cm;
    }
    if let Some(cruise_speed) = opts.cruise_speed {
        config.cruise_speed_pct = cruise_speed;
    }
    config.max_runtime_ms = Some(opts.duration_ms);
    config.validate()?;
    Ok(config)
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let opts: Opts = Opts::parse();
    let config = load_config(&opts)?;
    info!(config = %serde_json::to_string(&config)?, "drive config loaded");

    ctrlc::set_handler(|| {
        warn!("interrupt received, stopping");
        SHUTDOWN.request();
    })?;

    let world = World::new(opts.seed, opts.dropout, opts.realtime).shared();
    let pin = |line| SimPin::new(&world, line);

    let sensor = Ultrasonic::from_config(
        pin(Line::Trigger),
        SimEcho::new(&world),
        SimClock::new(&world),
        &config,
    )?;
    let left = Motor::new(
        pin(Line::In1(Side::Left)),
        pin(Line::In2(Side::Left)),
        SimPwm::new(&world, Side::Left),
        config.pwm_frequency_hz,
    )?;
    let right = Motor::new(
        pin(Line::In1(Side::Right)),
        pin(Line::In2(Side::Right)),
        SimPwm::new(&world, Side::Right),
        config.pwm_frequency_hz,
    )?;
    let drive = Drivetrain::new(left, right, pin(Line::Standby), SimClock::new(&world), &SHUTDOWN);
    let controller = DriveController::with_observer(config, TracingObserver);

    let mut supervisor = Supervisor::new(sensor, drive, controller);
    let summary = supervisor.run()?;

    info!(
        reason = ?summary.reason,
        final_state = ?summary.final_state,
        cycles = summary.drive.cycles,
        avoidances = summary.drive.avoidances,
        reverse_timeouts = summary.drive.reverse_timeouts,
        sensor_timeouts = summary.sensor_timeouts,
        skipped_samples = summary.skipped_samples,
        "run finished"
    );
    let world = world.borrow();
    if world.contacts() > 0 {
        warn!(contacts = world.contacts(), "vehicle touched an obstacle");
    }
    info!(
        elapsed_ms = world.now_millis(),
        obstacle_cm = world.obstacle_cm(),
        "simulation finished"
    );
    Ok(())
}
