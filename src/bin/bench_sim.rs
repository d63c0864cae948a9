//! Desktop bench simulator.
//!
//! Runs the regulator against a crude lead-acid battery and alternator
//! model, logs phase changes and faults to stderr and prints one JSON state
//! line per simulated minute.
//!
//! # Usage
//!
//! ```bash
//! # Four simulated hours on the default profile
//! cargo run --features sim --bin bench_sim
//!
//! # Same run with controller detail
//! RUST_LOG=debug cargo run --features sim --bin bench_sim
//!
//! # Eight hours, profile 2 (HD FLA), engine at 1800 RPM
//! cargo run --features sim --bin bench_sim -- 8 2 1800
//! ```

use std::env;

use anyhow::{bail, Context};

use alt_regulator::hal::{MockClock, MockField, MockSensors};
use alt_regulator::traits::Clock;
use alt_regulator::{AltTemp, Config, FeatureInputs, PulseCapture, Regulator, SystemConfig, TickOutcome};

/// Main loop interval in milliseconds
const LOOP_INTERVAL_MS: u64 = 50;

/// State line interval in milliseconds
const REPORT_INTERVAL_MS: u64 = 60_000;

/// Steady house load in amps
const HOUSE_LOAD_A: f32 = 8.0;

static CAPTURE: PulseCapture = PulseCapture::new();

// =========================================================================
// Plant model
// =========================================================================

/// 500 Ah battery with a state-of-charge dependent rest voltage.
struct Battery {
    soc: f32,
    capacity_ah: f32,
    resistance: f32,
}

impl Battery {
    fn rest_volts(&self) -> f32 {
        11.8 + 1.2 * self.soc
    }

    /// Terminal volts while `amps` flow into the battery.
    fn volts(&self, amps: f32) -> f32 {
        // absorption: resistance climbs as the battery fills
        let r = self.resistance * (1.0 + 8.0 * self.soc.powi(4));
        self.rest_volts() + amps * r
    }

    fn charge(&mut self, amps: f32, ms: u64) {
        let ah = amps * ms as f32 / 3_600_000.0;
        self.soc = (self.soc + ah / self.capacity_ah).clamp(0.0, 1.0);
    }
}

/// Alternator output scales with field duty and engine speed.
struct Alternator {
    rated_amps: f32,
    case_temp: f32,
}

impl Alternator {
    fn amps(&self, duty: u8, rpm: u32) -> f32 {
        let speed = (rpm as f32 / 2000.0).min(1.2);
        self.rated_amps * f32::from(duty) / 255.0 * speed
    }

    fn heat(&mut self, amps: f32, ms: u64) {
        let goal = 30.0 + amps * 0.6;
        self.case_temp += (goal - self.case_temp) * ms as f32 / 120_000.0;
    }
}

/// Feed the capture cell as the stator interrupt would.
fn stator_pulses(engine_rpm: u32, cfg: &SystemConfig, now_ms: u64) {
    let alt_rpm = engine_rpm as f32 * cfg.drive_ratio;
    let per_sec = alt_rpm * f32::from(cfg.alternator_poles) / 2.0 / 60.0;
    let count = (per_sec * LOOP_INTERVAL_MS as f32 / 1000.0) as u32;
    if count == 0 {
        return;
    }
    let spacing_us = LOOP_INTERVAL_MS as u32 * 1000 / count;
    let start_us = (now_ms * 1000) as u32;
    for i in 0..count {
        CAPTURE.on_pulse(start_us.wrapping_add(i * spacing_us));
    }
}

fn arg<T: std::str::FromStr>(args: &[String], index: usize, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match args.get(index) {
        Some(s) => s.parse().with_context(|| format!("bad argument {index}: {s:?}")),
        None => Ok(default),
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().collect();
    let hours: u64 = arg(&args, 1, 4)?;
    let profile: usize = arg(&args, 2, 0)?;
    let engine_rpm: u32 = arg(&args, 3, 2000)?;

    let mut regulator = Regulator::new(MockField::new(), Config::default());
    if regulator.select_profile(profile).is_err() {
        bail!("profile index {profile} out of range");
    }
    let system = regulator.config().system.clone();

    let mut battery = Battery {
        soc: 0.5,
        capacity_ah: 500.0,
        resistance: 0.004,
    };
    let mut alternator = Alternator {
        rated_amps: 140.0,
        case_temp: 30.0,
    };

    println!("bench_sim: {hours} h, profile {profile}, engine {engine_rpm} rpm");

    let mut clock = MockClock::new();
    let end_ms = hours * 3_600_000;
    let mut next_report = 0;
    while clock.now_ms() <= end_ms {
        let now = clock.now_ms();
        stator_pulses(engine_rpm, &system, now);

        let alt_amps = alternator.amps(regulator.field().duty, engine_rpm);
        let bat_amps = alt_amps - HOUSE_LOAD_A;
        let bat_volts = battery.volts(bat_amps);
        let sensors = MockSensors::new()
            .with_bat_volts(bat_volts)
            .with_bat_amps(bat_amps)
            .with_alt_amps(alt_amps)
            .with_alt_temp(AltTemp::Celsius(alternator.case_temp as i16))
            .with_bat_temp(Some(22))
            .with_fet_temp(Some(35));

        let outcome = regulator
            .tick(&sensors, &CAPTURE, now)
            .map_err(|()| anyhow::anyhow!("field driver failed"))?;
        regulator.apply_features(FeatureInputs::default(), now);

        if let TickOutcome::Faulted(record) = outcome {
            println!("{}", serde_json::to_string(&regulator.state())?);
            bail!("faulted with code {:#06x}", record.code.code());
        }

        battery.charge(bat_amps, LOOP_INTERVAL_MS);
        alternator.heat(alt_amps, LOOP_INTERVAL_MS);

        if now >= next_report {
            println!("{}", serde_json::to_string(&regulator.state())?);
            next_report += REPORT_INTERVAL_MS;
        }
        clock.advance(LOOP_INTERVAL_MS);
    }

    let summary = regulator.state().summary;
    println!(
        "done: {} Ah, {} Wh, SOC {:.0}%",
        summary.alt_amp_hours(),
        summary.alt_watt_hours(),
        battery.soc * 100.0
    );
    Ok(())
}
