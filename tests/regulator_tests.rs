//! Charge cycle scenarios run against a simple battery/alternator bench.

use alt_regulator::{
    hal::{MockField, MockPulses, MockSensors},
    AcceptExit, AltCapacity, AltTemp, ChargeProfile, ChargingPhase, Config, FaultCode, Limit,
    Policy, ProfileTable, Regulator, SystemConfig, TachFloor, TickOutcome,
};

const STEP_MS: u64 = 50;

/// Engine at about 2000 RPM with the default pole count and drive ratio.
const PULSE_INTERVAL_US: u32 = 208_955;

/// Share of the gap to the commanded duty the output closes each tick.
const FIELD_LAG: f32 = 0.2;

/// Battery volts follow the lagged field: `rest + drive * swing`.
struct Bench {
    reg: Regulator<MockField>,
    pulses: MockPulses,
    now: u64,
    drive: f32,
    rest_volts: f32,
    swing_volts: f32,
    rated_amps: f32,
    house_amps: f32,
    alt_temp: AltTemp,
    bat_temp: Option<i16>,
    pulse_interval_us: Option<u32>,
}

impl Bench {
    fn new(config: Config) -> Self {
        Self {
            reg: Regulator::new(MockField::new(), config),
            pulses: MockPulses::new(),
            now: 0,
            drive: 0.0,
            rest_volts: 12.6,
            swing_volts: 2.5,
            rated_amps: 120.0,
            house_amps: 8.0,
            alt_temp: AltTemp::Missing,
            bat_temp: None,
            pulse_interval_us: None,
        }
    }

    fn quick_start() -> Self {
        Self::new(Config::default().with_system(SystemConfig::default().with_warmup_secs(2)))
    }

    fn sensors(&self) -> MockSensors {
        let alt_amps = self.drive * self.rated_amps;
        MockSensors::new()
            .with_bat_volts(self.rest_volts + self.drive * self.swing_volts)
            .with_bat_amps(alt_amps - self.house_amps)
            .with_alt_amps(alt_amps)
            .with_alt_temp(self.alt_temp)
            .with_bat_temp(self.bat_temp)
    }

    fn volts(&self) -> f32 {
        self.sensors().values.bat_volts
    }

    fn step(&mut self) -> TickOutcome {
        self.now += STEP_MS;
        let duty = f32::from(self.reg.field().duty) / 255.0;
        self.drive += (duty - self.drive) * FIELD_LAG;
        if let Some(interval) = self.pulse_interval_us {
            self.pulses.queue(interval);
        }
        let sensors = self.sensors();
        self.reg.tick(&sensors, &self.pulses, self.now).unwrap()
    }

    fn run_for(&mut self, ms: u64) {
        let end = self.now + ms;
        while self.now < end {
            self.step();
        }
    }

    fn run_until(&mut self, phase: ChargingPhase, max_ms: u64) -> bool {
        let end = self.now + max_ms;
        while self.now < end {
            self.step();
            if self.reg.phase() == phase {
                return true;
            }
        }
        false
    }

    /// Step until the working PWM was just written, so the next tick falls
    /// inside the PID interval.
    fn sync_to_write(&mut self) {
        loop {
            let before = self.reg.field().call_count;
            self.step();
            let field = self.reg.field();
            if field.call_count > before && field.duty == self.reg.pwm() && field.duty > 0 {
                return;
            }
        }
    }
}

fn adaptive_lifeline() -> Config {
    let mut profile = ChargeProfile::lifeline();
    profile.accept_exit = AcceptExit::Adaptive;
    Config::default()
        .with_system(SystemConfig::default().with_warmup_secs(2))
        .with_profiles(ProfileTable::default().with_profile(0, profile))
}

// ============================================================================
// Full Cycle
// ============================================================================

#[test]
fn warm_up_ramp_bulk_acceptance_float() {
    let mut bench = Bench::new(adaptive_lifeline());

    assert!(bench.run_until(ChargingPhase::WarmUp, 100));
    assert!(bench.run_until(ChargingPhase::Ramping, 3_000));
    assert_eq!(bench.reg.field().peak(), 0, "no field during warm-up");

    // Ramp target is the lower float voltage
    assert!(bench.run_until(ChargingPhase::Bulk, 120_000));
    assert!(bench.volts() > 13.1);
    let bulk_at = bench.now;

    assert!(bench.run_until(ChargingPhase::Acceptance, 240_000));
    let accept_at = bench.now;
    let adaptive = bench.reg.state().adaptive_accept_ms;
    assert_eq!(adaptive, (accept_at - bulk_at) * 5);
    assert!(bench.volts() > 14.2);

    assert!(bench.run_until(ChargingPhase::Float, adaptive + 5_000));
    let in_acceptance = bench.now - accept_at;
    assert!(in_acceptance >= adaptive);
    assert!(in_acceptance < adaptive + 500);

    bench.run_for(60_000);
    assert_eq!(bench.reg.phase(), ChargingPhase::Float);
    assert!((bench.volts() - 13.3).abs() < 0.2, "float at {}", bench.volts());
    assert!(bench.reg.fault().is_none());
}

#[test]
fn run_summary_counts_charge() {
    let mut bench = Bench::quick_start();
    assert!(bench.run_until(ChargingPhase::Bulk, 120_000));
    bench.run_for(30_000);

    let summary = bench.reg.state().summary;
    assert!(summary.alt_amp_secs > 0);
    assert!(summary.alt_watt_secs > summary.alt_amp_secs);
    assert!(summary.run_time_ms > 0);
}

// ============================================================================
// Ramping
// ============================================================================

#[test]
fn ramp_ends_at_field_ceiling() {
    let system = SystemConfig::default()
        .with_warmup_secs(2)
        .with_derates(0.2, 0.75, 0.5)
        .with_alt_capacity(AltCapacity::Amps(500.0));
    let mut bench = Bench::new(Config::default().with_system(system));
    bench.swing_volts = 0.3;

    assert!(bench.run_until(ChargingPhase::Ramping, 3_000));
    let limit = bench.reg.targets().pwm_limit;
    assert_eq!(limit, 51);

    while bench.reg.pwm() < limit as u8 {
        bench.step();
        assert!(bench.now < 60_000);
        assert_eq!(bench.reg.phase(), ChargingPhase::Ramping);
    }
    bench.run_for(200);
    assert_eq!(bench.reg.phase(), ChargingPhase::Bulk);
}

#[test]
fn auto_capacity_is_sampled_after_ramp() {
    let system = SystemConfig::default()
        .with_warmup_secs(2)
        .with_derates(0.2, 0.75, 0.5)
        .with_alt_capacity(AltCapacity::Auto);
    let mut bench = Bench::new(Config::default().with_system(system));
    bench.swing_volts = 0.3;
    bench.pulse_interval_us = Some(PULSE_INTERVAL_US);

    assert!(bench.run_until(ChargingPhase::DetermineCapacity, 60_000));
    let started = bench.now;
    assert_eq!(bench.reg.targets().amps, Limit::Unbounded);

    assert!(bench.run_until(ChargingPhase::Bulk, 15_000));
    assert!(bench.now - started >= 10_000);

    let cap = bench.reg.state().capacity;
    assert!(cap.amps > 24.0, "sampled {} A", cap.amps);
    assert!((1900..2100).contains(&cap.rpm), "sampled at {} rpm", cap.rpm);
}

#[test]
fn tach_floor_waits_for_rpm_then_holds() {
    let system = SystemConfig::default()
        .with_warmup_secs(2)
        .with_tach_floor(TachFloor::Pwm(20));
    let config = Config::default()
        .with_system(system)
        .with_policy(Policy::default().with_tach_mode(true));
    let mut bench = Bench::new(config);

    bench.run_for(5_000);
    assert_eq!(bench.reg.phase(), ChargingPhase::WarmUp);
    assert_eq!(bench.reg.field().duty, 20);

    bench.pulse_interval_us = Some(PULSE_INTERVAL_US);
    assert!(bench.run_until(ChargingPhase::Ramping, 2_000));
    let from = bench.reg.field().history.len();
    bench.run_for(20_000);
    assert!(bench.reg.field().history[from..].iter().all(|&d| d >= 20));
    assert!(bench.reg.rpm() > 1900);
}

// ============================================================================
// Protection
// ============================================================================

#[test]
fn load_dump_cuts_output_in_same_tick() {
    let mut bench = Bench::quick_start();
    assert!(bench.run_until(ChargingPhase::Bulk, 120_000));
    bench.run_for(5_000);
    bench.sync_to_write();

    let working = bench.reg.pwm();
    let target = bench.reg.targets().volts;
    bench.rest_volts += target + 0.3 - bench.volts();

    bench.step();
    assert_eq!(bench.reg.field().duty, 0);
    assert_eq!(bench.reg.pwm(), working);
}

#[test]
fn overtemp_halves_field_and_holds_it_down() {
    let mut bench = Bench::quick_start();
    assert!(bench.run_until(ChargingPhase::Bulk, 120_000));
    bench.run_for(10_000);

    bench.alt_temp = AltTemp::Celsius(95);
    loop {
        let before = bench.reg.pwm();
        bench.step();
        if bench.reg.state().ot_factor < 1.0 {
            assert!(bench.reg.pwm() <= before / 2 + 1);
            break;
        }
        assert!(bench.now < 200_000);
    }
    assert!((bench.reg.state().ot_factor - 0.95).abs() < 1e-6);

    let mut prior = bench.reg.pwm();
    for _ in 0..200 {
        bench.step();
        assert!(bench.reg.pwm() <= prior);
        prior = bench.reg.pwm();
    }

    bench.alt_temp = AltTemp::Celsius(70);
    bench.run_for(30_000);
    assert!(bench.reg.pwm() > prior);
    assert!((bench.reg.state().ot_factor - 0.95).abs() < 1e-6);
    assert!(bench.reg.fault().is_none());
}

#[test]
fn hot_battery_faults_in_every_phase() {
    let forced = [
        ChargingPhase::Bulk,
        ChargingPhase::Acceptance,
        ChargingPhase::Overcharge,
        ChargingPhase::Float,
        ChargingPhase::PostFloat,
        ChargingPhase::Equalize,
    ];
    for phase in forced {
        let mut bench = Bench::quick_start();
        assert!(bench.run_until(ChargingPhase::Ramping, 3_000));
        bench.reg.force_phase(phase, bench.now).unwrap();
        bench.bat_temp = Some(65);
        let outcome = bench.step();
        assert!(
            matches!(outcome, TickOutcome::Faulted(r) if r.code == FaultCode::BatteryTemp),
            "{phase}: {outcome:?}"
        );
        assert_eq!(bench.reg.field().duty, 0);
    }

    for phase in [ChargingPhase::WarmUp, ChargingPhase::Ramping] {
        let mut bench = Bench::quick_start();
        assert!(bench.run_until(phase, 3_000));
        bench.bat_temp = Some(65);
        assert!(matches!(bench.step(), TickOutcome::Faulted(r) if r.code == FaultCode::BatteryTemp));
    }

    let mut bench = Bench::quick_start();
    bench.bat_temp = Some(65);
    assert!(matches!(bench.step(), TickOutcome::Faulted(r) if r.code == FaultCode::BatteryTemp));
}

// ============================================================================
// Float and restart
// ============================================================================

#[test]
fn float_restarts_charge_after_discharge() {
    let mut bench = Bench::quick_start();
    bench.rest_volts = 13.0;
    assert!(bench.run_until(ChargingPhase::Ramping, 3_000));
    bench.reg.force_phase(ChargingPhase::Float, bench.now).unwrap();
    bench.run_for(10_000);
    assert_eq!(bench.reg.phase(), ChargingPhase::Float);

    // Heavy load the alternator cannot keep up with
    bench.rest_volts = 12.0;
    bench.swing_volts = 0.0;
    let from = bench.now;
    assert!(bench.run_until(ChargingPhase::Ramping, 60_000));
    assert!(bench.now - from > 10_000, "persistence should delay the restart");
}

#[test]
fn overcharge_ends_at_terminal_voltage() {
    let config = Config::default()
        .with_system(SystemConfig::default().with_warmup_secs(2))
        .with_profiles(ProfileTable::default().with_selected(6).unwrap());
    let mut bench = Bench::new(config);
    assert!(bench.run_until(ChargingPhase::Ramping, 3_000));

    bench.reg.force_phase(ChargingPhase::Overcharge, bench.now).unwrap();
    bench.step();
    assert_eq!(bench.reg.targets().amps, Limit::Bounded(15.0));
    assert!(bench.run_until(ChargingPhase::Float, 1_000));
}
