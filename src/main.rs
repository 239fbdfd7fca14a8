//! Headless runner: drives the step core with simulated sensors.

use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, ValueEnum};
use log::info;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tokio::time::{self, Duration, Instant};
use tokio_util::sync::CancellationToken;

use stepwarden_lib::{
    init_logging,
    sensing::{SensorReading, SimulatedSource},
    supervisor::StaticPermissions,
    tracking::LogNotifier,
    PowerState, SensorSource, SensorTier, StepTracking, TrackerApp,
};

#[derive(Parser, Debug)]
#[command(
    name = "stepwarden",
    about = "Battery-aware step counter demo",
    long_about = "Runs the step-tracking core against a simulated walk and prints diagnostics on exit."
)]
struct Args {
    /// Directory for the SQLite database and settings.json
    #[arg(long, default_value = "stepwarden-data")]
    data_dir: PathBuf,

    /// Best sensor tier the simulated device has
    #[arg(long, value_enum, default_value_t = DemoTier::Counter)]
    tier: DemoTier,

    /// How long to walk
    #[arg(long, default_value_t = 30)]
    seconds: u64,

    /// Enter idle mode after this many seconds, then wake for the last quarter
    #[arg(long)]
    idle_after: Option<u64>,

    /// Override the stored daily goal
    #[arg(long)]
    goal: Option<u32>,

    /// Seed for the simulated walk
    #[arg(long, default_value_t = 7)]
    seed: u64,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum DemoTier {
    Counter,
    Detector,
    Accelerometer,
}

impl From<DemoTier> for SensorTier {
    fn from(tier: DemoTier) -> Self {
        match tier {
            DemoTier::Counter => SensorTier::Counter,
            DemoTier::Detector => SensorTier::Detector,
            DemoTier::Accelerometer => SensorTier::Accelerometer,
        }
    }
}

/// All three tiers, with those better than `best` missing.
fn simulated_device(best: SensorTier) -> Vec<Arc<SimulatedSource>> {
    SensorTier::FALLBACK_ORDER
        .iter()
        .map(|&tier| {
            let source = SimulatedSource::new(tier).with_batching(tier != SensorTier::Accelerometer);
            source.set_present(tier >= best);
            Arc::new(source)
        })
        .collect()
}

async fn simulate_walk(
    sources: Vec<Arc<SimulatedSource>>,
    seed: u64,
    cancel_token: CancellationToken,
) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut ticker = time::interval(Duration::from_millis(20));
    let mut counter_value: u64 = rng.gen_range(10_000..200_000);
    let mut next_step_at = Instant::now();

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            _ = ticker.tick() => {
                let now = Utc::now();
                // Roughly two steps a second with some jitter.
                let step_due = Instant::now() >= next_step_at;
                if step_due {
                    next_step_at = Instant::now() + Duration::from_millis(rng.gen_range(420..620));
                    counter_value += 1;
                }

                for source in &sources {
                    let reading = match source.tier() {
                        SensorTier::Counter if step_due => SensorReading::cumulative(now, counter_value),
                        SensorTier::Detector if step_due => SensorReading::pulse(now),
                        SensorTier::Accelerometer => {
                            // Heel strike spike on each step, gravity plus noise otherwise.
                            let z = (if step_due { 24.0 } else { 9.8 }) + rng.gen_range(-0.3_f64..0.3);
                            SensorReading::acceleration(
                                now,
                                rng.gen_range(-0.5..0.5),
                                rng.gen_range(-0.5..0.5),
                                z,
                            )
                        }
                        _ => continue,
                    };
                    source.emit(reading);
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    let debug_mode = std::env::var("STEPWARDEN_DEBUG")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let simulated = simulated_device(args.tier.into());
    let sources: Vec<Arc<dyn SensorSource>> = simulated
        .iter()
        .map(|source| -> Arc<dyn SensorSource> { source.clone() })
        .collect();

    let app = TrackerApp::open(
        &args.data_dir,
        sources,
        Arc::new(StaticPermissions::granted()),
        Arc::new(LogNotifier),
    )?;

    if debug_mode {
        app.settings.update(|settings| {
            settings.power.normal_flush_interval_secs = 5;
            settings.power.idle_flush_interval_secs = 15;
            settings.supervisor.health_check_interval_secs = 5;
        })?;
    }
    if let Some(goal) = args.goal {
        app.settings.update_daily_goal(goal)?;
    }

    app.supervisor.start().await?;
    let cancel_token = CancellationToken::new();
    let monitor = app.supervisor.spawn_health_monitor(cancel_token.clone());
    let walker = tokio::spawn(simulate_walk(simulated, args.seed, cancel_token.clone()));

    let mut live = app.supervisor.subscribe();
    let run_for = Duration::from_secs(args.seconds);
    let deadline = time::sleep(run_for);
    tokio::pin!(deadline);
    let idle_at = args.idle_after.map(Duration::from_secs);
    let wake_at = run_for.mul_f64(0.75);
    let started = Instant::now();
    let mut last_reported = 0;
    let mut status = time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            changed = live.changed() => {
                if changed.is_err() {
                    break;
                }
                let count = live.borrow_and_update().count;
                if count / 100 > last_reported / 100 {
                    info!("{count} steps today");
                }
                last_reported = count;
            }
            _ = status.tick() => {
                let elapsed = started.elapsed();
                let power = app.supervisor.get_diagnostics().await.power_state;
                match (idle_at, power) {
                    (Some(idle_at), PowerState::Normal) if elapsed >= idle_at && elapsed < wake_at => {
                        app.supervisor.on_power_state(PowerState::Idle).await;
                    }
                    (Some(_), PowerState::Idle) if elapsed >= wake_at => {
                        app.supervisor.on_power_state(PowerState::Normal).await;
                    }
                    _ => {}
                }
            }
        }
    }

    cancel_token.cancel();
    let _ = walker.await;
    let _ = monitor.await;

    if let Some(handle) = app.supervisor.handle().await {
        for record in handle.recent_days(7).await? {
            println!("{}  {:>6} steps  {:>7.1} kcal  {:>7.0} m", record.date, record.steps, record.calories, record.distance_m);
        }
    }

    let diagnostics = app.supervisor.get_diagnostics().await;
    app.supervisor.stop().await?;
    println!("{}", serde_json::to_string_pretty(&diagnostics)?);
    Ok(())
}
