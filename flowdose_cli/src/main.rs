//! Binary entry point: config, logging, hardware/transport wiring, and the
//! engine run loop.

mod cli;
mod logging;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use eyre::WrapErr;

use flowdose_core::batch::BatchController;
use flowdose_core::command::CommandProcessor;
use flowdose_core::engine::{Engine, EngineCfg, Outputs};
use flowdose_core::error::EngineError;
use flowdose_core::filter::{FlowFilter, SensorSpan};
use flowdose_core::persist::{TomlVolumeStore, VolumeStore};
use flowdose_core::telemetry::{TelemetryPublisher, TelemetrySink};
use flowdose_traits::{Actuator, FlowSensor, MonotonicClock};

use cli::{Cli, Commands};

/// Exit code of the watchdog path, for process supervisors that want to
/// distinguish the fatal trip from ordinary failures.
const EXIT_WATCHDOG: i32 = 4;

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let args = Cli::parse();

    let cfg = flowdose_config::load_path(&args.config)?;

    if matches!(args.cmd, Commands::CheckConfig) {
        println!("{}: OK", args.config.display());
        return Ok(());
    }

    // Explicit --log-level wins, then the config file, then info.
    let level = args
        .log_level
        .as_deref()
        .or(cfg.logging.level.as_deref())
        .unwrap_or("info");
    logging::init(level, args.json, cfg.logging.file.as_deref())?;

    match args.cmd {
        Commands::Run {
            target,
            sim,
            sim_flow,
        } => run(&cfg, target, sim, sim_flow),
        Commands::CheckConfig => unreachable!("handled above"),
    }
}

fn run(
    cfg: &flowdose_config::Config,
    target_override: Option<f64>,
    sim: bool,
    sim_flow: f64,
) -> eyre::Result<()> {
    // Seed the accumulator from the last backup; an unreadable record is a
    // warning, not a refusal to start dosing.
    let mut store = TomlVolumeStore::new(&cfg.persistence.path);
    let initial_volume_l = match store.load() {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "volume record unreadable; starting at zero");
            0.0
        }
    };
    tracing::info!(initial_volume_l, "resumed volume");

    let mut batch_cfg = cfg.batch;
    if let Some(target_l) = target_override {
        batch_cfg.default_target_l = target_l;
    }
    let controller = BatchController::new(&batch_cfg, initial_volume_l);

    // Transports: all optional, all feeding one command queue.
    let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded::<String>();
    let mut sinks: Vec<Box<dyn TelemetrySink>> = Vec::new();
    if cfg.broadcast.enabled {
        match flowdose_net::BroadcastHub::spawn(&cfg.broadcast.bind, cmd_tx.clone()) {
            Ok(hub) => {
                tracing::info!(addr = %hub.local_addr(), "broadcast hub listening");
                sinks.push(Box::new(hub));
            }
            Err(e) => {
                tracing::warn!(error = %e, bind = %cfg.broadcast.bind, "broadcast hub unavailable");
            }
        }
    }
    if cfg.mqtt.enabled {
        tracing::info!(host = %cfg.mqtt.host, port = cfg.mqtt.port, "mqtt link starting");
        sinks.push(Box::new(flowdose_net::MqttLink::spawn(
            &cfg.mqtt,
            cmd_tx.clone(),
        )));
    }
    drop(cmd_tx);

    let (sensor, relay, valve) = build_hardware(cfg, sim, sim_flow)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::Relaxed);
        })
        .wrap_err("install Ctrl-C handler")?;
    }

    let engine = Engine::new(
        controller,
        Outputs::new(relay, valve),
        CommandProcessor::new(cfg.pins),
        TelemetryPublisher::new(sinks),
        Box::new(store),
        sensor,
        FlowFilter::new(&cfg.filter),
        SensorSpan::new(&cfg.sensor),
        cmd_rx,
        Arc::new(MonotonicClock::new()),
        EngineCfg::from(cfg),
        shutdown,
    );

    tracing::info!(
        sample_period_ms = cfg.sampling.period_ms,
        telemetry_period_ms = cfg.telemetry.period_ms,
        "engine starting"
    );
    match engine.run() {
        Ok(()) => {
            tracing::info!("engine stopped");
            Ok(())
        }
        Err(e) => {
            if matches!(
                e.downcast_ref::<EngineError>(),
                Some(EngineError::Watchdog { .. })
            ) {
                eprintln!("fatal: {e:#}");
                std::process::exit(EXIT_WATCHDOG);
            }
            Err(e)
        }
    }
}

type Hardware = (
    Box<dyn FlowSensor + Send>,
    Box<dyn Actuator + Send>,
    Box<dyn Actuator + Send>,
);

#[cfg(all(feature = "hardware", target_os = "linux"))]
fn build_hardware(
    cfg: &flowdose_config::Config,
    sim: bool,
    sim_flow: f64,
) -> eyre::Result<Hardware> {
    if sim {
        return Ok(simulated_hardware(cfg, sim_flow));
    }
    use flowdose_hardware::gpio::{GpioActuator, SpiAdcFlowSensor};
    let sensor = SpiAdcFlowSensor::new(0).wrap_err("open flow ADC")?;
    let relay = GpioActuator::new(cfg.pins.relay, "relay").wrap_err("open relay pin")?;
    let valve = GpioActuator::new(cfg.pins.valve, "valve").wrap_err("open valve pin")?;
    Ok((Box::new(sensor), Box::new(relay), Box::new(valve)))
}

#[cfg(not(all(feature = "hardware", target_os = "linux")))]
fn build_hardware(
    cfg: &flowdose_config::Config,
    sim: bool,
    sim_flow: f64,
) -> eyre::Result<Hardware> {
    if !sim {
        tracing::info!("built without hardware support; using simulated devices");
    }
    Ok(simulated_hardware(cfg, sim_flow))
}

fn simulated_hardware(cfg: &flowdose_config::Config, sim_flow: f64) -> Hardware {
    use flowdose_hardware::{SimulatedActuator, SimulatedFlowSensor};
    (
        Box::new(SimulatedFlowSensor::new(&cfg.sensor, sim_flow)),
        Box::new(SimulatedActuator::new("relay")),
        Box::new(SimulatedActuator::new("valve")),
    )
}
