//! The two-loop scheduler.
//!
//! One engine owns three execution contexts for the life of the process:
//!
//! - **sampling loop** (`flow-sampler` thread): fixed-period read → condition
//!   → integrate → apply actuator intent → feed the heartbeat. Never touches
//!   network or disk.
//! - **network/command loop** (`netops` thread): multiplexes the inbound
//!   command queue, drained domain events, the telemetry cadence and the
//!   persistence cadence over `crossbeam_channel::select!`.
//! - **supervisor** (the caller's thread inside [`Engine::run`]): watches the
//!   sampling heartbeat; on expiry forces every actuator off and returns the
//!   only fatal error in the system.
//!
//! The controller behind its mutex is the single shared resource; events
//! cross from the sampling side to the network side through a bounded
//! channel so the sampling loop can never block on I/O.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel as xch;
use crossbeam_channel::select;
use flowdose_traits::{Actuator, Clock, FlowSensor};

use crate::batch::{BatchController, BatchEvent};
use crate::command::CommandProcessor;
use crate::error::{EngineError, Result};
use crate::filter::{FlowFilter, SensorSpan};
use crate::persist::VolumeStore;
use crate::telemetry::{StatusFrame, TelemetryPublisher};
use crate::util::{MILLIS_PER_SEC, dt_seconds, duration_ms};
use crate::watchdog::{Heartbeat, Watchdog};

/// Capacity of the sampling→network event channel. Overflow drops the event
/// with a warning; the periodic status cycle re-converges consumers anyway.
const EVENT_QUEUE_DEPTH: usize = 64;

/// Engine pacing knobs, already validated by `flowdose_config`.
#[derive(Debug, Clone, Copy)]
pub struct EngineCfg {
    pub sample_period: Duration,
    pub telemetry_period: Duration,
    pub persist_period: Duration,
    pub watchdog_timeout: Duration,
}

impl From<&flowdose_config::Config> for EngineCfg {
    fn from(cfg: &flowdose_config::Config) -> Self {
        Self {
            sample_period: Duration::from_millis(cfg.sampling.period_ms),
            telemetry_period: Duration::from_millis(cfg.telemetry.period_ms),
            persist_period: Duration::from_millis(cfg.persistence.period_ms),
            watchdog_timeout: Duration::from_millis(cfg.sampling.watchdog_timeout_ms),
        }
    }
}

/// The physical relay/valve outputs, shared between the sampling loop
/// (intent application) and the supervisor (failsafe force-off).
pub struct Outputs {
    relay: Box<dyn Actuator + Send>,
    valve: Box<dyn Actuator + Send>,
}

impl Outputs {
    pub fn new(relay: Box<dyn Actuator + Send>, valve: Box<dyn Actuator + Send>) -> Self {
        Self { relay, valve }
    }

    fn apply(&mut self, relay_on: bool, valve_on: bool) {
        if let Err(e) = self.relay.set_active(relay_on) {
            tracing::warn!(error = %e, "relay write failed");
        }
        if let Err(e) = self.valve.set_active(valve_on) {
            tracing::warn!(error = %e, "valve write failed");
        }
    }

    /// Drive both outputs to the safe state, best-effort.
    pub fn force_off(&mut self) {
        self.apply(false, false);
    }
}

pub struct Engine {
    controller: Arc<Mutex<BatchController>>,
    outputs: Arc<Mutex<Outputs>>,
    processor: CommandProcessor,
    publisher: TelemetryPublisher,
    store: Box<dyn VolumeStore>,
    sensor: Box<dyn FlowSensor + Send>,
    filter: FlowFilter,
    span: SensorSpan,
    commands: xch::Receiver<String>,
    clock: Arc<dyn Clock + Send + Sync>,
    cfg: EngineCfg,
    shutdown: Arc<AtomicBool>,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        controller: BatchController,
        outputs: Outputs,
        processor: CommandProcessor,
        publisher: TelemetryPublisher,
        store: Box<dyn VolumeStore>,
        sensor: Box<dyn FlowSensor + Send>,
        filter: FlowFilter,
        span: SensorSpan,
        commands: xch::Receiver<String>,
        clock: Arc<dyn Clock + Send + Sync>,
        cfg: EngineCfg,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            controller: Arc::new(Mutex::new(controller)),
            outputs: Arc::new(Mutex::new(outputs)),
            processor,
            publisher,
            store,
            sensor,
            filter,
            span,
            commands,
            clock,
            cfg,
            shutdown,
        }
    }

    /// Run until shutdown is requested or the watchdog trips. Blocks the
    /// calling thread, which becomes the supervisor.
    pub fn run(self) -> Result<()> {
        let Engine {
            controller,
            outputs,
            processor,
            mut publisher,
            mut store,
            mut sensor,
            mut filter,
            span,
            commands,
            clock,
            cfg,
            shutdown,
        } = self;

        let epoch = clock.now();
        let heartbeat = Heartbeat::new();
        heartbeat.beat(clock.ms_since(epoch));
        let watchdog = Watchdog::new(
            heartbeat.clone(),
            duration_ms(cfg.watchdog_timeout),
            duration_ms(cfg.sample_period),
        );

        // Outputs start in a known-safe state regardless of what the GPIO
        // lines held before the process came up.
        lock(&outputs).force_off();

        let (event_tx, event_rx) = xch::bounded::<BatchEvent>(EVENT_QUEUE_DEPTH);

        // ── Sampling loop ───────────────────────────────────────────────
        let sampler = {
            let controller = Arc::clone(&controller);
            let outputs = Arc::clone(&outputs);
            let shutdown = Arc::clone(&shutdown);
            let heartbeat = heartbeat.clone();
            let clock = Arc::clone(&clock);
            std::thread::Builder::new()
                .name("flow-sampler".into())
                .spawn(move || {
                    let mut last_ms = clock.ms_since(epoch);
                    loop {
                        if shutdown.load(Ordering::Relaxed) {
                            break;
                        }
                        let flow_lpm = match sensor.read() {
                            Ok(raw) => filter.update(span.to_lpm(raw)),
                            Err(e) => {
                                // Skipped sample; the heartbeat still runs so
                                // only a wedged sensor trips the watchdog.
                                tracing::debug!(error = %e, "sensor read failed; sample skipped");
                                filter.estimate()
                            }
                        };
                        let now_ms = clock.ms_since(epoch);
                        let dt_s = dt_seconds(last_ms, now_ms);
                        last_ms = now_ms;
                        let (relay_on, valve_on) = {
                            let mut ctl = lock(&controller);
                            ctl.tick(now_ms, Utc::now(), dt_s, flow_lpm);
                            for ev in ctl.drain_events() {
                                if event_tx.try_send(ev).is_err() {
                                    tracing::warn!("event queue full; dropping batch event");
                                }
                            }
                            (ctl.relay_active(), ctl.valve_active())
                        };
                        lock(&outputs).apply(relay_on, valve_on);
                        heartbeat.beat(now_ms);
                        clock.sleep(cfg.sample_period);
                    }
                    tracing::debug!("sampling loop exiting");
                })
                .map_err(|e| eyre::eyre!("spawn flow-sampler: {e}"))?
        };

        // ── Network/command loop ────────────────────────────────────────
        let netops = {
            let controller = Arc::clone(&controller);
            let shutdown = Arc::clone(&shutdown);
            let clock = Arc::clone(&clock);
            let mut commands = commands;
            let mut event_rx = event_rx;
            std::thread::Builder::new()
                .name("netops".into())
                .spawn(move || {
                    let telemetry_tick = xch::tick(cfg.telemetry_period);
                    let persist_tick = xch::tick(cfg.persist_period);
                    loop {
                        if shutdown.load(Ordering::Relaxed) {
                            break;
                        }
                        select! {
                            recv(commands) -> msg => match msg {
                                Ok(text) => {
                                    let now_ms = clock.ms_since(epoch);
                                    let events = {
                                        let mut ctl = lock(&controller);
                                        if let Err(e) =
                                            processor.apply_text(&mut ctl, &text, now_ms, Utc::now())
                                        {
                                            tracing::warn!(error = %e, "unparseable command");
                                        }
                                        ctl.drain_events()
                                    };
                                    for ev in events {
                                        dispatch_event(
                                            ev,
                                            &controller,
                                            &mut publisher,
                                            &mut *store,
                                            clock.ms_since(epoch),
                                        );
                                    }
                                }
                                Err(_) => {
                                    // Every transport is gone; keep the
                                    // periodic duties running.
                                    commands = xch::never();
                                }
                            },
                            recv(event_rx) -> ev => match ev {
                                Ok(ev) => dispatch_event(
                                    ev,
                                    &controller,
                                    &mut publisher,
                                    &mut *store,
                                    clock.ms_since(epoch),
                                ),
                                Err(_) => {
                                    event_rx = xch::never();
                                }
                            },
                            recv(telemetry_tick) -> _ => {
                                publish_status_now(
                                    &controller,
                                    &mut publisher,
                                    clock.ms_since(epoch),
                                );
                            },
                            recv(persist_tick) -> _ => {
                                let (running, volume_l) = {
                                    let ctl = lock(&controller);
                                    (ctl.relay_active(), ctl.volume_l())
                                };
                                if running
                                    && let Err(e) = store.save(volume_l)
                                {
                                    tracing::warn!(error = %e, "periodic volume save failed; next cycle retries");
                                }
                            },
                            default(Duration::from_millis(50)) => {},
                        }
                    }
                    tracing::debug!("network loop exiting");
                })
                .map_err(|e| eyre::eyre!("spawn netops: {e}"))?
        };

        // ── Supervisor ──────────────────────────────────────────────────
        let check_period =
            Duration::from_millis((watchdog.limit_ms() / 4).clamp(10, 250));
        let result = loop {
            if shutdown.load(Ordering::Relaxed) {
                break Ok(());
            }
            let now_ms = clock.ms_since(epoch);
            if let Some(stalled_ms) = watchdog.expired(now_ms) {
                tracing::error!(
                    stalled_ms,
                    limit_ms = watchdog.limit_ms(),
                    "sampling loop unresponsive; forcing actuators off"
                );
                shutdown.store(true, Ordering::Relaxed);
                lock(&outputs).force_off();
                break Err(eyre::Report::new(EngineError::Watchdog {
                    stalled_ms,
                    limit_ms: watchdog.limit_ms(),
                }));
            }
            clock.sleep(check_period);
        };

        // Leave the plant in the safe state on every exit path.
        lock(&outputs).force_off();
        if result.is_ok() {
            let _ = sampler.join();
            let _ = netops.join();
        } else {
            // The stalled sampler may never return; leave both workers
            // detached and let the process supervisor restart us.
            drop(sampler);
            drop(netops);
        }
        result
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn publish_status_now(
    controller: &Mutex<BatchController>,
    publisher: &mut TelemetryPublisher,
    now_ms: u64,
) {
    let snap = lock(controller).snapshot(now_ms);
    let frame = StatusFrame::from_snapshot(&snap, now_ms / MILLIS_PER_SEC);
    publisher.publish_status(&frame);
}

fn dispatch_event(
    ev: BatchEvent,
    controller: &Mutex<BatchController>,
    publisher: &mut TelemetryPublisher,
    store: &mut dyn VolumeStore,
    now_ms: u64,
) {
    match ev {
        BatchEvent::Resync => publish_status_now(controller, publisher, now_ms),
        BatchEvent::Completed(report) => publisher.publish_completion(&report),
        BatchEvent::SaveRequested(volume_l) => {
            if let Err(e) = store.save(volume_l) {
                tracing::warn!(error = %e, "volume save failed; next cycle retries");
            }
        }
    }
}
