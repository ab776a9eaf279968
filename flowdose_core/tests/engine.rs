//! End-to-end engine tests: both loops, real threads, simulated hardware.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel as xch;
use flowdose_config::{BatchCfg, Pins};
use flowdose_core::batch::BatchController;
use flowdose_core::command::CommandProcessor;
use flowdose_core::engine::{Engine, EngineCfg, Outputs};
use flowdose_core::error::EngineError;
use flowdose_core::filter::{FlowFilter, SensorSpan};
use flowdose_core::mocks::{BlockingSensor, ConstSensor, FailingSensor, FlagActuator, MemoryStore, RecordingSink};
use flowdose_core::telemetry::TelemetryPublisher;
use flowdose_traits::clock::test_clock::TestClock;
use flowdose_traits::{Clock, FlowSensor, MonotonicClock};

struct Rig {
    engine: Engine,
    commands: xch::Sender<String>,
    shutdown: Arc<AtomicBool>,
    relay: Arc<AtomicBool>,
    valve: Arc<AtomicBool>,
    messages: Arc<std::sync::Mutex<Vec<String>>>,
    saved: Arc<std::sync::Mutex<Vec<f64>>>,
}

fn rig(
    target_l: f64,
    sensor: Box<dyn FlowSensor + Send>,
    cfg: EngineCfg,
    clock: Arc<dyn Clock + Send + Sync>,
) -> Rig {
    let batch_cfg = BatchCfg {
        default_target_l: target_l,
        new_batch_epsilon_l: 0.01,
    };
    let controller = BatchController::new(&batch_cfg, 0.0);
    let relay = FlagActuator::new();
    let valve = FlagActuator::new();
    let relay_handle = relay.handle();
    let valve_handle = valve.handle();
    let sink = RecordingSink::new("recording");
    let messages = sink.handle();
    let store = MemoryStore::new(0.0);
    let saved = store.saved();
    let (tx, rx) = xch::unbounded::<String>();
    let shutdown = Arc::new(AtomicBool::new(false));
    let engine = Engine::new(
        controller,
        Outputs::new(Box::new(relay), Box::new(valve)),
        CommandProcessor::new(Pins {
            relay: 13,
            valve: 16,
        }),
        TelemetryPublisher::new(vec![Box::new(sink)]),
        Box::new(store),
        sensor,
        FlowFilter::default(),
        SensorSpan::default(),
        rx,
        clock,
        cfg,
        shutdown.clone(),
    );
    Rig {
        engine,
        commands: tx,
        shutdown,
        relay: relay_handle,
        valve: valve_handle,
        messages,
        saved,
    }
}

fn fast_cfg() -> EngineCfg {
    EngineCfg {
        sample_period: Duration::from_millis(2),
        telemetry_period: Duration::from_millis(25),
        persist_period: Duration::from_secs(2),
        watchdog_timeout: Duration::from_millis(500),
    }
}

fn wait_until(timeout: Duration, mut pred: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if pred() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn completes_a_batch_end_to_end() {
    // Raw 2530 on the default span is ~60 L/min.
    let r = rig(
        0.02,
        Box::new(ConstSensor(2530)),
        fast_cfg(),
        Arc::new(MonotonicClock::new()),
    );
    let messages = r.messages.clone();
    let relay = r.relay.clone();
    let commands = r.commands.clone();
    let shutdown = r.shutdown.clone();

    let engine = r.engine;
    let worker = std::thread::spawn(move || engine.run());

    commands.send("toggle:relay".to_string()).unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || relay.load(Ordering::Relaxed)),
        "relay never engaged"
    );

    assert!(
        wait_until(Duration::from_secs(5), || {
            messages
                .lock()
                .unwrap()
                .iter()
                .any(|m| m.contains("\"type\":\"batchComplete\""))
        }),
        "no completion document published"
    );
    assert!(
        wait_until(Duration::from_secs(2), || !relay.load(Ordering::Relaxed)),
        "relay not released after completion"
    );

    {
        let msgs = r.messages.lock().unwrap();
        let done: Vec<&String> = msgs
            .iter()
            .filter(|m| m.contains("\"type\":\"batchComplete\""))
            .collect();
        assert_eq!(done.len(), 1, "exactly one completion per batch");
        assert!(done[0].contains("\"pauseCount\":0"));
        assert!(done[0].contains("\"finalVolume\":0.02"));
        assert!(msgs.iter().any(|m| m.contains("\"type\":\"status\"")));
    }

    // A reset after completion persists the zeroed accumulator.
    commands.send("resetBatch".to_string()).unwrap();
    assert!(
        wait_until(Duration::from_secs(2), || {
            r.saved.lock().unwrap().iter().any(|v| *v == 0.0)
        }),
        "reset did not reach the store"
    );

    shutdown.store(true, Ordering::Relaxed);
    worker.join().unwrap().unwrap();
}

#[test]
fn watchdog_trips_on_a_wedged_sensor_and_forces_outputs_off() {
    let cfg = EngineCfg {
        sample_period: Duration::from_millis(2),
        telemetry_period: Duration::from_millis(50),
        persist_period: Duration::from_secs(2),
        watchdog_timeout: Duration::from_millis(100),
    };
    let r = rig(
        1000.0,
        Box::new(BlockingSensor(Duration::from_secs(10))),
        cfg,
        Arc::new(MonotonicClock::new()),
    );
    let relay = r.relay.clone();
    let valve = r.valve.clone();

    let err = r.engine.run().expect_err("watchdog must trip");
    match err.downcast_ref::<EngineError>() {
        Some(EngineError::Watchdog { stalled_ms, limit_ms }) => {
            assert!(stalled_ms > limit_ms);
        }
        other => panic!("expected watchdog error, got {other:?}"),
    }
    assert!(!relay.load(Ordering::Relaxed));
    assert!(!valve.load(Ordering::Relaxed));
}

#[test]
fn sensor_failures_skip_samples_without_tripping_the_watchdog() {
    let cfg = EngineCfg {
        sample_period: Duration::from_millis(2),
        telemetry_period: Duration::from_millis(25),
        persist_period: Duration::from_secs(2),
        watchdog_timeout: Duration::from_millis(100),
    };
    let r = rig(
        1000.0,
        Box::new(FailingSensor),
        cfg,
        Arc::new(MonotonicClock::new()),
    );
    let messages = r.messages.clone();
    let shutdown = r.shutdown.clone();

    let engine = r.engine;
    let worker = std::thread::spawn(move || engine.run());

    // Well past the watchdog limit: a failing (not wedged) sensor must keep
    // the loop alive and telemetry flowing with zero flow.
    assert!(
        wait_until(Duration::from_secs(2), || {
            messages
                .lock()
                .unwrap()
                .iter()
                .any(|m| m.contains("\"type\":\"status\"") && m.contains("\"flow\":0"))
        }),
        "no status published while sensor is failing"
    );
    shutdown.store(true, Ordering::Relaxed);
    worker.join().unwrap().unwrap();
}

#[test]
fn pre_set_shutdown_exits_cleanly_under_an_injected_clock() {
    let clock = TestClock::new();
    let r = rig(
        1000.0,
        Box::new(ConstSensor(744)),
        fast_cfg(),
        Arc::new(clock),
    );
    r.shutdown.store(true, Ordering::Relaxed);
    r.engine.run().unwrap();
    assert!(!r.relay.load(Ordering::Relaxed));
}
