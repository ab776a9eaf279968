use flowdose_config::{Config, load_toml};
use rstest::rstest;

#[test]
fn empty_toml_yields_valid_defaults() {
    let cfg = load_toml("").expect("defaults parse");
    cfg.validate().expect("defaults validate");
    assert_eq!(cfg.sensor.adc_low_counts, 744);
    assert_eq!(cfg.sensor.adc_high_counts, 3720);
    assert_eq!(cfg.sampling.period_ms, 100);
    assert_eq!(cfg.persistence.period_ms, 30_000);
    assert!((cfg.batch.new_batch_epsilon_l - 0.01).abs() < 1e-12);
}

#[test]
fn full_config_round_trips() {
    let text = r#"
[sensor]
adc_low_counts = 500
adc_high_counts = 4000
full_scale_lpm = 80.0

[batch]
default_target_l = 250.0

[telemetry]
period_ms = 500

[mqtt]
enabled = true
host = "broker.plant.local"
publish_topic = "line4/flowdose/telemetry"
command_topic = "line4/flowdose/cmd"

[broadcast]
bind = "127.0.0.1:9000"
"#;
    let cfg = load_toml(text).expect("parse");
    cfg.validate().expect("validate");
    assert_eq!(cfg.telemetry.period_ms, 500);
    assert!(cfg.mqtt.enabled);
    assert_eq!(cfg.mqtt.host, "broker.plant.local");
    // Untouched sections keep their defaults
    assert_eq!(cfg.pins.relay, 13);
    assert_eq!(cfg.pins.valve, 16);
}

#[rstest]
#[case("[telemetry]\nperiod_ms = 100\n", "telemetry.period_ms")]
#[case("[telemetry]\nperiod_ms = 5000\n", "telemetry.period_ms")]
#[case(
    "[sensor]\nadc_low_counts = 3720\nadc_high_counts = 744\n",
    "adc_high_counts"
)]
#[case("[filter]\nprocess_noise = 0.0\n", "filter.process_noise")]
#[case("[batch]\ndefault_target_l = -1.0\n", "batch.default_target_l")]
#[case("[sampling]\nperiod_ms = 0\n", "sampling.period_ms")]
#[case(
    "[sampling]\nperiod_ms = 100\nwatchdog_timeout_ms = 150\n",
    "watchdog_timeout_ms"
)]
#[case("[persistence]\nperiod_ms = 10\n", "persistence.period_ms")]
#[case("[broadcast]\nbind = \"not-an-addr\"\n", "broadcast.bind")]
#[case("[pins]\nrelay = 5\nvalve = 5\n", "pins.relay")]
fn invalid_values_are_rejected(#[case] text: &str, #[case] needle: &str) {
    let cfg = load_toml(text).expect("parse");
    let err = cfg.validate().expect_err("should reject");
    assert!(
        err.to_string().contains(needle),
        "error {err:#} should mention {needle}"
    );
}

#[test]
fn mqtt_fields_only_checked_when_enabled() {
    // Disabled broker config may be left blank.
    let cfg = load_toml("[mqtt]\nenabled = false\nhost = \"\"\n").expect("parse");
    cfg.validate().expect("validate");

    let cfg = load_toml("[mqtt]\nenabled = true\nhost = \"\"\n").expect("parse");
    assert!(cfg.validate().is_err());
}

#[test]
fn load_path_reports_missing_file() {
    let err = flowdose_config::load_path(std::path::Path::new("/no/such/flowdose.toml"))
        .expect_err("missing file");
    assert!(err.to_string().contains("read config"));
}

#[test]
fn load_path_validates_contents() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("flowdose.toml");
    std::fs::write(&path, "[telemetry]\nperiod_ms = 1\n").expect("write");
    let err = flowdose_config::load_path(&path).expect_err("invalid period");
    assert!(err.to_string().contains("telemetry.period_ms"));

    std::fs::write(&path, "[telemetry]\nperiod_ms = 1000\n").expect("write");
    let cfg = flowdose_config::load_path(&path).expect("valid config");
    assert_eq!(cfg.telemetry.period_ms, 1000);
}
