use std::sync::Mutex;

use tempfile::NamedTempFile;

use ball_speed::{AnalyzerConfig, FallbackScale, SequenceOrder};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "BALLSPEED_CONFIG",
        "BALLSPEED_ADDR",
        "BALLSPEED_ALLOWED_ORIGINS",
        "BALLSPEED_SLOWMO_FACTOR",
        "BALLSPEED_MITT_SIZE_M",
        "BALLSPEED_BACKEND",
        "BALLSPEED_MODEL_PATH",
        "BALLSPEED_WORKERS",
        "BALLSPEED_SEQUENCE_ORDER",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let toml = r#"
        [server]
        addr = "0.0.0.0:9000"
        allowed_origins = ["https://speed.example"]
        max_upload_bytes = 1048576

        [detector]
        backend = "tract"
        workers = 3
        ball_confidence = 0.05

        [sequence]
        slowmo_factor = 4.0

        [calibration]
        mitt_size_m = 0.30

        [calibration.fallback]
        mode = "fixed"
        scale_factor = 0.004

        [speed]
        aggregation = "peak_mean"
    "#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");

    std::env::set_var("BALLSPEED_CONFIG", file.path());
    std::env::set_var("BALLSPEED_SLOWMO_FACTOR", "8");
    std::env::set_var(
        "BALLSPEED_ALLOWED_ORIGINS",
        "http://localhost:3000, https://app.example",
    );
    std::env::set_var("BALLSPEED_SEQUENCE_ORDER", "catch_first");

    let cfg = AnalyzerConfig::load().expect("load config");

    assert_eq!(cfg.server.addr, "0.0.0.0:9000");
    assert_eq!(cfg.server.max_upload_bytes, 1_048_576);
    assert_eq!(
        cfg.server.allowed_origins,
        vec!["http://localhost:3000", "https://app.example"]
    );
    assert_eq!(cfg.detector.backend, "tract");
    assert_eq!(cfg.detector.workers, 3);
    assert_eq!(cfg.detector.ball_confidence, 0.05);
    assert_eq!(cfg.detector.mitt_confidence, 0.2);
    assert_eq!(cfg.sequence.slowmo_factor, Some(8.0));
    assert_eq!(cfg.sequence.order, SequenceOrder::CatchFirst);
    assert_eq!(cfg.calibration.mitt_size_m, 0.30);
    assert_eq!(
        cfg.calibration.fallback,
        FallbackScale::Fixed {
            scale_factor: 0.004
        }
    );
    assert_eq!(cfg.speed.aggregation, ball_speed::Aggregation::PeakMean);

    clear_env();
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = AnalyzerConfig::load().expect("load defaults");
    assert_eq!(cfg, AnalyzerConfig::default());
    assert_eq!(cfg.calibration.mitt_size_m, 0.32);
    assert_eq!(cfg.detector.ball_class_ids, vec![32]);
    assert_eq!(cfg.detector.mitt_class_ids, vec![35]);
    assert_eq!(cfg.sequence.order, SequenceOrder::ThrowFirst);

    clear_env();
}

#[test]
fn rejects_invalid_env_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("BALLSPEED_WORKERS", "many");
    assert!(AnalyzerConfig::load().is_err());
    clear_env();

    std::env::set_var("BALLSPEED_MITT_SIZE_M", "-0.3");
    assert!(AnalyzerConfig::load().is_err());
    clear_env();

    std::env::set_var("BALLSPEED_SEQUENCE_ORDER", "sideways");
    assert!(AnalyzerConfig::load().is_err());
    clear_env();
}

#[test]
fn unreadable_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, b"[detector\nworkers = ").expect("write config");
    std::env::set_var("BALLSPEED_CONFIG", file.path());
    let err = AnalyzerConfig::load().unwrap_err();
    assert!(format!("{:#}", err).contains("invalid config file"));

    clear_env();
}
