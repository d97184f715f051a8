use std::sync::Arc;

use ball_speed::{
    AnalysisError, AnalysisResult, Analyzer, AnalyzerConfig, BallPath, BoundingBox,
    CalibrationMethod, CancelFlag, CpuBackend, Detection, FallbackScale, MittPatch,
    SequenceOrder, StubBackend, SyntheticClip,
};

fn pitch_clip(mitt: bool) -> SyntheticClip {
    SyntheticClip {
        fps: 240.0,
        width: 640,
        height: 360,
        frames: 30,
        capture_fps: None,
        ball: Some(BallPath {
            start: [20, 180],
            step: [30, 0],
            radius: 4,
            first_frame: 0,
            last_frame: 17,
            hidden: vec![],
        }),
        mitt: mitt.then(|| MittPatch {
            x: 560,
            y: 140,
            width: 60,
            height: 80,
        }),
    }
}

fn cpu_analyzer(config: &AnalyzerConfig) -> Analyzer {
    Analyzer::new(Arc::new(CpuBackend::new()), config)
}

fn analyze(analyzer: &Analyzer, clip: &SyntheticClip) -> AnalysisResult {
    let bytes = clip.to_bytes().expect("encode clip");
    analyzer.analyze(&bytes, &CancelFlag::new())
}

#[test]
fn mitt_calibrated_throw() {
    let analyzer = cpu_analyzer(&AnalyzerConfig::default());
    let result = analyze(&analyzer, &pitch_clip(true));

    assert!(result.success, "{:?}", result.message);
    // 30 px per frame at 0.32 m / 80 px, 240 fps real time
    let kmh = result.speed_kmh.unwrap();
    assert!((kmh - 103.68).abs() < 1e-6, "speed {}", kmh);
    assert!((result.speed_mph.unwrap() - kmh * 0.621371).abs() < 1e-3);
    assert_eq!(result.detected_frames, Some(18));
    assert_eq!(result.total_frames, Some(30));
    assert_eq!(result.fps, Some(240.0));
    assert_eq!(result.slowmo_factor, Some(1.0));
    assert_eq!(result.mitt_detected, Some(true));
    assert_eq!(result.calibration_method, Some(CalibrationMethod::MittAuto));
    assert!((result.scale_factor.unwrap() - 0.004).abs() < 1e-12);
    assert!((result.tracking_duration_ms.unwrap() - 17.0 / 240.0 * 1000.0).abs() < 1e-9);
    assert!(result.warning.is_none());
    assert!(result.message.is_none());
}

#[test]
fn missing_mitt_falls_back_with_warning() {
    let analyzer = cpu_analyzer(&AnalyzerConfig::default());
    let result = analyze(&analyzer, &pitch_clip(false));

    assert!(result.success, "{:?}", result.message);
    assert_eq!(result.mitt_detected, Some(false));
    assert_eq!(
        result.calibration_method,
        Some(CalibrationMethod::DefaultFallback)
    );
    assert!(!result.warning.unwrap_or_default().is_empty());

    let json = serde_json::to_value(analyze(&analyzer, &pitch_clip(false))).unwrap();
    assert_eq!(json["calibration_method"], "default_fallback");
}

#[test]
fn no_ball_is_insufficient_detection() {
    let analyzer = cpu_analyzer(&AnalyzerConfig::default());
    let mut clip = pitch_clip(true);
    clip.ball = None;
    let result = analyze(&analyzer, &clip);

    assert!(!result.success);
    assert!(result.message.unwrap().contains("catch in frame"));
    assert!(result.speed_kmh.is_none());
    assert!(result.detected_frames.is_none());
    assert!(result.calibration_method.is_none());
}

#[test]
fn repeated_analysis_is_identical() {
    let mut config = AnalyzerConfig::default();
    config.detector.workers = 4;
    let parallel = cpu_analyzer(&config);
    config.detector.workers = 1;
    let serial = cpu_analyzer(&config);

    let clip = pitch_clip(true);
    let first = analyze(&parallel, &clip);
    let second = analyze(&parallel, &clip);
    let third = analyze(&serial, &clip);
    assert_eq!(first, second);
    assert_eq!(first.speed_kmh, third.speed_kmh);
}

#[test]
fn catch_first_clip_measures_the_same_throw() {
    let forward = analyze(&cpu_analyzer(&AnalyzerConfig::default()), &pitch_clip(true));

    let mut reversed = pitch_clip(true);
    if let Some(ball) = reversed.ball.as_mut() {
        ball.start = [20 + 30 * 17, 180];
        ball.step = [-30, 0];
        ball.first_frame = 12;
        ball.last_frame = 29;
    }
    let mut config = AnalyzerConfig::default();
    config.sequence.order = SequenceOrder::CatchFirst;
    let backward = analyze(&cpu_analyzer(&config), &reversed);

    assert!(backward.success, "{:?}", backward.message);
    assert!((backward.speed_kmh.unwrap() - forward.speed_kmh.unwrap()).abs() < 1e-9);
    assert_eq!(backward.detected_frames, forward.detected_frames);
}

#[test]
fn slow_motion_reference_scenario() {
    // 240 fps, 8x: 3 frames are 0.1 s, 50 px at 0.01 m/px -> 5 m/s -> 18 km/h
    let mut stub = StubBackend::new();
    for i in 0..=6u64 {
        let x = 100.0 + i as f32 * 50.0 / 3.0;
        stub = stub.with_frame(
            i,
            vec![Detection::ball(BoundingBox::new(x, 100.0, 10.0, 10.0), 0.9)],
        );
    }
    let mut config = AnalyzerConfig::default();
    config.sequence.slowmo_factor = Some(8.0);
    config.calibration.fallback = FallbackScale::Fixed { scale_factor: 0.01 };
    let analyzer = Analyzer::new(Arc::new(stub), &config);

    let clip = SyntheticClip {
        fps: 240.0,
        width: 640,
        height: 360,
        frames: 12,
        capture_fps: None,
        ball: None,
        mitt: None,
    };
    let result = analyze(&analyzer, &clip);

    assert!(result.success, "{:?}", result.message);
    assert!((result.speed_kmh.unwrap() - 18.0).abs() < 1e-3);
    assert!((result.tracking_duration_ms.unwrap() - 200.0).abs() < 1e-9);
    assert_eq!(result.slowmo_factor, Some(8.0));
    assert_eq!(result.detected_frames, Some(7));
}

#[test]
fn capture_metadata_sets_slow_motion() {
    let mut clip = pitch_clip(true);
    clip.fps = 30.0;
    clip.capture_fps = Some(240.0);
    let result = analyze(&cpu_analyzer(&AnalyzerConfig::default()), &clip);
    assert!(result.success, "{:?}", result.message);
    assert_eq!(result.slowmo_factor, Some(8.0));
}

#[test]
fn corrupt_and_empty_uploads_fail_cleanly() {
    let analyzer = cpu_analyzer(&AnalyzerConfig::default());

    let result = analyzer.analyze(b"\x00\x00\x00\x18ftypmp42 truncated", &CancelFlag::new());
    assert!(!result.success);
    assert!(result.message.is_some());

    let result = analyzer.analyze(&[], &CancelFlag::new());
    assert!(!result.success);
    assert_eq!(result.message.as_deref(), Some("the video contains no frames"));

    let mut clip = pitch_clip(true);
    clip.frames = 0;
    let result = analyze(&analyzer, &clip);
    assert!(!result.success);
}

#[test]
fn hostile_clip_headers_fail_without_panicking() {
    let analyzer = cpu_analyzer(&AnalyzerConfig::default());
    let uploads: [&[u8]; 3] = [
        br#"BSYN1
{"fps":30.0,"width":64,"height":64,"frames":2,"mitt":{"x":0,"y":4294967290,"width":1,"height":10}}"#,
        br#"BSYN1
{"fps":30.0,"width":4294967295,"height":4294967295,"frames":1}"#,
        br#"BSYN1
{"fps":30.0,"width":100000,"height":100000,"frames":1}"#,
    ];
    for upload in uploads {
        let result = analyzer.analyze(upload, &CancelFlag::new());
        assert!(!result.success);
        assert!(result
            .message
            .as_deref()
            .unwrap()
            .starts_with("could not read the video"));
        assert!(result.speed_kmh.is_none());
    }
}

#[test]
fn backend_failure_aborts_analysis() {
    let analyzer = Analyzer::new(
        Arc::new(StubBackend::new().failing_on(3)),
        &AnalyzerConfig::default(),
    );
    let err = analyzer
        .measure(&pitch_clip(true).to_bytes().unwrap(), &CancelFlag::new())
        .unwrap_err();
    assert!(matches!(err, AnalysisError::Inference { frame: 3, .. }));
}

#[test]
fn cancelled_request_reports_cancellation() {
    let analyzer = cpu_analyzer(&AnalyzerConfig::default());
    let cancel = CancelFlag::new();
    cancel.cancel();
    let bytes = pitch_clip(true).to_bytes().unwrap();
    let err = analyzer.measure(&bytes, &cancel).unwrap_err();
    assert!(matches!(err, AnalysisError::Cancelled));
}

#[test]
fn halving_mitt_size_halves_speed() {
    let full = analyze(&cpu_analyzer(&AnalyzerConfig::default()), &pitch_clip(true));
    let mut config = AnalyzerConfig::default();
    config.calibration.mitt_size_m = 0.16;
    let half = analyze(&cpu_analyzer(&config), &pitch_clip(true));

    assert!((full.scale_factor.unwrap() / half.scale_factor.unwrap() - 2.0).abs() < 1e-9);
    assert!((full.speed_kmh.unwrap() / half.speed_kmh.unwrap() - 2.0).abs() < 1e-9);
}
