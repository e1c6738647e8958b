use std::sync::Arc;
use std::time::Duration;

use recompose_common::{ComposeError, ComposeResult};
use recompose_engine::synthetic::{CodecBehavior, FaultPlan, SyntheticBackend, SyntheticSource};
use recompose_engine::{
    CancelToken, ComposeJob, ComposeOutcome, ComposeReport, ComposerEngine, EngineSettings,
    EngineSource, IdentityFilter,
};
use recompose_media_model::{
    ColorFormat, FillMode, MediaSource, PipelineConfiguration, PipelineConfigurationBuilder,
    RgbaPixels, SourceFacts, StillImage, MIME_AUDIO_AAC, MIME_VIDEO_AVC,
};

fn settings() -> EngineSettings {
    EngineSettings {
        idle_sleep: Duration::from_millis(0),
        progress_interval_steps: 1,
    }
}

fn video_builder() -> PipelineConfigurationBuilder {
    PipelineConfiguration::builder(MediaSource::Video("synthetic.mp4".into()), "out.mp4")
}

fn compose(backend: &Arc<SyntheticBackend>, config: PipelineConfiguration) -> ComposeResult<ComposeReport> {
    let plan = config.resolve(&SourceFacts::Video(backend.source().metadata()))?;
    let job = ComposeJob {
        source: EngineSource::Video("synthetic.mp4".into()),
        destination: config.destination.clone(),
        plan,
        filter: Box::new(IdentityFilter),
    };
    let mut engine = ComposerEngine::new(backend.clone(), settings(), CancelToken::new());
    match engine.compose(job, &mut |_| {})? {
        ComposeOutcome::Completed(report) => Ok(report),
        ComposeOutcome::Canceled => panic!("unexpected cancellation"),
    }
}

fn compose_still(
    backend: &Arc<SyntheticBackend>,
    pixels: RgbaPixels,
    configure: impl FnOnce(PipelineConfigurationBuilder) -> PipelineConfigurationBuilder,
) -> ComposeReport {
    let config = configure(PipelineConfiguration::builder(
        MediaSource::StillImage(StillImage::Rgba(pixels.clone())),
        "still.mp4",
    ))
    .build();
    let plan = config
        .resolve(&SourceFacts::StillImage(pixels.resolution()))
        .unwrap();
    let job = ComposeJob {
        source: EngineSource::StillImage(pixels),
        destination: "still.mp4".into(),
        plan,
        filter: Box::new(IdentityFilter),
    };
    let mut engine = ComposerEngine::new(backend.clone(), settings(), CancelToken::new());
    match engine.compose(job, &mut |_| {}).unwrap() {
        ComposeOutcome::Completed(report) => report,
        ComposeOutcome::Canceled => panic!("still-image run was canceled"),
    }
}

fn video_times(backend: &SyntheticBackend) -> Vec<i64> {
    let log = backend.muxer_log();
    let track = log.track_with_prefix("video/").expect("video track");
    log.samples_for(track)
        .map(|s| s.presentation_time_us)
        .collect()
}

#[test]
fn written_video_time_converges_to_source_duration() {
    let backend = Arc::new(SyntheticBackend::new(SyntheticSource::video(32, 24, 40_000, 51)));
    let report = compose(&backend, video_builder().build()).unwrap();

    assert_eq!(report.video_written_us, 2_000_000);
    assert_eq!(report.expected_duration_us, Some(2_000_000));
    assert_eq!(report.video_frames, 51);
    let times = video_times(&backend);
    assert_eq!(times.len(), 51);
    assert_eq!(times.last().copied(), Some(2_000_000));
    assert!(backend.muxer_log().stopped);
}

#[test]
fn time_scale_two_halves_output_timestamps() {
    let backend = Arc::new(SyntheticBackend::new(SyntheticSource::video(16, 16, 33_000, 3)));
    compose(&backend, video_builder().time_scale(2.0).build()).unwrap();
    assert_eq!(video_times(&backend), vec![0, 16_500, 33_000]);
}

#[test]
fn still_image_clip_has_exactly_one_hundred_frames() {
    let backend = Arc::new(SyntheticBackend::new(SyntheticSource::video(16, 16, 40_000, 1)));
    let pixels = RgbaPixels::solid(64, 48, [10, 200, 30, 255]);
    let report = compose_still(&backend, pixels, |b| b);

    assert_eq!(report.video_frames, 100);
    let times = video_times(&backend);
    assert_eq!(times.len(), 100);
    assert_eq!(times[1], 50_000);
    assert_eq!(times.last().copied(), Some(4_950_000));
    let log = backend.muxer_log();
    assert_eq!(log.tracks.len(), 1);
    assert_eq!(log.tracks[0].bit_rate, Some(2_000_000));
    // No size was set, so the clip uses the fallback size.
    assert_eq!(log.tracks[0].width, Some(480));
    assert_eq!(log.tracks[0].height, Some(720));
}

fn first_still_packet(color_format: ColorFormat) -> Vec<u8> {
    let backend = Arc::new(
        SyntheticBackend::new(SyntheticSource::video(16, 16, 40_000, 1))
            .with_encoder_color_format(color_format),
    );
    let pixels = RgbaPixels::solid(32, 32, [200, 30, 30, 255]);
    let report = compose_still(&backend, pixels, |b| {
        b.size(64, 64)
            .still_image_duration_ms(100)
            .still_image_frame_rate(10)
    });
    assert_eq!(report.video_frames, 1);
    let log = backend.muxer_log();
    let sample = log
        .samples_for(0)
        .find(|s| !s.flags.is_codec_config())
        .expect("one media sample");
    sample.data.clone()
}

#[test]
fn still_frame_follows_encoder_color_format() {
    let semi_planar = first_still_packet(ColorFormat::Yuv420SemiPlanar);
    let planar = first_still_packet(ColorFormat::Yuv420Planar);
    assert_eq!(semi_planar.len(), planar.len());
    // Same header (width, height), different payload checksum.
    assert_eq!(semi_planar[..9], planar[..9]);
    assert_ne!(semi_planar, planar);
}

#[test]
fn second_encoder_format_change_is_fatal() {
    let faults = FaultPlan {
        video_encoder: CodecBehavior {
            format_change_twice: true,
            ..CodecBehavior::default()
        },
        ..FaultPlan::default()
    };
    let backend = Arc::new(
        SyntheticBackend::new(SyntheticSource::video(16, 16, 40_000, 10)).with_faults(faults),
    );
    let err = compose(&backend, video_builder().build()).unwrap_err();
    assert!(matches!(err, ComposeError::MuxerProtocol { .. }), "{err}");
    // Teardown still ran.
    assert!(backend.ledger().entries().contains(&"muxer".to_string()));
}

#[test]
fn audio_written_before_video_format_is_flushed_without_loss() {
    let faults = FaultPlan {
        video_encoder: CodecBehavior {
            latency: 8,
            ..CodecBehavior::default()
        },
        ..FaultPlan::default()
    };
    let source = SyntheticSource::video(16, 16, 40_000, 25)
        .with_audio(8_000, 2, 320, 25)
        .audio_first();
    let backend = Arc::new(SyntheticBackend::new(source).with_faults(faults));
    let report = compose(&backend, video_builder().build()).unwrap();

    assert!(report.mux.buffered_before_start > 0);
    let log = backend.muxer_log();
    assert_eq!(log.tracks[0].mime, MIME_VIDEO_AVC);
    assert_eq!(log.tracks[1].mime, MIME_AUDIO_AAC);
    let audio: Vec<i64> = log.samples_for(1).map(|s| s.presentation_time_us).collect();
    assert_eq!(audio.len(), 25);
    assert!(audio.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(log.samples_for(0).count(), 25);
}

#[test]
fn portrait_source_is_letterboxed_not_cropped() {
    let source = SyntheticSource::video(1080, 1920, 40_000, 2).with_color([255, 255, 255, 255]);
    let backend = Arc::new(SyntheticBackend::new(source));
    compose(
        &backend,
        video_builder()
            .size(1920, 1080)
            .fill_mode(FillMode::PreserveAspectFit)
            .build(),
    )
    .unwrap();

    let frames = backend.encoded_frames();
    assert_eq!(frames.len(), 2);
    let frame = &frames[0].frame;
    assert_eq!((frame.width, frame.height), (1920, 1080));
    // Bars left and right, full height in the middle.
    assert_eq!(frame.rgba_at(10, 540), Some([0, 0, 0, 255]));
    assert_eq!(frame.rgba_at(1909, 540), Some([0, 0, 0, 255]));
    assert_eq!(frame.rgba_at(960, 0), Some([255, 255, 255, 255]));
    assert_eq!(frame.rgba_at(960, 1079), Some([255, 255, 255, 255]));
}

#[test]
fn default_bitrate_reaches_the_encoder() {
    let backend = Arc::new(SyntheticBackend::new(SyntheticSource::video(1280, 720, 40_000, 1)));
    compose(&backend, video_builder().build()).unwrap();
    let log = backend.muxer_log();
    assert_eq!(log.tracks[0].bit_rate, Some(6_912_000));
    assert_eq!(log.tracks[0].width, Some(1280));
}

#[test]
fn teardown_runs_in_fixed_order() {
    let source = SyntheticSource::video(16, 16, 40_000, 10).with_audio(8_000, 1, 160, 20);
    let backend = Arc::new(SyntheticBackend::new(source));
    compose(&backend, video_builder().time_scale(2.0).build()).unwrap();
    assert_eq!(
        backend.ledger().entries(),
        vec![
            "video decoder",
            "video encoder",
            "audio decoder",
            "audio encoder",
            "demuxer",
            "muxer",
            "probe",
        ]
    );
}

#[test]
fn demuxer_release_failure_is_fatal() {
    let faults = FaultPlan {
        demuxer_release_fails: true,
        ..FaultPlan::default()
    };
    let backend = Arc::new(
        SyntheticBackend::new(SyntheticSource::video(16, 16, 40_000, 5)).with_faults(faults),
    );
    let config = video_builder().build();
    let plan = config
        .resolve(&SourceFacts::Video(backend.source().metadata()))
        .unwrap();
    let mut engine = ComposerEngine::new(backend.clone(), settings(), CancelToken::new());
    let err = engine
        .compose(
            ComposeJob {
                source: EngineSource::Video("synthetic.mp4".into()),
                destination: "out.mp4".into(),
                plan,
                filter: Box::new(IdentityFilter),
            },
            &mut |_| {},
        )
        .unwrap_err();
    assert!(err.is_fatal_release(), "{err}");
    assert!(engine.resources_leaked());
    // Later resources were still released.
    let ledger = backend.ledger().entries();
    assert!(ledger.ends_with(&["demuxer".to_string(), "muxer".to_string(), "probe".to_string()]));
}

#[test]
fn muxer_release_failure_is_swallowed() {
    let faults = FaultPlan {
        muxer_release_fails: true,
        ..FaultPlan::default()
    };
    let backend = Arc::new(
        SyntheticBackend::new(SyntheticSource::video(16, 16, 40_000, 5)).with_faults(faults),
    );
    assert!(compose(&backend, video_builder().build()).is_ok());
}

#[test]
fn rejected_encoder_format_is_a_codec_configuration_error() {
    let faults = FaultPlan {
        video_encoder: CodecBehavior {
            fail_configure: true,
            ..CodecBehavior::default()
        },
        ..FaultPlan::default()
    };
    let backend = Arc::new(
        SyntheticBackend::new(SyntheticSource::video(16, 16, 40_000, 5)).with_faults(faults),
    );
    let err = compose(&backend, video_builder().build()).unwrap_err();
    assert!(matches!(err, ComposeError::CodecConfiguration { .. }), "{err}");
}

#[test]
fn trim_rebases_output_to_zero() {
    let backend = Arc::new(SyntheticBackend::new(SyntheticSource::video(16, 16, 40_000, 51)));
    let report = compose(&backend, video_builder().trim(400, Some(1_200)).build()).unwrap();
    let times = video_times(&backend);
    assert_eq!(times.first().copied(), Some(0));
    assert_eq!(times.last().copied(), Some(800_000));
    assert_eq!(times.len(), 21);
    assert_eq!(report.expected_duration_us, Some(800_000));
}

#[test]
fn remixed_audio_is_time_scaled() {
    let source = SyntheticSource::video(16, 16, 40_000, 26).with_audio(8_000, 1, 160, 50);
    let backend = Arc::new(SyntheticBackend::new(source));
    let report = compose(
        &backend,
        video_builder().time_scale(2.0).pitch_change(true).build(),
    )
    .unwrap();

    assert_eq!(report.video_written_us, 500_000);
    let audio = report.audio_written_us.expect("audio track");
    assert!((400_000..=500_000).contains(&audio), "audio ended at {audio}");
    let log = backend.muxer_log();
    assert_eq!(log.tracks[1].mime, MIME_AUDIO_AAC);
    assert_eq!(log.tracks[1].bit_rate, Some(128_000));
}

#[test]
fn muted_run_has_no_audio_track() {
    let source = SyntheticSource::video(16, 16, 40_000, 5).with_audio(8_000, 1, 160, 10);
    let backend = Arc::new(SyntheticBackend::new(source));
    let report = compose(&backend, video_builder().mute(true).build()).unwrap();
    assert_eq!(report.audio_written_us, None);
    assert_eq!(backend.muxer_log().tracks.len(), 1);
}

#[test]
fn passthrough_audio_honours_trim() {
    let source = SyntheticSource::video(16, 16, 40_000, 51).with_audio(8_000, 1, 160, 100);
    let backend = Arc::new(SyntheticBackend::new(source));
    let report = compose(&backend, video_builder().trim(400, Some(1_200)).build()).unwrap();

    let log = backend.muxer_log();
    let audio_track = log.track_with_prefix("audio/").expect("audio track");
    let audio: Vec<i64> = log
        .samples_for(audio_track)
        .map(|s| s.presentation_time_us)
        .collect();
    // Packets at 400..=1200 ms, shifted back by the trim start.
    assert_eq!(audio.len(), 41);
    assert_eq!(audio.first().copied(), Some(0));
    assert_eq!(audio.last().copied(), Some(800_000));
    assert!(audio.windows(2).all(|w| w[1] - w[0] == 20_000));
    assert_eq!(report.audio_written_us, Some(800_000));
    assert!(!backend.ledger().entries().contains(&"audio decoder".to_string()));
}

#[test]
fn forced_audio_encoding_remixes_at_normal_speed() {
    let source = SyntheticSource::video(16, 16, 40_000, 26).with_audio(8_000, 1, 160, 50);
    let backend = Arc::new(SyntheticBackend::new(source));
    let report = compose(&backend, video_builder().force_audio_encoding(true).build()).unwrap();

    let audio = report.audio_written_us.expect("audio track");
    assert!((900_000..=1_000_000).contains(&audio), "audio ended at {audio}");
    let log = backend.muxer_log();
    assert_eq!(log.tracks[1].mime, MIME_AUDIO_AAC);
    assert_eq!(log.tracks[1].bit_rate, Some(128_000));
    let ledger = backend.ledger().entries();
    assert!(ledger.contains(&"audio decoder".to_string()));
    assert!(ledger.contains(&"audio encoder".to_string()));
}
