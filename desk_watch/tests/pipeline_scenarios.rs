// End-to-end runs of `EventPipeline` over scripted frames, detections and faces.
// Frames carry media times one second apart so every event time is predictable.

use chrono::{Local, TimeZone};
use desk_watch::core_modules::log_writer::{
    CSV_FILE_NAME, EVENT_FIELDS, FlushOutcome, JSON_FILE_NAME, LogWriteError,
};
use desk_watch::core_modules::state_machine::Timestamp;
use desk_watch::core_modules::utils::annotation::{Annotator, BOX_COLOR};
use desk_watch::pipeline::{
    EventPipeline, Frame, FrameSource, PipelineConfig, Preview, PreviewControl, RunOutcome,
    RunSummary, StopReason, TimeSource,
};
use desk_watch::{
    BoundingBox, Detection, Event, EventDuration, EventKind, EventRecorder, FaceLocator,
    ObjectDetector, Region,
};
use image::{Rgb, RgbImage};
use std::collections::VecDeque;
use std::path::Path;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy)]
enum Plan {
    Nobody,
    Person,
    PersonWithPhone,
    /// The frame decodes but the detector fails on it.
    DetectorError,
    /// The frame cannot be decoded.
    SourceError,
}

struct ScriptedSource {
    frames: VecDeque<(Option<u64>, Plan)>,
}

impl FrameSource for ScriptedSource {
    fn next_frame(&mut self) -> anyhow::Result<Option<Frame>> {
        match self.frames.pop_front() {
            None => Ok(None),
            Some((_, Plan::SourceError)) => anyhow::bail!("corrupt packet"),
            Some((secs, _)) => Ok(Some(Frame {
                image: RgbImage::from_pixel(64, 48, Rgb([40, 40, 40])),
                media_time: secs.map(std::time::Duration::from_secs),
            })),
        }
    }
}

struct ScriptedDetector {
    plans: VecDeque<Plan>,
}

impl ObjectDetector for ScriptedDetector {
    fn detect(&mut self, _frame: &RgbImage) -> anyhow::Result<Vec<Detection>> {
        let person = Detection::new("person", 0.9, BoundingBox::new(4.0, 4.0, 30.0, 40.0));
        let phone = Detection::new("cell phone", 0.7, BoundingBox::new(12.0, 14.0, 20.0, 26.0));
        match self.plans.pop_front() {
            Some(Plan::Person) => Ok(vec![person]),
            Some(Plan::PersonWithPhone) => Ok(vec![person, phone]),
            Some(Plan::DetectorError) => anyhow::bail!("inference failed"),
            Some(Plan::Nobody) | Some(Plan::SourceError) | None => Ok(vec![]),
        }
    }
}

struct NoFaces;

impl FaceLocator for NoFaces {
    fn locate(&mut self, _frame: &RgbImage) -> anyhow::Result<Vec<Region>> {
        Ok(vec![])
    }
}

/// Counts shown frames, keeps the last one and optionally stops or fails.
#[derive(Default)]
struct RecordingPreview {
    shown: usize,
    stop_after: Option<usize>,
    fail: bool,
    last: Option<RgbImage>,
}

impl Preview for RecordingPreview {
    fn show(&mut self, frame: &RgbImage) -> anyhow::Result<PreviewControl> {
        self.shown += 1;
        self.last = Some(frame.clone());
        if self.fail {
            anyhow::bail!("display went away");
        }
        if self.stop_after == Some(self.shown) {
            return Ok(PreviewControl::Stop);
        }
        Ok(PreviewControl::Continue)
    }
}

fn origin() -> Timestamp {
    Local
        .with_ymd_and_hms(2024, 1, 15, 9, 0, 0)
        .single()
        .expect("unambiguous local time")
}

/// A frame at media second `secs`, or one without a media position.
type Scripted = (Option<u64>, Plan);

/// `plan` for each second in `range`.
fn seconds(range: std::ops::Range<u64>, plan: Plan) -> Vec<Scripted> {
    range.map(|s| (Some(s), plan)).collect()
}

fn config() -> PipelineConfig {
    PipelineConfig {
        time_source: TimeSource::Media,
        origin: Some(origin()),
        ..PipelineConfig::default()
    }
}

fn run_with(
    script: Vec<Scripted>,
    config: PipelineConfig,
    out_dir: &Path,
    preview: Option<&mut dyn Preview>,
    stop: &watch::Receiver<bool>,
) -> (RunSummary, Vec<Event>) {
    let detector_plans = script
        .iter()
        .map(|(_, plan)| *plan)
        .filter(|plan| !matches!(plan, Plan::SourceError))
        .collect();
    let mut source = ScriptedSource {
        frames: script.into(),
    };
    let mut detector = ScriptedDetector {
        plans: detector_plans,
    };
    let mut recorder =
        EventRecorder::new(out_dir, Annotator::default(), NoFaces).expect("recorder");

    let pipeline = EventPipeline::new(config, Annotator::default());
    let summary = pipeline.run(&mut source, &mut detector, &mut recorder, preview, stop);
    (summary, recorder.into_log().as_slice().to_vec())
}

fn run(script: Vec<Scripted>, out_dir: &Path) -> (RunSummary, Vec<Event>) {
    let (_stop_tx, stop_rx) = watch::channel(false);
    run_with(script, config(), out_dir, None, &stop_rx)
}

#[test]
fn desk_empty_fires_once_after_threshold() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut script = seconds(0..5, Plan::Person);
    script.extend(seconds(5..60, Plan::Nobody));

    let (summary, events) = run(script, dir.path());

    assert_eq!(summary.outcome, RunOutcome::EndOfStream);
    assert_eq!(summary.frames_processed, 60);
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.label, EventKind::DeskEmpty);
    assert_eq!(event.timestamp, "2024-01-15_09-00-35");
    assert_eq!(event.duration, EventDuration::Whole(31));

    let snapshot = dir.path().join("desk_empty_2024-01-15_09-00-35.jpg");
    assert_eq!(
        event.image_path.as_deref(),
        Some(snapshot.to_string_lossy().as_ref())
    );
    assert!(snapshot.exists());
}

#[test]
fn reappearance_rearms_desk_empty() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut script = seconds(0..40, Plan::Nobody);
    script.push((Some(40), Plan::Person));
    script.extend(seconds(41..80, Plan::Nobody));

    let (_, events) = run(script, dir.path());

    let stamps: Vec<_> = events.iter().map(|e| e.timestamp.as_str()).collect();
    assert_eq!(stamps, ["2024-01-15_09-00-31", "2024-01-15_09-01-11"]);
    assert!(events.iter().all(|e| e.duration == EventDuration::Whole(31)));
}

#[test]
fn phone_interval_logged_on_both_edges() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut script = seconds(0..3, Plan::PersonWithPhone);
    script.extend(seconds(3..5, Plan::Person));

    let (summary, events) = run(script, dir.path());

    assert!(!summary.phone_still_active);
    let got: Vec<_> = events
        .iter()
        .map(|e| (e.label, e.timestamp.as_str(), e.duration))
        .collect();
    assert_eq!(
        got,
        vec![
            (EventKind::MobileInHand, "2024-01-15_09-00-00", EventDuration::Whole(0)),
            (EventKind::MobileNotInHand, "2024-01-15_09-00-03", EventDuration::Fractional(3.0)),
        ]
    );
}

#[test]
fn open_phone_interval_is_reported_not_closed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (summary, events) = run(seconds(0..4, Plan::PersonWithPhone), dir.path());

    assert!(summary.phone_still_active);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].label, EventKind::MobileInHand);
}

#[test]
fn frame_without_media_position_keeps_the_media_timeline() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = vec![
        (Some(0), Plan::Person),
        (Some(100), Plan::Person),
        (None, Plan::Person),
        (Some(101), Plan::Nobody),
        (Some(102), Plan::Nobody),
    ];
    let config = PipelineConfig {
        origin: None,
        ..config()
    };
    let (_stop_tx, stop_rx) = watch::channel(false);

    let (summary, events) = run_with(script, config, dir.path(), None, &stop_rx);

    assert_eq!(summary.frames_processed, 5);
    assert!(events.is_empty(), "unexpected events: {events:?}");
}

#[test]
fn leading_frames_without_media_position_start_at_origin() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut script = vec![(None, Plan::Person), (None, Plan::Nobody)];
    script.extend(seconds(1..40, Plan::Nobody));

    let (_, events) = run(script, dir.path());

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].timestamp, "2024-01-15_09-00-31");
    assert_eq!(events[0].duration, EventDuration::Whole(31));
}

#[test]
fn failed_frames_do_not_fake_absence() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut script = vec![(Some(0), Plan::Person)];
    for secs in 1..41 {
        let plan = if secs % 2 == 0 {
            Plan::SourceError
        } else {
            Plan::DetectorError
        };
        script.push((Some(secs), plan));
    }
    script.push((Some(41), Plan::Person));
    let config = PipelineConfig {
        max_consecutive_failures: 0,
        ..config()
    };
    let (_stop_tx, stop_rx) = watch::channel(false);

    let (summary, events) = run_with(script, config, dir.path(), None, &stop_rx);

    assert_eq!(summary.outcome, RunOutcome::EndOfStream);
    assert_eq!(summary.frames_processed, 2);
    assert_eq!(summary.frames_skipped, 40);
    assert!(events.is_empty());
}

#[test]
fn consecutive_failures_end_the_run_and_still_flush() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut script = seconds(0..35, Plan::Nobody);
    script.extend(seconds(35..45, Plan::SourceError));
    script.extend(seconds(45..50, Plan::Nobody));
    let config = PipelineConfig {
        max_consecutive_failures: 3,
        ..config()
    };
    let (_stop_tx, stop_rx) = watch::channel(false);

    let (summary, events) = run_with(script, config, dir.path(), None, &stop_rx);

    assert_eq!(
        summary.outcome,
        RunOutcome::SourceFailed {
            consecutive_failures: 3
        }
    );
    assert_eq!(summary.frames_skipped, 3);
    assert_eq!(events.len(), 1);
    assert!(matches!(summary.flush, Ok(FlushOutcome::Written { events: 1, .. })));
    assert!(dir.path().join(CSV_FILE_NAME).exists());
}

#[test]
fn shutdown_request_stops_before_the_next_frame() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (_stop_tx, stop_rx) = watch::channel(true);

    let (summary, events) = run_with(
        seconds(0..10, Plan::Nobody),
        config(),
        dir.path(),
        None,
        &stop_rx,
    );

    assert_eq!(
        summary.outcome,
        RunOutcome::Stopped(StopReason::ShutdownRequested)
    );
    assert_eq!(summary.frames_processed, 0);
    assert!(events.is_empty());
    assert!(matches!(summary.flush, Ok(FlushOutcome::Empty)));
}

#[test]
fn preview_stop_key_ends_run_with_events_flushed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut preview = RecordingPreview {
        stop_after: Some(33),
        ..RecordingPreview::default()
    };
    let (_stop_tx, stop_rx) = watch::channel(false);

    let (summary, events) = run_with(
        seconds(0..60, Plan::Nobody),
        config(),
        dir.path(),
        Some(&mut preview),
        &stop_rx,
    );

    assert_eq!(summary.outcome, RunOutcome::Stopped(StopReason::PreviewKey));
    assert_eq!(summary.frames_processed, 33);
    assert_eq!(preview.shown, 33);
    assert_eq!(events.len(), 1);
    assert!(dir.path().join(JSON_FILE_NAME).exists());
}

#[test]
fn preview_failure_degrades_to_headless() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut preview = RecordingPreview {
        fail: true,
        ..RecordingPreview::default()
    };
    let (_stop_tx, stop_rx) = watch::channel(false);

    let (summary, _) = run_with(
        seconds(0..10, Plan::Person),
        config(),
        dir.path(),
        Some(&mut preview),
        &stop_rx,
    );

    assert_eq!(summary.outcome, RunOutcome::EndOfStream);
    assert_eq!(summary.frames_processed, 10);
    assert_eq!(preview.shown, 1);
}

#[test]
fn preview_receives_annotated_frames() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut preview = RecordingPreview::default();
    let (_stop_tx, stop_rx) = watch::channel(false);

    run_with(
        vec![(Some(0), Plan::Person)],
        config(),
        dir.path(),
        Some(&mut preview),
        &stop_rx,
    );

    let shown = preview.last.expect("a frame was shown");
    assert_eq!(shown.dimensions(), (64, 48));
    assert_eq!(*shown.get_pixel(4, 4), BOX_COLOR);
    assert_eq!(*shown.get_pixel(60, 44), Rgb([40, 40, 40]));
}

#[test]
fn both_logs_hold_the_same_events() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut script = seconds(0..3, Plan::PersonWithPhone);
    script.extend(seconds(3..40, Plan::Nobody));

    let (summary, events) = run(script, dir.path());
    assert_eq!(events.len(), 3);
    assert!(matches!(summary.flush, Ok(FlushOutcome::Written { events: 3, .. })));

    let mut reader = csv::Reader::from_path(dir.path().join(CSV_FILE_NAME)).expect("csv");
    let header: Vec<String> = reader
        .headers()
        .expect("header")
        .iter()
        .map(str::to_owned)
        .collect();
    assert_eq!(header, EVENT_FIELDS);
    let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.expect("row")).collect();
    assert_eq!(rows.len(), 3);
    for (row, event) in rows.iter().zip(&events) {
        assert_eq!(&row[0], event.timestamp);
        assert_eq!(&row[1], event.label.as_str());
        assert_eq!(row[2].parse::<f64>().expect("number"), event.duration.as_secs_f64());
        assert_eq!(Some(&row[3]), event.image_path.as_deref());
    }

    let json = std::fs::read_to_string(dir.path().join(JSON_FILE_NAME)).expect("json");
    assert!(json.ends_with('\n'));
    let parsed: Vec<Event> = serde_json::from_str(&json).expect("parse json");
    assert_eq!(parsed, events);
}

#[test]
fn only_one_log_written_is_a_partial_failure() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir(dir.path().join(JSON_FILE_NAME)).expect("block json path");

    let (summary, events) = run(seconds(0..32, Plan::Nobody), dir.path());

    assert_eq!(events.len(), 1);
    match summary.flush {
        Err(LogWriteError::Partial { written, failed, .. }) => {
            assert_eq!(written, dir.path().join(CSV_FILE_NAME));
            assert_eq!(failed, dir.path().join(JSON_FILE_NAME));
        }
        other => panic!("expected a partial write, got {other:?}"),
    }
}

#[test]
fn quiet_run_writes_no_logs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (summary, events) = run(seconds(0..10, Plan::Person), dir.path());

    assert!(events.is_empty());
    assert!(matches!(summary.flush, Ok(FlushOutcome::Empty)));
    assert!(!dir.path().join(CSV_FILE_NAME).exists());
    assert!(!dir.path().join(JSON_FILE_NAME).exists());
}
