mod faces;
mod preview;
mod video;
mod yolo;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use desk_watch::core_modules::log_writer::FlushOutcome;
use desk_watch::core_modules::utils::annotation::Annotator;
use desk_watch::pipeline::{
    EventPipeline, PipelineConfig, Preview, RunOutcome, RunSummary, StopReason, TimeSource,
};
use desk_watch::{DebounceConfig, EventRecorder, Region};
use faces::CascadeFaceLocator;
use preview::WindowPreview;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use video::VideoFileSource;
use yolo::YoloDetector;

const DEFAULT_LOG_FILTER: &str = "desk_watch=info,desk_runner=info";
const WINDOW_NAME: &str = "desk_watch preview";

const EXIT_SETUP_FAILURE: u8 = 2;
const EXIT_STOPPED: u8 = 3;
const EXIT_SOURCE_FAILED: u8 = 4;
const EXIT_FLUSH_FAILED: u8 = 5;

/// Desk-empty and phone-in-hand event detector for recorded CCTV footage.
#[derive(Parser, Debug)]
#[command(name = "desk_runner", version, about)]
struct Args {
    /// Path to the video file to review.
    #[arg(long, env = "DESK_WATCH_VIDEO", value_name = "PATH")]
    video: PathBuf,
    /// Folder for snapshots and the event logs.
    #[arg(long, env = "DESK_WATCH_OUTDIR", default_value = "events")]
    outdir: PathBuf,
    /// Seconds of absence before a desk-empty event fires.
    #[arg(long, env = "DESK_WATCH_EMPTY_THRESHOLD", default_value_t = 30)]
    empty_threshold: u64,
    /// Detection zone as x y w h. Accepted but not applied yet.
    #[arg(long, num_args = 4, value_names = ["X", "Y", "W", "H"])]
    roi: Option<Vec<u32>>,
    /// YOLOv8 ONNX export with the 80 COCO classes.
    #[arg(long, env = "DESK_WATCH_MODEL", default_value = "yolov8n.onnx")]
    model: PathBuf,
    /// Haar cascade used to find faces for redaction.
    #[arg(
        long,
        env = "DESK_WATCH_FACE_CASCADE",
        default_value = "haarcascade_frontalface_default.xml"
    )]
    face_cascade: PathBuf,
    /// TrueType font for box labels. Without it only boxes are drawn.
    #[arg(long, env = "DESK_WATCH_FONT")]
    font: Option<PathBuf>,
    #[arg(long, env = "DESK_WATCH_MIN_CONFIDENCE", default_value_t = 0.25)]
    min_confidence: f32,
    #[arg(long, env = "DESK_WATCH_NMS_IOU", default_value_t = 0.45)]
    nms_iou: f32,
    /// Clock used to time events.
    #[arg(long, value_enum, env = "DESK_WATCH_CLOCK", default_value_t = Clock::Wall)]
    clock: Clock,
    /// Give up after this many unreadable frames in a row (0 = never).
    #[arg(long, env = "DESK_WATCH_MAX_FAILURES", default_value_t = 30)]
    max_consecutive_failures: u32,
    /// Do not open a preview window.
    #[arg(long, env = "DESK_WATCH_HEADLESS")]
    headless: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum Clock {
    /// Local time when each frame is processed.
    Wall,
    /// Start time plus the frame's position in the video.
    Media,
}

impl Args {
    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            debounce: DebounceConfig {
                empty_threshold: Duration::from_secs(self.empty_threshold),
            },
            time_source: match self.clock {
                Clock::Wall => TimeSource::Wall,
                Clock::Media => TimeSource::Media,
            },
            origin: None,
            region_of_interest: self
                .roi
                .as_deref()
                .map(|r| Region::new(r[0], r[1], r[2], r[3])),
            max_consecutive_failures: self.max_consecutive_failures,
        }
    }
}

/// Everything one run needs, opened up front so setup failures abort before any
/// frame is read.
struct Session {
    source: VideoFileSource,
    detector: YoloDetector,
    recorder: EventRecorder<CascadeFaceLocator>,
    preview: Option<WindowPreview>,
    pipeline: EventPipeline,
}

impl Session {
    fn setup(args: &Args) -> Result<Self> {
        let source = VideoFileSource::open(&args.video)?;
        if let Ok((width, height)) = source.dimensions() {
            info!(path = %args.video.display(), width, height, "video opened");
        }

        info!(model = %args.model.display(), "loading detection model");
        let detector = YoloDetector::load(&args.model, args.min_confidence, args.nms_iou)?;
        info!("detection model loaded");

        let faces = CascadeFaceLocator::load(&args.face_cascade)?;
        let annotator = match &args.font {
            Some(path) => Annotator::with_font_file(path)?,
            None => Annotator::default(),
        };
        let recorder = EventRecorder::new(&args.outdir, annotator.clone(), faces)
            .with_context(|| format!("failed to create output folder {}", args.outdir.display()))?;

        let preview = if args.headless {
            None
        } else {
            match WindowPreview::open(WINDOW_NAME) {
                Ok(window) => Some(window),
                Err(err) => {
                    warn!(error = %err, "failed to open preview window, running headless");
                    None
                }
            }
        };

        Ok(Self {
            source,
            detector,
            recorder,
            preview,
            pipeline: EventPipeline::new(args.pipeline_config(), annotator),
        })
    }

    fn run(&mut self, stop: &watch::Receiver<bool>) -> RunSummary {
        if self.preview.is_some() {
            info!("press 'q' in the preview window to stop");
        }
        let preview = self.preview.as_mut().map(|p| p as &mut dyn Preview);
        self.pipeline.run(
            &mut self.source,
            &mut self.detector,
            &mut self.recorder,
            preview,
            stop,
        )
    }
}

fn exit_code(summary: &RunSummary) -> u8 {
    if summary.flush.is_err() {
        return EXIT_FLUSH_FAILED;
    }
    match summary.outcome {
        RunOutcome::EndOfStream => 0,
        RunOutcome::Stopped(_) => EXIT_STOPPED,
        RunOutcome::SourceFailed { .. } => EXIT_SOURCE_FAILED,
    }
}

fn report(summary: &RunSummary) {
    let outcome = match summary.outcome {
        RunOutcome::EndOfStream => "end of stream",
        RunOutcome::Stopped(StopReason::PreviewKey) => "stopped from preview",
        RunOutcome::Stopped(StopReason::ShutdownRequested) => "stopped by shutdown request",
        RunOutcome::SourceFailed { .. } => "source failed",
    };
    info!(
        outcome,
        frames_processed = summary.frames_processed,
        frames_skipped = summary.frames_skipped,
        events = summary.events_recorded,
        "run finished"
    );
    match &summary.flush {
        Ok(FlushOutcome::Written { csv, json, .. }) => {
            info!(csv = %csv.display(), json = %json.display(), "event logs written")
        }
        Ok(FlushOutcome::Empty) => info!("no events, no logs written"),
        Err(err) => error!(error = %err, "event log was not fully saved"),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_target(false)
        .init();
    let args = Args::parse();
    info!("initializing desk event detector");

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(error = %err, "failed to start signal runtime");
            return ExitCode::from(EXIT_SETUP_FAILURE);
        }
    };

    // Ctrl-C flips the stop flag; the frame loop notices at the next frame boundary.
    let (stop_tx, stop_rx) = watch::channel(false);
    runtime.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, finishing current frame");
            let _ = stop_tx.send(true);
        }
    });

    let mut session = match Session::setup(&args) {
        Ok(session) => session,
        Err(err) => {
            error!("{err:#}");
            return ExitCode::from(EXIT_SETUP_FAILURE);
        }
    };

    let summary = session.run(&stop_rx);
    drop(session);
    report(&summary);
    runtime.shutdown_background();
    ExitCode::from(exit_code(&summary))
}
