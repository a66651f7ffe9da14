// THEORY:
// The `pipeline` module is the top-level driver. It pulls frames from a source,
// hands them to the external detector, reduces the detections to a presence
// signal, advances the `DetectorState` and forwards any resulting intents to the
// `EventRecorder`.
//
// Key architectural principles:
// 1.  **Frame-Synchronous**: One frame is fully processed (detect, classify, step,
//     record, preview) before the next one is read. Nothing here is shared across
//     threads; the detector call is blocking and has no timeout.
// 2.  **Soft Per-Frame Failures**: A frame that fails to decode, or that the
//     detector cannot process, is skipped without touching the state machine.
//     Treating it as "nothing detected" would fake an absence.
// 3.  **Cooperative Stop**: The stop flag is read once per frame boundary.
// 4.  **Always Flush**: Whatever ends the loop (end of stream, stop request, too
//     many failures in a row), the event log is flushed before `run` returns.

use crate::core_modules::detection::{ObjectDetector, Region};
use crate::core_modules::log_writer::{FlushOutcome, LogWriteError};
use crate::core_modules::presence::PresenceClassifier;
use crate::core_modules::recorder::{EventRecorder, FaceLocator};
use crate::core_modules::state_machine::{DebounceConfig, DetectorState, Timestamp};
use crate::core_modules::utils::annotation::Annotator;
use chrono::Local;
use image::RgbImage;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 30;

/// One decoded frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    /// Position of the frame within the media, when the source knows it.
    pub media_time: Option<Duration>,
}

/// Sequential frame supplier. `Ok(None)` is the normal end of the stream; an
/// `Err` only costs the current frame.
pub trait FrameSource {
    fn next_frame(&mut self) -> anyhow::Result<Option<Frame>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewControl {
    Continue,
    Stop,
}

/// Live display of the annotated frame.
pub trait Preview {
    fn show(&mut self, frame: &RgbImage) -> anyhow::Result<PreviewControl>;
}

/// Where frame times come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeSource {
    /// Sample the local clock when each frame is processed.
    #[default]
    Wall,
    /// Origin plus the frame's media position. A frame without one reuses the
    /// last known position.
    Media,
}

/// Configuration for the EventPipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub debounce: DebounceConfig,
    pub time_source: TimeSource,
    /// Wall time of the stream start. Defaults to the moment `run` is called.
    pub origin: Option<Timestamp>,
    /// Accepted for compatibility; the state machine does not use it.
    pub region_of_interest: Option<Region>,
    /// Consecutive skipped frames after which the run gives up. 0 never gives up.
    pub max_consecutive_failures: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            debounce: DebounceConfig::default(),
            time_source: TimeSource::default(),
            origin: None,
            region_of_interest: None,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The preview window asked to stop (the `q` key).
    PreviewKey,
    /// An external shutdown request, e.g. Ctrl-C.
    ShutdownRequested,
}

/// How the frame loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    EndOfStream,
    Stopped(StopReason),
    SourceFailed { consecutive_failures: u32 },
}

/// The result of one run.
#[derive(Debug)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub frames_processed: u64,
    pub frames_skipped: u64,
    pub events_recorded: usize,
    /// A phone interval was still open when the stream ended. It is never closed
    /// automatically.
    pub phone_still_active: bool,
    pub flush: Result<FlushOutcome, LogWriteError>,
}

/// The main, top-level struct for event detection on one stream.
pub struct EventPipeline {
    config: PipelineConfig,
    classifier: PresenceClassifier,
    annotator: Annotator,
}

impl EventPipeline {
    pub fn new(config: PipelineConfig, annotator: Annotator) -> Self {
        Self {
            config,
            classifier: PresenceClassifier::default(),
            annotator,
        }
    }

    pub fn with_classifier(mut self, classifier: PresenceClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Processes the stream until it ends, a stop is requested or the source keeps
    /// failing, then flushes the recorder's log.
    pub fn run<S, D, F>(
        &self,
        source: &mut S,
        detector: &mut D,
        recorder: &mut EventRecorder<F>,
        mut preview: Option<&mut dyn Preview>,
        stop: &watch::Receiver<bool>,
    ) -> RunSummary
    where
        S: FrameSource + ?Sized,
        D: ObjectDetector + ?Sized,
        F: FaceLocator,
    {
        let origin = self.config.origin.unwrap_or_else(Local::now);
        let mut state = DetectorState::new(origin);
        let mut frames_processed = 0u64;
        let mut frames_skipped = 0u64;
        let mut consecutive_failures = 0u32;
        let mut last_media = Duration::ZERO;

        if let Some(roi) = self.config.region_of_interest {
            debug!(?roi, "region of interest configured; presence is evaluated on the full frame");
        }
        info!(
            threshold_secs = self.config.debounce.empty_threshold.as_secs_f64(),
            time_source = ?self.config.time_source,
            "starting event detection"
        );

        let outcome = loop {
            // --- 1. Cooperative stop check ---
            if *stop.borrow() {
                info!("shutdown requested, stopping");
                break RunOutcome::Stopped(StopReason::ShutdownRequested);
            }

            // --- 2. Acquire and detect ---
            let acquired = source.next_frame().and_then(|frame| match frame {
                Some(frame) => detector.detect(&frame.image).map(|d| Some((frame, d))),
                None => Ok(None),
            });
            let (frame, detections) = match acquired {
                Ok(Some(pair)) => pair,
                Ok(None) => {
                    info!("video stream ended");
                    break RunOutcome::EndOfStream;
                }
                Err(err) => {
                    frames_skipped += 1;
                    consecutive_failures += 1;
                    warn!(error = %err, consecutive_failures, "skipping frame");
                    let limit = self.config.max_consecutive_failures;
                    if limit > 0 && consecutive_failures >= limit {
                        error!(consecutive_failures, "too many consecutive frame failures, giving up");
                        break RunOutcome::SourceFailed { consecutive_failures };
                    }
                    continue;
                }
            };
            consecutive_failures = 0;
            frames_processed += 1;

            // --- 3. Presence and state transition ---
            let now = self.frame_time(origin, &frame, &mut last_media);
            let signal = self.classifier.classify(&detections);
            let (next, intents) = state.step(signal, now, &self.config.debounce);
            state = next;

            // --- 4. Annotate once, shared by snapshots and preview ---
            let annotated = (preview.is_some() || !intents.is_empty())
                .then(|| self.annotator.annotate(&frame.image, &detections));
            if let Some(annotated) = &annotated {
                for intent in &intents {
                    recorder.record_annotated(intent, annotated.clone());
                }
            }

            // --- 5. Live preview ---
            let control = match (preview.as_deref_mut(), &annotated) {
                (Some(window), Some(annotated)) => Some(window.show(annotated)),
                _ => None,
            };
            match control {
                Some(Ok(PreviewControl::Stop)) => {
                    info!("stop key pressed, stopping");
                    break RunOutcome::Stopped(StopReason::PreviewKey);
                }
                Some(Err(err)) => {
                    warn!(error = %err, "preview failed, continuing headless");
                    preview = None;
                }
                Some(Ok(PreviewControl::Continue)) | None => {}
            }
        };

        // --- 6. Cleanup ---
        if state.phone_active() {
            info!("stream ended with a phone interval still open");
        }
        let flush = recorder.flush();
        if let Err(err) = &flush {
            error!(error = %err, "failed to save event log");
        }

        RunSummary {
            outcome,
            frames_processed,
            frames_skipped,
            events_recorded: recorder.log().len(),
            phone_still_active: state.phone_active(),
            flush,
        }
    }

    /// In media mode a frame without a position reuses the last known one, so the
    /// timeline never mixes in wall-clock readings.
    fn frame_time(&self, origin: Timestamp, frame: &Frame, last_media: &mut Duration) -> Timestamp {
        match self.config.time_source {
            TimeSource::Wall => Local::now(),
            TimeSource::Media => {
                match frame.media_time {
                    Some(position) => *last_media = position,
                    None => debug!(?last_media, "frame has no media position, reusing the last one"),
                }
                chrono::Duration::from_std(*last_media)
                    .ok()
                    .and_then(|offset| origin.checked_add_signed(offset))
                    .unwrap_or(origin)
            }
        }
    }
}
