// THEORY:
// The `recorder` module turns an `EventIntent` into a finished `Event`: it takes a
// private copy of the annotated frame, redacts faces on it, saves it as the event
// snapshot and appends the event to the run's `EventLog`.
//
// Key architectural principles:
// 1.  **Sole Owner of the Log**: The `EventLog` lives inside the `EventRecorder` for
//     the whole run. Events are appended in emission order and never changed or
//     removed afterwards.
// 2.  **Events Outlive Snapshot Failures**: A failed redaction or a failed write is
//     reported and the event is still logged, with no image path.
// 3.  **Never Save Unredacted Frames**: If the face locator fails, no snapshot is
//     written at all.

use crate::core_modules::detection::{Detection, Region};
use crate::core_modules::log_writer::{self, FlushOutcome, LogWriteError};
use crate::core_modules::state_machine::{EventDuration, EventIntent, EventKind};
use crate::core_modules::utils::annotation::Annotator;
use crate::core_modules::utils::image_helper::{save_jpeg, snapshot_path};
use crate::core_modules::utils::redaction::redact_regions;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// The face finder used before snapshots are saved. Returning no regions is valid.
pub trait FaceLocator {
    fn locate(&mut self, frame: &RgbImage) -> anyhow::Result<Vec<Region>>;
}

/// One logged event. Field order here is the column order of the tabular log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// `%Y-%m-%d_%H-%M-%S`, local time of the triggering frame.
    pub timestamp: String,
    pub label: EventKind,
    pub duration: EventDuration,
    /// `None` when the snapshot could not be saved.
    pub image_path: Option<String>,
}

/// Ordered, append-only record of a run's events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn append(&mut self, event: Event) -> &Event {
        self.events.push(event);
        &self.events[self.events.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }

    pub fn as_slice(&self) -> &[Event] {
        &self.events
    }
}

impl<'a> IntoIterator for &'a EventLog {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("face redaction failed")]
    Redaction(#[source] anyhow::Error),
    #[error("failed to save snapshot {}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

pub struct EventRecorder<F> {
    out_dir: PathBuf,
    annotator: Annotator,
    faces: F,
    log: EventLog,
}

impl<F: FaceLocator> EventRecorder<F> {
    /// Creates the recorder and its output directory.
    pub fn new(out_dir: impl Into<PathBuf>, annotator: Annotator, faces: F) -> std::io::Result<Self> {
        let out_dir = out_dir.into();
        std::fs::create_dir_all(&out_dir)?;
        Ok(Self {
            out_dir,
            annotator,
            faces,
            log: EventLog::new(),
        })
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn into_log(self) -> EventLog {
        self.log
    }

    /// Annotates a copy of `frame` and records the intent against it.
    pub fn record(&mut self, intent: &EventIntent, frame: &RgbImage, detections: &[Detection]) -> &Event {
        let snapshot = self.annotator.annotate(frame, detections);
        self.record_annotated(intent, snapshot)
    }

    /// Records the intent using an already annotated frame. The image is consumed,
    /// so redaction can never reach a buffer the caller still holds.
    pub fn record_annotated(&mut self, intent: &EventIntent, snapshot: RgbImage) -> &Event {
        let timestamp = intent.timestamp();
        let path = snapshot_path(&self.out_dir, intent.kind.as_str(), &timestamp);

        let image_path = match self.write_snapshot(snapshot, &path) {
            Ok(()) => Some(path.to_string_lossy().into_owned()),
            Err(err) => {
                warn!(
                    label = %intent.kind,
                    error = %err,
                    cause = ?std::error::Error::source(&err).map(|s| s.to_string()),
                    "snapshot not saved, event kept without image"
                );
                None
            }
        };

        let event = Event {
            timestamp,
            label: intent.kind,
            duration: intent.duration,
            image_path,
        };
        notify(&event);
        self.log.append(event)
    }

    /// Writes `events.csv` and `events.json` into the output directory.
    pub fn flush(&self) -> Result<FlushOutcome, LogWriteError> {
        log_writer::flush(&self.log, &self.out_dir)
    }

    fn write_snapshot(&mut self, mut snapshot: RgbImage, path: &Path) -> Result<(), SnapshotError> {
        let faces = self
            .faces
            .locate(&snapshot)
            .map_err(SnapshotError::Redaction)?;
        redact_regions(&mut snapshot, &faces);
        save_jpeg(path, &snapshot).map_err(|source| SnapshotError::Encode {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn notify(event: &Event) {
    match event.label {
        EventKind::DeskEmpty => {
            info!(timestamp = %event.timestamp, "desk empty: person absent for {}s", event.duration)
        }
        EventKind::MobileInHand => {
            info!(timestamp = %event.timestamp, "mobile use detected")
        }
        EventKind::MobileNotInHand => {
            info!(timestamp = %event.timestamp, "mobile use ended after {}s", event.duration)
        }
    }
}
