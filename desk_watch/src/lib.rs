// THEORY:
// This file is the main entry point for the `desk_watch` library crate.
//
// The library turns a noisy, frame-by-frame stream of object detections into a
// small set of discrete, de-duplicated, timestamped events ("the desk became
// empty", "a phone was picked up / put down") and persists them together with
// privacy-redacted snapshots.
//
// Everything that touches a concrete platform (video decoding, the detection
// model, face finding, windows) stays behind the traits exported from
// `core_modules::detection`, `core_modules::recorder` and `pipeline`. The
// `desk_runner` binary supplies OpenCV-backed implementations; the tests supply
// scripted ones.
//
// The only part with real state is `core_modules::state_machine`. It is a pure
// function over an explicit `DetectorState` value, so it can be exercised
// without a video file, a model or a display.

pub mod core_modules;
pub mod pipeline;

pub use core_modules::detection::{BoundingBox, Detection, ObjectDetector, Region};
pub use core_modules::presence::{PresenceClassifier, PresenceSignal};
pub use core_modules::recorder::{Event, EventLog, EventRecorder, FaceLocator};
pub use core_modules::state_machine::{
    DebounceConfig, DetectorState, EventDuration, EventIntent, EventKind,
};
