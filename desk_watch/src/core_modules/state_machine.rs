// THEORY:
// The `state_machine` module is the heart of the crate. It converts the continuous
// per-frame presence booleans into latched, duration-bearing events.
//
// Key architectural principles:
// 1.  **Explicit State Value**: All temporal memory lives in one small `Copy` value,
//     `DetectorState`. One instance exists per monitored stream; it is created at
//     stream start, replaced once per frame and dropped at stream end.
// 2.  **Pure Transition**: `DetectorState::step` has no I/O and cannot fail. Given
//     the previous state, the frame's `PresenceSignal` and the frame time, it
//     returns the next state and zero, one or two `EventIntent`s.
// 3.  **Two Independent Branches**:
//     - Desk-empty is level-triggered with a latch: it fires once when the absence
//       strictly exceeds the threshold and stays silent until a person reappears.
//     - Phone is edge-triggered: one intent when the phone appears, one when it
//       disappears, carrying the interval length.
//     The desk-empty intent is always emitted before the phone intent.
// 4.  **Monotonic Time**: Frame times are expected to be non-decreasing. A clock
//     regression yields a zero elapsed time rather than a negative one.

use crate::core_modules::presence::PresenceSignal;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Frame time as seen by the state machine.
pub type Timestamp = DateTime<Local>;

/// Second-precision format used for event timestamps and snapshot names.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

pub const DEFAULT_EMPTY_THRESHOLD: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    DeskEmpty,
    MobileInHand,
    MobileNotInHand,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::DeskEmpty => "desk_empty",
            EventKind::MobileInHand => "mobile_in_hand",
            EventKind::MobileNotInHand => "mobile_not_in_hand",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Duration attached to an event, in seconds.
///
/// Desk-empty absences are truncated to whole seconds; phone intervals keep two
/// decimals. Both serialise as plain numbers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventDuration {
    Whole(u64),
    Fractional(f64),
}

impl EventDuration {
    pub fn truncated(elapsed: Duration) -> Self {
        EventDuration::Whole(elapsed.as_secs())
    }

    pub fn centiseconds(elapsed: Duration) -> Self {
        EventDuration::Fractional((elapsed.as_secs_f64() * 100.0).round() / 100.0)
    }

    pub fn as_secs_f64(&self) -> f64 {
        match *self {
            EventDuration::Whole(secs) => secs as f64,
            EventDuration::Fractional(secs) => secs,
        }
    }
}

impl fmt::Display for EventDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventDuration::Whole(secs) => write!(f, "{secs}"),
            EventDuration::Fractional(secs) => write!(f, "{secs:.2}"),
        }
    }
}

/// A candidate event, produced before it gets a snapshot and a place in the log.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventIntent {
    pub kind: EventKind,
    /// Time of the frame that triggered the transition.
    pub at: Timestamp,
    pub duration: EventDuration,
}

impl EventIntent {
    pub fn timestamp(&self) -> String {
        self.at.format(TIMESTAMP_FORMAT).to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceConfig {
    /// Absence must strictly exceed this before a desk-empty event fires.
    pub empty_threshold: Duration,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            empty_threshold: DEFAULT_EMPTY_THRESHOLD,
        }
    }
}

/// The temporal state of one monitored stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorState {
    last_person_seen_at: Timestamp,
    /// Latched once desk-empty fired; released the moment a person is seen again.
    desk_empty_already_logged: bool,
    /// `Some` exactly while a `mobile_in_hand` interval is open.
    phone_active_since: Option<Timestamp>,
}

impl DetectorState {
    pub fn new(stream_start: Timestamp) -> Self {
        Self {
            last_person_seen_at: stream_start,
            desk_empty_already_logged: false,
            phone_active_since: None,
        }
    }

    pub fn last_person_seen_at(&self) -> Timestamp {
        self.last_person_seen_at
    }

    pub fn desk_empty_already_logged(&self) -> bool {
        self.desk_empty_already_logged
    }

    pub fn phone_active(&self) -> bool {
        self.phone_active_since.is_some()
    }

    pub fn phone_active_since(&self) -> Option<Timestamp> {
        self.phone_active_since
    }

    /// Advances the state by one frame.
    #[must_use]
    pub fn step(
        self,
        signal: PresenceSignal,
        now: Timestamp,
        config: &DebounceConfig,
    ) -> (DetectorState, Vec<EventIntent>) {
        let mut next = self;
        let mut emitted = Vec::with_capacity(2);

        // --- 1. Desk-empty branch ---
        if signal.person_present {
            next.last_person_seen_at = now;
            next.desk_empty_already_logged = false;
        } else if !next.desk_empty_already_logged {
            let absence = elapsed(next.last_person_seen_at, now);
            if absence > config.empty_threshold {
                debug!(absence_secs = absence.as_secs(), "desk empty threshold breached");
                emitted.push(EventIntent {
                    kind: EventKind::DeskEmpty,
                    at: now,
                    duration: EventDuration::truncated(absence),
                });
                next.desk_empty_already_logged = true;
            }
        }

        // --- 2. Phone branch ---
        match (signal.phone_present, next.phone_active_since) {
            (true, None) => {
                debug!("mobile phone detected, starting timer");
                next.phone_active_since = Some(now);
                emitted.push(EventIntent {
                    kind: EventKind::MobileInHand,
                    at: now,
                    duration: EventDuration::Whole(0),
                });
            }
            (false, Some(since)) => {
                let held = elapsed(since, now);
                debug!(held_secs = held.as_secs_f64(), "mobile phone no longer detected");
                next.phone_active_since = None;
                emitted.push(EventIntent {
                    kind: EventKind::MobileNotInHand,
                    at: now,
                    duration: EventDuration::centiseconds(held),
                });
            }
            _ => {}
        }

        (next, emitted)
    }
}

/// Elapsed time from `from` to `to`, zero if the clock went backwards.
fn elapsed(from: Timestamp, to: Timestamp) -> Duration {
    (to - from).to_std().unwrap_or(Duration::ZERO)
}
