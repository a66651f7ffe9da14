// THEORY:
// The `presence` module reduces a frame's detections to the two booleans the state
// machine cares about. It is a pure membership test against fixed label sets:
// exact string comparison, no fuzzy matching. Pointing the system at a detector
// with a different vocabulary means changing the sets, not the algorithm.

use crate::core_modules::detection::Detection;

pub const PERSON_LABELS: &[&str] = &["person"];
pub const PHONE_LABELS: &[&str] = &["cell phone", "phone", "mobile"];

/// The two derived per-frame booleans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PresenceSignal {
    pub person_present: bool,
    pub phone_present: bool,
}

impl PresenceSignal {
    pub fn new(person_present: bool, phone_present: bool) -> Self {
        Self {
            person_present,
            phone_present,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PresenceClassifier {
    person_labels: Vec<String>,
    phone_labels: Vec<String>,
}

impl Default for PresenceClassifier {
    fn default() -> Self {
        Self::new(PERSON_LABELS, PHONE_LABELS)
    }
}

impl PresenceClassifier {
    pub fn new(person_labels: &[&str], phone_labels: &[&str]) -> Self {
        Self {
            person_labels: person_labels.iter().map(|s| s.to_string()).collect(),
            phone_labels: phone_labels.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn classify(&self, detections: &[Detection]) -> PresenceSignal {
        let matches = |set: &[String], label: &str| set.iter().any(|l| l == label);
        PresenceSignal {
            person_present: detections
                .iter()
                .any(|d| matches(&self.person_labels, &d.label)),
            phone_present: detections
                .iter()
                .any(|d| matches(&self.phone_labels, &d.label)),
        }
    }
}
