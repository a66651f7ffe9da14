// THEORY:
// The `log_writer` module persists a run's `EventLog` exactly once, at shutdown, in
// two interchangeable forms: a CSV table and a pretty-printed JSON array.
//
// The CSV header is a fixed constant rather than something inferred from the
// first row, so the table stays well-formed whatever the rows contain. An empty
// log writes nothing at all. When only one of the two files could be written,
// the failure is reported as a partial write, never swallowed.

use crate::core_modules::recorder::{Event, EventLog};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

pub const CSV_FILE_NAME: &str = "events.csv";
pub const JSON_FILE_NAME: &str = "events.json";

/// Column order of the tabular log. Matches the field order of `Event`.
pub const EVENT_FIELDS: [&str; 4] = ["timestamp", "label", "duration", "image_path"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was logged; no files were written.
    Empty,
    Written {
        csv: PathBuf,
        json: PathBuf,
        events: usize,
    },
}

#[derive(Debug, Error)]
pub enum LogWriteError {
    #[error("failed to write {}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("failed to write {}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("partial log write: {} was saved but {} was not", written.display(), failed.display())]
    Partial {
        written: PathBuf,
        failed: PathBuf,
        #[source]
        source: Box<LogWriteError>,
    },
    #[error("neither event log could be written: {csv}; {json}")]
    Both {
        csv: Box<LogWriteError>,
        json: Box<LogWriteError>,
    },
}

/// Writes `events.csv` and `events.json` into `out_dir`.
pub fn flush(log: &EventLog, out_dir: &Path) -> Result<FlushOutcome, LogWriteError> {
    if log.is_empty() {
        info!("no events were logged, nothing to save");
        return Ok(FlushOutcome::Empty);
    }

    let csv_path = out_dir.join(CSV_FILE_NAME);
    let json_path = out_dir.join(JSON_FILE_NAME);

    info!(path = %csv_path.display(), "saving CSV log");
    let csv_result = write_csv(log.as_slice(), &csv_path);
    info!(path = %json_path.display(), "saving JSON log");
    let json_result = write_json(log.as_slice(), &json_path);

    match (csv_result, json_result) {
        (Ok(()), Ok(())) => {
            info!(
                csv = %csv_path.display(),
                json = %json_path.display(),
                events = log.len(),
                "all logs saved"
            );
            Ok(FlushOutcome::Written {
                csv: csv_path,
                json: json_path,
                events: log.len(),
            })
        }
        (Ok(()), Err(err)) => Err(LogWriteError::Partial {
            written: csv_path,
            failed: json_path,
            source: Box::new(err),
        }),
        (Err(err), Ok(())) => Err(LogWriteError::Partial {
            written: json_path,
            failed: csv_path,
            source: Box::new(err),
        }),
        (Err(csv), Err(json)) => Err(LogWriteError::Both {
            csv: Box::new(csv),
            json: Box::new(json),
        }),
    }
}

fn write_csv(events: &[Event], path: &Path) -> Result<(), LogWriteError> {
    let csv_err = |source| LogWriteError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(csv_err)?;
    writer.write_record(EVENT_FIELDS).map_err(csv_err)?;
    for event in events {
        writer.serialize(event).map_err(csv_err)?;
    }
    writer.flush().map_err(|source| LogWriteError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn write_json(events: &[Event], path: &Path) -> Result<(), LogWriteError> {
    let io_err = |source| LogWriteError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = BufWriter::new(File::create(path).map_err(io_err)?);
    serde_json::to_writer_pretty(&mut writer, events).map_err(|source| LogWriteError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    writer.write_all(b"\n").map_err(io_err)?;
    writer.flush().map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::state_machine::{EventDuration, EventKind};

    #[test]
    fn empty_log_writes_no_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let outcome = flush(&EventLog::new(), dir.path()).expect("flush");
        assert_eq!(outcome, FlushOutcome::Empty);
        assert!(!dir.path().join(CSV_FILE_NAME).exists());
        assert!(!dir.path().join(JSON_FILE_NAME).exists());
    }

    fn one_event_log() -> EventLog {
        let mut log = EventLog::new();
        log.append(Event {
            timestamp: "2024-01-15_09-00-31".into(),
            label: EventKind::DeskEmpty,
            duration: EventDuration::Whole(31),
            image_path: None,
        });
        log
    }

    #[test]
    fn missing_directory_reports_both_failures() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("gone");

        match flush(&one_event_log(), &missing) {
            Err(LogWriteError::Both { csv, json }) => {
                assert!(matches!(*csv, LogWriteError::Csv { .. }));
                assert!(matches!(*json, LogWriteError::Io { .. }));
            }
            other => panic!("expected both writes to fail, got {other:?}"),
        }
        assert!(!missing.exists());
    }

    #[test]
    fn both_files_written_for_a_non_empty_log() {
        let dir = tempfile::tempdir().expect("tempdir");
        let outcome = flush(&one_event_log(), dir.path()).expect("flush");
        assert_eq!(
            outcome,
            FlushOutcome::Written {
                csv: dir.path().join(CSV_FILE_NAME),
                json: dir.path().join(JSON_FILE_NAME),
                events: 1,
            }
        );
        let csv = std::fs::read_to_string(dir.path().join(CSV_FILE_NAME)).expect("csv");
        assert_eq!(csv, "timestamp,label,duration,image_path\n2024-01-15_09-00-31,desk_empty,31,\n");
    }
}
