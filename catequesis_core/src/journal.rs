//! Domain event journal.
//!
//! Events are appended to a JSONL (JSON Lines) file with file locking so an
//! external notifier can tail it. Publication is fire-and-forget from the
//! engine's point of view: a failed append is logged, never propagated.

use crate::{Grade, PeriodId, Result, Sacrament};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Something that happened in the engine, for external notification
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    EnrollmentCreated {
        enrollment_id: Uuid,
        catechumen_id: Uuid,
        group_id: Uuid,
        at: DateTime<Utc>,
    },
    EnrollmentWithdrawn {
        enrollment_id: Uuid,
        catechumen_id: Uuid,
        at: DateTime<Utc>,
    },
    EnrollmentTransferred {
        enrollment_id: Uuid,
        from_group: Uuid,
        to_group: Uuid,
        at: DateTime<Utc>,
    },
    OutcomeRecorded {
        enrollment_id: Uuid,
        grade: Grade,
        at: DateTime<Utc>,
    },
    PeriodClosed {
        period_id: PeriodId,
        records: usize,
        at: DateTime<Utc>,
    },
    CatechumenSuspended {
        catechumen_id: Uuid,
        at: DateTime<Utc>,
    },
    CatechumenReactivated {
        catechumen_id: Uuid,
        at: DateTime<Utc>,
    },
    CertificateIssued {
        number: String,
        catechumen_id: Uuid,
        sacrament: Sacrament,
        at: DateTime<Utc>,
    },
}

/// Event sink trait for publishing domain events
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &DomainEvent) -> Result<()>;
}

/// Discards every event
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: &DomainEvent) -> Result<()> {
        Ok(())
    }
}

/// JSONL-based event sink with file locking
pub struct JsonlEventSink {
    path: PathBuf,
}

impl JsonlEventSink {
    /// Create a new JSONL sink for the given path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl EventSink for JsonlEventSink {
    fn publish(&self, event: &DomainEvent) -> Result<()> {
        self.ensure_parent_dir()?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        file.lock_exclusive()?;

        let mut writer = std::io::BufWriter::new(&file);
        let line = serde_json::to_string(event)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        drop(writer);

        file.unlock()?;
        Ok(())
    }
}

/// Read all events from a journal file
pub fn read_events(path: &Path) -> Result<Vec<DomainEvent>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    file.lock_shared()?;

    let reader = BufReader::new(&file);
    let mut events = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<DomainEvent>(&line) {
            Ok(event) => events.push(event),
            Err(e) => {
                tracing::warn!("Failed to parse event at line {}: {}", line_num + 1, e);
            }
        }
    }

    file.unlock()?;
    tracing::debug!("Read {} events from journal", events.len());
    Ok(events)
}
