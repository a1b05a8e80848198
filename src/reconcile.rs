use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::errors::{AppError, AppResult};
use crate::status::ProcessingStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Success,
    Error,
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub kind: LogKind,
    pub target: Option<String>,
    pub message: String,
    pub first_observed_at: DateTime<Utc>,
}

/// Cursors into the cumulative lists of one task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeenCounts {
    pub success: usize,
    pub errors: usize,
    pub fatal_emitted: bool,
}

impl SeenCounts {
    /// Fails when a snapshot is shorter than what was already seen, which
    /// means it belongs to another task.
    pub fn verify(&self, status: &ProcessingStatus) -> AppResult<()> {
        if status.success_list.len() < self.success || status.error_list.len() < self.errors {
            return Err(AppError::ProtocolViolation(format!(
                "seen {}/{} entries, snapshot has {}/{}",
                self.success,
                self.errors,
                status.success_list.len(),
                status.error_list.len()
            )));
        }
        Ok(())
    }
}

pub fn reconcile(seen: SeenCounts, status: &ProcessingStatus) -> (Vec<LogEntry>, SeenCounts) {
    reconcile_at(seen, status, Utc::now())
}

/// Mints entries only for indices past the cursors, all stamped `now`.
pub fn reconcile_at(
    seen: SeenCounts,
    status: &ProcessingStatus,
    now: DateTime<Utc>,
) -> (Vec<LogEntry>, SeenCounts) {
    if let Err(err) = seen.verify(status) {
        warn!(%err, "ignoring shrunken status lists");
    }

    let mut entries = Vec::new();
    let mut next = seen;

    // The backend reports successes as bare lines, so the line doubles as
    // both target and message.
    for line in status.success_list.iter().skip(seen.success) {
        entries.push(LogEntry {
            kind: LogKind::Success,
            target: Some(line.clone()),
            message: line.clone(),
            first_observed_at: now,
        });
    }
    next.success = seen.success.max(status.success_list.len());

    for failure in status.error_list.iter().skip(seen.errors) {
        entries.push(LogEntry {
            kind: LogKind::Error,
            target: Some(failure.target.clone()),
            message: failure.message.clone(),
            first_observed_at: now,
        });
    }
    next.errors = seen.errors.max(status.error_list.len());

    if !seen.fatal_emitted {
        if let Some(message) = status.failure_message() {
            entries.push(LogEntry {
                kind: LogKind::Fatal,
                target: None,
                message: message.to_string(),
                first_observed_at: now,
            });
            next.fatal_emitted = true;
        }
    }

    (entries, next)
}

/// Append-only log for a single task.
#[derive(Debug, Clone, Default)]
pub struct TaskLog {
    seen: SeenCounts,
    entries: Vec<LogEntry>,
}

impl TaskLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen(&self) -> SeenCounts {
        self.seen
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Returns how many entries were appended.
    pub fn apply(&mut self, status: &ProcessingStatus) -> usize {
        self.apply_at(status, Utc::now())
    }

    pub fn apply_at(&mut self, status: &ProcessingStatus, now: DateTime<Utc>) -> usize {
        // Stamps never go backwards even if the wall clock does.
        let now = self
            .entries
            .last()
            .map(|last| last.first_observed_at.max(now))
            .unwrap_or(now);
        let (fresh, seen) = reconcile_at(self.seen, status, now);
        self.seen = seen;
        let added = fresh.len();
        self.entries.extend(fresh);
        added
    }
}
