use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{AppError, AppResult};

const TASK_SLOT_FILE: &str = "last-task.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredTask {
    task_id: String,
    saved_at: DateTime<Utc>,
}

/// Single durable slot holding the most recently started task.
#[derive(Debug, Clone)]
pub struct TaskStore {
    path: PathBuf,
}

impl TaskStore {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: task_slot_path(state_dir),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, task_id: &str) -> AppResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let stored = StoredTask {
            task_id: task_id.to_string(),
            saved_at: Utc::now(),
        };
        let serialized = serde_json::to_string_pretty(&stored)?;
        fs::write(&self.path, serialized)?;
        debug!(target: "task_store", task_id, "persisted task id");
        Ok(())
    }

    pub fn load(&self) -> AppResult<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => match serde_json::from_str::<StoredTask>(&contents) {
                Ok(stored) if !stored.task_id.trim().is_empty() => Ok(Some(stored.task_id)),
                Ok(_) => Ok(None),
                Err(err) => {
                    warn!(
                        target: "task_store",
                        error = ?err,
                        "failed to parse task slot; treating as empty"
                    );
                    Ok(None)
                }
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(AppError::Io(err)),
        }
    }
}

pub fn task_slot_path(state_dir: &Path) -> PathBuf {
    state_dir.join(TASK_SLOT_FILE)
}
