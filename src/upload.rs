use std::sync::Arc;

use tracing::{info, warn};

use crate::errors::AppError;
use crate::persistence::TaskStore;
use crate::transport::{ProgressFn, TaskApi};
use crate::validator::SelectedFile;

pub const GENERIC_UPLOAD_FAILURE: &str = "file upload failed";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Accepted { task_id: String },
    Failed { message: String },
}

impl UploadOutcome {
    pub fn task_id(&self) -> Option<&str> {
        match self {
            UploadOutcome::Accepted { task_id } => Some(task_id),
            UploadOutcome::Failed { .. } => None,
        }
    }
}

/// Whole-number percentage for a byte count, clamped to 100.
pub fn percent(completed: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    ((completed.min(total) as f64 / total as f64) * 100.0).floor() as u8
}

pub struct UploadClient {
    api: Arc<dyn TaskApi>,
    store: TaskStore,
}

impl UploadClient {
    pub fn new(api: Arc<dyn TaskApi>, store: TaskStore) -> Self {
        Self { api, store }
    }

    /// Never fails past this point: every failure becomes a message.
    pub async fn upload(&self, file: &SelectedFile, progress: ProgressFn) -> UploadOutcome {
        info!(file = %file.name, bytes = file.size, "uploading file");
        let receipt = match self.api.upload(file, progress).await {
            Ok(receipt) => receipt,
            Err(err) => {
                warn!(?err, file = %file.name, "upload failed");
                return UploadOutcome::Failed {
                    message: upload_failure_message(&err),
                };
            }
        };

        if let Some(task_id) = receipt.task_id.filter(|id| !id.trim().is_empty()) {
            return UploadOutcome::Accepted { task_id };
        }

        match self.store.load() {
            Ok(Some(task_id)) => {
                warn!(%task_id, "upload response had no task id; reusing last persisted one");
                UploadOutcome::Accepted { task_id }
            }
            Ok(None) => UploadOutcome::Failed {
                message: AppError::MissingTaskId.to_string(),
            },
            Err(err) => {
                warn!(?err, "could not read persisted task id");
                UploadOutcome::Failed {
                    message: AppError::MissingTaskId.to_string(),
                }
            }
        }
    }
}

fn upload_failure_message(err: &AppError) -> String {
    match err.detail() {
        Some(detail) => detail.to_string(),
        None => GENERIC_UPLOAD_FAILURE.to_string(),
    }
}
