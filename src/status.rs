use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::config::DEFAULT_TARGETS;

/// Server-reported task state. Unknown values are kept verbatim and treated
/// as still running.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TaskState {
    #[default]
    Processing,
    Completed,
    Failed,
    Other(String),
}

impl TaskState {
    pub fn as_str(&self) -> &str {
        match self {
            TaskState::Processing => "processing",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Other(value) => value.as_str(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

impl From<&str> for TaskState {
    fn from(value: &str) -> Self {
        match value.trim() {
            "processing" => TaskState::Processing,
            "completed" => TaskState::Completed,
            "failed" => TaskState::Failed,
            other => TaskState::Other(other.to_string()),
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for TaskState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TaskState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(TaskState::from(raw.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskProgress {
    #[serde(default)]
    pub current: u64,
    #[serde(default)]
    pub total: u64,
    #[serde(
        default,
        alias = "currentTargetName",
        alias = "current_city",
        skip_serializing_if = "Option::is_none"
    )]
    pub current_target: Option<String>,
}

impl TaskProgress {
    pub fn is_saturated(&self) -> bool {
        self.total > 0 && self.current >= self.total
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetError {
    #[serde(rename = "city", alias = "targetName")]
    pub target: String,
    pub message: String,
}

/// One status poll's full view of a task. Lists are cumulative.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProcessingStatus {
    pub status: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<TaskProgress>,
    #[serde(
        rename = "success",
        alias = "successList",
        default,
        deserialize_with = "null_as_empty"
    )]
    pub success_list: Vec<String>,
    #[serde(
        rename = "errors",
        alias = "errorList",
        default,
        deserialize_with = "null_as_empty"
    )]
    pub error_list: Vec<TargetError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
}

impl ProcessingStatus {
    pub fn processing(current: u64, total: u64) -> Self {
        Self {
            status: TaskState::Processing,
            progress: Some(TaskProgress {
                current,
                total,
                current_target: None,
            }),
            ..Self::default()
        }
    }

    pub fn with_state(status: TaskState) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// Either an explicit terminal state or a saturated progress counter.
    /// The second check may be redundant against the backend, which flips
    /// `status` right after the last target.
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
            || self
                .progress
                .as_ref()
                .map(TaskProgress::is_saturated)
                .unwrap_or(false)
    }

    pub fn progress_count(&self) -> u64 {
        self.progress.as_ref().map(|p| p.current).unwrap_or(0)
    }

    /// Message to show as a fatal entry, only for failed tasks.
    pub fn failure_message(&self) -> Option<&str> {
        match self.status {
            TaskState::Failed => self
                .error
                .as_deref()
                .map(str::trim)
                .filter(|m| !m.is_empty()),
            _ => None,
        }
    }

    pub fn progress_label(&self) -> Option<String> {
        let progress = self.progress.as_ref()?;
        let total = if progress.total == 0 {
            DEFAULT_TARGETS.len() as u64
        } else {
            progress.total
        };
        Some(match &progress.current_target {
            Some(target) => format!("{}/{} ({target})", progress.current, total),
            None => format!("{}/{}", progress.current, total),
        })
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
