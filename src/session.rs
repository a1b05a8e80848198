use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::persistence::TaskStore;
use crate::poller::{PollPolicy, PollState, SessionGate, SessionToken, StatusPoller};
use crate::reconcile::{LogEntry, TaskLog};
use crate::status::ProcessingStatus;
use crate::transport::{ProgressFn, TaskApi};
use crate::upload::{percent, UploadClient, UploadOutcome};
use crate::validator::{validate, SelectedFile, Validation};

pub const NO_FILE_SELECTED: &str = "select a .xls or .xlsx file first";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStage {
    #[default]
    Idle,
    Uploading,
    Uploaded,
    Failed,
}

/// Everything a front end needs to render the upload screen.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionView {
    pub selected_file: Option<SelectedFile>,
    pub upload_stage: UploadStage,
    pub upload_percent: Option<u8>,
    pub task_id: Option<String>,
    pub status: Option<ProcessingStatus>,
    pub log: Vec<LogEntry>,
    pub poll_state: PollState,
    pub error_message: Option<String>,
}

impl SessionView {
    pub fn upload_percent_label(&self) -> Option<String> {
        self.upload_percent.map(|p| format!("{p}%"))
    }
}

#[derive(Default)]
struct SessionInner {
    view: SessionView,
    log: TaskLog,
}

impl SessionInner {
    fn clear_tracking(&mut self) {
        self.view.upload_stage = UploadStage::Idle;
        self.view.upload_percent = None;
        self.view.status = None;
        self.view.poll_state = PollState::Idle;
        self.view.error_message = None;
        self.log = TaskLog::new();
    }
}

/// Drives select -> validate -> upload -> track for one screen. Clones share
/// the same view.
#[derive(Clone)]
pub struct UploadSession {
    inner: Arc<Mutex<SessionInner>>,
    gate: SessionGate,
    uploader: Arc<UploadClient>,
    poller: Arc<StatusPoller>,
    store: TaskStore,
}

impl UploadSession {
    pub fn new(api: Arc<dyn TaskApi>, store: TaskStore, policy: PollPolicy) -> Self {
        let mut inner = SessionInner::default();
        match store.load() {
            Ok(task_id) => inner.view.task_id = task_id,
            Err(err) => warn!(?err, "could not read persisted task id"),
        }
        Self {
            inner: Arc::new(Mutex::new(inner)),
            gate: SessionGate::new(),
            uploader: Arc::new(UploadClient::new(Arc::clone(&api), store.clone())),
            poller: Arc::new(StatusPoller::new(api, policy)),
            store,
        }
    }

    pub fn from_config(api: Arc<dyn TaskApi>, config: &AppConfig) -> Self {
        Self::new(
            api,
            TaskStore::new(&config.state_dir),
            PollPolicy::from_config(config),
        )
    }

    pub fn view(&self) -> SessionView {
        let inner = self.inner.lock();
        let mut view = inner.view.clone();
        view.log = inner.log.entries().to_vec();
        view
    }

    /// A rejected file only clears the selection; an accepted one also
    /// cancels any running session and wipes its status view. A rejection
    /// notice is dropped by the next snapshot of a session still running.
    pub fn select_file(&self, file: SelectedFile) -> Validation {
        let verdict = validate(&file);
        let mut inner = self.inner.lock();
        match &verdict {
            Validation::Accepted => {
                self.gate.cancel();
                inner.clear_tracking();
                info!(file = %file.name, "file selected");
                inner.view.selected_file = Some(file);
            }
            Validation::Rejected(reason) => {
                inner.view.selected_file = None;
                inner.view.error_message = Some(reason.clone());
            }
        }
        verdict
    }

    pub async fn upload(&self) -> PollState {
        let (file, token) = {
            let mut inner = self.inner.lock();
            let Some(file) = inner.view.selected_file.clone() else {
                inner.view.error_message = Some(NO_FILE_SELECTED.to_string());
                return PollState::Idle;
            };
            let token = self.gate.begin();
            inner.clear_tracking();
            inner.view.upload_stage = UploadStage::Uploading;
            inner.view.upload_percent = Some(0);
            (file, token)
        };

        let progress: ProgressFn = {
            let inner = Arc::clone(&self.inner);
            let token = token.clone();
            Arc::new(move |done: u64, total: u64| {
                let mut inner = inner.lock();
                if token.is_current() {
                    inner.view.upload_percent = Some(percent(done, total));
                }
            })
        };

        let task_id = match self.uploader.upload(&file, progress).await {
            UploadOutcome::Accepted { task_id } => task_id,
            UploadOutcome::Failed { message } => {
                let mut inner = self.inner.lock();
                if !token.is_current() {
                    return PollState::Aborted;
                }
                inner.view.upload_stage = UploadStage::Failed;
                inner.view.error_message = Some(message);
                return PollState::Failed;
            }
        };

        {
            let mut inner = self.inner.lock();
            if !token.is_current() {
                info!(%task_id, "upload finished after being superseded");
                return PollState::Aborted;
            }
            // Saved under the lock so a superseded upload cannot overwrite a newer id.
            if let Err(err) = self.store.save(&task_id) {
                warn!(?err, %task_id, "could not persist task id");
            }
            inner.view.upload_stage = UploadStage::Uploaded;
            inner.view.upload_percent = Some(100);
            inner.view.task_id = Some(task_id.clone());
            inner.view.error_message = None;
        }
        self.track(&task_id, token).await
    }

    /// Resumes observing the task remembered from a previous run.
    pub async fn resume(&self) -> Option<PollState> {
        let (task_id, token) = {
            let mut inner = self.inner.lock();
            let task_id = inner.view.task_id.clone()?;
            let token = self.gate.begin();
            inner.clear_tracking();
            (task_id, token)
        };
        info!(%task_id, "resuming task");
        Some(self.track(&task_id, token).await)
    }

    /// Stops the running session; the last snapshot and log stay visible.
    /// An upload still in flight goes back to `Idle`.
    pub fn cancel(&self) {
        let mut inner = self.inner.lock();
        self.gate.cancel();
        if inner.view.poll_state == PollState::Polling {
            inner.view.poll_state = PollState::Aborted;
        }
        if inner.view.upload_stage == UploadStage::Uploading {
            inner.view.upload_stage = UploadStage::Idle;
            inner.view.upload_percent = None;
        }
    }

    async fn track(&self, task_id: &str, token: SessionToken) -> PollState {
        {
            let mut inner = self.inner.lock();
            if !token.is_current() {
                return PollState::Aborted;
            }
            inner.view.poll_state = PollState::Polling;
        }

        let on_update = {
            let inner = Arc::clone(&self.inner);
            let token = token.clone();
            move |status: &ProcessingStatus| {
                let mut inner = inner.lock();
                if !token.is_current() {
                    return;
                }
                inner.log.apply(status);
                inner.view.status = Some(status.clone());
                inner.view.error_message = None;
            }
        };
        let on_fatal = {
            let inner = Arc::clone(&self.inner);
            let token = token.clone();
            move |message: String| {
                let mut inner = inner.lock();
                if token.is_current() {
                    inner.view.error_message = Some(message);
                }
            }
        };

        let state = self
            .poller
            .track(task_id, &token, on_update, on_fatal)
            .await;

        let mut inner = self.inner.lock();
        if token.is_current() {
            inner.view.poll_state = state;
        }
        state
    }
}
