use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::errors::AppError;
use crate::status::{ProcessingStatus, TaskState};
use crate::transport::TaskApi;

pub const GENERIC_POLL_FAILURE: &str = "failed to fetch processing status";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PollState {
    #[default]
    Idle,
    Polling,
    Completed,
    Failed,
    Aborted,
}

impl PollState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PollState::Completed | PollState::Failed | PollState::Aborted
        )
    }
}

/// What the loop does after one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStep {
    Wait(Duration),
    Stop(PollState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub fast_interval: Duration,
    pub retry_backoff: Duration,
    pub request_timeout: Duration,
}

impl PollPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.poll_interval_ms),
            fast_interval: Duration::from_millis(config.poll_fast_interval_ms),
            retry_backoff: Duration::from_millis(config.poll_retry_ms),
            request_timeout: config.poll_timeout(),
        }
    }

    pub fn after_snapshot(&self, status: &ProcessingStatus) -> PollStep {
        if status.is_finished() {
            let state = match status.status {
                TaskState::Failed => PollState::Failed,
                _ => PollState::Completed,
            };
            return PollStep::Stop(state);
        }
        // Nothing processed yet: poll sooner so the first target shows up fast.
        if status.status == TaskState::Processing && status.progress_count() == 0 {
            PollStep::Wait(self.fast_interval)
        } else {
            PollStep::Wait(self.interval)
        }
    }

    pub fn after_error(&self, err: &AppError) -> PollStep {
        if err.is_timeout() {
            PollStep::Wait(self.retry_backoff)
        } else {
            PollStep::Stop(PollState::Failed)
        }
    }
}

/// Hands out tokens; starting a new session invalidates all older ones.
#[derive(Debug, Clone, Default)]
pub struct SessionGate {
    generation: Arc<AtomicU64>,
}

impl SessionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> SessionToken {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        SessionToken {
            gate: Arc::clone(&self.generation),
            generation,
        }
    }

    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub struct SessionToken {
    gate: Arc<AtomicU64>,
    generation: u64,
}

impl SessionToken {
    pub fn is_current(&self) -> bool {
        self.gate.load(Ordering::SeqCst) == self.generation
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

pub struct StatusPoller {
    api: Arc<dyn TaskApi>,
    policy: PollPolicy,
}

impl StatusPoller {
    pub fn new(api: Arc<dyn TaskApi>, policy: PollPolicy) -> Self {
        Self { api, policy }
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Polls until a terminal state, a fatal error, or until `token` is
    /// superseded. Callbacks are never invoked for a stale token.
    pub async fn track<U, F>(
        &self,
        task_id: &str,
        token: &SessionToken,
        mut on_update: U,
        mut on_fatal: F,
    ) -> PollState
    where
        U: FnMut(&ProcessingStatus) + Send,
        F: FnMut(String) + Send,
    {
        let mut state = PollState::Polling;
        info!(task_id, session = token.generation(), "tracking task");

        while state == PollState::Polling {
            if !token.is_current() {
                state = PollState::Aborted;
                break;
            }

            let result = match timeout(self.policy.request_timeout, self.api.fetch_status(task_id))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(AppError::PollTimeout),
            };

            if !token.is_current() {
                debug!(task_id, "dropping response for superseded session");
                state = PollState::Aborted;
                break;
            }

            let step = match result {
                Ok(status) => {
                    if let Some(details) = &status.error_details {
                        debug!(task_id, %details, "server reported failure details");
                    }
                    on_update(&status);
                    self.policy.after_snapshot(&status)
                }
                Err(err) => {
                    let step = self.policy.after_error(&err);
                    match step {
                        PollStep::Wait(backoff) => {
                            warn!(task_id, ?backoff, "status poll timed out; retrying");
                        }
                        PollStep::Stop(_) => {
                            warn!(task_id, ?err, "status poll failed");
                            on_fatal(poll_failure_message(&err));
                        }
                    }
                    step
                }
            };

            match step {
                PollStep::Wait(delay) => {
                    debug!(task_id, ?delay, "scheduling next poll");
                    sleep(delay).await;
                }
                PollStep::Stop(next) => state = next,
            }
        }

        info!(task_id, ?state, "stopped tracking task");
        state
    }
}

fn poll_failure_message(err: &AppError) -> String {
    match (err, err.detail()) {
        (_, Some(detail)) => detail.to_string(),
        (AppError::Poll(message), None) => message.clone(),
        _ => GENERIC_POLL_FAILURE.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::time::Instant;

    use super::*;
    use crate::errors::AppResult;
    use crate::transport::{ProgressFn, UploadReceipt};
    use crate::validator::SelectedFile;

    struct ScriptedStatusApi {
        responses: Mutex<VecDeque<(Duration, AppResult<ProcessingStatus>)>>,
        calls: AtomicUsize,
    }

    impl ScriptedStatusApi {
        fn new(responses: Vec<(Duration, AppResult<ProcessingStatus>)>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TaskApi for ScriptedStatusApi {
        async fn upload(
            &self,
            _file: &SelectedFile,
            _progress: ProgressFn,
        ) -> AppResult<UploadReceipt> {
            Err(AppError::Upload("not scripted".into()))
        }

        async fn fetch_status(&self, _task_id: &str) -> AppResult<ProcessingStatus> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.responses.lock().pop_front();
            match next {
                Some((delay, result)) => {
                    sleep(delay).await;
                    result
                }
                None => Err(AppError::Poll("script exhausted".into())),
            }
        }
    }

    fn policy() -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(500),
            fast_interval: Duration::from_millis(300),
            retry_backoff: Duration::from_secs(2),
            request_timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn starts_fast_then_settles() {
        let policy = policy();
        assert_eq!(
            policy.after_snapshot(&ProcessingStatus::processing(0, 15)),
            PollStep::Wait(policy.fast_interval)
        );
        assert_eq!(
            policy.after_snapshot(&ProcessingStatus::processing(5, 15)),
            PollStep::Wait(policy.interval)
        );
        assert_eq!(
            policy.after_snapshot(&ProcessingStatus::with_state(TaskState::Other("queued".into()))),
            PollStep::Wait(policy.interval)
        );
        assert_eq!(
            policy.after_snapshot(&ProcessingStatus::with_state(TaskState::Failed)),
            PollStep::Stop(PollState::Failed)
        );
        assert_eq!(
            policy.after_snapshot(&ProcessingStatus::processing(15, 15)),
            PollStep::Stop(PollState::Completed)
        );
    }

    #[test]
    fn newer_session_invalidates_older_tokens() {
        let gate = SessionGate::new();
        let first = gate.begin();
        assert!(first.is_current());
        let second = gate.begin();
        assert!(!first.is_current());
        assert!(second.is_current());
        gate.cancel();
        assert!(!second.is_current());
    }

    #[tokio::test(start_paused = true)]
    async fn stops_after_completed_snapshot() {
        let api = Arc::new(ScriptedStatusApi::new(vec![
            (Duration::ZERO, Ok(ProcessingStatus::processing(0, 15))),
            (Duration::ZERO, Ok(ProcessingStatus::processing(5, 15))),
            (
                Duration::ZERO,
                Ok(ProcessingStatus::with_state(TaskState::Completed)),
            ),
        ]));
        let poller = StatusPoller::new(api.clone(), policy());
        let token = SessionGate::new().begin();
        let mut updates = Vec::new();
        let started = Instant::now();

        let state = poller
            .track(
                "t1",
                &token,
                |status| updates.push(status.status.clone()),
                |_| panic!("no fatal expected"),
            )
            .await;

        assert_eq!(state, PollState::Completed);
        assert_eq!(api.calls(), 3);
        assert_eq!(updates.last(), Some(&TaskState::Completed));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(800) && elapsed < Duration::from_millis(850));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_after_timeout_without_failing() {
        let api = Arc::new(ScriptedStatusApi::new(vec![
            (
                Duration::from_secs(60),
                Ok(ProcessingStatus::processing(1, 15)),
            ),
            (
                Duration::ZERO,
                Ok(ProcessingStatus::with_state(TaskState::Completed)),
            ),
        ]));
        let poller = StatusPoller::new(api.clone(), policy());
        let token = SessionGate::new().begin();
        let mut fatal = Vec::new();
        let mut updates = 0;
        let started = Instant::now();

        let state = poller
            .track("t1", &token, |_| updates += 1, |msg| fatal.push(msg))
            .await;

        assert_eq!(state, PollState::Completed);
        assert!(fatal.is_empty());
        assert_eq!(updates, 1);
        assert_eq!(api.calls(), 2);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(32) && elapsed < Duration::from_secs(33));
    }

    #[tokio::test(start_paused = true)]
    async fn other_errors_are_fatal() {
        let api = Arc::new(ScriptedStatusApi::new(vec![(
            Duration::ZERO,
            Err(AppError::Rejected {
                status: 404,
                detail: Some("task not found".into()),
            }),
        )]));
        let poller = StatusPoller::new(api.clone(), policy());
        let token = SessionGate::new().begin();
        let mut fatal = Vec::new();

        let state = poller
            .track("missing", &token, |_| {}, |msg| fatal.push(msg))
            .await;

        assert_eq!(state, PollState::Failed);
        assert_eq!(fatal, vec!["task not found".to_string()]);
        assert_eq!(api.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_session_drops_late_response() {
        let api = Arc::new(ScriptedStatusApi::new(vec![(
            Duration::from_secs(1),
            Ok(ProcessingStatus::processing(3, 15)),
        )]));
        let poller = Arc::new(StatusPoller::new(api.clone(), policy()));
        let gate = SessionGate::new();
        let stale = gate.begin();
        let updates = Arc::new(AtomicUsize::new(0));

        let handle = {
            let poller = Arc::clone(&poller);
            let updates = Arc::clone(&updates);
            tokio::spawn(async move {
                poller
                    .track(
                        "a",
                        &stale,
                        |_| {
                            updates.fetch_add(1, Ordering::SeqCst);
                        },
                        |_| {},
                    )
                    .await
            })
        };

        sleep(Duration::from_millis(10)).await;
        let _fresh = gate.begin();

        assert_eq!(handle.await.unwrap(), PollState::Aborted);
        assert_eq!(updates.load(Ordering::SeqCst), 0);
        assert_eq!(api.calls(), 1);
    }

    #[test]
    fn fatal_message_prefers_server_detail() {
        let generic = AppError::Rejected {
            status: 500,
            detail: None,
        };
        assert_eq!(poll_failure_message(&generic), GENERIC_POLL_FAILURE);
        assert_eq!(
            poll_failure_message(&AppError::Poll("bad payload".into())),
            "bad payload"
        );
    }
}
