mod config;
mod errors;
mod persistence;
mod poller;
mod reconcile;
mod secrets;
mod session;
mod status;
mod transport;
mod upload;
mod validator;

use once_cell::sync::OnceCell;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const VAULT_SERVICE_NAME: &str = "SheetRelay";

pub use config::{AppConfig, PublicAppConfig, DEFAULT_TARGETS};
pub use errors::{AppError, AppResult};
pub use persistence::{task_slot_path, TaskStore};
pub use poller::{
    PollPolicy, PollState, PollStep, SessionGate, SessionToken, StatusPoller, GENERIC_POLL_FAILURE,
};
pub use reconcile::{reconcile, reconcile_at, LogEntry, LogKind, SeenCounts, TaskLog};
pub use secrets::{SecretVault, AUTH_TOKEN_ACCOUNT};
pub use session::{SessionView, UploadSession, UploadStage, NO_FILE_SELECTED};
pub use status::{ProcessingStatus, TargetError, TaskProgress, TaskState};
pub use transport::{
    authorized_client, HttpTaskApi, ProgressFn, TaskApi, UploadReceipt, UPLOAD_FIELD,
};
pub use upload::{percent, UploadClient, UploadOutcome, GENERIC_UPLOAD_FAILURE};
pub use validator::{
    validate, SelectedFile, Validation, REJECTED_FILE_MESSAGE, XLSX_MIME, XLS_MIME,
};

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,sheet_relay=debug"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    });
}
