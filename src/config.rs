use std::path::PathBuf;
use std::time::Duration;
use std::{env, io};

use secrecy::SecretString;
use serde::Serialize;
use tracing::debug;

const DEFAULT_API_URL: &str = "http://localhost:8000";
const DEFAULT_UPLOAD_PATH: &str = "/api/upload";
const DEFAULT_STATUS_PATH: &str = "/api/status";
const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 120;
const DEFAULT_POLL_TIMEOUT_SECS: u64 = 30;
const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
const DEFAULT_POLL_FAST_INTERVAL_MS: u64 = 300;
const DEFAULT_POLL_RETRY_MS: u64 = 2_000;
const DEFAULT_STATE_DIR: &str = ".sheet-relay";

/// Cities the backend processes every upload against, in its order.
pub const DEFAULT_TARGETS: &[&str] = &[
    "Балашиха",
    "Железнодорожный",
    "Жуковский",
    "Ивантеевка",
    "Казань",
    "Королев",
    "Люберцы",
    "Мытищи",
    "Ногинск",
    "Пушкино",
    "Раменское",
    "Сергиев Посад",
    "Фрязино",
    "Щелково",
    "Электросталь",
];

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub api_base_url: String,
    pub upload_path: String,
    pub status_path: String,
    pub upload_timeout_secs: u64,
    pub poll_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub poll_fast_interval_ms: u64,
    pub poll_retry_ms: u64,
    pub state_dir: PathBuf,
    pub auth_token: Option<SecretString>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub api_base_url: String,
    pub upload_path: String,
    pub status_path: String,
    pub upload_timeout_secs: u64,
    pub poll_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub poll_fast_interval_ms: u64,
    pub poll_retry_ms: u64,
    pub state_dir: String,
    pub has_auth_token: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        Self {
            api_base_url: env::var("SHEET_RELAY_API_URL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            upload_path: env::var("SHEET_RELAY_UPLOAD_PATH")
                .unwrap_or_else(|_| DEFAULT_UPLOAD_PATH.to_string()),
            status_path: env::var("SHEET_RELAY_STATUS_PATH")
                .unwrap_or_else(|_| DEFAULT_STATUS_PATH.to_string()),
            upload_timeout_secs: parse_u64(
                "SHEET_RELAY_UPLOAD_TIMEOUT_SECS",
                DEFAULT_UPLOAD_TIMEOUT_SECS,
            )
            .max(1),
            poll_timeout_secs: parse_u64("SHEET_RELAY_POLL_TIMEOUT_SECS", DEFAULT_POLL_TIMEOUT_SECS)
                .max(1),
            poll_interval_ms: parse_u64("SHEET_RELAY_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS),
            poll_fast_interval_ms: parse_u64(
                "SHEET_RELAY_POLL_FAST_INTERVAL_MS",
                DEFAULT_POLL_FAST_INTERVAL_MS,
            ),
            poll_retry_ms: parse_u64("SHEET_RELAY_POLL_RETRY_MS", DEFAULT_POLL_RETRY_MS),
            state_dir: env::var("SHEET_RELAY_STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_STATE_DIR)),
            auth_token: env::var("SHEET_RELAY_AUTH_TOKEN")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(SecretString::from),
        }
    }

    /// Defaults pointed at an explicit backend, ignoring the environment.
    pub fn with_api_base(api_base_url: impl Into<String>, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            upload_path: DEFAULT_UPLOAD_PATH.to_string(),
            status_path: DEFAULT_STATUS_PATH.to_string(),
            upload_timeout_secs: DEFAULT_UPLOAD_TIMEOUT_SECS,
            poll_timeout_secs: DEFAULT_POLL_TIMEOUT_SECS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            poll_fast_interval_ms: DEFAULT_POLL_FAST_INTERVAL_MS,
            poll_retry_ms: DEFAULT_POLL_RETRY_MS,
            state_dir: state_dir.into(),
            auth_token: None,
        }
    }

    pub fn upload_url(&self) -> String {
        join_url(&self.api_base_url, &self.upload_path)
    }

    pub fn status_url(&self, task_id: &str) -> String {
        format!(
            "{}/{task_id}",
            join_url(&self.api_base_url, &self.status_path)
        )
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            api_base_url: self.api_base_url.clone(),
            upload_path: self.upload_path.clone(),
            status_path: self.status_path.clone(),
            upload_timeout_secs: self.upload_timeout_secs,
            poll_timeout_secs: self.poll_timeout_secs,
            poll_interval_ms: self.poll_interval_ms,
            poll_fast_interval_ms: self.poll_fast_interval_ms,
            poll_retry_ms: self.poll_retry_ms,
            state_dir: self.state_dir.to_string_lossy().to_string(),
            has_auth_token: self.auth_token.is_some(),
        }
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/').trim_end_matches('/')
    )
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}
