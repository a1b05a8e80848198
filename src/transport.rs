use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::status::ProcessingStatus;
use crate::validator::SelectedFile;

pub const UPLOAD_FIELD: &str = "file";
const UPLOAD_CHUNK_BYTES: usize = 64 * 1024;

/// Called with `(completed_bytes, total_bytes)` as the body is streamed out.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// What the upload endpoint answered with on success.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UploadReceipt {
    #[serde(default, alias = "taskId")]
    pub task_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[async_trait]
pub trait TaskApi: Send + Sync {
    async fn upload(&self, file: &SelectedFile, progress: ProgressFn) -> AppResult<UploadReceipt>;

    async fn fetch_status(&self, task_id: &str) -> AppResult<ProcessingStatus>;
}

/// Builds the process-wide client, attaching the bearer token to every
/// request when one is stored.
pub fn authorized_client(token: Option<&SecretString>) -> AppResult<Client> {
    let mut headers = HeaderMap::new();
    if let Some(token) = token {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
            .map_err(|err| AppError::Config(format!("invalid auth token: {err}")))?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }
    let client = Client::builder()
        .user_agent(concat!("sheet-relay/", env!("CARGO_PKG_VERSION")))
        .default_headers(headers)
        .build()?;
    Ok(client)
}

pub struct HttpTaskApi {
    http: Client,
    config: AppConfig,
}

impl HttpTaskApi {
    /// `http` is expected to be authorized already.
    pub fn new(http: Client, config: &AppConfig) -> Self {
        Self {
            http,
            config: config.clone(),
        }
    }
}

#[async_trait]
impl TaskApi for HttpTaskApi {
    async fn upload(&self, file: &SelectedFile, progress: ProgressFn) -> AppResult<UploadReceipt> {
        let bytes = tokio::fs::read(&file.path).await?;
        let total = bytes.len() as u64;
        progress(0, total);

        let chunks: Vec<Vec<u8>> = bytes
            .chunks(UPLOAD_CHUNK_BYTES)
            .map(|chunk| chunk.to_vec())
            .collect();
        let mut sent = 0_u64;
        let body = Body::wrap_stream(stream::iter(chunks.into_iter().map(move |chunk| {
            sent += chunk.len() as u64;
            progress(sent, total);
            Ok::<_, std::io::Error>(chunk)
        })));

        let part = Part::stream_with_length(body, total)
            .file_name(file.name.clone())
            .mime_str(file.upload_mime())?;
        let form = Form::new().part(UPLOAD_FIELD, part);

        let url = self.config.upload_url();
        debug!(%url, file = %file.name, bytes = total, "sending upload");
        let response = self
            .http
            .post(&url)
            .timeout(self.config.upload_timeout())
            .multipart(form)
            .send()
            .await?;
        let response = reject_unless_success(response).await?;

        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(UploadReceipt::default());
        }
        let receipt: UploadReceipt = serde_json::from_str(&text)?;
        if let Some(message) = &receipt.message {
            info!(task_id = ?receipt.task_id, %message, "upload accepted");
        }
        Ok(receipt)
    }

    async fn fetch_status(&self, task_id: &str) -> AppResult<ProcessingStatus> {
        let url = self.config.status_url(task_id);
        let response = self
            .http
            .get(&url)
            .timeout(self.config.poll_timeout())
            .send()
            .await
            .map_err(map_poll_error)?;
        let response = reject_unless_success(response).await?;
        let status = response.json().await.map_err(map_poll_error)?;
        Ok(status)
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: Option<serde_json::Value>,
}

async fn reject_unless_success(response: Response) -> AppResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let detail = response
        .json::<ErrorBody>()
        .await
        .ok()
        .and_then(|body| body.detail)
        .and_then(|detail| match detail {
            serde_json::Value::String(text) => Some(text),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        });
    Err(AppError::Rejected {
        status: status.as_u16(),
        detail,
    })
}

fn map_poll_error(err: reqwest::Error) -> AppError {
    if err.is_timeout() {
        AppError::PollTimeout
    } else {
        AppError::Http(err)
    }
}
