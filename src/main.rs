use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sheet_relay::{
    authorized_client, init_tracing, AppConfig, HttpTaskApi, LogKind, PollState, SecretVault,
    SelectedFile, SessionView, UploadSession, Validation, VAULT_SERVICE_NAME,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding the last task id (overrides SHEET_RELAY_STATE_DIR)
    #[arg(long)]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a .xls/.xlsx file and follow its processing
    Upload { file: PathBuf },
    /// Follow the task started by the previous upload
    Resume,
}

#[derive(Default)]
struct Renderer {
    printed: usize,
    percent: Option<u8>,
    progress: Option<String>,
}

impl Renderer {
    fn render(&mut self, view: &SessionView) {
        if view.upload_percent != self.percent {
            if let Some(label) = view.upload_percent_label() {
                println!("upload: {label}");
            }
            self.percent = view.upload_percent;
        }

        let progress = view.status.as_ref().and_then(|s| s.progress_label());
        if progress.is_some() && progress != self.progress {
            println!("progress: {}", progress.as_deref().unwrap_or_default());
            self.progress = progress;
        }

        for entry in view.log.iter().skip(self.printed) {
            let stamp = entry.first_observed_at.format("%H:%M:%S");
            match entry.kind {
                LogKind::Success => println!("[{stamp}] ok    {}", entry.message),
                LogKind::Error => println!(
                    "[{stamp}] error {}: {}",
                    entry.target.as_deref().unwrap_or("-"),
                    entry.message
                ),
                LogKind::Fatal => println!("[{stamp}] FAILED {}", entry.message),
            }
        }
        self.printed = view.log.len();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut config = AppConfig::from_env();
    if let Some(dir) = args.state_dir {
        config.state_dir = dir;
    }

    let vault = SecretVault::new(VAULT_SERVICE_NAME);
    let token = vault
        .auth_token(&config)
        .context("failed to read stored auth token")?;
    let http = authorized_client(token.as_ref())?;
    let api = Arc::new(HttpTaskApi::new(http, &config));
    let session = UploadSession::from_config(api, &config);

    let run = match args.command {
        Command::Upload { file } => {
            let selected = SelectedFile::from_path(&file)
                .with_context(|| format!("cannot open {}", file.display()))?;
            if let Validation::Rejected(reason) = session.select_file(selected) {
                bail!(reason);
            }
            let session = session.clone();
            tokio::spawn(async move { Some(session.upload().await) })
        }
        Command::Resume => {
            let session = session.clone();
            tokio::spawn(async move { session.resume().await })
        }
    };

    let mut renderer = Renderer::default();
    let mut ticker = tokio::time::interval(Duration::from_millis(200));
    while !run.is_finished() {
        ticker.tick().await;
        renderer.render(&session.view());
    }
    let outcome = run.await.context("tracking task panicked")?;
    let view = session.view();
    renderer.render(&view);

    let Some(state) = outcome else {
        bail!("no previous task to resume");
    };
    if state != PollState::Completed {
        bail!(view
            .error_message
            .unwrap_or_else(|| format!("tracking ended: {state:?}").to_lowercase()));
    }
    println!(
        "task {}: {}",
        view.task_id.as_deref().unwrap_or("-"),
        view.status
            .map(|s| s.status.to_string())
            .unwrap_or_else(|| format!("{state:?}").to_lowercase())
    );
    Ok(())
}
