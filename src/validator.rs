use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::errors::{AppError, AppResult};

pub const XLS_MIME: &str = "application/vnd.ms-excel";
pub const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
const GENERIC_MIME: &str = "application/octet-stream";

pub const REJECTED_FILE_MESSAGE: &str = "please select a .xls or .xlsx file";

/// A candidate file as the user picked it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectedFile {
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    pub path: PathBuf,
}

impl SelectedFile {
    pub fn new(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        size: u64,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            size,
            path: path.into(),
        }
    }

    /// Builds a selection from disk. The declared type is derived from the
    /// extension, falling back to a generic binary type.
    pub fn from_path(path: &Path) -> AppResult<Self> {
        let metadata = std::fs::metadata(path)?;
        if !metadata.is_file() {
            return Err(AppError::Validation(format!(
                "{} is not a file",
                path.display()
            )));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| AppError::Validation(format!("{} has no file name", path.display())))?;
        let mime_type = declared_mime(&name);
        Ok(Self::new(name, mime_type, metadata.len(), path))
    }

    /// Content type sent with the upload. Pickers report a blank type for
    /// files they do not recognise, so anything that is not `type/subtype`
    /// is replaced by the type implied by the extension.
    pub fn upload_mime(&self) -> &str {
        let declared = self.mime_type.trim();
        let well_formed = declared
            .split_once('/')
            .is_some_and(|(kind, sub)| !kind.is_empty() && !sub.is_empty())
            && !declared.contains(char::is_whitespace);
        if well_formed {
            declared
        } else {
            declared_mime(&self.name)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Accepted,
    Rejected(String),
}

impl Validation {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Validation::Accepted)
    }
}

pub fn validate(file: &SelectedFile) -> Validation {
    let mime_ok = file.mime_type == XLS_MIME || file.mime_type == XLSX_MIME;
    // Some pickers report a generic type, so the suffix is a fallback.
    let suffix_ok = file.name.ends_with(".xls") || file.name.ends_with(".xlsx");
    if mime_ok || suffix_ok {
        Validation::Accepted
    } else {
        Validation::Rejected(REJECTED_FILE_MESSAGE.to_string())
    }
}

fn declared_mime(name: &str) -> &'static str {
    if name.ends_with(".xlsx") {
        XLSX_MIME
    } else if name.ends_with(".xls") {
        XLS_MIME
    } else if name.ends_with(".pdf") {
        "application/pdf"
    } else {
        GENERIC_MIME
    }
}
