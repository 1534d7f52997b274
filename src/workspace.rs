use std::fs;
use std::io::Write;
use std::sync::OnceLock;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;

use crate::domain::{ReportDate, SpreadsheetKind};
use crate::error::GiltError;

pub const DOWNLOAD_DIR_ENV: &str = "DMO_GILTS_DOWNLOAD_DIR";
pub const EXPORT_DIR_ENV: &str = "DMO_GILTS_EXPORT_DIR";

const DEFAULT_DOWNLOAD_DIR: &str = "downloads";
const DEFAULT_EXPORT_DIR: &str = "csv_exports";

/// Where downloaded spreadsheets and exported CSV files live, and how their
/// names are derived from the report date.
#[derive(Debug, Clone)]
pub struct Workspace {
    downloads_root: Utf8PathBuf,
    exports_root: Utf8PathBuf,
}

impl Workspace {
    pub fn from_env() -> Result<Self, GiltError> {
        let cwd = std::env::current_dir().map_err(|err| GiltError::Filesystem(err.to_string()))?;
        let cwd = Utf8PathBuf::from_path_buf(cwd)
            .map_err(|_| GiltError::Filesystem("working directory is not valid UTF-8".to_string()))?;

        let downloads_root = match std::env::var(DOWNLOAD_DIR_ENV) {
            Ok(value) if !value.trim().is_empty() => Utf8PathBuf::from(value),
            _ => cwd.join(DEFAULT_DOWNLOAD_DIR),
        };
        let exports_root = match std::env::var(EXPORT_DIR_ENV) {
            Ok(value) if !value.trim().is_empty() => Utf8PathBuf::from(value),
            _ => cwd.join(DEFAULT_EXPORT_DIR),
        };

        Ok(Self {
            downloads_root,
            exports_root,
        })
    }

    pub fn new_with_roots(downloads_root: Utf8PathBuf, exports_root: Utf8PathBuf) -> Self {
        Self {
            downloads_root,
            exports_root,
        }
    }

    pub fn downloads_root(&self) -> &Utf8Path {
        &self.downloads_root
    }

    pub fn exports_root(&self) -> &Utf8Path {
        &self.exports_root
    }

    pub fn ensure_downloads_root(&self) -> Result<(), GiltError> {
        fs::create_dir_all(self.downloads_root.as_std_path())
            .map_err(|err| GiltError::Filesystem(err.to_string()))
    }

    pub fn ensure_exports_root(&self) -> Result<(), GiltError> {
        fs::create_dir_all(self.exports_root.as_std_path())
            .map_err(|err| GiltError::Filesystem(err.to_string()))
    }

    pub fn download_path(&self, date: &ReportDate, kind: SpreadsheetKind) -> Utf8PathBuf {
        self.downloads_root.join(format!(
            "gilts_in_issue_{}.{}",
            date.file_stamp(),
            kind.extension()
        ))
    }

    pub fn export_path(&self, date: &ReportDate) -> Utf8PathBuf {
        self.exports_root
            .join(format!("gilts_in_issue_{}.csv", date.compact()))
    }
}

/// Write through a sibling temp file and rename over the destination, so an
/// aborted run never leaves a partial file under the final name.
pub fn write_atomic(path: &Utf8Path, bytes: &[u8]) -> Result<(), GiltError> {
    let dir = path
        .parent()
        .ok_or_else(|| GiltError::Filesystem(format!("{path} has no parent directory")))?;
    let mut staging = tempfile::Builder::new()
        .prefix(".tmp.")
        .tempfile_in(dir.as_std_path())
        .map_err(|err| GiltError::Filesystem(err.to_string()))?;
    staging
        .write_all(bytes)
        .map_err(|err| GiltError::Filesystem(err.to_string()))?;
    staging
        .persist(path.as_std_path())
        .map_err(|err| GiltError::Filesystem(err.to_string()))?;
    Ok(())
}

/// Recover the report date from a download named by `Workspace::download_path`,
/// so `convert` without a date argument labels its output consistently.
pub fn date_from_filename(file_name: &str) -> Option<ReportDate> {
    static STAMP: OnceLock<Regex> = OnceLock::new();
    let stamp = STAMP.get_or_init(|| {
        Regex::new(r"gilts_in_issue_(\d{2}-\d{2}-\d{4})").expect("valid date stamp pattern")
    });
    let captured = stamp.captures(file_name)?;
    captured.get(1)?.as_str().parse::<ReportDate>().ok()
}
