use std::path::Path;

use chrono::Local;
use serde::Serialize;
use tracing::{debug, info};

use crate::convert;
use crate::dmo::{DmoClient, find_consent_control, find_export_action, sniff_spreadsheet};
use crate::domain::ReportDate;
use crate::error::GiltError;
use crate::sheet::{TabularSource, WorkbookSource};
use crate::workspace::{Workspace, date_from_filename, write_atomic};

#[derive(Debug, Clone, Serialize)]
pub struct FetchOutcome {
    pub path: String,
    pub source_url: String,
    pub retrieved_at: String,
    pub bytes: u64,
    pub consent_dismissed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConvertOutcome {
    pub input: String,
    pub output: String,
    pub rows_read: usize,
    pub rows_skipped: usize,
    pub rows_written: usize,
    pub columns: Vec<String>,
}

pub struct App<C: DmoClient> {
    client: C,
    workspace: Workspace,
}

impl<C: DmoClient> App<C> {
    pub fn new(client: C, workspace: Workspace) -> Self {
        Self { client, workspace }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Navigate, dismiss the cookie overlay when present, press the export
    /// control, and persist the download under its deterministic name. The
    /// body lands in a temp file first so a failed run leaves nothing behind.
    pub fn fetch(&self, date: ReportDate) -> Result<FetchOutcome, GiltError> {
        self.workspace.ensure_downloads_root()?;
        info!(date = %date, url = self.client.base_url().as_str(), "fetching report page");

        let mut page = self.client.fetch_report_page()?;
        let consent = find_consent_control(&page, self.client.base_url())?;
        let consent_dismissed = consent.is_some();
        if let Some(control) = consent {
            debug!("cookie overlay present; dismissing");
            self.client.dismiss_consent(&control)?;
            page = self.client.fetch_report_page()?;
        } else {
            debug!("no cookie overlay on report page");
        }

        let export = find_export_action(&page, self.client.base_url(), &date)?;
        debug!(url = export.url.as_str(), "export control located");

        let staging = tempfile::Builder::new()
            .prefix(".gilts_in_issue.")
            .suffix(".part")
            .tempfile_in(self.workspace.downloads_root().as_std_path())
            .map_err(|err| GiltError::Filesystem(err.to_string()))?;
        let download = self.client.download_export(&export, staging.path())?;
        let kind = sniff_spreadsheet(staging.path())?;
        if let Some(advertised) = download.kind {
            if advertised != kind {
                debug!(?advertised, ?kind, "content type disagrees with file magic");
            }
        }

        let destination = self.workspace.download_path(&date, kind);
        staging
            .persist(destination.as_std_path())
            .map_err(|err| GiltError::Filesystem(err.to_string()))?;
        info!(path = %destination, bytes = download.bytes, "download complete");

        Ok(FetchOutcome {
            path: destination.into_string(),
            source_url: self.client.base_url().to_string(),
            retrieved_at: Local::now().to_rfc3339(),
            bytes: download.bytes,
            consent_dismissed,
        })
    }

    /// Open a previously downloaded spreadsheet and write the normalised CSV.
    /// The output date comes from the argument, else the input filename, else
    /// today.
    pub fn convert(
        &self,
        input: &Path,
        date: Option<ReportDate>,
    ) -> Result<ConvertOutcome, GiltError> {
        if !input.exists() {
            return Err(GiltError::FileNotFound(input.to_path_buf()));
        }
        let mut source = WorkbookSource::open(input)?;
        self.convert_source(&mut source, input, date)
    }

    /// Conversion against any tabular source; `convert` is the file-backed
    /// entry point.
    pub fn convert_source(
        &self,
        source: &mut dyn TabularSource,
        input: &Path,
        date: Option<ReportDate>,
    ) -> Result<ConvertOutcome, GiltError> {
        let date = date
            .or_else(|| {
                input
                    .file_name()
                    .and_then(|name| name.to_str())
                    .and_then(date_from_filename)
            })
            .unwrap_or_else(ReportDate::today);

        info!(input = %input.display(), date = %date, "converting spreadsheet");
        let rows = source.rows()?;
        let table = convert::normalize_rows(&rows)?;
        let bytes = convert::to_csv(&table)?;

        self.workspace.ensure_exports_root()?;
        let output = self.workspace.export_path(&date);
        write_atomic(&output, &bytes)?;
        info!(
            output = %output,
            rows = table.records.len(),
            skipped = table.rows_skipped,
            "conversion complete"
        );

        Ok(ConvertOutcome {
            input: input.display().to_string(),
            output: output.into_string(),
            rows_read: table.rows_read,
            rows_skipped: table.rows_skipped,
            rows_written: table.records.len(),
            columns: table
                .columns
                .iter()
                .map(|column| column.label().to_string())
                .collect(),
        })
    }
}
