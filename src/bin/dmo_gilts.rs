use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;
use url::Url;

use dmo_gilts::app::{App, ConvertOutcome, FetchOutcome};
use dmo_gilts::dmo::{
    ConsentControl, DEFAULT_REPORT_URL, DmoClient, DmoHttpClient, DownloadInfo, ExportAction,
};
use dmo_gilts::domain::ReportDate;
use dmo_gilts::error::GiltError;
use dmo_gilts::output::{JsonOutput, OutputMode};
use dmo_gilts::workspace::Workspace;

#[derive(Parser)]
#[command(name = "dmo-gilts")]
#[command(about = "Download and normalise UK DMO Gilts in Issue reference data")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true, help = "Print machine-readable JSON summaries")]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download the Gilts in Issue spreadsheet from the DMO website")]
    Fetch(FetchArgs),
    #[command(about = "Convert a downloaded spreadsheet to a normalised CSV")]
    Convert(ConvertArgs),
}

#[derive(Args)]
struct FetchArgs {
    #[arg(long, value_name = "DD/MM/YYYY", help = "Report date (defaults to yesterday)")]
    date: Option<String>,
}

#[derive(Args)]
struct ConvertArgs {
    #[arg(value_name = "PATH")]
    path: PathBuf,

    #[arg(
        value_name = "DD/MM/YYYY",
        help = "Date used to label the output (defaults to the input filename's date, then today)"
    )]
    date: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(gilt) = report.downcast_ref::<GiltError>() {
            return ExitCode::from(map_exit_code(gilt));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &GiltError) -> u8 {
    match error {
        GiltError::InvalidReportDate(_) | GiltError::FileNotFound(_) => 2,
        GiltError::Navigation { .. }
        | GiltError::PageStatus { .. }
        | GiltError::ConsentControlNotFound
        | GiltError::ExportControlNotFound(_)
        | GiltError::DownloadTimeout(_)
        | GiltError::UnsupportedDownload(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    let workspace = Workspace::from_env().into_diagnostic()?;

    match cli.command {
        Commands::Fetch(args) => {
            let date = match args.date {
                Some(value) => value.parse::<ReportDate>().into_diagnostic()?,
                None => ReportDate::yesterday(),
            };
            let client = DmoHttpClient::from_env().into_diagnostic()?;
            let app = App::new(client, workspace);
            let result = app.fetch(date).into_diagnostic()?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_fetch(&result).into_diagnostic()?,
                OutputMode::Human => print_fetch_summary(&result),
            }
            Ok(())
        }
        Commands::Convert(args) => {
            let date = args
                .date
                .map(|value| value.parse::<ReportDate>())
                .transpose()
                .into_diagnostic()?;
            let app = App::new(OfflineDmo::new().into_diagnostic()?, workspace);
            let result = app.convert(&args.path, date).into_diagnostic()?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_convert(&result).into_diagnostic()?,
                OutputMode::Human => print_convert_summary(&result),
            }
            Ok(())
        }
    }
}

/// `convert` never touches the network; the app still needs a client to be
/// constructed, so this one refuses every call.
struct OfflineDmo {
    base_url: Url,
}

impl OfflineDmo {
    fn new() -> Result<Self, GiltError> {
        let base_url = Url::parse(DEFAULT_REPORT_URL).map_err(|err| GiltError::Navigation {
            url: DEFAULT_REPORT_URL.to_string(),
            reason: err.to_string(),
        })?;
        Ok(Self { base_url })
    }

    fn refused() -> GiltError {
        GiltError::Navigation {
            url: DEFAULT_REPORT_URL.to_string(),
            reason: "DMO client not configured".to_string(),
        }
    }
}

impl DmoClient for OfflineDmo {
    fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn fetch_report_page(&self) -> Result<String, GiltError> {
        Err(Self::refused())
    }

    fn dismiss_consent(&self, _control: &ConsentControl) -> Result<(), GiltError> {
        Err(Self::refused())
    }

    fn download_export(
        &self,
        _action: &ExportAction,
        _destination: &Path,
    ) -> Result<DownloadInfo, GiltError> {
        Err(Self::refused())
    }
}

fn print_fetch_summary(result: &FetchOutcome) {
    let green = "\x1b[32m";
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";

    println!("{cyan}Gilts in Issue download{reset}");
    println!("{green}  saved: {}{reset}", result.path);
    println!("  source: {}", result.source_url);
    println!("  retrieved: {} ({} bytes)", result.retrieved_at, result.bytes);
    if result.consent_dismissed {
        println!("  cookie overlay dismissed");
    }
}

fn print_convert_summary(result: &ConvertOutcome) {
    let green = "\x1b[32m";
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";

    println!("{cyan}Gilts in Issue conversion{reset}");
    println!("  input: {}", result.input);
    println!(
        "  rows read: {}, skipped: {}, written: {}",
        result.rows_read, result.rows_skipped, result.rows_written
    );
    println!(
        "  columns ({}): {}",
        result.columns.len(),
        result.columns.join(", ")
    );
    println!("{green}  output: {}{reset}", result.output);
}
