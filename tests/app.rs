use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use calamine::Data;
use camino::Utf8PathBuf;
use url::Url;

use dmo_gilts::app::App;
use dmo_gilts::dmo::{ConsentControl, DmoClient, DownloadInfo, ExportAction};
use dmo_gilts::domain::ReportDate;
use dmo_gilts::error::GiltError;
use dmo_gilts::sheet::TabularSource;
use dmo_gilts::workspace::Workspace;

const REPORT_PAGE: &str = r#"
<html><body>
  <div id="cookie-banner">
    <a class="accept-cookies" href="/cookie-policy/accept">Accept Cookies</a>
  </div>
  <form action="/data/ExcelDataReport" method="post">
    <input type="hidden" name="reportCode" value="D1A"/>
    <input type="text" name="reportDate" value=""/>
    <input type="submit" name="format" value="Excel"/>
  </form>
</body></html>
"#;

const BARE_PAGE: &str = r#"
<html><body>
  <form action="/data/ExcelDataReport" method="post">
    <input type="hidden" name="reportCode" value="D1A"/>
    <input type="submit" name="format" value="Excel"/>
  </form>
</body></html>
"#;

const OLE2_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

struct MockDmo {
    base_url: Url,
    page: &'static str,
    body: Vec<u8>,
    consent_calls: Arc<Mutex<usize>>,
}

impl MockDmo {
    fn new(page: &'static str, body: Vec<u8>) -> Self {
        Self {
            base_url: Url::parse("https://www.dmo.gov.uk/data/pdfdatareport?reportCode=D1A")
                .unwrap(),
            page,
            body,
            consent_calls: Arc::new(Mutex::new(0)),
        }
    }

    fn consent_counter(&self) -> Arc<Mutex<usize>> {
        Arc::clone(&self.consent_calls)
    }
}

impl DmoClient for MockDmo {
    fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn fetch_report_page(&self) -> Result<String, GiltError> {
        Ok(self.page.to_string())
    }

    fn dismiss_consent(&self, _control: &ConsentControl) -> Result<(), GiltError> {
        *self.consent_calls.lock().unwrap() += 1;
        Ok(())
    }

    fn download_export(
        &self,
        _action: &ExportAction,
        destination: &Path,
    ) -> Result<DownloadInfo, GiltError> {
        fs::write(destination, &self.body)
            .map_err(|err| GiltError::Filesystem(err.to_string()))?;
        Ok(DownloadInfo {
            kind: None,
            suggested_name: Some("D1A.xls".to_string()),
            bytes: self.body.len() as u64,
        })
    }
}

fn workspace_in(temp: &tempfile::TempDir) -> Workspace {
    Workspace::new_with_roots(
        Utf8PathBuf::from_path_buf(temp.path().join("downloads")).unwrap(),
        Utf8PathBuf::from_path_buf(temp.path().join("csv_exports")).unwrap(),
    )
}

fn spreadsheet_body() -> Vec<u8> {
    let mut body = OLE2_MAGIC.to_vec();
    body.extend_from_slice(&[0u8; 64]);
    body
}

#[test]
fn fetch_persists_one_deterministic_file() {
    let temp = tempfile::tempdir().unwrap();
    let workspace = workspace_in(&temp);
    let app = App::new(MockDmo::new(REPORT_PAGE, spreadsheet_body()), workspace);

    let date: ReportDate = "07/09/2022".parse().unwrap();
    let outcome = app.fetch(date).unwrap();

    assert!(outcome.path.ends_with("gilts_in_issue_07-09-2022.xls"));
    assert!(outcome.consent_dismissed);
    assert_eq!(outcome.bytes, 72);

    let entries: Vec<_> = fs::read_dir(temp.path().join("downloads"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(entries, ["gilts_in_issue_07-09-2022.xls"]);
}

#[test]
fn fetch_dismisses_consent_only_when_overlay_present() {
    let temp = tempfile::tempdir().unwrap();
    let client = MockDmo::new(BARE_PAGE, spreadsheet_body());
    let app = App::new(client, workspace_in(&temp));

    let date: ReportDate = "07/09/2022".parse().unwrap();
    let outcome = app.fetch(date).unwrap();
    assert!(!outcome.consent_dismissed);
}

#[test]
fn fetch_consent_flow_invokes_dismissal() {
    let temp = tempfile::tempdir().unwrap();
    let workspace = workspace_in(&temp);
    let client = MockDmo::new(REPORT_PAGE, spreadsheet_body());
    let calls = client.consent_counter();
    let app = App::new(client, workspace);

    let date: ReportDate = "07/09/2022".parse().unwrap();
    app.fetch(date).unwrap();

    assert_eq!(*calls.lock().unwrap(), 1);
}

#[test]
fn fetch_rejects_html_body_and_leaves_nothing_behind() {
    let temp = tempfile::tempdir().unwrap();
    let body = b"<html><body>checking your browser</body></html>".to_vec();
    let app = App::new(MockDmo::new(REPORT_PAGE, body), workspace_in(&temp));

    let date: ReportDate = "07/09/2022".parse().unwrap();
    let err = app.fetch(date).unwrap_err();
    assert_matches!(err, GiltError::UnsupportedDownload(_));

    let entries: Vec<_> = fs::read_dir(temp.path().join("downloads"))
        .unwrap()
        .map(|entry| entry.unwrap())
        .collect();
    assert!(entries.is_empty());
}

struct StubSource {
    rows: Vec<Vec<Data>>,
}

impl TabularSource for StubSource {
    fn rows(&mut self) -> Result<Vec<Vec<Data>>, GiltError> {
        Ok(self.rows.clone())
    }
}

fn s(value: &str) -> Data {
    Data::String(value.to_string())
}

fn sample_rows() -> Vec<Vec<Data>> {
    vec![
        vec![s("Gilts in Issue as at 7 September 2022")],
        vec![
            s("ISIN Code"),
            s("Gilt Name"),
            s("Coupon"),
            s("Redemption Date"),
            s("Amount in Issue"),
        ],
        vec![
            s("GB00B24FF097"),
            s("Treasury Gilt 4% 2022"),
            s("4%"),
            s("07/09/2022"),
            s("20,000,000,000"),
        ],
    ]
}

#[test]
fn convert_writes_normalised_csv_under_dated_name() {
    let temp = tempfile::tempdir().unwrap();
    let app = App::new(
        MockDmo::new(BARE_PAGE, Vec::new()),
        workspace_in(&temp),
    );

    let mut source = StubSource { rows: sample_rows() };
    let date: ReportDate = "07/09/2022".parse().unwrap();
    let outcome = app
        .convert_source(&mut source, Path::new("input.xls"), Some(date))
        .unwrap();

    assert!(outcome.output.ends_with("gilts_in_issue_20220907.csv"));
    assert_eq!(outcome.rows_read, 1);
    assert_eq!(outcome.rows_skipped, 0);
    assert_eq!(outcome.rows_written, 1);
    assert_eq!(
        outcome.columns,
        ["isin", "name", "coupon", "maturity", "amount_outstanding"]
    );

    let written = fs::read_to_string(&outcome.output).unwrap();
    assert_eq!(
        written,
        "isin,name,coupon,maturity,amount_outstanding\n\
         GB00B24FF097,Treasury Gilt 4% 2022,4.0,2022-09-07,20000000000\n"
    );
}

#[test]
fn convert_is_idempotent() {
    let temp = tempfile::tempdir().unwrap();
    let app = App::new(
        MockDmo::new(BARE_PAGE, Vec::new()),
        workspace_in(&temp),
    );
    let date: ReportDate = "07/09/2022".parse().unwrap();

    let mut source = StubSource { rows: sample_rows() };
    let first = app
        .convert_source(&mut source, Path::new("input.xls"), Some(date))
        .unwrap();
    let first_bytes = fs::read(&first.output).unwrap();

    let mut source = StubSource { rows: sample_rows() };
    let second = app
        .convert_source(&mut source, Path::new("input.xls"), Some(date))
        .unwrap();
    let second_bytes = fs::read(&second.output).unwrap();

    assert_eq!(first.output, second.output);
    assert_eq!(first_bytes, second_bytes);
}

#[test]
fn convert_takes_date_from_input_filename() {
    let temp = tempfile::tempdir().unwrap();
    let app = App::new(
        MockDmo::new(BARE_PAGE, Vec::new()),
        workspace_in(&temp),
    );

    let mut source = StubSource { rows: sample_rows() };
    let outcome = app
        .convert_source(
            &mut source,
            Path::new("downloads/gilts_in_issue_19-03-2025.xls"),
            None,
        )
        .unwrap();
    assert!(outcome.output.ends_with("gilts_in_issue_20250319.csv"));
}

#[test]
fn convert_missing_input_is_file_not_found() {
    let temp = tempfile::tempdir().unwrap();
    let app = App::new(
        MockDmo::new(BARE_PAGE, Vec::new()),
        workspace_in(&temp),
    );
    let err = app
        .convert(Path::new("/nonexistent/gilts.xls"), None)
        .unwrap_err();
    assert_matches!(err, GiltError::FileNotFound(_));
}

#[test]
fn convert_header_only_reports_zero_rows() {
    let temp = tempfile::tempdir().unwrap();
    let app = App::new(
        MockDmo::new(BARE_PAGE, Vec::new()),
        workspace_in(&temp),
    );

    let mut source = StubSource {
        rows: vec![vec![
            s("ISIN Code"),
            s("Gilt Name"),
            s("Coupon"),
            s("Redemption Date"),
            s("Amount in Issue"),
        ]],
    };
    let date: ReportDate = "07/09/2022".parse().unwrap();
    let outcome = app
        .convert_source(&mut source, Path::new("input.xls"), Some(date))
        .unwrap();

    assert_eq!(outcome.rows_written, 0);
    assert_eq!(outcome.rows_read, 0);
    let written = fs::read_to_string(&outcome.output).unwrap();
    assert_eq!(written, "isin,name,coupon,maturity,amount_outstanding\n");
}
