use camino::Utf8PathBuf;

use dmo_gilts::domain::{ReportDate, SpreadsheetKind};
use dmo_gilts::workspace::{Workspace, date_from_filename, write_atomic};

#[test]
fn artifact_layout() {
    let workspace = Workspace::new_with_roots(
        Utf8PathBuf::from("/data/downloads"),
        Utf8PathBuf::from("/data/csv_exports"),
    );
    let date: ReportDate = "07/09/2022".parse().unwrap();

    assert_eq!(
        workspace.download_path(&date, SpreadsheetKind::Xls).as_str(),
        "/data/downloads/gilts_in_issue_07-09-2022.xls"
    );
    assert_eq!(
        workspace.download_path(&date, SpreadsheetKind::Xlsx).as_str(),
        "/data/downloads/gilts_in_issue_07-09-2022.xlsx"
    );
    assert_eq!(
        workspace.export_path(&date).as_str(),
        "/data/csv_exports/gilts_in_issue_20220907.csv"
    );
}

#[test]
fn filename_date_inference() {
    let date = date_from_filename("gilts_in_issue_19-03-2025.xlsx").unwrap();
    assert_eq!(date.compact(), "20250319");

    assert!(date_from_filename("gilts_in_issue_latest.xls").is_none());
    assert!(date_from_filename("something_else.csv").is_none());
}

#[test]
fn atomic_write_replaces_prior_content() {
    let temp = tempfile::tempdir().unwrap();
    let target = Utf8PathBuf::from_path_buf(temp.path().join("out.csv")).unwrap();

    write_atomic(&target, b"first\n").unwrap();
    write_atomic(&target, b"second\n").unwrap();

    assert_eq!(std::fs::read(&target).unwrap(), b"second\n");
    // no staging residue next to the target
    let entries: Vec<_> = std::fs::read_dir(temp.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(entries, ["out.csv"]);
}
