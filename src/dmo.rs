use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT_LANGUAGE, CONTENT_DISPOSITION, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use crate::domain::{ReportDate, SpreadsheetKind};
use crate::error::GiltError;

pub const REPORT_URL_ENV: &str = "DMO_GILTS_URL";
pub const DEFAULT_REPORT_URL: &str = "https://www.dmo.gov.uk/data/pdfdatareport?reportCode=D1A";

/// Visible label of the control that starts the spreadsheet export.
pub const EXPORT_LABEL: &str = "Excel";

const DOWNLOAD_TIMEOUT_SECS: u64 = 60;

/// Accept control of the cookie overlay. `target` is absent when the control
/// is script-bound and carries no submit URL; dismissal is then a no-op for
/// an HTTP session.
#[derive(Debug, Clone)]
pub struct ConsentControl {
    pub target: Option<Url>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportMethod {
    Get,
    Post,
}

/// Resolved export control: the request that re-creates pressing it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportAction {
    pub url: Url,
    pub method: ExportMethod,
    pub form: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct DownloadInfo {
    pub kind: Option<SpreadsheetKind>,
    pub suggested_name: Option<String>,
    pub bytes: u64,
}

/// Page-interaction adapter for the DMO report page. The HTTP implementation
/// below is the production one; tests substitute mocks.
pub trait DmoClient: Send + Sync {
    fn base_url(&self) -> &Url;
    fn fetch_report_page(&self) -> Result<String, GiltError>;
    fn dismiss_consent(&self, control: &ConsentControl) -> Result<(), GiltError>;
    fn download_export(
        &self,
        action: &ExportAction,
        destination: &Path,
    ) -> Result<DownloadInfo, GiltError>;
}

#[derive(Clone)]
pub struct DmoHttpClient {
    client: Client,
    base_url: Url,
}

impl DmoHttpClient {
    pub fn new(report_url: &str) -> Result<Self, GiltError> {
        let base_url = Url::parse(report_url).map_err(|err| GiltError::Navigation {
            url: report_url.to_string(),
            reason: err.to_string(),
        })?;

        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("dmo-gilts/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| GiltError::Filesystem(err.to_string()))?,
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-GB,en;q=0.8"));

        let client = Client::builder()
            .default_headers(headers)
            .cookie_store(true)
            .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
            .build()
            .map_err(|err| GiltError::Navigation {
                url: report_url.to_string(),
                reason: err.to_string(),
            })?;

        Ok(Self { client, base_url })
    }

    pub fn from_env() -> Result<Self, GiltError> {
        match std::env::var(REPORT_URL_ENV) {
            Ok(value) if !value.trim().is_empty() => Self::new(value.trim()),
            _ => Self::new(DEFAULT_REPORT_URL),
        }
    }

    fn request_error(url: &Url, err: reqwest::Error) -> GiltError {
        if err.is_timeout() {
            GiltError::DownloadTimeout(DOWNLOAD_TIMEOUT_SECS)
        } else {
            GiltError::Navigation {
                url: url.to_string(),
                reason: err.to_string(),
            }
        }
    }

    fn body_error(url: &Url, err: io::Error) -> GiltError {
        if err.kind() == io::ErrorKind::TimedOut {
            GiltError::DownloadTimeout(DOWNLOAD_TIMEOUT_SECS)
        } else {
            GiltError::Navigation {
                url: url.to_string(),
                reason: err.to_string(),
            }
        }
    }
}

impl DmoClient for DmoHttpClient {
    fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn fetch_report_page(&self) -> Result<String, GiltError> {
        let response = self
            .client
            .get(self.base_url.clone())
            .send()
            .map_err(|err| Self::request_error(&self.base_url, err))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "report page request failed".to_string());
            return Err(GiltError::PageStatus { status, message });
        }
        response
            .text()
            .map_err(|err| Self::request_error(&self.base_url, err))
    }

    fn dismiss_consent(&self, control: &ConsentControl) -> Result<(), GiltError> {
        let Some(target) = &control.target else {
            debug!("consent control is script-bound; relying on session cookies");
            return Ok(());
        };
        let response = self
            .client
            .get(target.clone())
            .send()
            .map_err(|err| Self::request_error(target, err))?;
        if !response.status().is_success() {
            return Err(GiltError::PageStatus {
                status: response.status().as_u16(),
                message: "consent acceptance rejected".to_string(),
            });
        }
        Ok(())
    }

    fn download_export(
        &self,
        action: &ExportAction,
        destination: &Path,
    ) -> Result<DownloadInfo, GiltError> {
        let request = match action.method {
            ExportMethod::Get => {
                let mut url = action.url.clone();
                if !action.form.is_empty() {
                    url.query_pairs_mut().extend_pairs(action.form.iter().map(
                        |(name, value)| (name.as_str(), value.as_str()),
                    ));
                }
                self.client.get(url)
            }
            ExportMethod::Post => self.client.post(action.url.clone()).form(&action.form),
        };

        let mut response = request
            .send()
            .map_err(|err| Self::request_error(&action.url, err))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "export request failed".to_string());
            return Err(GiltError::PageStatus { status, message });
        }

        let kind = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(kind_from_content_type);
        let suggested_name = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok())
            .and_then(filename_from_disposition);

        let mut file =
            File::create(destination).map_err(|err| GiltError::Filesystem(err.to_string()))?;
        let bytes = io::copy(&mut response, &mut file)
            .map_err(|err| Self::body_error(&action.url, err))?;

        Ok(DownloadInfo {
            kind,
            suggested_name,
            bytes,
        })
    }
}

fn kind_from_content_type(value: &str) -> Option<SpreadsheetKind> {
    let value = value.to_lowercase();
    if value.contains("spreadsheetml") || value.contains("officedocument") {
        Some(SpreadsheetKind::Xlsx)
    } else if value.contains("ms-excel") || value.contains("msexcel") {
        Some(SpreadsheetKind::Xls)
    } else {
        None
    }
}

fn filename_from_disposition(value: &str) -> Option<String> {
    let (_, rest) = value.split_once("filename=")?;
    let name = rest.split(';').next()?.trim().trim_matches('"');
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

const ACCEPT_PHRASES: &[&str] = &[
    "accept",
    "accept all",
    "accept cookies",
    "accept all cookies",
    "i accept",
    "ok",
    "agree",
    "i agree",
    "allow all",
];

const OVERLAY_SELECTORS: &[&str] = &[
    "#onetrust-banner-sdk",
    "#onetrust-consent-sdk",
    "#cookie-banner",
    ".cookie-banner",
];

fn control_selector() -> Selector {
    Selector::parse("a, button, input[type=submit], input[type=button]")
        .expect("valid control selector")
}

fn visible_label(element: &ElementRef) -> String {
    if element.value().name() == "input" {
        element.value().attr("value").unwrap_or_default().to_string()
    } else {
        element.text().collect::<String>()
    }
}

fn normalized_label(label: &str) -> String {
    label
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn is_accept_control(element: &ElementRef) -> bool {
    if element.value().attr("id") == Some("onetrust-accept-btn-handler") {
        return true;
    }
    if let Some(class) = element.value().attr("class") {
        if class.contains("cookie-accept") || class.contains("accept-cookies") {
            return true;
        }
    }
    let label = normalized_label(&visible_label(element));
    ACCEPT_PHRASES.contains(&label.as_str())
}

fn ancestor_form<'a>(element: &ElementRef<'a>) -> Option<ElementRef<'a>> {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|ancestor| ancestor.value().name() == "form")
}

fn anchor_target(element: &ElementRef, base: &Url) -> Option<Url> {
    let href = element.value().attr("href")?.trim();
    if href.is_empty() || href == "#" || href.starts_with("javascript:") {
        return None;
    }
    base.join(href).ok()
}

fn control_target(element: &ElementRef, base: &Url) -> Option<Url> {
    if element.value().name() == "a" {
        return anchor_target(element, base);
    }
    let form = ancestor_form(element)?;
    match form.value().attr("action").map(str::trim) {
        Some(action) if !action.is_empty() => base.join(action).ok(),
        _ => Some(base.clone()),
    }
}

/// Locate the cookie overlay's accept control. `Ok(None)` means no overlay is
/// present, which is not an error; an overlay without an accept control is.
pub fn find_consent_control(html: &str, base: &Url) -> Result<Option<ConsentControl>, GiltError> {
    let document = Html::parse_document(html);
    let controls = control_selector();

    for element in document.select(&controls) {
        if is_accept_control(&element) {
            return Ok(Some(ConsentControl {
                target: control_target(&element, base),
            }));
        }
    }

    for raw in OVERLAY_SELECTORS {
        let selector = Selector::parse(raw).expect("valid overlay selector");
        if document.select(&selector).next().is_some() {
            return Err(GiltError::ConsentControlNotFound);
        }
    }
    Ok(None)
}

/// Locate the export control by its visible label and resolve it to the
/// request that re-creates pressing it. For a form control the form's fields
/// are collected the way a browser would submit them, with the report date
/// filled into any date field the form carries.
pub fn find_export_action(
    html: &str,
    base: &Url,
    date: &ReportDate,
) -> Result<ExportAction, GiltError> {
    let document = Html::parse_document(html);
    let controls = control_selector();
    let inputs = Selector::parse("input").expect("valid input selector");

    for element in document.select(&controls) {
        let label = normalized_label(&visible_label(&element));
        if !label.contains(&EXPORT_LABEL.to_lowercase()) {
            continue;
        }

        if element.value().name() == "a" {
            if let Some(url) = anchor_target(&element, base) {
                return Ok(ExportAction {
                    url,
                    method: ExportMethod::Get,
                    form: Vec::new(),
                });
            }
            continue;
        }

        let Some(form) = ancestor_form(&element) else {
            continue;
        };
        let url = match form.value().attr("action").map(str::trim) {
            Some(action) if !action.is_empty() => {
                base.join(action).map_err(|err| GiltError::Navigation {
                    url: action.to_string(),
                    reason: err.to_string(),
                })?
            }
            _ => base.clone(),
        };
        let method = match form.value().attr("method") {
            Some(value) if value.eq_ignore_ascii_case("post") => ExportMethod::Post,
            _ => ExportMethod::Get,
        };
        let mut fields = form_fields(&form, &element, &inputs);
        apply_report_date(&mut fields, date);
        return Ok(ExportAction {
            url,
            method,
            form: fields,
        });
    }

    Err(GiltError::ExportControlNotFound(EXPORT_LABEL.to_string()))
}

fn form_fields(
    form: &ElementRef,
    clicked: &ElementRef,
    inputs: &Selector,
) -> Vec<(String, String)> {
    let mut fields = Vec::new();
    for input in form.select(inputs) {
        let kind = input
            .value()
            .attr("type")
            .unwrap_or("text")
            .to_ascii_lowercase();
        let is_clicked = input.id() == clicked.id();
        match kind.as_str() {
            "submit" | "button" | "image" | "reset" if !is_clicked => continue,
            "checkbox" | "radio" if input.value().attr("checked").is_none() => continue,
            _ => {}
        }
        let Some(name) = input.value().attr("name") else {
            continue;
        };
        let value = input.value().attr("value").unwrap_or_default();
        fields.push((name.to_string(), value.to_string()));
    }
    fields
}

fn apply_report_date(fields: &mut [(String, String)], date: &ReportDate) {
    for (name, value) in fields.iter_mut() {
        if name.to_lowercase().contains("date") {
            *value = date.to_string();
        }
    }
}

const OLE2_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
const ZIP_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];

/// Check a downloaded file's leading bytes. The DMO's bot protection serves
/// an HTML interstitial with a 200 status, so the content type alone cannot
/// be trusted.
pub fn sniff_spreadsheet(path: &Path) -> Result<SpreadsheetKind, GiltError> {
    let mut file = File::open(path).map_err(|err| GiltError::Filesystem(err.to_string()))?;
    let mut head = [0u8; 512];
    let read = file
        .read(&mut head)
        .map_err(|err| GiltError::Filesystem(err.to_string()))?;
    let head = &head[..read];

    if head.starts_with(&OLE2_MAGIC) {
        return Ok(SpreadsheetKind::Xls);
    }
    if head.starts_with(&ZIP_MAGIC) {
        return Ok(SpreadsheetKind::Xlsx);
    }

    let text = String::from_utf8_lossy(head).to_lowercase();
    if text.trim_start().starts_with('<') || text.contains("<html") || text.contains("<!doctype") {
        return Err(GiltError::UnsupportedDownload(
            "server returned an HTML page (bot protection may be active)".to_string(),
        ));
    }
    Err(GiltError::UnsupportedDownload(
        "unrecognised leading bytes".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_mapping() {
        assert_eq!(
            kind_from_content_type("application/vnd.ms-excel"),
            Some(SpreadsheetKind::Xls)
        );
        assert_eq!(
            kind_from_content_type(
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            ),
            Some(SpreadsheetKind::Xlsx)
        );
        assert_eq!(kind_from_content_type("text/html"), None);
    }

    #[test]
    fn disposition_filename() {
        assert_eq!(
            filename_from_disposition("attachment; filename=\"D1A.xls\""),
            Some("D1A.xls".to_string())
        );
        assert_eq!(filename_from_disposition("inline"), None);
    }
}
