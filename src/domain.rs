use std::fmt;
use std::str::FromStr;

use chrono::{Days, Local, NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::error::GiltError;

/// Date a report was published for, entered as DD/MM/YYYY on the command line
/// and rendered in several shapes across artifact names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReportDate(NaiveDate);

impl ReportDate {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn today() -> Self {
        Self(Local::now().date_naive())
    }

    /// The DMO publishes each close-of-business report the following morning,
    /// so an unqualified fetch asks for yesterday.
    pub fn yesterday() -> Self {
        let today = Local::now().date_naive();
        Self(today.checked_sub_days(Days::new(1)).unwrap_or(today))
    }

    pub fn as_date(&self) -> NaiveDate {
        self.0
    }

    /// DD-MM-YYYY, used in downloaded spreadsheet names.
    pub fn file_stamp(&self) -> String {
        self.0.format("%d-%m-%Y").to_string()
    }

    /// YYYYMMDD, used in exported CSV names.
    pub fn compact(&self) -> String {
        self.0.format("%Y%m%d").to_string()
    }
}

impl fmt::Display for ReportDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%d/%m/%Y"))
    }
}

impl FromStr for ReportDate {
    type Err = GiltError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        for format in ["%d/%m/%Y", "%d-%m-%Y"] {
            if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
                return Ok(Self(date));
            }
        }
        Err(GiltError::InvalidReportDate(value.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Isin(String);

impl Isin {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Isin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Isin {
    type Err = GiltError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        if normalized.is_empty() {
            return Err(GiltError::InvalidIsin(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

/// Coupon rate in percent. The source renders these as `4%`, `0.875%` or a
/// bare number depending on cell formatting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CouponRate(f64);

impl CouponRate {
    pub fn new(value: f64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl fmt::Display for CouponRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.fract() == 0.0 {
            write!(f, "{:.1}", self.0)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl FromStr for CouponRate {
    type Err = GiltError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim().trim_end_matches('%').trim();
        let cleaned: String = trimmed.chars().filter(|ch| *ch != ',').collect();
        if cleaned.is_empty() {
            return Err(GiltError::InvalidCoupon(value.to_string()));
        }
        cleaned
            .parse::<f64>()
            .map(Self)
            .map_err(|_| GiltError::InvalidCoupon(value.to_string()))
    }
}

/// Nominal amount in issue. The source uses thousands separators and
/// occasionally a currency sign.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AmountOutstanding(f64);

impl AmountOutstanding {
    pub fn new(value: f64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl fmt::Display for AmountOutstanding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.fract() == 0.0 {
            write!(f, "{:.0}", self.0)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl FromStr for AmountOutstanding {
    type Err = GiltError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let cleaned: String = value
            .trim()
            .chars()
            .filter(|ch| !matches!(ch, ',' | '£') && !ch.is_whitespace())
            .collect();
        if cleaned.is_empty() {
            return Err(GiltError::InvalidAmount(value.to_string()));
        }
        cleaned
            .parse::<f64>()
            .map(Self)
            .map_err(|_| GiltError::InvalidAmount(value.to_string()))
    }
}

/// Redemption date of a gilt, normalised to ISO form on output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MaturityDate(NaiveDate);

impl MaturityDate {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn from_datetime(datetime: NaiveDateTime) -> Self {
        Self(datetime.date())
    }

    pub fn as_date(&self) -> NaiveDate {
        self.0
    }
}

impl fmt::Display for MaturityDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl FromStr for MaturityDate {
    type Err = GiltError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        for format in [
            "%d/%m/%Y",
            "%d-%m-%Y",
            "%d-%b-%Y",
            "%d %b %Y",
            "%d %B %Y",
            "%Y-%m-%d",
        ] {
            if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
                return Ok(Self(date));
            }
        }
        Err(GiltError::InvalidMaturity(value.to_string()))
    }
}

/// One normalised row of the Gilts in Issue report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GiltRecord {
    pub isin: Isin,
    pub name: String,
    pub coupon: CouponRate,
    pub maturity: MaturityDate,
    pub amount_outstanding: AmountOutstanding,
}

/// Container formats the DMO serves the report in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpreadsheetKind {
    Xls,
    Xlsx,
}

impl SpreadsheetKind {
    pub fn extension(self) -> &'static str {
        match self {
            SpreadsheetKind::Xls => "xls",
            SpreadsheetKind::Xlsx => "xlsx",
        }
    }
}
