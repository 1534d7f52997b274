use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use calamine::{Data, Reader, Sheets, open_workbook_auto};

use crate::error::GiltError;

/// Yields the first sheet of a workbook as ordered rows of cells, hiding
/// which container format backs it.
pub trait TabularSource {
    fn rows(&mut self) -> Result<Vec<Vec<Data>>, GiltError>;
}

/// Auto-detecting reader over both the legacy binary (`.xls`) and the
/// XML-based (`.xlsx`) workbook formats.
pub struct WorkbookSource {
    sheets: Sheets<BufReader<File>>,
}

impl WorkbookSource {
    pub fn open(path: &Path) -> Result<Self, GiltError> {
        let sheets =
            open_workbook_auto(path).map_err(|err| GiltError::UnsupportedFormat(err.to_string()))?;
        Ok(Self { sheets })
    }
}

impl TabularSource for WorkbookSource {
    fn rows(&mut self) -> Result<Vec<Vec<Data>>, GiltError> {
        let (_, range) = self
            .sheets
            .worksheets()
            .into_iter()
            .next()
            .ok_or_else(|| GiltError::UnsupportedFormat("workbook has no sheets".to_string()))?;
        Ok(range.rows().map(<[Data]>::to_vec).collect())
    }
}
