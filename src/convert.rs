use calamine::{Data, DataType};

use crate::domain::{AmountOutstanding, CouponRate, GiltRecord, Isin, MaturityDate};
use crate::error::GiltError;

/// How deep into the sheet the header row is searched for; the report puts
/// its title block and total-amount banner above the column labels.
pub const HEADER_SCAN_ROWS: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Isin,
    Name,
    Coupon,
    Maturity,
    Amount,
}

impl Column {
    pub fn label(self) -> &'static str {
        match self {
            Column::Isin => "isin",
            Column::Name => "name",
            Column::Coupon => "coupon",
            Column::Maturity => "maturity",
            Column::Amount => "amount_outstanding",
        }
    }
}

/// Source-order positions of the five normalised columns.
#[derive(Debug, Clone)]
pub struct ColumnMap {
    order: Vec<Column>,
    isin: usize,
    name: usize,
    coupon: usize,
    maturity: usize,
    amount: usize,
}

impl ColumnMap {
    pub fn order(&self) -> &[Column] {
        &self.order
    }
}

#[derive(Debug)]
pub struct NormalizedTable {
    pub columns: Vec<Column>,
    pub records: Vec<GiltRecord>,
    pub rows_read: usize,
    pub rows_skipped: usize,
}

fn match_column(label: &str) -> Option<Column> {
    let label = label.to_lowercase();
    if label.is_empty() {
        None
    } else if label.contains("isin") {
        Some(Column::Isin)
    } else if label.contains("redemption") || label.contains("maturity") {
        Some(Column::Maturity)
    } else if label.contains("coupon") {
        Some(Column::Coupon)
    } else if label.contains("amount") {
        Some(Column::Amount)
    } else if label.contains("name")
        || label.contains("gilt")
        || label.contains("stock")
        || label.contains("instrument")
    {
        Some(Column::Name)
    } else {
        None
    }
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::String(value) => value.trim().to_string(),
        Data::Empty => String::new(),
        other => other.to_string().trim().to_string(),
    }
}

fn cell_at<'a>(row: &'a [Data], index: usize) -> &'a Data {
    static EMPTY: Data = Data::Empty;
    row.get(index).unwrap_or(&EMPTY)
}

fn row_is_blank(row: &[Data]) -> bool {
    row.iter().all(|cell| cell_text(cell).is_empty())
}

/// Maturity-band banners the report interleaves with data rows.
const BAND_LABELS: &[&str] = &["Ultra-Short", "Short", "Medium", "Long"];

fn is_band_label_row(row: &[Data]) -> bool {
    BAND_LABELS.contains(&cell_text(cell_at(row, 0)).as_str())
}

/// Find the header row: the first row near the top of the sheet carrying both
/// an ISIN label and a redemption/maturity label. A candidate that lacks any
/// of the remaining normalised columns fails the run rather than guessing.
pub fn find_header(rows: &[Vec<Data>]) -> Result<(usize, ColumnMap), GiltError> {
    for (row_idx, row) in rows.iter().take(HEADER_SCAN_ROWS).enumerate() {
        let mut isin = None;
        let mut name = None;
        let mut coupon = None;
        let mut maturity = None;
        let mut amount = None;
        let mut order = Vec::new();

        for (col_idx, cell) in row.iter().enumerate() {
            let Some(column) = match_column(&cell_text(cell)) else {
                continue;
            };
            let slot = match column {
                Column::Isin => &mut isin,
                Column::Name => &mut name,
                Column::Coupon => &mut coupon,
                Column::Maturity => &mut maturity,
                Column::Amount => &mut amount,
            };
            if slot.is_none() {
                *slot = Some(col_idx);
                order.push(column);
            }
        }

        let (Some(isin), Some(maturity)) = (isin, maturity) else {
            continue;
        };
        return Ok((
            row_idx,
            ColumnMap {
                order,
                isin,
                name: name.ok_or(GiltError::MissingColumn("name"))?,
                coupon: coupon.ok_or(GiltError::MissingColumn("coupon"))?,
                maturity,
                amount: amount.ok_or(GiltError::MissingColumn("amount outstanding"))?,
            },
        ));
    }
    Err(GiltError::HeaderNotFound)
}

/// Normalise everything below the header row. Blank separator rows and the
/// report's structural label rows (maturity-band banners, section headings,
/// footnotes, anything without an ISIN) are skipped and counted; a data row
/// that fails to parse aborts the run.
pub fn normalize_rows(rows: &[Vec<Data>]) -> Result<NormalizedTable, GiltError> {
    let (header_idx, map) = find_header(rows)?;
    let mut records = Vec::new();
    let mut rows_read = 0;
    let mut rows_skipped = 0;

    for (offset, row) in rows[header_idx + 1..].iter().enumerate() {
        let row_number = header_idx + offset + 2;
        rows_read += 1;

        if row_is_blank(row) || is_band_label_row(row) {
            rows_skipped += 1;
            continue;
        }
        let isin_raw = cell_text(cell_at(row, map.isin));
        if isin_raw.is_empty() {
            rows_skipped += 1;
            continue;
        }

        records.push(parse_record(row, &map, &isin_raw, row_number)?);
    }

    Ok(NormalizedTable {
        columns: map.order.clone(),
        records,
        rows_read,
        rows_skipped,
    })
}

fn parse_record(
    row: &[Data],
    map: &ColumnMap,
    isin_raw: &str,
    row_number: usize,
) -> Result<GiltRecord, GiltError> {
    let isin = isin_raw
        .parse::<Isin>()
        .map_err(|_| parse_failure(row_number, "isin", isin_raw))?;
    let name = cell_text(cell_at(row, map.name));
    let coupon = parse_coupon(cell_at(row, map.coupon), row_number)?;
    let maturity = parse_maturity(cell_at(row, map.maturity), row_number)?;
    let amount_outstanding = parse_amount(cell_at(row, map.amount), row_number)?;

    Ok(GiltRecord {
        isin,
        name,
        coupon,
        maturity,
        amount_outstanding,
    })
}

fn parse_failure(row: usize, column: &'static str, value: &str) -> GiltError {
    GiltError::ParseFailure {
        row,
        column,
        value: value.to_string(),
    }
}

fn parse_coupon(cell: &Data, row: usize) -> Result<CouponRate, GiltError> {
    if let Some(value) = cell.get_float() {
        return Ok(CouponRate::new(value));
    }
    if let Some(value) = cell.get_int() {
        return Ok(CouponRate::new(value as f64));
    }
    let raw = cell_text(cell);
    raw.parse::<CouponRate>()
        .map_err(|_| parse_failure(row, "coupon", &raw))
}

fn parse_maturity(cell: &Data, row: usize) -> Result<MaturityDate, GiltError> {
    if let Some(datetime) = cell.as_datetime() {
        return Ok(MaturityDate::from_datetime(datetime));
    }
    let raw = cell_text(cell);
    raw.parse::<MaturityDate>()
        .map_err(|_| parse_failure(row, "maturity", &raw))
}

fn parse_amount(cell: &Data, row: usize) -> Result<AmountOutstanding, GiltError> {
    if let Some(value) = cell.get_float() {
        return Ok(AmountOutstanding::new(value));
    }
    if let Some(value) = cell.get_int() {
        return Ok(AmountOutstanding::new(value as f64));
    }
    let raw = cell_text(cell);
    raw.parse::<AmountOutstanding>()
        .map_err(|_| parse_failure(row, "amount outstanding", &raw))
}

fn field_for(record: &GiltRecord, column: Column) -> String {
    match column {
        Column::Isin => record.isin.to_string(),
        Column::Name => record.name.clone(),
        Column::Coupon => record.coupon.to_string(),
        Column::Maturity => record.maturity.to_string(),
        Column::Amount => record.amount_outstanding.to_string(),
    }
}

/// Serialise the table to CSV bytes: normalised header labels in source
/// column order, one line per record.
pub fn to_csv(table: &NormalizedTable) -> Result<Vec<u8>, GiltError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(table.columns.iter().map(|column| column.label()))
        .map_err(|err| GiltError::Filesystem(err.to_string()))?;
    for record in &table.records {
        let fields: Vec<String> = table
            .columns
            .iter()
            .map(|column| field_for(record, *column))
            .collect();
        writer
            .write_record(&fields)
            .map_err(|err| GiltError::Filesystem(err.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|err| GiltError::Filesystem(err.to_string()))
}
