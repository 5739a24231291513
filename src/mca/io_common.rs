use std::collections::HashMap;
use std::path::Path;

use chrono::{Duration, NaiveDate, NaiveDateTime};

use crate::mca::*;

pub fn simplify_file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(path)
        .to_string()
}

/// Given the header of a file (names of each of the columns) and the names of the
/// requested columns, finds the position of every requested column that is present.
/// The requested order is kept. When a name appears twice in the header, the first
/// occurence wins.
pub fn find_columns(req_col_names: &[String], header: &[Option<String>]) -> Vec<(usize, String)> {
    let mut col_names: HashMap<&str, usize> = HashMap::new();
    for (idx, name) in header.iter().enumerate() {
        if let Some(name) = name {
            col_names.entry(name.trim()).or_insert(idx);
        }
    }
    debug!("find_columns: col_names: {:?}", col_names);

    req_col_names
        .iter()
        .filter_map(|cname| col_names.get(cname.trim()).map(|idx| (*idx, cname.clone())))
        .collect()
}

pub fn find_column(name: &str, header: &[Option<String>]) -> Option<usize> {
    find_columns(&[name.to_string()], header)
        .first()
        .map(|(idx, _)| *idx)
}

/// The text of a cell. Empty cells have none. Whole numbers are written
/// without a decimal part.
pub fn cell_text(cell: &Cell) -> Option<String> {
    match cell {
        Cell::Text(s) => Some(s.clone()),
        Cell::Number(f) if f.fract() == 0.0 && f.abs() < 1e15 => Some(format!("{}", *f as i64)),
        Cell::Number(f) => Some(f.to_string()),
        Cell::Serial(f) => excel_serial_to_date(*f).map(|d| d.format("%Y-%m-%d").to_string()),
        Cell::Empty => None,
    }
}

/// Reads a date from a cell: spreadsheet serial numbers, `YYYY-MM-DD` with or
/// without a time, and `DD/MM/YYYY`.
pub fn cell_date(cell: &Cell) -> Option<NaiveDate> {
    match cell {
        Cell::Serial(f) | Cell::Number(f) => excel_serial_to_date(*f),
        Cell::Text(s) => parse_date_text(s.trim()),
        Cell::Empty => None,
    }
}

fn parse_date_text(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%d/%m/%Y"))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
                .ok()
                .map(|dt| dt.date())
        })
}

// Day 0 of the 1900 date system, taking the phantom 29 Feb 1900 into account
// for every date after March 1900.
const EXCEL_EPOCH: (i32, u32, u32) = (1899, 12, 30);
// 31 Dec 9999
const EXCEL_MAX_SERIAL: f64 = 2_958_465.0;

pub fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !(1.0..=EXCEL_MAX_SERIAL).contains(&serial) {
        return None;
    }
    let (y, m, d) = EXCEL_EPOCH;
    NaiveDate::from_ymd_opt(y, m, d)?.checked_add_signed(Duration::days(serial.floor() as i64))
}
