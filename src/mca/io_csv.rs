// Primitives for reading CSV files.

use std::fs::File;

use crate::mca::{io_common::simplify_file_name, *};

/// Reads a CSV file laid out like the worksheet: `header_row` lines of
/// preamble (0-based index of the header), then the header, then one record
/// per line.
pub fn read_csv_table(path: &str, header_row: usize) -> McaResult<ParsedTable> {
    let mut records = get_records(path)?;
    // Lines are counted from 1 to respect most conventions in the spreadsheet world.
    for lineno in 1..=header_row {
        if let Some(line_r) = records.next() {
            line_r.context(CsvLineParseSnafu { lineno })?;
        }
    }

    let header_line = records
        .next()
        .context(MissingHeaderSnafu {
            row: header_row,
            path,
        })?
        .context(CsvLineParseSnafu {
            lineno: header_row + 1,
        })?;
    let header: Vec<Option<String>> = header_line
        .iter()
        .map(|s| {
            let s = s.trim();
            if s.is_empty() {
                None
            } else {
                Some(s.to_string())
            }
        })
        .collect();
    debug!("read_csv_table: header: {:?}", header);

    let mut rows: Vec<ParsedRow> = Vec::new();
    for (idx, line_r) in records.enumerate() {
        let lineno = header_row + idx + 2;
        let line = line_r.context(CsvLineParseSnafu { lineno })?;
        let cells: Vec<Cell> = line
            .iter()
            .map(|s| {
                if s.trim().is_empty() {
                    Cell::Empty
                } else {
                    Cell::Text(s.to_string())
                }
            })
            .collect();
        debug!("read_csv_table: lineno: {:?} row: {:?}", lineno, cells);
        rows.push(ParsedRow { lineno, cells });
    }
    info!(
        "Read {} rows from {}",
        rows.len(),
        simplify_file_name(path)
    );
    Ok(ParsedTable { header, rows })
}

fn get_records(path: &str) -> McaResult<csv::StringRecordsIntoIter<File>> {
    let rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .context(CsvOpenSnafu { path })?;
    Ok(rdr.into_records())
}
