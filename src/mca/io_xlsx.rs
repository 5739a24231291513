use calamine::{open_workbook, DataType, Reader, Xlsx};

use crate::mca::{
    config_reader::DEFAULT_WORKSHEET,
    io_common::simplify_file_name,
    *,
};

/// Reads a worksheet whose header sits at `header_row` (0-based, counted from
/// the top of the sheet). Everything above the header is ignored.
pub fn read_excel_table(
    path: &str,
    worksheet_name: Option<&str>,
    header_row: usize,
) -> McaResult<ParsedTable> {
    let wrange = get_range(path, worksheet_name)?;

    // The range starts at the first used cell, not at A1.
    let first_row = wrange.start().map(|(r, _)| r as usize).unwrap_or(0);
    debug!(
        "read_excel_table: range starts at row {:?}, size {:?}",
        first_row,
        wrange.get_size()
    );
    let skip = header_row
        .checked_sub(first_row)
        .context(MissingHeaderSnafu {
            row: header_row,
            path,
        })?;

    let mut iter = wrange.rows().enumerate().skip(skip);
    let (_, header_cells) = iter.next().context(MissingHeaderSnafu {
        row: header_row,
        path,
    })?;
    let header: Vec<Option<String>> = header_cells
        .iter()
        .map(|c| cell_text(&read_cell(c)).map(|s| s.trim().to_string()))
        .collect();
    debug!("read_excel_table: header: {:?}", header);

    let mut rows: Vec<ParsedRow> = Vec::new();
    for (idx, row) in iter {
        let lineno = first_row + idx + 1;
        let cells: Vec<Cell> = row.iter().map(read_cell).collect();
        debug!("read_excel_table: lineno: {:?} row: {:?}", lineno, cells);
        rows.push(ParsedRow { lineno, cells });
    }
    info!(
        "Read {} rows from {}",
        rows.len(),
        simplify_file_name(path)
    );
    Ok(ParsedTable { header, rows })
}

fn read_cell(cell: &DataType) -> Cell {
    match cell {
        DataType::String(s) if s.trim().is_empty() => Cell::Empty,
        DataType::String(s) => Cell::Text(s.clone()),
        DataType::Int(i) => Cell::Number(*i as f64),
        DataType::Float(f) => Cell::Number(*f),
        DataType::Bool(b) => Cell::Text(if *b { "Yes" } else { "No" }.to_string()),
        DataType::DateTime(f) => Cell::Serial(*f),
        DataType::Empty => Cell::Empty,
        // Formula errors such as #N/A carry no answer.
        x => {
            warn!("read_cell: cannot understand cell {:?}, treating it as empty", x);
            Cell::Empty
        }
    }
}

fn get_range(path: &str, worksheet_name: Option<&str>) -> McaResult<calamine::Range<DataType>> {
    debug!(
        "get_range: path: {:?} worksheet: {:?}",
        path, worksheet_name
    );
    let mut workbook: Xlsx<_> = open_workbook(path).context(OpeningExcelSnafu { path })?;

    // A worksheet name was provided, use it.
    if let Some(name) = worksheet_name {
        let wrange = workbook
            .worksheet_range(name)
            .context(MissingWorksheetSnafu { name, path })?
            .context(OpeningExcelSnafu { path })?;
        return Ok(wrange);
    }

    if let Some(wrange) = workbook.worksheet_range(DEFAULT_WORKSHEET) {
        return wrange.context(OpeningExcelSnafu { path });
    }

    let all_worksheets = workbook.worksheets();
    match all_worksheets.as_slice() {
        [] => EmptyExcelSnafu { path }.fail(),
        [(worksheet_name, wrange)] => {
            debug!(
                "get_range: path: {:?} using the only worksheet: {:?}",
                path, worksheet_name
            );
            Ok(wrange.clone())
        }
        _ => AmbiguousWorksheetSnafu {
            name: DEFAULT_WORKSHEET,
            path,
        }
        .fail(),
    }
}
