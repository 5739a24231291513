use log::{debug, info, warn};

use capacity_flow::builder::DatasetBuilder;
use capacity_flow::*;
use snafu::{prelude::*, Snafu};

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::json;
use serde_json::Map as JSMap;
use serde_json::Value as JSValue;
use text_diff::print_diff;

use crate::args::Args;
use crate::mca::config_reader::*;
use crate::mca::io_common::*;

mod config_reader;
mod io_common;
mod io_csv;
mod io_xlsx;

#[derive(Debug, Snafu)]
pub enum McaError {
    #[snafu(display("Error opening file {path}"))]
    OpeningExcel {
        source: calamine::XlsxError,
        path: String,
    },
    #[snafu(display("Worksheet {name:?} not found in {path}"))]
    MissingWorksheet { name: String, path: String },
    #[snafu(display("{path} has no worksheet"))]
    EmptyExcel { path: String },
    #[snafu(display(
        "{path} has several worksheets and none is named {name:?}, the worksheet name must be provided"
    ))]
    AmbiguousWorksheet { name: String, path: String },
    #[snafu(display("No header found at row {row} of {path}"))]
    MissingHeader { row: usize, path: String },
    #[snafu(display("Error opening file {path}"))]
    OpeningJson {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error parsing JSON"))]
    ParsingJson { source: serde_json::Error },
    #[snafu(display("Error opening CSV file {path}"))]
    CsvOpen { source: csv::Error, path: String },
    #[snafu(display("Error reading CSV line {lineno}"))]
    CsvLineParse { source: csv::Error, lineno: usize },
    #[snafu(display("Error writing {path}"))]
    WritingOutput {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("No input file: use --input or set inputFile in the configuration"))]
    MissingInput {},
    #[snafu(display("Unknown input type {input_type:?} (expected xlsx or csv)"))]
    UnknownInputType { input_type: String },
    #[snafu(display("Cannot understand filter {spec:?}, expected COLUMN=VALUE1,VALUE2"))]
    FilterSyntax { spec: String },
    #[snafu(display("Filter on unknown column {key:?}"))]
    UnknownFilter { key: String },
    #[snafu(display("Invalid dataset"))]
    Flow { source: FlowErrors },
    #[snafu(display("Difference detected between calculated summary and reference summary"))]
    ReferenceMismatch {},
}

pub type McaResult<T> = Result<T, McaError>;

/// A spreadsheet as read by the readers, before any interpretation.
#[derive(PartialEq, Debug, Clone)]
pub struct ParsedTable {
    pub header: Vec<Option<String>>,
    pub rows: Vec<ParsedRow>,
}

#[derive(PartialEq, Debug, Clone)]
pub struct ParsedRow {
    // 1-based, as displayed by spreadsheet programs
    pub lineno: usize,
    pub cells: Vec<Cell>,
}

/// The cell types the readers can produce.
#[derive(PartialEq, Debug, Clone)]
pub enum Cell {
    Text(String),
    Number(f64),
    /// A cell formatted as a date, as a spreadsheet serial number.
    Serial(f64),
    Empty,
}

/// Everything needed to run one analysis, once the configuration file and the
/// command line have been merged.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Settings {
    pub input: String,
    pub input_type: String,
    pub worksheet_name: Option<String>,
    pub header_row: usize,
    pub questions: Vec<String>,
    pub outcome_question: Option<String>,
    pub filter_columns: Vec<String>,
    pub date_column: String,
    pub identifier_column: String,
    pub identifier_marker: String,
    pub filters: Vec<(String, Vec<String>)>,
    pub output: Option<String>,
}

fn merge_settings(config: &AnalysisConfig, root: &Path, args: &Args) -> McaResult<Settings> {
    let input = match (&args.input, &config.input_file) {
        (Some(p), _) => p.clone(),
        (None, Some(p)) => {
            let full: PathBuf = [root, Path::new(p)].iter().collect();
            full.display().to_string()
        }
        (None, None) => return MissingInputSnafu {}.fail(),
    };
    let input_type = args
        .input_type
        .clone()
        .or_else(|| config.input_type.clone())
        .unwrap_or_else(|| guess_input_type(&input));
    let output = match (&args.out, &config.output) {
        (Some(p), _) => Some(p.clone()),
        (None, Some(p)) if p == STDOUT => Some(p.clone()),
        (None, Some(p)) => {
            let full: PathBuf = [root, Path::new(p)].iter().collect();
            Some(full.display().to_string())
        }
        (None, None) => None,
    };

    let mut filters: Vec<(String, Vec<String>)> = config
        .filters
        .clone()
        .unwrap_or_default()
        .into_iter()
        .collect();
    for spec in args.filter.iter() {
        filters.push(parse_filter_arg(spec)?);
    }

    Ok(Settings {
        input,
        input_type,
        worksheet_name: args
            .excel_worksheet_name
            .clone()
            .or_else(|| config.worksheet_name.clone()),
        header_row: args.header_row.unwrap_or_else(|| config.header_row()),
        questions: config.questions(),
        outcome_question: config.outcome_question(),
        filter_columns: config.filter_columns(),
        date_column: config.date_column(),
        identifier_column: config.identifier_column(),
        identifier_marker: config.identifier_marker(),
        filters,
        output,
    })
}

fn guess_input_type(path: &str) -> String {
    match Path::new(path).extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("csv") => "csv".to_string(),
        _ => "xlsx".to_string(),
    }
}

/// Parses `COLUMN=VALUE1,VALUE2`. `COLUMN=` selects no value at all.
pub fn parse_filter_arg(spec: &str) -> McaResult<(String, Vec<String>)> {
    let (key, values) = spec
        .split_once('=')
        .context(FilterSyntaxSnafu { spec })?;
    let key = key.trim();
    ensure!(!key.is_empty(), FilterSyntaxSnafu { spec });
    let values: Vec<String> = values
        .split(',')
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect();
    Ok((key.to_string(), values))
}

fn read_table(settings: &Settings) -> McaResult<ParsedTable> {
    info!(
        "Attempting to read {:?} file {:?}",
        settings.input_type, settings.input
    );
    match settings.input_type.as_str() {
        "xlsx" => io_xlsx::read_excel_table(
            &settings.input,
            settings.worksheet_name.as_deref(),
            settings.header_row,
        ),
        "csv" => io_csv::read_csv_table(&settings.input, settings.header_row),
        x => UnknownInputTypeSnafu { input_type: x }.fail(),
    }
}

/// Turns the raw table into records: picks the configured columns by header
/// name, normalizes the answers and fills in the dates.
pub fn build_dataset(table: &ParsedTable, settings: &Settings) -> McaResult<Dataset> {
    let mut questions = find_columns(&settings.questions, &table.header);
    for q in settings.questions.iter() {
        if !questions.iter().any(|(_, name)| name == q) {
            warn!("Question {:?} not found in the header, skipping it", q);
        }
    }
    let mut extras = find_columns(&settings.filter_columns, &table.header);
    let mut seen: HashSet<String> = HashSet::new();
    questions.retain(|(_, name)| {
        let first = seen.insert(name.clone());
        if !first {
            warn!("Question {:?} is listed twice, keeping the first one", name);
        }
        first
    });
    extras.retain(|(_, name)| {
        let first = seen.insert(name.clone());
        if !first {
            warn!("Filter column {:?} is already used, skipping it", name);
        }
        first
    });

    let date_idx = find_column(&settings.date_column, &table.header);
    // Identifiers only complete a date column, they never replace it.
    let id_idx = date_idx.and(find_column(&settings.identifier_column, &table.header));
    if date_idx.is_none() {
        info!("No column {:?}: dates are not reported", settings.date_column);
    } else if id_idx.is_none() {
        info!(
            "No column {:?}: missing dates are not backfilled",
            settings.identifier_column
        );
    }

    let stage_names: Vec<String> = questions.iter().map(|(_, n)| n.clone()).collect();
    let extra_names: Vec<String> = extras.iter().map(|(_, n)| n.clone()).collect();
    let schema = Schema::new(&stage_names, &extra_names).context(FlowSnafu {})?;
    let mut builder = DatasetBuilder::new(schema).context(FlowSnafu {})?;
    if id_idx.is_some() {
        builder = builder
            .identifier_marker(&settings.identifier_marker)
            .context(FlowSnafu {})?;
    }

    let columns: Vec<usize> = questions
        .iter()
        .chain(extras.iter())
        .map(|(idx, _)| *idx)
        .collect();

    for row in table.rows.iter() {
        if row.cells.iter().all(|c| *c == Cell::Empty) {
            debug!("build_dataset: skipping empty line {}", row.lineno);
            continue;
        }
        let values: Vec<Option<String>> = columns
            .iter()
            .map(|idx| row.cells.get(*idx).and_then(cell_text))
            .collect();
        let date = date_idx.and_then(|idx| row.cells.get(idx)).and_then(|c| {
            let d = cell_date(c);
            if d.is_none() && *c != Cell::Empty {
                warn!("line {}: cannot read date {:?}", row.lineno, c);
            }
            d
        });
        let identifier = id_idx
            .and_then(|idx| row.cells.get(idx))
            .and_then(cell_text);
        builder
            .add_record(&values, date, identifier)
            .context(FlowSnafu {})?;
    }
    info!("Loaded {} records", builder.len());
    Ok(builder.build())
}

/// Resolves the filter keys (full names or short labels) against the schema.
pub fn build_selection(
    schema: &Schema,
    filters: &[(String, Vec<String>)],
) -> McaResult<FilterSelection> {
    let columns: Vec<&Field> = schema.columns().collect();
    let mut selection = FilterSelection::new();
    for (key, values) in filters.iter() {
        let field = schema
            .position(key)
            .and_then(|idx| columns.get(idx))
            .context(UnknownFilterSnafu { key })?;
        debug!("build_selection: {} -> {:?}", field.name, values);
        selection.allow(&field.name, values);
    }
    Ok(selection)
}

fn field_js(f: &Field) -> JSValue {
    json!({"label": f.label, "name": f.name})
}

fn table_to_json(table: &DenseTable) -> JSValue {
    let rows: Vec<JSValue> = table
        .rows
        .iter()
        .map(|r| json!({"answer": r.answer, "color": r.color, "counts": r.cells}))
        .collect();
    json!({
        "columns": table.columns.iter().map(field_js).collect::<Vec<JSValue>>(),
        "rows": rows
    })
}

fn graph_to_json(graph: &FlowGraph) -> JSValue {
    json!({
        "title": "Patient Flow Sankey Chart",
        "node": {
            "label": graph.nodes.iter().map(|n| n.label.clone()).collect::<Vec<String>>(),
            "color": graph.nodes.iter().map(|n| n.color.clone()).collect::<Vec<String>>(),
        },
        "link": {
            "source": graph.edges.iter().map(|e| e.source).collect::<Vec<usize>>(),
            "target": graph.edges.iter().map(|e| e.target).collect::<Vec<usize>>(),
            "value": graph.edges.iter().map(|e| e.weight).collect::<Vec<u64>>(),
            "color": graph.edges.iter().map(|e| e.color.clone()).collect::<Vec<String>>(),
        }
    })
}

fn build_summary_js(
    schema: &Schema,
    selection: &FilterSelection,
    summary: &FlowSummary,
) -> JSValue {
    let mut filters: JSMap<String, JSValue> = JSMap::new();
    for name in selection.fields() {
        if let Some(values) = selection.allowed(name) {
            filters.insert(name.clone(), json!(values));
        }
    }
    let date_range = match summary.date_range {
        Some(dr) => json!({
            "first": dr.first.format("%Y-%m-%d").to_string(),
            "last": dr.last.format("%Y-%m-%d").to_string(),
            "text": dr.to_string(),
        }),
        None => JSValue::Null,
    };
    let per_month: Vec<JSValue> = summary
        .records_per_month
        .iter()
        .map(|m| json!({"month": m.label, "records": m.count}))
        .collect();
    json!({
        "config": {
            "questions": schema.stages().iter().map(field_js).collect::<Vec<JSValue>>(),
            "filters": filters,
        },
        "records": summary.total_records,
        "filteredRecords": summary.filtered_records,
        "dateRange": date_range,
        "recordsPerMonth": per_month,
        "totals": table_to_json(&summary.totals),
        "outcome": summary.outcome.as_ref().map(table_to_json).unwrap_or(JSValue::Null),
        "sankey": graph_to_json(&summary.graph),
    })
}

/// Loads the data, runs the pipeline and returns the summary in JSON.
pub fn compute_summary(settings: &Settings) -> McaResult<JSValue> {
    let table = read_table(settings)?;
    let dataset = build_dataset(&table, settings)?;
    let selection = build_selection(&dataset.schema, &settings.filters)?;
    let rules = ReportRules {
        outcome_field: settings.outcome_question.clone(),
        ..ReportRules::default()
    };
    let summary = run_pipeline(&dataset, &selection, &rules).context(FlowSnafu {})?;
    if let Some(dr) = summary.date_range {
        info!("{}", dr);
    }
    Ok(build_summary_js(&dataset.schema, &selection, &summary))
}

pub fn run_analysis(args: &Args) -> McaResult<()> {
    let (config, root) = match &args.config {
        Some(config_path) => {
            let config = read_config(config_path)?;
            let root = Path::new(config_path)
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_default();
            (config, root)
        }
        None => (AnalysisConfig::default(), PathBuf::new()),
    };
    debug!("config: {:?}", config);
    let settings = merge_settings(&config, &root, args)?;
    info!("settings: {:?}", settings);

    let result_js = compute_summary(&settings)?;
    let pretty_js_stats = serde_json::to_string_pretty(&result_js).context(ParsingJsonSnafu {})?;

    match settings.output.as_deref() {
        None | Some(STDOUT) => println!("{}", pretty_js_stats),
        Some(path) => {
            fs::write(path, &pretty_js_stats).context(WritingOutputSnafu { path })?;
            info!("Summary written to {:?}", path);
        }
    }

    // The reference summary, if provided for comparison
    if let Some(summary_p) = &args.reference {
        let summary_ref = read_summary(summary_p)?;
        let pretty_js_summary_ref =
            serde_json::to_string_pretty(&summary_ref).context(ParsingJsonSnafu {})?;
        if pretty_js_summary_ref != pretty_js_stats {
            warn!("Found differences with the reference string");
            print_diff(
                pretty_js_summary_ref.as_str(),
                pretty_js_stats.as_ref(),
                "\n",
            );
            return ReferenceMismatchSnafu {}.fail();
        }
    }

    Ok(())
}
