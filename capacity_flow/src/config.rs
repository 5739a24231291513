// ********* Input data structures ***********

use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::Display;

use chrono::NaiveDate;

/// The category substituted for any blank or missing answer.
pub const NOT_RECORDED: &str = "NotRecorded";

/// A categorical column of the dataset.
///
/// Stage fields (the questions) get a short label derived from their
/// 1-based position (`Q1`, `Q2`, ...). Extra filter columns are labelled
/// with their own name.
#[derive(Eq, PartialEq, Debug, Clone, Hash)]
pub struct Field {
    pub name: String,
    pub label: String,
}

/// The ordered list of categorical columns carried by every record.
///
/// The stage fields come first, in the order given at construction. This
/// order defines the layers of the flow graph and is never re-sorted.
/// The extra fields can be filtered on but do not take part in the graph.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Schema {
    stages: Vec<Field>,
    extras: Vec<Field>,
}

impl Schema {
    pub fn new(stage_names: &[String], extra_names: &[String]) -> Result<Schema, FlowErrors> {
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        for name in stage_names.iter().chain(extra_names.iter()) {
            if !seen.insert(name.as_str()) {
                return Err(FlowErrors::DuplicateField(name.clone()));
            }
        }
        let stages = stage_names
            .iter()
            .enumerate()
            .map(|(idx, name)| Field {
                name: name.clone(),
                label: format!("Q{}", idx + 1),
            })
            .collect();
        let extras = extra_names
            .iter()
            .map(|name| Field {
                name: name.clone(),
                label: name.clone(),
            })
            .collect();
        Ok(Schema { stages, extras })
    }

    pub fn stages(&self) -> &[Field] {
        &self.stages
    }

    pub fn extras(&self) -> &[Field] {
        &self.extras
    }

    /// All the columns, stages first. The position in this iterator is the
    /// position of the value in `Record::values`.
    pub fn columns(&self) -> impl Iterator<Item = &Field> {
        self.stages.iter().chain(self.extras.iter())
    }

    pub fn width(&self) -> usize {
        self.stages.len() + self.extras.len()
    }

    /// Finds a column by full name first, then by short label.
    pub fn position(&self, key: &str) -> Option<usize> {
        self.columns()
            .position(|f| f.name == key)
            .or_else(|| self.columns().position(|f| f.label == key))
    }
}

/// One row of the source table, after normalization.
///
/// Invariant: `values` has one non-blank entry per column of the schema.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Record {
    pub values: Vec<String>,
    pub date: Option<NaiveDate>,
    pub identifier: Option<String>,
}

impl Record {
    pub fn value(&self, column: usize) -> &str {
        self.values
            .get(column)
            .map(|s| s.as_str())
            .unwrap_or(NOT_RECORDED)
    }
}

/// The loaded records. Read-only once built.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Dataset {
    pub schema: Schema,
    pub records: Vec<Record>,
}

impl Dataset {
    /// The distinct values of a column, in order of first appearance.
    pub fn observed_values(&self, column: usize) -> Vec<String> {
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        let mut res: Vec<String> = Vec::new();
        for r in self.records.iter() {
            let v = r.value(column);
            if seen.insert(v) {
                res.push(v.to_string());
            }
        }
        res
    }
}

/// The allowed values per field, keyed by field name.
///
/// A field without an entry is unconstrained. An entry with an empty set
/// lets nothing through.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct FilterSelection {
    allowed: BTreeMap<String, BTreeSet<String>>,
}

impl FilterSelection {
    pub fn new() -> FilterSelection {
        FilterSelection::default()
    }

    /// The default state of the controls: every observed value of every
    /// column is allowed.
    pub fn unfiltered(dataset: &Dataset) -> FilterSelection {
        let mut sel = FilterSelection::new();
        for (idx, field) in dataset.schema.columns().enumerate() {
            sel.allow(&field.name, &dataset.observed_values(idx));
        }
        sel
    }

    /// Replaces the allowed set of a field.
    pub fn allow(&mut self, field: &str, values: &[String]) {
        self.allowed
            .insert(field.to_string(), values.iter().cloned().collect());
    }

    pub fn allowed(&self, field: &str) -> Option<&BTreeSet<String>> {
        self.allowed.get(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = &String> {
        self.allowed.keys()
    }
}

// ******** Output data structures *********

/// The number of records per value of one field. Values without any record
/// are absent.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct FieldCounts {
    pub field: Field,
    pub counts: BTreeMap<String, u64>,
}

impl FieldCounts {
    pub fn get(&self, value: &str) -> u64 {
        self.counts.get(value).cloned().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }
}

/// The number of records per pair of values, for two adjacent stages.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct TransitionCounts {
    pub from: Field,
    pub to: Field,
    pub counts: BTreeMap<(String, String), u64>,
}

impl TransitionCounts {
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct FlowNode {
    pub field: Field,
    pub value: String,
    pub count: u64,
    pub label: String,
    pub color: String,
}

/// A weighted link between two nodes of adjacent stages. `source` and
/// `target` index into `FlowGraph::nodes`.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct FlowEdge {
    pub source: usize,
    pub target: usize,
    pub weight: u64,
    pub color: String,
}

#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct FlowGraph {
    pub nodes: Vec<FlowNode>,
    pub edges: Vec<FlowEdge>,
}

impl FlowGraph {
    pub fn node_id(&self, field_name: &str, value: &str) -> Option<usize> {
        self.nodes
            .iter()
            .position(|n| n.field.name == field_name && n.value == value)
    }
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct DenseRow {
    pub answer: String,
    /// One count per column of the table, zero when not observed.
    pub cells: Vec<u64>,
    pub color: String,
}

/// Answers as rows, fields as columns.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct DenseTable {
    pub columns: Vec<Field>,
    pub rows: Vec<DenseRow>,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct MonthlyCount {
    pub year: i32,
    pub month: u32,
    /// For example `Jun 2023`.
    pub label: String,
    pub count: u64,
}

#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub struct DateRange {
    pub first: NaiveDate,
    pub last: NaiveDate,
}

impl Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Records between {} and {}",
            self.first.format("%d %b %Y"),
            self.last.format("%d %b %Y")
        )
    }
}

/// Everything computed for one filter selection.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct FlowSummary {
    pub total_records: usize,
    pub filtered_records: usize,
    pub date_range: Option<DateRange>,
    pub records_per_month: Vec<MonthlyCount>,
    pub field_counts: Vec<FieldCounts>,
    pub transitions: Vec<TransitionCounts>,
    /// The stage fields except the outcome field.
    pub totals: DenseTable,
    /// The outcome field on its own, if one is configured and present.
    pub outcome: Option<DenseTable>,
    pub graph: FlowGraph,
}

/// Errors raised when the inputs do not match the schema.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum FlowErrors {
    UnknownField(String),
    DuplicateField(String),
    RecordWidth { expected: usize, found: usize },
}

impl Error for FlowErrors {}

impl Display for FlowErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowErrors::UnknownField(name) => write!(f, "unknown field {:?}", name),
            FlowErrors::DuplicateField(name) => write!(f, "field {:?} is listed twice", name),
            FlowErrors::RecordWidth { expected, found } => write!(
                f,
                "record has {} values but the schema has {} columns",
                found, expected
            ),
        }
    }
}

// ********* Configuration **********

/// Colours used by the presentation layer.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct ColorScheme {
    pub answers: Vec<(String, String)>,
    pub node: String,
    /// Colour of links whose source answer is not in `answers`.
    pub link_fallback: String,
    /// Colour of table cells whose answer is not in `answers`.
    pub cell_fallback: String,
}

impl ColorScheme {
    pub fn answer_color(&self, value: &str) -> Option<&str> {
        self.answers
            .iter()
            .find(|(answer, _)| answer == value)
            .map(|(_, color)| color.as_str())
    }

    pub fn link_color(&self, source_value: &str) -> String {
        self.answer_color(source_value)
            .unwrap_or(&self.link_fallback)
            .to_string()
    }

    pub fn cell_color(&self, value: &str) -> String {
        self.answer_color(value)
            .unwrap_or(&self.cell_fallback)
            .to_string()
    }
}

impl Default for ColorScheme {
    fn default() -> Self {
        ColorScheme {
            answers: vec![
                ("Yes".to_string(), "lightgreen".to_string()),
                ("No".to_string(), "lightcoral".to_string()),
                (NOT_RECORDED.to_string(), "lightgray".to_string()),
            ],
            node: "lightblue".to_string(),
            link_fallback: "lightblue".to_string(),
            cell_fallback: "white".to_string(),
        }
    }
}

/// Options for one pass of the pipeline.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct ReportRules {
    /// This stage is kept out of the totals table and tabulated on its own.
    pub outcome_field: Option<String>,
    pub colors: ColorScheme,
}
