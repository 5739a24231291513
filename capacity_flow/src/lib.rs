/*!
Filtering, tallying and flow graphs for mental capacity assessment records.

Records answer a fixed, ordered sequence of questions. For a given
[`FilterSelection`], the pipeline keeps the matching records, counts the
answers per question and the answer pairs between consecutive questions, and
lays those counts out as a layered flow graph (a Sankey diagram) plus dense
tables for display.

See the [`manual`] module for the input and output formats.
*/

pub mod builder;
mod config;
pub mod manual;

use chrono::{Datelike, NaiveDate};
use log::{debug, info};

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

pub use crate::config::*;

// **** Date backfill ****

/// Derives a date from an identifier of the form `<marker>YYMMDD...`.
///
/// Returns `None` when the marker is missing, fewer than six characters
/// follow it, or they do not form a valid date. Two-digit years follow the
/// chrono convention: 70-99 map to the 1900s, 00-69 to the 2000s.
pub fn date_from_identifier(identifier: &str, marker: &str) -> Option<NaiveDate> {
    let rest = identifier.strip_prefix(marker)?;
    let digits = rest.get(..6)?;
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(digits, "%y%m%d").ok()
}

/// Fills the date of a record from its identifier, if it has none.
pub fn backfill_date(record: &mut Record, marker: &str) {
    if record.date.is_some() {
        return;
    }
    if let Some(id) = record.identifier.as_deref() {
        record.date = date_from_identifier(id, marker);
        if record.date.is_none() {
            debug!("backfill_date: no date in identifier {:?}", id);
        }
    }
}

// **** Filtering ****

/// Keeps the records whose value for every constrained field is allowed.
///
/// The dataset is not modified. A selection naming a field that is not in the
/// schema is rejected.
pub fn filter_records<'a>(
    dataset: &'a Dataset,
    selection: &FilterSelection,
) -> Result<Vec<&'a Record>, FlowErrors> {
    let mut constraints: Vec<(usize, &BTreeSet<String>)> = Vec::new();
    for name in selection.fields() {
        let column = dataset
            .schema
            .columns()
            .position(|f| &f.name == name)
            .ok_or_else(|| FlowErrors::UnknownField(name.clone()))?;
        if let Some(allowed) = selection.allowed(name) {
            constraints.push((column, allowed));
        }
    }

    let res: Vec<&Record> = dataset
        .records
        .iter()
        .filter(|r| {
            constraints
                .iter()
                .all(|(column, allowed)| allowed.contains(r.value(*column)))
        })
        .collect();
    debug!(
        "filter_records: kept {} of {} records",
        res.len(),
        dataset.records.len()
    );
    Ok(res)
}

// **** Aggregation ****

/// Counts the records per answer, for every stage field.
pub fn field_counts(schema: &Schema, records: &[&Record]) -> Vec<FieldCounts> {
    schema
        .stages()
        .iter()
        .enumerate()
        .map(|(column, field)| {
            let mut counts: BTreeMap<String, u64> = BTreeMap::new();
            for r in records.iter() {
                *counts.entry(r.value(column).to_string()).or_insert(0) += 1;
            }
            FieldCounts {
                field: field.clone(),
                counts,
            }
        })
        .collect()
}

/// Counts the records per pair of answers, for every pair of consecutive
/// stage fields.
///
/// Each pair is tallied on its own: nothing ties the transitions of one
/// record together across the stages.
pub fn transition_counts(schema: &Schema, records: &[&Record]) -> Vec<TransitionCounts> {
    schema
        .stages()
        .windows(2)
        .enumerate()
        .map(|(column, pair)| {
            let mut counts: BTreeMap<(String, String), u64> = BTreeMap::new();
            for r in records.iter() {
                let key = (
                    r.value(column).to_string(),
                    r.value(column + 1).to_string(),
                );
                *counts.entry(key).or_insert(0) += 1;
            }
            TransitionCounts {
                from: pair[0].clone(),
                to: pair[1].clone(),
                counts,
            }
        })
        .collect()
}

/// Lays out counts as a table with the sorted answers as rows and one
/// column per field. Missing combinations are zero.
pub fn dense_table(counts: &[FieldCounts], colors: &ColorScheme) -> DenseTable {
    let answers: BTreeSet<&String> = counts.iter().flat_map(|fc| fc.counts.keys()).collect();
    let rows = answers
        .into_iter()
        .map(|answer| DenseRow {
            answer: answer.clone(),
            cells: counts.iter().map(|fc| fc.get(answer)).collect(),
            color: colors.cell_color(answer),
        })
        .collect();
    DenseTable {
        columns: counts.iter().map(|fc| fc.field.clone()).collect(),
        rows,
    }
}

/// The number of dated records per calendar month, in chronological order.
pub fn records_per_month(records: &[&Record]) -> Vec<MonthlyCount> {
    let mut months: BTreeMap<(i32, u32), u64> = BTreeMap::new();
    for d in records.iter().filter_map(|r| r.date) {
        *months.entry((d.year(), d.month())).or_insert(0) += 1;
    }
    months
        .into_iter()
        .map(|((year, month), count)| MonthlyCount {
            year,
            month,
            label: NaiveDate::from_ymd_opt(year, month, 1)
                .map(|d| d.format("%b %Y").to_string())
                .unwrap_or_else(|| format!("{:04}-{:02}", year, month)),
            count,
        })
        .collect()
}

/// The earliest and latest dates of the records, if any is dated.
pub fn date_range(records: &[Record]) -> Option<DateRange> {
    let first = records.iter().filter_map(|r| r.date).min()?;
    let last = records.iter().filter_map(|r| r.date).max()?;
    Some(DateRange { first, last })
}

// **** Flow graph ****

/// Formats a count with a magnitude suffix: `950`, `1.5k`, `2.4M`, `3.0B`.
pub fn human_format(num: u64) -> String {
    let x = num as f64;
    if num >= 1_000_000_000 {
        format!("{:.1}B", x / 1_000_000_000.0)
    } else if num >= 1_000_000 {
        format!("{:.1}M", x / 1_000_000.0)
    } else if num >= 1_000 {
        format!("{:.1}k", x / 1_000.0)
    } else {
        num.to_string()
    }
}

/// Builds the layered graph of a filtered cohort.
///
/// Nodes are created stage by stage. Within a stage, answers appear in the
/// order in which they are first met in `records`. Edges follow the order of
/// `transitions`, which is sorted by (source answer, target answer) within
/// each stage pair.
pub fn build_flow_graph(
    records: &[&Record],
    counts: &[FieldCounts],
    transitions: &[TransitionCounts],
    colors: &ColorScheme,
) -> FlowGraph {
    let mut nodes: Vec<FlowNode> = Vec::new();
    let mut node_ids: HashMap<(&str, &str), usize> = HashMap::new();

    for (column, fc) in counts.iter().enumerate() {
        let mut seen: HashSet<&str> = HashSet::new();
        for r in records.iter() {
            let value = r.value(column);
            if !seen.insert(value) {
                continue;
            }
            let count = fc.get(value);
            node_ids.insert((fc.field.name.as_str(), value), nodes.len());
            nodes.push(FlowNode {
                field: fc.field.clone(),
                value: value.to_string(),
                count,
                label: format!("{}\n{} - {}", fc.field.label, value, human_format(count)),
                color: colors.node.clone(),
            });
        }
    }

    let mut edges: Vec<FlowEdge> = Vec::new();
    for tc in transitions.iter() {
        for ((from_value, to_value), weight) in tc.counts.iter() {
            if *weight == 0 {
                continue;
            }
            let source = node_ids.get(&(tc.from.name.as_str(), from_value.as_str()));
            let target = node_ids.get(&(tc.to.name.as_str(), to_value.as_str()));
            match (source, target) {
                (Some(source), Some(target)) => edges.push(FlowEdge {
                    source: *source,
                    target: *target,
                    weight: *weight,
                    color: colors.link_color(from_value),
                }),
                // The counts were not computed on these records.
                _ => debug!(
                    "build_flow_graph: skipping transition {:?} -> {:?} without nodes",
                    from_value, to_value
                ),
            }
        }
    }

    debug!(
        "build_flow_graph: {} nodes, {} edges",
        nodes.len(),
        edges.len()
    );
    FlowGraph { nodes, edges }
}

/// Runs one full pass: filter, count, build the graph and the tables.
///
/// Nothing is kept between calls; the same inputs always give the same
/// summary.
pub fn run_pipeline(
    dataset: &Dataset,
    selection: &FilterSelection,
    rules: &ReportRules,
) -> Result<FlowSummary, FlowErrors> {
    info!(
        "Processing {} records, {} stages, {} constrained fields",
        dataset.records.len(),
        dataset.schema.stages().len(),
        selection.fields().count()
    );
    if let Some(name) = rules.outcome_field.as_deref() {
        if dataset.schema.position(name).is_none() {
            info!("Outcome field {:?} not in the dataset, no outcome table", name);
        }
    }

    let filtered = filter_records(dataset, selection)?;
    info!("{} records after filtering", filtered.len());

    let counts = field_counts(&dataset.schema, &filtered);
    let transitions = transition_counts(&dataset.schema, &filtered);
    let graph = build_flow_graph(&filtered, &counts, &transitions, &rules.colors);

    let is_outcome =
        |fc: &&FieldCounts| Some(fc.field.name.as_str()) == rules.outcome_field.as_deref();
    let table_counts: Vec<FieldCounts> = counts
        .iter()
        .filter(|fc| !is_outcome(fc))
        .cloned()
        .collect();
    let outcome_counts: Vec<FieldCounts> = counts.iter().filter(is_outcome).cloned().collect();
    let outcome = if outcome_counts.is_empty() {
        None
    } else {
        Some(dense_table(&outcome_counts, &rules.colors))
    };

    Ok(FlowSummary {
        total_records: dataset.records.len(),
        filtered_records: filtered.len(),
        date_range: date_range(&dataset.records),
        records_per_month: records_per_month(&filtered),
        totals: dense_table(&table_counts, &rules.colors),
        outcome,
        field_counts: counts,
        transitions,
        graph,
    })
}

#[cfg(test)]
mod tests {
    use super::builder::DatasetBuilder;
    use super::*;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn three_records() -> Dataset {
        let schema = Schema::new(&["F1".to_string(), "F2".to_string()], &[]).unwrap();
        let mut b = DatasetBuilder::new(schema).unwrap();
        b.add_record_simple(&["Yes", "Yes"]).unwrap();
        b.add_record_simple(&["Yes", "No"]).unwrap();
        b.add_record_simple(&["No", "No"]).unwrap();
        b.build()
    }

    fn assessments() -> Dataset {
        let schema = Schema::new(
            &["Assessed".to_string(), "Capacity".to_string(), "Outcome".to_string()],
            &["Unit".to_string()],
        )
        .unwrap();
        let mut b = DatasetBuilder::new(schema)
            .unwrap()
            .identifier_marker("S")
            .unwrap();
        let rows: [(&str, &str, &str, &str, &str); 6] = [
            ("Yes", "Yes", "Conveyed", "North", "S230115A"),
            ("Yes", "No", "Referred", "South", "S230120B"),
            ("No", "", "Conveyed", "North", "S230203C"),
            ("Yes", "Yes", "Discharged", "North", "bad"),
            ("", "", "Conveyed", "South", "S230228D"),
            ("No", "No", "Referred", "South", "S230301E"),
        ];
        for (a, c, o, u, id) in rows.iter() {
            let cells: Vec<Option<String>> =
                [a, c, o, u].iter().map(|s| Some(s.to_string())).collect();
            b.add_record(&cells, None, Some(id.to_string())).unwrap();
        }
        b.build()
    }

    #[test]
    fn date_from_marked_identifier() {
        assert_eq!(
            date_from_identifier("S230615XYZ", "S"),
            NaiveDate::from_ymd_opt(2023, 6, 15)
        );
        assert_eq!(date_from_identifier("230615", "S"), None);
        assert_eq!(date_from_identifier("X230615", "S"), None);
        assert_eq!(date_from_identifier("S2306", "S"), None);
        assert_eq!(date_from_identifier("S231345", "S"), None);
        assert_eq!(date_from_identifier("S23é615", "S"), None);
    }

    #[test]
    fn two_digit_years_before_seventy_are_this_century() {
        assert_eq!(
            date_from_identifier("S690101", "S"),
            NaiveDate::from_ymd_opt(2069, 1, 1)
        );
        assert_eq!(
            date_from_identifier("S991231", "S"),
            NaiveDate::from_ymd_opt(1999, 12, 31)
        );
    }

    #[test]
    fn filter_and_count_small_cohort() {
        init();
        let ds = three_records();
        let mut sel = FilterSelection::new();
        sel.allow("F1", &["Yes".to_string()]);
        let filtered = filter_records(&ds, &sel).unwrap();
        assert_eq!(filtered.len(), 2);

        let counts = field_counts(&ds.schema, &filtered);
        assert_eq!(counts[0].counts.len(), 1);
        assert_eq!(counts[0].get("Yes"), 2);

        let transitions = transition_counts(&ds.schema, &filtered);
        assert_eq!(transitions.len(), 1);
        let t = &transitions[0].counts;
        assert_eq!(t.len(), 2);
        assert_eq!(t[&("Yes".to_string(), "Yes".to_string())], 1);
        assert_eq!(t[&("Yes".to_string(), "No".to_string())], 1);
    }

    #[test]
    fn unfiltered_selection_keeps_everything() {
        let ds = assessments();
        let sel = FilterSelection::unfiltered(&ds);
        assert_eq!(filter_records(&ds, &sel).unwrap().len(), ds.records.len());
        assert_eq!(
            filter_records(&ds, &FilterSelection::new()).unwrap().len(),
            ds.records.len()
        );
    }

    #[test]
    fn empty_allowed_set_matches_nothing() {
        let ds = assessments();
        let mut sel = FilterSelection::unfiltered(&ds);
        sel.allow("Unit", &[]);
        assert!(filter_records(&ds, &sel).unwrap().is_empty());
    }

    #[test]
    fn filters_combine_across_fields() {
        let ds = assessments();
        let mut sel = FilterSelection::new();
        sel.allow("Unit", &["North".to_string()]);
        sel.allow("Outcome", &["Conveyed".to_string()]);
        let filtered = filter_records(&ds, &sel).unwrap();
        assert_eq!(filtered.len(), 2);
        assert!(filtered
            .iter()
            .all(|r| r.values[2] == "Conveyed" && r.values[3] == "North"));
    }

    #[test]
    fn unknown_filter_field_is_an_error() {
        let ds = assessments();
        let mut sel = FilterSelection::new();
        sel.allow("Colour", &["Blue".to_string()]);
        assert_eq!(
            filter_records(&ds, &sel).unwrap_err(),
            FlowErrors::UnknownField("Colour".to_string())
        );
    }

    #[test]
    fn counts_sum_to_filtered_size() {
        let ds = assessments();
        let mut sel = FilterSelection::new();
        sel.allow("Assessed", &["Yes".to_string(), NOT_RECORDED.to_string()]);
        let filtered = filter_records(&ds, &sel).unwrap();
        assert_eq!(filtered.len(), 4);
        for fc in field_counts(&ds.schema, &filtered) {
            assert_eq!(fc.total(), 4);
        }
        for tc in transition_counts(&ds.schema, &filtered) {
            assert_eq!(tc.total(), 4);
        }
    }

    #[test]
    fn counts_ignore_record_order() {
        let ds = assessments();
        let forward: Vec<&Record> = ds.records.iter().collect();
        let backward: Vec<&Record> = ds.records.iter().rev().collect();
        assert_eq!(
            field_counts(&ds.schema, &forward),
            field_counts(&ds.schema, &backward)
        );
        assert_eq!(
            transition_counts(&ds.schema, &forward),
            transition_counts(&ds.schema, &backward)
        );
    }

    #[test]
    fn graph_nodes_follow_first_appearance() {
        let ds = assessments();
        let all: Vec<&Record> = ds.records.iter().collect();
        let counts = field_counts(&ds.schema, &all);
        let transitions = transition_counts(&ds.schema, &all);
        let g = build_flow_graph(&all, &counts, &transitions, &ColorScheme::default());

        let q1: Vec<&str> = g
            .nodes
            .iter()
            .filter(|n| n.field.label == "Q1")
            .map(|n| n.value.as_str())
            .collect();
        assert_eq!(q1, vec!["Yes", "No", NOT_RECORDED]);
        // 3 + 3 + 3 distinct answers
        assert_eq!(g.nodes.len(), 9);
        assert_eq!(g.nodes[0].label, "Q1\nYes - 3");
        assert_eq!(g.nodes[0].color, "lightblue");
        assert!(g.nodes.iter().all(|n| n.field.name != "Unit"));
    }

    #[test]
    fn graph_edges_carry_transition_weights() {
        let ds = three_records();
        let all: Vec<&Record> = ds.records.iter().collect();
        let counts = field_counts(&ds.schema, &all);
        let transitions = transition_counts(&ds.schema, &all);
        let g = build_flow_graph(&all, &counts, &transitions, &ColorScheme::default());

        let yes1 = g.node_id("F1", "Yes").unwrap();
        let no1 = g.node_id("F1", "No").unwrap();
        let yes2 = g.node_id("F2", "Yes").unwrap();
        let no2 = g.node_id("F2", "No").unwrap();
        // Sorted by (source answer, target answer).
        assert_eq!(
            g.edges,
            vec![
                FlowEdge {
                    source: no1,
                    target: no2,
                    weight: 1,
                    color: "lightcoral".to_string()
                },
                FlowEdge {
                    source: yes1,
                    target: no2,
                    weight: 1,
                    color: "lightgreen".to_string()
                },
                FlowEdge {
                    source: yes1,
                    target: yes2,
                    weight: 1,
                    color: "lightgreen".to_string()
                },
            ]
        );
    }

    #[test]
    fn outflow_per_stage_pair_matches_filtered_size() {
        let ds = assessments();
        let all: Vec<&Record> = ds.records.iter().collect();
        let counts = field_counts(&ds.schema, &all);
        let transitions = transition_counts(&ds.schema, &all);
        let g = build_flow_graph(&all, &counts, &transitions, &ColorScheme::default());
        for label in ["Q1", "Q2"] {
            let out: u64 = g
                .edges
                .iter()
                .filter(|e| g.nodes[e.source].field.label == label)
                .map(|e| e.weight)
                .sum();
            assert_eq!(out, all.len() as u64);
        }
    }

    #[test]
    fn unknown_answer_gets_neutral_link_color() {
        let schema = Schema::new(&["A".to_string(), "B".to_string()], &[]).unwrap();
        let mut b = DatasetBuilder::new(schema).unwrap();
        b.add_record_simple(&["Maybe", "Yes"]).unwrap();
        let ds = b.build();
        let all: Vec<&Record> = ds.records.iter().collect();
        let g = build_flow_graph(
            &all,
            &field_counts(&ds.schema, &all),
            &transition_counts(&ds.schema, &all),
            &ColorScheme::default(),
        );
        assert_eq!(g.edges.len(), 1);
        assert_eq!(g.edges[0].color, "lightblue");
    }

    #[test]
    fn dense_table_is_zero_filled() {
        let ds = assessments();
        let all: Vec<&Record> = ds.records.iter().collect();
        let counts = field_counts(&ds.schema, &all);
        let table = dense_table(&counts[..2], &ColorScheme::default());
        let answers: Vec<&str> = table.rows.iter().map(|r| r.answer.as_str()).collect();
        assert_eq!(answers, vec!["No", NOT_RECORDED, "Yes"]);
        assert_eq!(table.columns.len(), 2);
        assert_eq!(table.rows[0].cells, vec![2, 2]);
        assert_eq!(table.rows[1].cells, vec![1, 2]);
        assert_eq!(table.rows[2].cells, vec![3, 2]);
        assert_eq!(table.rows[1].color, "lightgray");

        let outcome = dense_table(&counts[2..], &ColorScheme::default());
        assert_eq!(outcome.rows[0].answer, "Conveyed");
        assert_eq!(outcome.rows[0].color, "white");
    }

    #[test]
    fn human_format_thresholds() {
        assert_eq!(human_format(0), "0");
        assert_eq!(human_format(950), "950");
        assert_eq!(human_format(999), "999");
        assert_eq!(human_format(1_000), "1.0k");
        assert_eq!(human_format(1_500), "1.5k");
        assert_eq!(human_format(2_400_000), "2.4M");
        assert_eq!(human_format(3_000_000_000), "3.0B");
    }

    #[test]
    fn monthly_counts_and_range() {
        let ds = assessments();
        let all: Vec<&Record> = ds.records.iter().collect();
        let months = records_per_month(&all);
        let labels: Vec<(&str, u64)> = months
            .iter()
            .map(|m| (m.label.as_str(), m.count))
            .collect();
        // The record with identifier "bad" has no date.
        assert_eq!(labels, vec![("Jan 2023", 2), ("Feb 2023", 2), ("Mar 2023", 1)]);

        let range = date_range(&ds.records).unwrap();
        assert_eq!(
            range.to_string(),
            "Records between 15 Jan 2023 and 01 Mar 2023"
        );
        assert_eq!(date_range(&[]), None);
    }

    #[test]
    fn pipeline_splits_outcome_table() {
        init();
        let ds = assessments();
        let rules = ReportRules {
            outcome_field: Some("Outcome".to_string()),
            ..ReportRules::default()
        };
        let summary = run_pipeline(&ds, &FilterSelection::unfiltered(&ds), &rules).unwrap();
        assert_eq!(summary.total_records, 6);
        assert_eq!(summary.filtered_records, 6);
        assert_eq!(summary.totals.columns.len(), 2);
        let outcome = summary.outcome.unwrap();
        assert_eq!(outcome.columns[0].name, "Outcome");
        assert_eq!(outcome.rows.len(), 3);
        assert_eq!(summary.field_counts.len(), 3);
        assert_eq!(summary.transitions.len(), 2);
    }

    #[test]
    fn pipeline_is_idempotent() {
        let ds = assessments();
        let mut sel = FilterSelection::new();
        sel.allow("Unit", &["South".to_string()]);
        let rules = ReportRules::default();
        let a = run_pipeline(&ds, &sel, &rules).unwrap();
        let b = run_pipeline(&ds, &sel, &rules).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.outcome, None);
    }

    #[test]
    fn empty_cohort_gives_empty_graph() {
        let ds = assessments();
        let mut sel = FilterSelection::new();
        sel.allow("Assessed", &[]);
        let summary = run_pipeline(&ds, &sel, &ReportRules::default()).unwrap();
        assert_eq!(summary.filtered_records, 0);
        assert!(summary.graph.nodes.is_empty());
        assert!(summary.graph.edges.is_empty());
        assert!(summary.totals.rows.is_empty());
        assert!(summary.records_per_month.is_empty());
        assert!(summary.field_counts.iter().all(|fc| fc.total() == 0));
        // The date range describes the whole dataset.
        assert!(summary.date_range.is_some());
    }
}
