pub use crate::config::*;

use chrono::NaiveDate;
use log::debug;

/// A builder for loading records.
///
/// Raw cells are normalized on the way in: missing, empty and
/// whitespace-only answers become `NotRecorded`. When an identifier marker is
/// set, records without a date get one derived from their identifier.
///
/// ```
/// pub use capacity_flow::builder::DatasetBuilder;
/// pub use capacity_flow::Schema;
/// # use capacity_flow::FlowErrors;
///
/// let schema = Schema::new(&["Assessed".to_string(), "Has capacity".to_string()], &[])?;
/// let mut builder = DatasetBuilder::new(schema)?.identifier_marker("S")?;
///
/// builder.add_record_simple(&["Yes", ""])?;
/// builder.add_record(&[Some("No".to_string()), None], None, Some("S230615XYZ".to_string()))?;
///
/// let dataset = builder.build();
/// assert_eq!(dataset.records[0].values[1], "NotRecorded");
/// assert!(dataset.records[1].date.is_some());
///
/// # Ok::<(), FlowErrors>(())
/// ```
pub struct DatasetBuilder {
    pub(crate) _schema: Schema,
    pub(crate) _marker: Option<String>,
    pub(crate) _records: Vec<Record>,
}

impl DatasetBuilder {
    pub fn new(schema: Schema) -> Result<DatasetBuilder, FlowErrors> {
        Ok(DatasetBuilder {
            _schema: schema,
            _marker: None,
            _records: Vec::new(),
        })
    }

    /// Turns on date backfill from identifiers starting with `marker`.
    pub fn identifier_marker(self, marker: &str) -> Result<DatasetBuilder, FlowErrors> {
        Ok(DatasetBuilder {
            _schema: self._schema,
            _marker: Some(marker.to_string()),
            _records: self._records,
        })
    }

    /// Adds a record made only of answers, one per column of the schema.
    pub fn add_record_simple(&mut self, values: &[&str]) -> Result<(), FlowErrors> {
        let cells: Vec<Option<String>> = values.iter().map(|s| Some(s.to_string())).collect();
        self.add_record(&cells, None, None)
    }

    /// Adds a record. `None` cells are treated like blank ones.
    pub fn add_record(
        &mut self,
        values: &[Option<String>],
        date: Option<NaiveDate>,
        identifier: Option<String>,
    ) -> Result<(), FlowErrors> {
        if values.len() != self._schema.width() {
            return Err(FlowErrors::RecordWidth {
                expected: self._schema.width(),
                found: values.len(),
            });
        }
        let mut record = Record {
            values: values.iter().map(|v| normalize_value(v.as_deref())).collect(),
            date,
            identifier,
        };
        if let Some(marker) = self._marker.as_deref() {
            crate::backfill_date(&mut record, marker);
        }
        debug!("add_record: {:?}", record);
        self._records.push(record);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self._records.len()
    }

    pub fn is_empty(&self) -> bool {
        self._records.is_empty()
    }

    pub fn build(self) -> Dataset {
        Dataset {
            schema: self._schema,
            records: self._records,
        }
    }
}

/// Maps blank answers to the `NotRecorded` category. Other answers are kept
/// as they are, free text included.
pub fn normalize_value(raw: Option<&str>) -> String {
    match raw {
        Some(s) if !s.trim().is_empty() => s.to_string(),
        _ => NOT_RECORDED.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        Schema::new(&["A".to_string(), "B".to_string()], &["Unit".to_string()]).unwrap()
    }

    #[test]
    fn blank_cells_become_not_recorded() {
        assert_eq!(normalize_value(None), NOT_RECORDED);
        assert_eq!(normalize_value(Some("")), NOT_RECORDED);
        assert_eq!(normalize_value(Some(" ")), NOT_RECORDED);
        assert_eq!(normalize_value(Some("Conveyed")), "Conveyed");
    }

    #[test]
    fn wrong_width_is_rejected() {
        let mut b = DatasetBuilder::new(schema()).unwrap();
        let err = b.add_record_simple(&["Yes", "No"]).unwrap_err();
        assert_eq!(
            err,
            FlowErrors::RecordWidth {
                expected: 3,
                found: 2
            }
        );
        assert!(b.is_empty());
    }

    #[test]
    fn backfill_only_when_marker_is_set() {
        let id = Some("S230615XYZ".to_string());
        let cells = vec![None, None, None];

        let mut plain = DatasetBuilder::new(schema()).unwrap();
        plain.add_record(&cells, None, id.clone()).unwrap();
        assert_eq!(plain.build().records[0].date, None);

        let mut marked = DatasetBuilder::new(schema())
            .unwrap()
            .identifier_marker("S")
            .unwrap();
        marked.add_record(&cells, None, id).unwrap();
        assert_eq!(
            marked.build().records[0].date,
            NaiveDate::from_ymd_opt(2023, 6, 15)
        );
    }

    #[test]
    fn present_date_is_kept() {
        let d = NaiveDate::from_ymd_opt(2021, 1, 2);
        let mut b = DatasetBuilder::new(schema())
            .unwrap()
            .identifier_marker("S")
            .unwrap();
        b.add_record(&[None, None, None], d, Some("S230615".to_string()))
            .unwrap();
        assert_eq!(b.build().records[0].date, d);
    }
}
