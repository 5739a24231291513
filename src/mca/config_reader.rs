use crate::mca::*;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const STDOUT: &str = "stdout";

pub const DEFAULT_WORKSHEET: &str = "DATA";
pub const DEFAULT_HEADER_ROW: usize = 3;
pub const DEFAULT_OUTCOME_QUESTION: &str = "Service Outcome";
pub const DEFAULT_FILTER_COLUMN: &str = "Operational Node";
pub const DEFAULT_DATE_COLUMN: &str = "IncidentDate";
pub const DEFAULT_IDENTIFIER_COLUMN: &str = "IJD_IncidentNumber";
pub const DEFAULT_IDENTIFIER_MARKER: &str = "S";

// The headers as they are spelled in the assessment workbook.
pub const DEFAULT_QUESTIONS: [&str; 10] = [
    "Mental Capacity Assessment Undertaken",
    "Patient Does Have Capacity",
    "Does the patient have an impairment or, a disturbance in the functioning of, their mind or brain at the moment?",
    "Is the impairment or disturbance suffcient that the person lacks the capaity to make the decision at this time?",
    "Does the patient understand the information relevant to the decision including the likely consequances...?",
    "Can the patient retain that information?",
    "Can the patient use or weigh that information as part of the process of making the decision?",
    "Can the patient communicate that decision by any means?",
    "Proposed Care Patient Best Interest",
    "Service Outcome",
];

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize, Default)]
pub struct AnalysisConfig {
    #[serde(rename = "inputFile")]
    pub input_file: Option<String>,
    #[serde(rename = "inputType")]
    pub input_type: Option<String>,
    #[serde(rename = "worksheetName")]
    pub worksheet_name: Option<String>,
    #[serde(rename = "headerRow")]
    pub header_row: Option<usize>,
    pub questions: Option<Vec<String>>,
    #[serde(rename = "outcomeQuestion")]
    pub outcome_question: Option<String>,
    #[serde(rename = "filterColumns")]
    pub filter_columns: Option<Vec<String>>,
    #[serde(rename = "dateColumn")]
    pub date_column: Option<String>,
    #[serde(rename = "identifierColumn")]
    pub identifier_column: Option<String>,
    #[serde(rename = "identifierMarker")]
    pub identifier_marker: Option<String>,
    pub filters: Option<BTreeMap<String, Vec<String>>>,
    pub output: Option<String>,
}

impl AnalysisConfig {
    pub fn header_row(&self) -> usize {
        self.header_row.unwrap_or(DEFAULT_HEADER_ROW)
    }

    pub fn questions(&self) -> Vec<String> {
        self.questions
            .clone()
            .unwrap_or_else(|| DEFAULT_QUESTIONS.iter().map(|s| s.to_string()).collect())
    }

    /// An empty string turns the outcome table off.
    pub fn outcome_question(&self) -> Option<String> {
        match &self.outcome_question {
            Some(s) if s.is_empty() => None,
            Some(s) => Some(s.clone()),
            None => Some(DEFAULT_OUTCOME_QUESTION.to_string()),
        }
    }

    pub fn filter_columns(&self) -> Vec<String> {
        self.filter_columns
            .clone()
            .unwrap_or_else(|| vec![DEFAULT_FILTER_COLUMN.to_string()])
    }

    pub fn date_column(&self) -> String {
        self.date_column
            .clone()
            .unwrap_or_else(|| DEFAULT_DATE_COLUMN.to_string())
    }

    pub fn identifier_column(&self) -> String {
        self.identifier_column
            .clone()
            .unwrap_or_else(|| DEFAULT_IDENTIFIER_COLUMN.to_string())
    }

    pub fn identifier_marker(&self) -> String {
        self.identifier_marker
            .clone()
            .unwrap_or_else(|| DEFAULT_IDENTIFIER_MARKER.to_string())
    }
}

pub fn read_config(path: &str) -> McaResult<AnalysisConfig> {
    let contents = fs::read_to_string(path).context(OpeningJsonSnafu { path })?;
    let config: AnalysisConfig =
        serde_json::from_str(contents.as_str()).context(ParsingJsonSnafu {})?;
    Ok(config)
}

pub fn read_summary(path: &str) -> McaResult<JSValue> {
    let contents = fs::read_to_string(path).context(OpeningJsonSnafu { path })?;
    let js: JSValue = serde_json::from_str(contents.as_str()).context(ParsingJsonSnafu {})?;
    Ok(js)
}
