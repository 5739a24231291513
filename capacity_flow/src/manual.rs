/*!

This is the long-form manual for `capacity_flow` and `mcaflow`.

## Input formats

The following formats are supported:
* `xlsx` Excel workbooks (the default when the file name ends in `.xlsx`)
* `csv` Comma Separated Values

### `xlsx`

One worksheet (by default `DATA`) holds the records. The header row is not
necessarily the first one: by default it is the fourth row of the sheet
(`headerRow` is 0-based, default `3`). Every row below the header is a record.

Columns are found by the text of their header cell. Columns that the
configuration does not mention are ignored, whatever their position.

### `csv`

Same layout as the worksheet: the header row sits at `headerRow`, the records
follow it.

## Columns

|  column               | role                                                  |
|-----------------------|-------------------------------------------------------|
| the questions         | the stages of the flow graph, in the configured order |
| `Operational Node`    | an extra filter, not part of the graph                |
| `IncidentDate`        | the date of the event                                 |
| `IJD_IncidentNumber`  | identifier used when the date is missing              |

Blank answers are counted as `NotRecorded`. A question missing from the
header is left out of the stages with a warning. A missing extra filter,
date or identifier column turns the matching feature off.

When the date of a record is missing or cannot be read, it is taken from the
identifier: `S230615XYZ` gives 15 June 2023 (marker `S`, then `YYMMDD`).
Two-digit years from `70` onwards are read as 19xx.

## Configuration

`mcaflow` comes with defaults for the mental capacity assessment workbook.
A JSON configuration file can override them:

```text
{
  "inputFile": "MCA DATA MASTER.xlsx",
  "worksheetName": "DATA",
  "headerRow": 3,
  "questions": ["Mental Capacity Assessment Undertaken", "Patient Does Have Capacity"],
  "outcomeQuestion": "Service Outcome",
  "filterColumns": ["Operational Node"],
  "dateColumn": "IncidentDate",
  "identifierColumn": "IJD_IncidentNumber",
  "identifierMarker": "S",
  "filters": { "Q1": ["Yes"] },
  "output": "summary.json"
}
```

All keys are optional. Paths are relative to the configuration file. Filter
keys are either the full column name or the short label of a question
(`Q1` for the first one). A filter with an empty list keeps no record.

## Output

The summary is a JSON document with:
- `records` and `filteredRecords`: the number of records before and after
  filtering
- `dateRange`: the earliest and latest dates of the whole dataset
- `recordsPerMonth`: the filtered records per month, oldest first
- `totals`: answers as rows, questions as columns (the outcome question
  excepted), each row with its display colour
- `outcome`: the same table for the outcome question alone
- `sankey`: the flow diagram, as `node` (`label`, `color`) and `link`
  (`source`, `target`, `value`, `color`) arrays

Each pair of consecutive questions is tallied on its own. The flow leaving
a stage always equals the number of filtered records, but a record is not
followed through all the stages as a single path.

 */
