//! Data models for the dashboard aggregator.
//!
//! This module contains the core data structures used throughout the
//! application: raw rows and datasets, the declarative filter/group/reduce
//! specs the aggregator consumes, the aggregate series it produces, and the
//! report envelope.

use crate::dashboard::PanelResult;
use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

/// Label used for rows whose group key is missing or empty.
pub const DEFAULT_FALLBACK_LABEL: &str = "Unknown";

/// A raw cell value as produced by the CSV loader.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    /// Numeric cell (only produced with dynamic typing enabled)
    Number(f64),
    /// Text cell, kept verbatim
    Text(String),
    /// Missing or empty cell
    #[default]
    Empty,
}

impl CellValue {
    /// Build a cell from a raw CSV field.
    ///
    /// Empty fields become [`CellValue::Empty`]. With `dynamic_typing`,
    /// fields that parse as finite numbers become [`CellValue::Number`].
    pub fn from_field(field: &str, dynamic_typing: bool) -> Self {
        if field.is_empty() {
            return CellValue::Empty;
        }

        if dynamic_typing {
            if let Ok(n) = field.trim().parse::<f64>() {
                if n.is_finite() {
                    return CellValue::Number(n);
                }
            }
        }

        CellValue::Text(field.to_string())
    }

    /// The raw string form used for equality filters and group keys.
    pub fn raw(&self) -> Cow<'_, str> {
        match self {
            CellValue::Text(s) => Cow::Borrowed(s.as_str()),
            CellValue::Number(n) => Cow::Owned(n.to_string()),
            CellValue::Empty => Cow::Borrowed(""),
        }
    }

    /// Returns true for missing or empty-text cells.
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.is_empty(),
            CellValue::Number(_) => false,
        }
    }

    /// Numeric value of the cell. Anything that does not parse counts as zero.
    pub fn as_number(&self) -> f64 {
        match self {
            CellValue::Number(n) if n.is_finite() => *n,
            CellValue::Number(_) | CellValue::Empty => 0.0,
            CellValue::Text(s) => coerce_number(s),
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::from_field(s, false)
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        if s.is_empty() {
            CellValue::Empty
        } else {
            CellValue::Text(s)
        }
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw())
    }
}

/// Parse a raw string as a float, degrading to `0.0` on failure.
///
/// Non-finite results (`NaN`, `inf`) also degrade to zero so that sums stay
/// finite and comparable.
pub fn coerce_number(raw: &str) -> f64 {
    match raw.trim().parse::<f64>() {
        Ok(n) if n.is_finite() => n,
        _ => 0.0,
    }
}

/// A single data row: column name to raw cell.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row {
    cells: BTreeMap<String, CellValue>,
}

impl Row {
    /// Creates an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<CellValue>) -> Self {
        self.insert(column, value);
        self
    }

    /// Sets a cell value.
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<CellValue>) {
        self.cells.insert(column.into(), value.into());
    }

    /// Returns the cell for a column, if present.
    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.cells.get(column)
    }

    /// Raw string for a column; missing columns read as empty.
    pub fn raw(&self, column: &str) -> Cow<'_, str> {
        self.get(column)
            .map(CellValue::raw)
            .unwrap_or(Cow::Borrowed(""))
    }

    /// Numeric value for a column; missing or malformed cells read as zero.
    pub fn number(&self, column: &str) -> f64 {
        self.get(column).map(CellValue::as_number).unwrap_or(0.0)
    }

    /// Returns true if the column holds a non-empty value.
    pub fn has_value(&self, column: &str) -> bool {
        self.get(column).is_some_and(|cell| !cell.is_empty())
    }

    /// Column names present in this row.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.keys().map(String::as_str)
    }
}

impl<K, V> FromIterator<(K, V)> for Row
where
    K: Into<String>,
    V: Into<CellValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (column, value) in iter {
            row.insert(column, value);
        }
        row
    }
}

/// An ordered, immutable table of rows loaded from one source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    /// Dataset name (as declared in the dashboard definition).
    pub name: String,
    /// Header-derived column order.
    pub columns: Vec<String>,
    /// Rows in source order.
    pub rows: Vec<Row>,
}

impl Dataset {
    /// Creates a dataset with an explicit header.
    pub fn new(name: impl Into<String>, columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self {
            name: name.into(),
            columns,
            rows,
        }
    }

    /// Creates a dataset whose columns are derived from the rows themselves.
    pub fn from_rows(name: impl Into<String>, rows: Vec<Row>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for row in &rows {
            for column in row.columns() {
                if !columns.iter().any(|c| c == column) {
                    columns.push(column.to_string());
                }
            }
        }
        Self::new(name, columns, rows)
    }

    /// A dataset sharing this one's name and header but holding `rows`.
    pub fn with_rows(&self, rows: Vec<Row>) -> Self {
        Self {
            name: self.name.clone(),
            columns: self.columns.clone(),
            rows,
        }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the dataset has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns true if the header (or any row) names this column.
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column) || self.rows.iter().any(|r| r.get(column).is_some())
    }
}

/// Equality constraints keyed by column.
///
/// An empty constraint and an absent key both mean "match all".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterSpec {
    constraints: BTreeMap<String, String>,
}

impl FilterSpec {
    /// Creates an unconstrained filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`FilterSpec::set`].
    pub fn with(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(column, value);
        self
    }

    /// Sets (or, with an empty value, lifts) the constraint on a column.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<String>) {
        self.constraints.insert(column.into(), value.into());
    }

    /// Removes the constraint on a column ("Select All").
    pub fn clear(&mut self, column: &str) {
        self.constraints.remove(column);
    }

    /// The active (non-empty) constraint on a column.
    pub fn constraint(&self, column: &str) -> Option<&str> {
        self.constraints
            .get(column)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Iterates over active constraints in column order.
    pub fn active(&self) -> impl Iterator<Item = (&str, &str)> {
        self.constraints
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns true if no constraint restricts rows.
    pub fn is_unconstrained(&self) -> bool {
        self.active().next().is_none()
    }

    /// Overlay `other` on top of this spec; `other` wins per column.
    pub fn merge(&mut self, other: &FilterSpec) {
        for (column, value) in &other.constraints {
            self.constraints.insert(column.clone(), value.clone());
        }
    }
}

impl fmt::Display for FilterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.active().map(|(k, v)| format!("{}={}", k, v)).collect();
        if parts.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", parts.join(", "))
        }
    }
}

/// The column that partitions rows into groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupKeySpec {
    /// Column whose raw value is the group label.
    pub column: String,
    /// Label for rows where the column is missing or empty.
    pub fallback: String,
}

impl GroupKeySpec {
    /// Group by `column`, using the default fallback label.
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            fallback: DEFAULT_FALLBACK_LABEL.to_string(),
        }
    }

    /// Override the fallback label.
    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = fallback.into();
        self
    }

    /// The group label for a row.
    pub fn label_for(&self, row: &Row) -> String {
        match row.get(&self.column) {
            Some(cell) if !cell.is_empty() => cell.raw().into_owned(),
            _ => self.fallback.clone(),
        }
    }
}

/// A reduction over a partition of rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Reducer {
    /// Sum of the numeric-coerced column
    Sum { column: String },
    /// Number of rows
    Count,
    /// Number of rows with a non-empty value not listed in `ignore`
    CountNonEmpty {
        column: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        ignore: Vec<String>,
    },
    /// Sum divided by row count
    Average { column: String },
    /// Share of the sum across all groups, in percent
    PercentOfTotal { column: String },
}

impl Reducer {
    /// Shorthand for [`Reducer::Sum`].
    pub fn sum(column: impl Into<String>) -> Self {
        Reducer::Sum {
            column: column.into(),
        }
    }

    /// Shorthand for [`Reducer::Average`].
    pub fn average(column: impl Into<String>) -> Self {
        Reducer::Average {
            column: column.into(),
        }
    }

    /// Shorthand for [`Reducer::PercentOfTotal`].
    pub fn percent_of_total(column: impl Into<String>) -> Self {
        Reducer::PercentOfTotal {
            column: column.into(),
        }
    }

    /// Shorthand for [`Reducer::CountNonEmpty`].
    pub fn count_non_empty(column: impl Into<String>, ignore: &[&str]) -> Self {
        Reducer::CountNonEmpty {
            column: column.into(),
            ignore: ignore.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// The column this reducer reads, if any.
    pub fn column(&self) -> Option<&str> {
        match self {
            Reducer::Sum { column }
            | Reducer::CountNonEmpty { column, .. }
            | Reducer::Average { column }
            | Reducer::PercentOfTotal { column } => Some(column),
            Reducer::Count => None,
        }
    }
}

impl fmt::Display for Reducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reducer::Sum { column } => write!(f, "sum({})", column),
            Reducer::Count => write!(f, "count"),
            Reducer::CountNonEmpty { column, .. } => write!(f, "count_non_empty({})", column),
            Reducer::Average { column } => write!(f, "average({})", column),
            Reducer::PercentOfTotal { column } => write!(f, "percent_of_total({})", column),
        }
    }
}

/// A reducer with the output key it is reported under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedReducer {
    /// Output key (series name).
    pub name: String,
    /// The reduction itself.
    #[serde(flatten)]
    pub reducer: Reducer,
}

impl NamedReducer {
    pub fn new(name: impl Into<String>, reducer: Reducer) -> Self {
        Self {
            name: name.into(),
            reducer,
        }
    }
}

/// The reducers applied to every group, in output order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregationSpec {
    /// Reducers, in output order.
    pub reducers: Vec<NamedReducer>,
    /// Reducer ranked by [`SortOrder::Descending`]; the first one when unset.
    pub sort_by: Option<String>,
}

impl AggregationSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a named reducer.
    pub fn with(mut self, name: impl Into<String>, reducer: Reducer) -> Self {
        self.reducers.push(NamedReducer::new(name, reducer));
        self
    }

    /// Sets the reducer used for descending order.
    pub fn sorted_by(mut self, name: impl Into<String>) -> Self {
        self.sort_by = Some(name.into());
        self
    }

    /// Index of the reducer that drives descending order.
    pub fn sort_index(&self) -> usize {
        self.sort_by
            .as_deref()
            .and_then(|name| self.reducers.iter().position(|r| r.name == name))
            .unwrap_or(0)
    }
}

impl From<Vec<NamedReducer>> for AggregationSpec {
    fn from(reducers: Vec<NamedReducer>) -> Self {
        Self {
            reducers,
            sort_by: None,
        }
    }
}

/// Ordering policy for aggregate series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// First-encountered order
    #[default]
    Encounter,
    /// Largest value first; ties keep encounter order
    Descending,
    /// Ascending by integer label ("3", "Week 3"); lexicographic otherwise
    NumericLabel,
    /// Ascending string order (ISO dates)
    Lexicographic,
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortOrder::Encounter => write!(f, "encounter"),
            SortOrder::Descending => write!(f, "descending"),
            SortOrder::NumericLabel => write!(f, "numeric label"),
            SortOrder::Lexicographic => write!(f, "lexicographic"),
        }
    }
}

/// One point of an aggregate series: a group label and its named values.
///
/// Serializes flat, as `{"label": ..., "<name>": value, ...}`.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesPoint {
    /// Group label.
    pub label: String,
    /// Reducer outputs, in spec order.
    pub values: Vec<(String, f64)>,
}

impl SeriesPoint {
    pub fn new(label: impl Into<String>, values: Vec<(String, f64)>) -> Self {
        Self {
            label: label.into(),
            values,
        }
    }

    /// Value of a named reducer.
    pub fn value(&self, name: &str) -> Option<f64> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    /// Value at a reducer index, zero if out of range.
    pub fn value_at(&self, index: usize) -> f64 {
        self.values.get(index).map(|(_, v)| *v).unwrap_or(0.0)
    }

    /// Sum of all values of this point.
    pub fn total(&self) -> f64 {
        self.values.iter().map(|(_, v)| v).sum()
    }
}

impl Serialize for SeriesPoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len() + 1))?;
        map.serialize_entry("label", &self.label)?;
        for (name, value) in &self.values {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Ordered aggregate output consumed by chart renderers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct AggregateSeries {
    pub points: Vec<SeriesPoint>,
}

impl AggregateSeries {
    pub fn new(points: Vec<SeriesPoint>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Point for a group label.
    pub fn get(&self, label: &str) -> Option<&SeriesPoint> {
        self.points.iter().find(|p| p.label == label)
    }

    /// Group labels in series order.
    pub fn labels(&self) -> Vec<&str> {
        self.points.iter().map(|p| p.label.as_str()).collect()
    }

    /// Values of one named reducer, in series order (missing reads as zero).
    pub fn values(&self, name: &str) -> Vec<f64> {
        self.points
            .iter()
            .map(|p| p.value(name).unwrap_or(0.0))
            .collect()
    }

    /// Sum of one named reducer across all groups.
    pub fn total(&self, name: &str) -> f64 {
        self.values(name).iter().sum()
    }

    /// Reducer names, taken from the first point.
    pub fn series_names(&self) -> Vec<&str> {
        self.points
            .first()
            .map(|p| p.values.iter().map(|(n, _)| n.as_str()).collect())
            .unwrap_or_default()
    }
}

/// Dropdown-style filter options for one column.
#[derive(Debug, Clone, Serialize)]
pub struct FilterOptions {
    /// Column name.
    pub column: String,
    /// Distinct non-empty values, first-encountered order.
    pub values: Vec<String>,
    /// Currently selected value, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected: Option<String>,
}

/// Per-dataset load and filter summary.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetSummary {
    /// Dataset name.
    pub name: String,
    /// Source path or URL.
    pub source: String,
    /// Rows loaded.
    pub total_rows: usize,
    /// Rows remaining after dataset-level filters.
    pub filtered_rows: usize,
    /// Column count.
    pub columns: usize,
    /// Active filters.
    pub filters: FilterSpec,
    /// Filter dropdown options.
    pub filter_options: Vec<FilterOptions>,
}

/// Metadata about the generated dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct ReportMetadata {
    /// Dashboard title.
    pub title: String,
    /// Generation timestamp.
    pub generated_at: DateTime<Utc>,
    /// Number of panels rendered.
    pub panel_count: usize,
    /// Time spent loading and evaluating, in seconds.
    pub duration_seconds: f64,
}

/// The complete dashboard report.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardReport {
    /// Metadata about the report.
    pub metadata: ReportMetadata,
    /// Loaded datasets.
    pub datasets: Vec<DatasetSummary>,
    /// Evaluated panels, in definition order.
    pub panels: Vec<PanelResult>,
}
