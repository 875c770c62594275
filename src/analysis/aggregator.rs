//! Tabular aggregation and filtering.
//!
//! Every chart on a dashboard is some combination of the same steps: keep the
//! rows that match the selected filters, partition them by a key column,
//! reduce each partition, and order the result. This module provides those
//! steps as pure functions over a [`Dataset`].
//!
//! None of these functions fail. Cells that do not parse as numbers count as
//! zero so that a single dirty value never blanks a whole dashboard.

use crate::models::{
    AggregateSeries, AggregationSpec, Dataset, FilterSpec, GroupKeySpec, Reducer, Row,
    SeriesPoint, SortOrder,
};
use std::collections::HashMap;
use tracing::debug;

/// Keep the rows matching every active constraint, in source order.
pub fn filter_rows(dataset: &Dataset, filters: &FilterSpec) -> Dataset {
    if filters.is_unconstrained() {
        return dataset.clone();
    }

    let rows: Vec<Row> = dataset
        .rows
        .iter()
        .filter(|row| row_matches(row, filters))
        .cloned()
        .collect();

    debug!(
        "Filtered '{}' by [{}]: {} of {} rows kept",
        dataset.name,
        filters,
        rows.len(),
        dataset.len()
    );

    dataset.with_rows(rows)
}

/// Returns true if the row satisfies every active constraint.
///
/// A missing or empty cell never matches a non-empty constraint.
pub fn row_matches(row: &Row, filters: &FilterSpec) -> bool {
    filters.active().all(|(column, wanted)| match row.get(column) {
        Some(cell) if !cell.is_empty() => cell.raw() == wanted,
        _ => false,
    })
}

/// Running state for one group.
struct Partition {
    label: String,
    rows: usize,
    sums: Vec<f64>,
    counts: Vec<usize>,
}

impl Partition {
    fn new(label: String, reducers: usize) -> Self {
        Self {
            label,
            rows: 0,
            sums: vec![0.0; reducers],
            counts: vec![0; reducers],
        }
    }

    fn absorb<'a>(&mut self, row: &Row, reducers: impl Iterator<Item = &'a Reducer>) {
        self.rows += 1;

        for (i, reducer) in reducers.enumerate() {
            match reducer {
                Reducer::Sum { column }
                | Reducer::Average { column }
                | Reducer::PercentOfTotal { column } => {
                    self.sums[i] = saturating_add(self.sums[i], row.number(column));
                }
                Reducer::CountNonEmpty { column, ignore } => {
                    let raw = row.raw(column);
                    if !raw.is_empty() && !ignore.iter().any(|skip| *skip == raw) {
                        self.counts[i] += 1;
                    }
                }
                Reducer::Count => {}
            }
        }
    }

    /// Final value of reducer `i`, given the sum of that reducer across all groups.
    fn value(&self, i: usize, reducer: &Reducer, whole: &Whole) -> f64 {
        match reducer {
            Reducer::Sum { .. } => self.sums[i],
            Reducer::Count => self.rows as f64,
            Reducer::CountNonEmpty { .. } => self.counts[i] as f64,
            Reducer::Average { .. } => {
                if self.rows == 0 {
                    0.0
                } else {
                    self.sums[i] / self.rows as f64
                }
            }
            Reducer::PercentOfTotal { .. } => whole.percent(self.sums[i]),
        }
    }
}

/// Sum of a set of parts, held relative to the largest part so that it stays
/// finite however many near-maximal parts are added.
struct Whole {
    scale: f64,
    scaled_sum: f64,
}

impl Whole {
    fn of(parts: &[f64]) -> Self {
        let scale = parts.iter().fold(0.0_f64, |max, part| max.max(part.abs()));
        if scale == 0.0 {
            return Self {
                scale: 1.0,
                scaled_sum: 0.0,
            };
        }

        Self {
            scale,
            scaled_sum: parts.iter().map(|part| part / scale).sum(),
        }
    }

    /// `part` as a percentage of the whole, zero when the whole is zero.
    fn percent(&self, part: f64) -> f64 {
        if self.scaled_sum == 0.0 {
            0.0
        } else {
            part / self.scale / self.scaled_sum * 100.0
        }
    }
}

/// Sums saturate at `f64::MAX` rather than overflowing to infinity.
fn saturating_add(a: f64, b: f64) -> f64 {
    (a + b).clamp(f64::MIN, f64::MAX)
}

/// Each value as a percentage of their total, in input order.
///
/// The shares add up to 100 unless the total is zero, in which case every
/// share is zero.
pub fn shares(values: &[f64]) -> Vec<f64> {
    let whole = Whole::of(values);
    values.iter().map(|v| whole.percent(*v)).collect()
}

fn percent_of(part: f64, whole: f64) -> f64 {
    if whole == 0.0 {
        0.0
    } else {
        part / whole * 100.0
    }
}

/// Partition rows by the group key and apply every reducer to each group.
///
/// Groups are discovered in source order; `order` then decides the final
/// ordering of the series.
pub fn group_and_reduce(
    dataset: &Dataset,
    key: &GroupKeySpec,
    aggregation: &AggregationSpec,
    order: SortOrder,
) -> AggregateSeries {
    let reducers = &aggregation.reducers;
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut partitions: Vec<Partition> = Vec::new();

    for row in &dataset.rows {
        let label = key.label_for(row);
        let slot = match index.get(&label) {
            Some(&slot) => slot,
            None => {
                let slot = partitions.len();
                index.insert(label.clone(), slot);
                partitions.push(Partition::new(label, reducers.len()));
                slot
            }
        };
        partitions[slot].absorb(row, reducers.iter().map(|r| &r.reducer));
    }

    let wholes: Vec<Whole> = (0..reducers.len())
        .map(|i| Whole::of(&partitions.iter().map(|p| p.sums[i]).collect::<Vec<_>>()))
        .collect();

    let mut points: Vec<SeriesPoint> = partitions
        .iter()
        .map(|partition| {
            let values = reducers
                .iter()
                .enumerate()
                .map(|(i, named)| {
                    let value = partition.value(i, &named.reducer, &wholes[i]);
                    (named.name.clone(), value)
                })
                .collect();
            SeriesPoint::new(partition.label.clone(), values)
        })
        .collect();

    let sort_index = aggregation.sort_index();
    order_points(&mut points, order, |p| p.value_at(sort_index));

    debug!(
        "Grouped '{}' by {}: {} groups, {} reducers, {} order",
        dataset.name,
        key.column,
        points.len(),
        reducers.len(),
        order
    );

    AggregateSeries::new(points)
}

/// Apply one reducer to the whole dataset, with no grouping.
pub fn summary_statistic(dataset: &Dataset, reducer: &Reducer) -> f64 {
    let mut whole = Partition::new(String::new(), 1);
    for row in &dataset.rows {
        whole.absorb(row, std::iter::once(reducer));
    }
    let total = Whole::of(&whole.sums);
    whole.value(0, reducer, &total)
}

/// `numerator / denominator * 100`, or zero when the denominator is zero.
pub fn ratio(numerator: f64, denominator: f64) -> f64 {
    percent_of(numerator, denominator)
}

/// Distinct non-empty raw values of a column, in first-encountered order.
pub fn distinct_values(dataset: &Dataset, column: &str) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();

    for row in &dataset.rows {
        if !row.has_value(column) {
            continue;
        }
        let raw = row.raw(column);
        if !seen.iter().any(|v| *v == raw) {
            seen.push(raw.into_owned());
        }
    }

    seen
}

/// Stacked-bar data: for every group, the sum of `value_column` split by the
/// values of `series_column`.
///
/// Series appear in first-encountered order and every point carries every
/// series (zero where a combination never occurs). Descending order ranks
/// groups by their total across series.
pub fn pivot(
    dataset: &Dataset,
    key: &GroupKeySpec,
    series_column: &str,
    value_column: &str,
    order: SortOrder,
) -> AggregateSeries {
    let series_key = GroupKeySpec::new(series_column).with_fallback(key.fallback.clone());
    let mut series_labels: Vec<String> = Vec::new();
    let mut groups: Vec<(String, HashMap<usize, f64>)> = Vec::new();

    for row in &dataset.rows {
        let group = key.label_for(row);
        let series = series_key.label_for(row);

        let series_slot = match series_labels.iter().position(|s| *s == series) {
            Some(slot) => slot,
            None => {
                series_labels.push(series);
                series_labels.len() - 1
            }
        };
        let group_slot = match groups.iter().position(|(label, _)| *label == group) {
            Some(slot) => slot,
            None => {
                groups.push((group, HashMap::new()));
                groups.len() - 1
            }
        };

        let sum = groups[group_slot].1.entry(series_slot).or_insert(0.0);
        *sum = saturating_add(*sum, row.number(value_column));
    }

    let mut points: Vec<SeriesPoint> = groups
        .into_iter()
        .map(|(label, sums)| {
            let values = series_labels
                .iter()
                .enumerate()
                .map(|(slot, name)| (name.clone(), sums.get(&slot).copied().unwrap_or(0.0)))
                .collect();
            SeriesPoint::new(label, values)
        })
        .collect();

    order_points(&mut points, order, SeriesPoint::total);

    debug!(
        "Pivoted '{}' by {} x {}: {} groups, {} series",
        dataset.name,
        key.column,
        series_column,
        points.len(),
        series_labels.len()
    );

    AggregateSeries::new(points)
}

/// Sort points in place. All sorts are stable.
fn order_points<F>(points: &mut [SeriesPoint], order: SortOrder, rank: F)
where
    F: Fn(&SeriesPoint) -> f64,
{
    match order {
        SortOrder::Encounter => {}
        SortOrder::Descending => {
            points.sort_by(|a, b| rank(b).total_cmp(&rank(a)));
        }
        SortOrder::NumericLabel => {
            let numbers: Option<Vec<i64>> = points.iter().map(|p| label_number(&p.label)).collect();
            match numbers {
                Some(numbers) => {
                    let mut keyed: Vec<(i64, SeriesPoint)> =
                        numbers.into_iter().zip(points.iter().cloned()).collect();
                    keyed.sort_by_key(|(n, _)| *n);
                    for (slot, (_, point)) in points.iter_mut().zip(keyed) {
                        *slot = point;
                    }
                }
                None => points.sort_by(|a, b| a.label.cmp(&b.label)),
            }
        }
        SortOrder::Lexicographic => {
            points.sort_by(|a, b| a.label.cmp(&b.label));
        }
    }
}

/// Integer value of a label such as `"3"`, `"Week 3"` or `"Level 2"`.
fn label_number(label: &str) -> Option<i64> {
    let label = label.trim();
    label
        .parse::<i64>()
        .ok()
        .or_else(|| label.split_whitespace().last()?.parse::<i64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CellValue;

    fn purchases() -> Dataset {
        Dataset::from_rows(
            "contest2",
            vec![
                Row::new()
                    .with("Contest_ID", "C1")
                    .with("Purchase_Value", "100"),
                Row::new()
                    .with("Contest_ID", "C1")
                    .with("Purchase_Value", "bad"),
                Row::new()
                    .with("Contest_ID", "C2")
                    .with("Purchase_Value", "50"),
            ],
        )
    }

    fn revenue() -> AggregationSpec {
        AggregationSpec::new().with("revenue", Reducer::sum("Purchase_Value"))
    }

    #[test]
    fn test_filter_identity_when_unconstrained() {
        let data = purchases();
        let spec = FilterSpec::new().with("Contest_ID", "").with("Age_Group", "");

        assert_eq!(filter_rows(&data, &spec), data);
    }

    #[test]
    fn test_filter_single_constraint() {
        let data = purchases();
        let filtered = filter_rows(&data, &FilterSpec::new().with("Contest_ID", "C2"));

        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered.rows[0], data.rows[2]);
        assert_eq!(filtered.columns, data.columns);
    }

    #[test]
    fn test_filter_missing_column_never_matches() {
        let data = purchases();
        let filtered = filter_rows(&data, &FilterSpec::new().with("Country", "India"));
        assert!(filtered.is_empty());
    }

    #[test]
    fn test_filter_is_case_sensitive() {
        let data = purchases();
        let filtered = filter_rows(&data, &FilterSpec::new().with("Contest_ID", "c2"));
        assert!(filtered.is_empty());
    }

    #[test]
    fn test_filter_matches_numeric_cells_by_raw_form() {
        let data = Dataset::from_rows(
            "weeks",
            vec![
                Row::new().with("Week", CellValue::Number(3.0)),
                Row::new().with("Week", CellValue::Number(4.0)),
            ],
        );
        let filtered = filter_rows(&data, &FilterSpec::new().with("Week", "3"));
        assert_eq!(filtered.len(), 1);
    }

    #[test]
    fn test_group_sum_with_dirty_value() {
        let series = group_and_reduce(
            &purchases(),
            &GroupKeySpec::new("Contest_ID"),
            &revenue(),
            SortOrder::Encounter,
        );

        assert_eq!(series.labels(), vec!["C1", "C2"]);
        assert_eq!(series.get("C1").unwrap().value("revenue"), Some(100.0));
        assert_eq!(series.get("C2").unwrap().value("revenue"), Some(50.0));
    }

    #[test]
    fn test_partition_conservation() {
        let data = purchases();
        let series = group_and_reduce(
            &data,
            &GroupKeySpec::new("Contest_ID"),
            &revenue(),
            SortOrder::Descending,
        );

        assert_eq!(
            series.total("revenue"),
            summary_statistic(&data, &Reducer::sum("Purchase_Value"))
        );
    }

    #[test]
    fn test_count_and_average() {
        let spec = AggregationSpec::new()
            .with("rows", Reducer::Count)
            .with("avg", Reducer::average("Purchase_Value"));
        let series = group_and_reduce(
            &purchases(),
            &GroupKeySpec::new("Contest_ID"),
            &spec,
            SortOrder::Encounter,
        );

        let c1 = series.get("C1").unwrap();
        assert_eq!(c1.value("rows"), Some(2.0));
        assert_eq!(c1.value("avg"), Some(50.0));
    }

    #[test]
    fn test_average_of_empty_dataset_is_zero() {
        let empty = Dataset::default();
        assert_eq!(summary_statistic(&empty, &Reducer::average("Purchase_Value")), 0.0);
        assert_eq!(summary_statistic(&empty, &Reducer::Count), 0.0);
    }

    #[test]
    fn test_percent_of_total_sums_to_hundred() {
        let spec = AggregationSpec::new().with("share", Reducer::percent_of_total("Purchase_Value"));
        let series = group_and_reduce(
            &purchases(),
            &GroupKeySpec::new("Contest_ID"),
            &spec,
            SortOrder::Encounter,
        );

        assert!((series.total("share") - 100.0).abs() < 1e-9);
        assert!((series.get("C1").unwrap().value_at(0) - 66.666_666_666).abs() < 1e-6);
    }

    #[test]
    fn test_percent_of_total_zero_when_global_sum_zero() {
        let data = Dataset::from_rows(
            "zeros",
            vec![
                Row::new().with("k", "a").with("v", "0"),
                Row::new().with("k", "b").with("v", "N/A"),
            ],
        );
        let spec = AggregationSpec::new().with("share", Reducer::percent_of_total("v"));
        let series = group_and_reduce(&data, &GroupKeySpec::new("k"), &spec, SortOrder::Encounter);

        assert_eq!(series.values("share"), vec![0.0, 0.0]);
        assert_eq!(summary_statistic(&data, &Reducer::percent_of_total("v")), 0.0);
    }

    #[test]
    fn test_sums_saturate_instead_of_overflowing() {
        let data = Dataset::from_rows(
            "huge",
            vec![
                Row::new().with("k", "a").with("v", "1e308"),
                Row::new().with("k", "a").with("v", "1e308"),
                Row::new().with("k", "b").with("v", "1e308"),
            ],
        );
        let spec = AggregationSpec::new()
            .with("sum", Reducer::sum("v"))
            .with("share", Reducer::percent_of_total("v"));
        let series = group_and_reduce(&data, &GroupKeySpec::new("k"), &spec, SortOrder::Encounter);

        assert_eq!(series.get("a").unwrap().value("sum"), Some(f64::MAX));
        let shares = series.values("share");
        assert!(shares.iter().all(|s| s.is_finite()));
        assert!((shares.iter().sum::<f64>() - 100.0).abs() < 1e-9);
        assert_eq!(summary_statistic(&data, &Reducer::percent_of_total("v")), 100.0);
        assert_eq!(summary_statistic(&data, &Reducer::sum("v")), f64::MAX);
    }

    #[test]
    fn test_shares() {
        let split = shares(&[15.0, 5.0]);
        assert!((split[0] - 75.0).abs() < 1e-9);
        assert!((split[1] - 25.0).abs() < 1e-9);
        assert_eq!(shares(&[0.0, 0.0]), vec![0.0, 0.0]);
        assert!(shares(&[]).is_empty());
        let huge = shares(&[f64::MAX, f64::MAX]);
        assert_eq!(huge, vec![50.0, 50.0]);
    }

    #[test]
    fn test_fallback_label_for_missing_keys() {
        let data = Dataset::from_rows(
            "fans",
            vec![
                Row::new().with("Fan_Level", "Level 1").with("Week_Logins", "4"),
                Row::new().with("Week_Logins", "6"),
                Row::new().with("Fan_Level", "").with("Week_Logins", "2"),
            ],
        );
        let spec = AggregationSpec::new().with("logins", Reducer::average("Week_Logins"));
        let series = group_and_reduce(&data, &GroupKeySpec::new("Fan_Level"), &spec, SortOrder::Encounter);

        assert_eq!(series.labels(), vec!["Level 1", "Unknown"]);
        assert_eq!(series.get("Unknown").unwrap().value("logins"), Some(4.0));
    }

    #[test]
    fn test_count_non_empty_with_ignore_list() {
        let data = Dataset::from_rows(
            "fans",
            vec![
                Row::new().with("Fan_Level", "Level 1").with("Purchase_Item", "Jersey"),
                Row::new().with("Fan_Level", "Level 1").with("Purchase_Item", "None"),
                Row::new().with("Fan_Level", "Level 1").with("Purchase_Item", ""),
                Row::new().with("Fan_Level", "Level 1").with("Purchase_Item", "Cap"),
            ],
        );
        let spec = AggregationSpec::new()
            .with("purchases", Reducer::count_non_empty("Purchase_Item", &["None"]));
        let series = group_and_reduce(&data, &GroupKeySpec::new("Fan_Level"), &spec, SortOrder::Encounter);

        assert_eq!(series.values("purchases"), vec![2.0]);
    }

    #[test]
    fn test_descending_is_stable() {
        let data = Dataset::from_rows(
            "devices",
            vec![
                Row::new().with("Device", "Tablet"),
                Row::new().with("Device", "Mobile"),
                Row::new().with("Device", "Desktop"),
                Row::new().with("Device", "Mobile"),
            ],
        );
        let spec = AggregationSpec::new().with("users", Reducer::Count);
        let series = group_and_reduce(&data, &GroupKeySpec::new("Device"), &spec, SortOrder::Descending);

        assert_eq!(series.labels(), vec!["Mobile", "Tablet", "Desktop"]);
    }

    #[test]
    fn test_descending_by_named_reducer() {
        let data = Dataset::from_rows(
            "sales",
            vec![
                Row::new().with("Item", "Cap").with("Price", "10"),
                Row::new().with("Item", "Cap").with("Price", "10"),
                Row::new().with("Item", "Jersey").with("Price", "80"),
            ],
        );
        let spec = AggregationSpec::new()
            .with("orders", Reducer::Count)
            .with("revenue", Reducer::sum("Price"))
            .sorted_by("revenue");
        let series = group_and_reduce(&data, &GroupKeySpec::new("Item"), &spec, SortOrder::Descending);

        assert_eq!(series.labels(), vec!["Jersey", "Cap"]);
    }

    #[test]
    fn test_numeric_label_order() {
        let data = Dataset::from_rows(
            "weeks",
            vec![
                Row::new().with("Week", "Week 10"),
                Row::new().with("Week", "Week 2"),
                Row::new().with("Week", "Week 1"),
            ],
        );
        let spec = AggregationSpec::new().with("rows", Reducer::Count);
        let series = group_and_reduce(&data, &GroupKeySpec::new("Week"), &spec, SortOrder::NumericLabel);

        assert_eq!(series.labels(), vec!["Week 1", "Week 2", "Week 10"]);
    }

    #[test]
    fn test_numeric_label_falls_back_to_lexicographic() {
        let data = Dataset::from_rows(
            "levels",
            vec![
                Row::new().with("Fan_Level", "Level 2"),
                Row::new().with("Fan_Level", "Gold"),
                Row::new().with("Fan_Level", "Level 1"),
            ],
        );
        let spec = AggregationSpec::new().with("rows", Reducer::Count);
        let series = group_and_reduce(&data, &GroupKeySpec::new("Fan_Level"), &spec, SortOrder::NumericLabel);

        assert_eq!(series.labels(), vec!["Gold", "Level 1", "Level 2"]);
    }

    #[test]
    fn test_lexicographic_dates() {
        let data = Dataset::from_rows(
            "daily",
            vec![
                Row::new().with("Date", "2024-03-02").with("Hours", "1.5"),
                Row::new().with("Date", "2024-03-01").with("Hours", "2"),
                Row::new().with("Date", "2024-03-02").with("Hours", "0.5"),
            ],
        );
        let spec = AggregationSpec::new().with("hours", Reducer::sum("Hours"));
        let series = group_and_reduce(&data, &GroupKeySpec::new("Date"), &spec, SortOrder::Lexicographic);

        assert_eq!(series.labels(), vec!["2024-03-01", "2024-03-02"]);
        assert_eq!(series.values("hours"), vec![2.0, 2.0]);
    }

    #[test]
    fn test_group_and_reduce_is_deterministic() {
        let data = purchases();
        let key = GroupKeySpec::new("Contest_ID");
        let first = group_and_reduce(&data, &key, &revenue(), SortOrder::Descending);
        let second = group_and_reduce(&data, &key, &revenue(), SortOrder::Descending);
        assert_eq!(first, second);
    }

    #[test]
    fn test_ratio() {
        assert_eq!(ratio(25.0, 100.0), 25.0);
        assert_eq!(ratio(10.0, 0.0), 0.0);
    }

    #[test]
    fn test_distinct_values() {
        let data = Dataset::from_rows(
            "contest2",
            vec![
                Row::new().with("Age_Group", "18-25"),
                Row::new().with("Age_Group", ""),
                Row::new().with("Age_Group", "26-35"),
                Row::new().with("Age_Group", "18-25"),
            ],
        );
        assert_eq!(distinct_values(&data, "Age_Group"), vec!["18-25", "26-35"]);
        assert!(distinct_values(&data, "Missing").is_empty());
    }

    #[test]
    fn test_pivot_fills_missing_combinations() {
        let data = Dataset::from_rows(
            "contest2",
            vec![
                Row::new()
                    .with("Contest_ID", "C1")
                    .with("Item_Purchased", "Jersey")
                    .with("Purchase_Value", "100"),
                Row::new()
                    .with("Contest_ID", "C2")
                    .with("Item_Purchased", "Cap")
                    .with("Purchase_Value", "40"),
                Row::new()
                    .with("Contest_ID", "C2")
                    .with("Item_Purchased", "Jersey")
                    .with("Purchase_Value", "70"),
            ],
        );
        let series = pivot(
            &data,
            &GroupKeySpec::new("Contest_ID"),
            "Item_Purchased",
            "Purchase_Value",
            SortOrder::Descending,
        );

        assert_eq!(series.labels(), vec!["C2", "C1"]);
        assert_eq!(series.series_names(), vec!["Jersey", "Cap"]);
        assert_eq!(series.get("C1").unwrap().value("Cap"), Some(0.0));
        assert_eq!(series.get("C2").unwrap().total(), 110.0);
    }
}
