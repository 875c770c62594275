//! Panel evaluation.
//!
//! Turns the panel definitions of a [`Config`] into [`PanelResult`]s by
//! running the aggregator over the loaded datasets. Filters are layered in a
//! fixed order: dataset filters from the definition, then command-line
//! overrides, then panel filters.

use crate::analysis::{
    distinct_values, filter_rows, group_and_reduce, pivot, ratio, shares, summary_statistic,
    DrillDown, DrillError, DrillPath, DrillView,
};
use crate::config::{Config, DatasetConfig, PanelConfig, PanelKind};
use crate::dataset::Datasets;
use crate::models::{
    AggregateSeries, Dataset, DatasetSummary, FilterOptions, FilterSpec, Reducer,
};
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Root label for drill-down panels that do not set one.
const DEFAULT_ROOT_LABEL: &str = "Total";

/// Errors in a panel definition, reported before anything is rendered.
#[derive(Debug, Error)]
pub enum PanelError {
    #[error("panel '{panel}' refers to unknown dataset '{dataset}'")]
    UnknownDataset { panel: String, dataset: String },

    #[error("panel '{panel}' ({kind}) requires `{field}`")]
    MissingField {
        panel: String,
        kind: PanelKind,
        field: &'static str,
    },

    #[error("ratio '{ratio}' on panel '{panel}' refers to unknown card '{card}'")]
    UnknownCard {
        panel: String,
        ratio: String,
        card: String,
    },

    #[error("table panel '{panel}' shows unknown column '{column}'")]
    UnknownColumn { panel: String, column: String },

    #[error("drill-down panel '{panel}': {source}")]
    Drill {
        panel: String,
        #[source]
        source: DrillError,
    },
}

/// A filter given on the command line, optionally scoped to one dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterOverride {
    /// Dataset the filter is limited to; `None` means every dataset with the column.
    pub dataset: Option<String>,
    /// Column constrained.
    pub column: String,
    /// Required value; empty lifts the constraint.
    pub value: String,
}

impl FilterOverride {
    /// Returns true if this override applies to `dataset`.
    pub fn applies_to(&self, dataset: &Dataset) -> bool {
        match self.dataset {
            Some(ref name) => *name == dataset.name,
            None => dataset.has_column(&self.column),
        }
    }
}

/// A drill-down path given on the command line, optionally scoped to one panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrillTarget {
    /// Panel title (case-insensitive); `None` means every drill-down panel.
    pub panel: Option<String>,
    /// Labels to select, from the root down.
    pub path: DrillPath,
}

impl DrillTarget {
    /// An unscoped path.
    pub fn new(path: DrillPath) -> Self {
        Self { panel: None, path }
    }

    /// A path for the panel titled `panel`.
    pub fn for_panel(panel: impl Into<String>, path: DrillPath) -> Self {
        Self {
            panel: Some(panel.into()),
            path,
        }
    }
}

impl fmt::Display for DrillTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.panel {
            Some(ref panel) => write!(f, "{}: {}", panel, self.path),
            None => write!(f, "{}", self.path),
        }
    }
}

/// Per-run evaluation state: the selected filters and drill-down positions.
#[derive(Debug, Clone, Default)]
pub struct EvalContext {
    /// Command-line filter overrides, in the order given.
    pub overrides: Vec<FilterOverride>,
    /// Drill-down paths, in the order given.
    pub drill: Vec<DrillTarget>,
}

impl EvalContext {
    /// The drill target for a panel: the last one scoped to its title,
    /// else the last unscoped one.
    pub fn drill_for(&self, panel: &PanelConfig) -> Option<&DrillTarget> {
        self.drill
            .iter()
            .rev()
            .find(|t| t.panel.as_deref().is_some_and(|title| panel.matches_title(title)))
            .or_else(|| self.drill.iter().rev().find(|t| t.panel.is_none()))
    }
}

/// A summary number on a stat panel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatCard {
    /// Card label.
    pub label: String,
    /// Value.
    pub value: f64,
    /// The value is a percentage.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub percent: bool,
}

/// The leading rows of a filtered dataset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableView {
    /// Columns shown, in display order.
    pub columns: Vec<String>,
    /// Raw cell strings, one vector per row.
    pub rows: Vec<Vec<String>>,
    /// Rows before truncation.
    pub total_rows: usize,
    /// True when rows were cut off.
    pub truncated: bool,
}

impl TableView {
    /// The first `limit` rows of `dataset`, restricted to `columns`.
    ///
    /// An empty `columns` shows the whole header in source order.
    pub fn from_dataset(dataset: &Dataset, columns: &[String], limit: usize) -> Self {
        let columns = if columns.is_empty() {
            dataset.columns.clone()
        } else {
            columns.to_vec()
        };

        let rows = dataset
            .rows
            .iter()
            .take(limit)
            .map(|row| {
                columns
                    .iter()
                    .map(|column| row.raw(column).into_owned())
                    .collect()
            })
            .collect();

        Self {
            columns,
            rows,
            total_rows: dataset.len(),
            truncated: dataset.len() > limit,
        }
    }
}

/// What a panel shows.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PanelBody {
    Cards { cards: Vec<StatCard> },
    Series {
        series: AggregateSeries,
        /// Pie panels: each group's share of the first reducer, unless that
        /// reducer is already a percentage.
        #[serde(skip_serializing_if = "Option::is_none")]
        shares: Option<Vec<f64>>,
    },
    Table { table: TableView },
    DrillDown { view: DrillView },
}

/// An evaluated panel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PanelResult {
    /// Panel title.
    pub title: String,
    /// Presentation kind.
    pub kind: PanelKind,
    /// Dataset the panel read.
    pub dataset: String,
    /// Filters in effect.
    pub filters: FilterSpec,
    /// Rows left after filtering.
    pub rows_considered: usize,
    /// Display-only divisor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    /// Panel content.
    #[serde(flatten)]
    pub body: PanelBody,
}

/// Filters in effect for a dataset, before any panel filters.
pub fn dataset_filters(
    config: &DatasetConfig,
    dataset: &Dataset,
    overrides: &[FilterOverride],
) -> FilterSpec {
    let mut filters = config.filters.clone();
    for filter in overrides.iter().filter(|f| f.applies_to(dataset)) {
        filters.set(filter.column.clone(), filter.value.clone());
    }
    filters
}

/// Filters in effect for one panel.
pub fn effective_filters(
    config: &DatasetConfig,
    dataset: &Dataset,
    overrides: &[FilterOverride],
    panel: &PanelConfig,
) -> FilterSpec {
    let mut filters = dataset_filters(config, dataset, overrides);
    filters.merge(&panel.filters);
    filters
}

/// Evaluate every panel of the dashboard, in definition order.
pub fn evaluate(
    config: &Config,
    datasets: &Datasets,
    ctx: &EvalContext,
) -> Result<Vec<PanelResult>, PanelError> {
    let results = config
        .panels
        .iter()
        .map(|panel| evaluate_panel(config, panel, datasets, ctx))
        .collect::<Result<Vec<_>, _>>()?;

    info!("Evaluated {} panels", results.len());
    Ok(results)
}

/// Evaluate one panel.
pub fn evaluate_panel(
    config: &Config,
    panel: &PanelConfig,
    datasets: &Datasets,
    ctx: &EvalContext,
) -> Result<PanelResult, PanelError> {
    let unknown_dataset = || PanelError::UnknownDataset {
        panel: panel.title.clone(),
        dataset: panel.dataset.clone(),
    };
    let dataset_config = config.dataset(&panel.dataset).ok_or_else(unknown_dataset)?;
    let dataset = datasets.get(&panel.dataset).ok_or_else(unknown_dataset)?;

    let filters = effective_filters(dataset_config, dataset, &ctx.overrides, panel);
    let rows = filter_rows(dataset, &filters);
    let fallback = panel.fallback(&config.general);

    debug!(
        "Evaluating panel '{}' ({}) over {} rows",
        panel.title,
        panel.kind,
        rows.len()
    );

    let missing = |field: &'static str| PanelError::MissingField {
        panel: panel.title.clone(),
        kind: panel.kind,
        field,
    };

    let body = match panel.kind {
        PanelKind::Stat => PanelBody::Cards {
            cards: stat_cards(panel, &rows)?,
        },
        PanelKind::Pie | PanelKind::Bar | PanelKind::Line => {
            let key = panel
                .group_key(&config.general)
                .ok_or_else(|| missing("group_by"))?;
            let aggregation = panel.aggregation();
            let series = group_and_reduce(&rows, &key, &aggregation, panel.order);
            let pie_shares = match aggregation.reducers.first() {
                Some(first)
                    if panel.kind == PanelKind::Pie
                        && !matches!(first.reducer, Reducer::PercentOfTotal { .. }) =>
                {
                    Some(shares(&series.values(&first.name)))
                }
                _ => None,
            };
            PanelBody::Series {
                series,
                shares: pie_shares,
            }
        }
        PanelKind::Stacked => {
            let key = panel
                .group_key(&config.general)
                .ok_or_else(|| missing("group_by"))?;
            let series = match panel.stack_by {
                Some(ref stack_by) => {
                    let value_column = panel
                        .value_column
                        .as_deref()
                        .ok_or_else(|| missing("value_column"))?;
                    pivot(&rows, &key, stack_by, value_column, panel.order)
                }
                None => group_and_reduce(&rows, &key, &panel.aggregation(), panel.order),
            };
            PanelBody::Series {
                series,
                shares: None,
            }
        }
        PanelKind::Table => {
            if let Some(column) = panel.columns.iter().find(|c| !dataset.has_column(c)) {
                return Err(PanelError::UnknownColumn {
                    panel: panel.title.clone(),
                    column: column.clone(),
                });
            }
            let limit = config.general.table_rows;
            PanelBody::Table {
                table: TableView::from_dataset(&rows, &panel.columns, limit),
            }
        }
        PanelKind::Drilldown => {
            if panel.levels.is_empty() {
                return Err(missing("levels"));
            }
            let root_label = panel.root_label.as_deref().unwrap_or(DEFAULT_ROOT_LABEL);
            let drill = DrillDown::new(root_label, panel.levels.clone());
            let drill = match ctx.drill_for(panel) {
                Some(target) if target.panel.is_none() && target.path.len() > panel.levels.len() => {
                    warn!(
                        "Drill path '{}' is deeper than panel '{}' ({} levels); showing its root",
                        target.path,
                        panel.title,
                        panel.levels.len()
                    );
                    drill
                }
                Some(target) => drill.with_path(&target.path).map_err(|source| PanelError::Drill {
                    panel: panel.title.clone(),
                    source,
                })?,
                None => drill,
            };
            PanelBody::DrillDown {
                view: drill.view(&rows, fallback),
            }
        }
    };

    Ok(PanelResult {
        title: panel.title.clone(),
        kind: panel.kind,
        dataset: panel.dataset.clone(),
        filters,
        rows_considered: rows.len(),
        scale: panel.scale,
        body,
    })
}

/// Summary cards for a stat panel: one per reducer, then one per ratio.
fn stat_cards(panel: &PanelConfig, rows: &Dataset) -> Result<Vec<StatCard>, PanelError> {
    let mut cards: Vec<StatCard> = panel
        .aggregation()
        .reducers
        .iter()
        .map(|named| StatCard {
            label: named.name.clone(),
            value: summary_statistic(rows, &named.reducer),
            percent: matches!(named.reducer, Reducer::PercentOfTotal { .. }),
        })
        .collect();

    for spec in &panel.ratios {
        let lookup = |name: &str| {
            cards
                .iter()
                .find(|card| card.label == name)
                .map(|card| card.value)
                .ok_or_else(|| PanelError::UnknownCard {
                    panel: panel.title.clone(),
                    ratio: spec.name.clone(),
                    card: name.to_string(),
                })
        };
        let numerator = lookup(&spec.numerator)?;
        let denominator = lookup(&spec.denominator)?;

        cards.push(StatCard {
            label: spec.name.clone(),
            value: ratio(numerator, denominator),
            percent: true,
        });
    }

    Ok(cards)
}

/// Row counts, active filters and filter options for every loaded dataset.
pub fn summarize_datasets(
    config: &Config,
    datasets: &Datasets,
    ctx: &EvalContext,
) -> Vec<DatasetSummary> {
    config
        .datasets
        .iter()
        .filter_map(|dataset_config| {
            let dataset = datasets.get(&dataset_config.name)?;
            let filters = dataset_filters(dataset_config, dataset, &ctx.overrides);
            let filtered = filter_rows(dataset, &filters);

            let filter_options = dataset_config
                .filter_columns
                .iter()
                .map(|column| FilterOptions {
                    column: column.clone(),
                    values: distinct_values(dataset, column),
                    selected: filters.constraint(column).map(String::from),
                })
                .collect();

            Some(DatasetSummary {
                name: dataset.name.clone(),
                source: dataset_config.source.clone(),
                total_rows: dataset.len(),
                filtered_rows: filtered.len(),
                columns: dataset.columns.len(),
                filters,
                filter_options,
            })
        })
        .collect()
}
