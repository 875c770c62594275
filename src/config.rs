//! Configuration file handling.
//!
//! This module handles loading and merging the dashboard definition from
//! `.tallyboard.toml` files: general settings, the datasets to load, and the
//! panels to evaluate against them.

use crate::models::{
    AggregationSpec, FilterSpec, GroupKeySpec, NamedReducer, Reducer, SortOrder,
    DEFAULT_FALLBACK_LABEL,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Default dashboard definition file name.
pub const DEFAULT_CONFIG_FILE: &str = ".tallyboard.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Datasets to load.
    #[serde(default)]
    pub datasets: Vec<DatasetConfig>,

    /// Panels to evaluate, in display order.
    #[serde(default)]
    pub panels: Vec<PanelConfig>,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Dashboard title.
    #[serde(default = "default_title")]
    pub title: String,

    /// Default output file path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,

    /// Directory relative dataset sources are resolved against.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Group label for rows whose key is missing or empty.
    #[serde(default = "default_fallback_label")]
    pub fallback_label: String,

    /// Maximum rows rendered by table panels.
    #[serde(default = "default_table_rows")]
    pub table_rows: usize,

    /// Timeout for remote dataset fetches, in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            title: default_title(),
            output: default_output(),
            verbose: false,
            data_dir: default_data_dir(),
            fallback_label: default_fallback_label(),
            table_rows: default_table_rows(),
            timeout_seconds: default_timeout(),
        }
    }
}

fn default_title() -> String {
    "Dashboard".to_string()
}

fn default_output() -> String {
    "dashboard_report.md".to_string()
}

fn default_data_dir() -> String {
    ".".to_string()
}

fn default_fallback_label() -> String {
    DEFAULT_FALLBACK_LABEL.to_string()
}

fn default_table_rows() -> usize {
    20
}

fn default_timeout() -> u64 {
    30
}

/// A CSV dataset to load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Name panels refer to the dataset by.
    pub name: String,

    /// File path (relative to `data_dir`) or `http(s)` URL.
    pub source: String,

    /// Parse numeric-looking cells as numbers.
    #[serde(default)]
    pub dynamic_typing: bool,

    /// Columns offered as filter dropdowns.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filter_columns: Vec<String>,

    /// Filters applied to every panel reading this dataset.
    #[serde(default, skip_serializing_if = "FilterSpec::is_unconstrained")]
    pub filters: FilterSpec,
}

/// How a panel presents its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PanelKind {
    /// Scalar summary cards
    Stat,
    /// Share of a whole per group
    Pie,
    /// One bar per group
    #[default]
    Bar,
    /// Ordered series, usually over time
    Line,
    /// Several series per group
    Stacked,
    /// The filtered rows themselves
    Table,
    /// Hierarchical counts
    Drilldown,
}

impl fmt::Display for PanelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PanelKind::Stat => write!(f, "stat"),
            PanelKind::Pie => write!(f, "pie"),
            PanelKind::Bar => write!(f, "bar"),
            PanelKind::Line => write!(f, "line"),
            PanelKind::Stacked => write!(f, "stacked"),
            PanelKind::Table => write!(f, "table"),
            PanelKind::Drilldown => write!(f, "drilldown"),
        }
    }
}

/// A derived percentage card on a stat panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatioConfig {
    /// Card label.
    pub name: String,
    /// Reducer name used as numerator.
    pub numerator: String,
    /// Reducer name used as denominator.
    pub denominator: String,
}

/// One dashboard panel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PanelConfig {
    /// Panel title.
    pub title: String,

    /// Dataset the panel reads.
    pub dataset: String,

    /// Presentation kind.
    #[serde(default)]
    pub kind: PanelKind,

    /// Grouping column (pie, bar, line, stacked).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<String>,

    /// Series ordering.
    #[serde(default)]
    pub order: SortOrder,

    /// Reducer ranked by descending order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<String>,

    /// Display-only divisor (e.g. 1000 to show thousands).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,

    /// Column whose values become the stacked series.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_by: Option<String>,

    /// Column summed into each stacked series.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_column: Option<String>,

    /// Drill-down hierarchy columns.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub levels: Vec<String>,

    /// Drill-down root node label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_label: Option<String>,

    /// Group label for empty keys, overriding `general.fallback_label`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_label: Option<String>,

    /// Columns shown by a table panel, in order. Empty shows every column.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,

    /// Filters applied to this panel only.
    #[serde(default, skip_serializing_if = "FilterSpec::is_unconstrained")]
    pub filters: FilterSpec,

    /// Reducers, in output order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reducers: Vec<NamedReducer>,

    /// Derived percentage cards (stat panels).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ratios: Vec<RatioConfig>,
}

impl PanelConfig {
    /// The aggregation to run. A panel without reducers counts rows.
    pub fn aggregation(&self) -> AggregationSpec {
        let reducers = if self.reducers.is_empty() {
            vec![NamedReducer::new("count", Reducer::Count)]
        } else {
            self.reducers.clone()
        };

        AggregationSpec {
            reducers,
            sort_by: self.sort_by.clone(),
        }
    }

    /// Label for empty keys: the panel's own, else the general one.
    pub fn fallback<'a>(&'a self, general: &'a GeneralConfig) -> &'a str {
        self.fallback_label
            .as_deref()
            .unwrap_or(general.fallback_label.as_str())
    }

    /// The grouping key, if the panel declares one.
    pub fn group_key(&self, general: &GeneralConfig) -> Option<GroupKeySpec> {
        self.group_by
            .as_ref()
            .map(|column| GroupKeySpec::new(column.clone()).with_fallback(self.fallback(general)))
    }

    /// Case-insensitive title match.
    pub fn matches_title(&self, title: &str) -> bool {
        self.title.eq_ignore_ascii_case(title.trim())
    }
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// Filters and the drill path are not merged here; they are applied
    /// at evaluation time once dataset columns are known.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref output) = args.output {
            self.general.output = output.display().to_string();
        }

        if let Some(ref data_dir) = args.data_dir {
            self.general.data_dir = data_dir.display().to_string();
        }

        if let Some(timeout) = args.timeout {
            self.general.timeout_seconds = timeout;
        }

        if !args.panel.is_empty() {
            self.panels
                .retain(|panel| args.panel.iter().any(|title| panel.matches_title(title)));
        }

        // Flags always override
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Log level once the file's `verbose` setting is merged with the flags.
    ///
    /// `--quiet` always wins.
    pub fn log_level(&self, args: &crate::cli::Args) -> tracing::Level {
        if !args.quiet && self.general.verbose {
            tracing::Level::DEBUG
        } else {
            args.log_level()
        }
    }

    /// Look up a dataset definition by name.
    pub fn dataset(&self, name: &str) -> Option<&DatasetConfig> {
        self.datasets.iter().find(|d| d.name == name)
    }

    /// An example dashboard over the contest and micro-market datasets.
    pub fn example() -> Self {
        let contest = DatasetConfig {
            name: "contest2".to_string(),
            source: "contest2.csv".to_string(),
            dynamic_typing: false,
            filter_columns: vec!["Contest_ID".to_string(), "Age_Group".to_string()],
            filters: FilterSpec::new(),
        };

        let funnel = DatasetConfig {
            name: "micromarket3".to_string(),
            source: "micromarket3.csv".to_string(),
            dynamic_typing: true,
            ..DatasetConfig::default()
        };

        let fans = DatasetConfig {
            name: "micromarket2".to_string(),
            source: "micromarket2.csv".to_string(),
            filter_columns: vec!["Device".to_string(), "Location".to_string()],
            ..DatasetConfig::default()
        };

        let panels = vec![
            PanelConfig {
                title: "Contest Overview".to_string(),
                dataset: "contest2".to_string(),
                kind: PanelKind::Stat,
                reducers: vec![
                    NamedReducer::new("Revenue", Reducer::sum("Purchase_Value")),
                    NamedReducer::new(
                        "Purchases",
                        Reducer::count_non_empty("Item_Purchased", &["None"]),
                    ),
                    NamedReducer::new("Entries", Reducer::Count),
                ],
                ratios: vec![RatioConfig {
                    name: "Purchase Rate".to_string(),
                    numerator: "Purchases".to_string(),
                    denominator: "Entries".to_string(),
                }],
                ..PanelConfig::default()
            },
            PanelConfig {
                title: "Revenue by Contest".to_string(),
                dataset: "contest2".to_string(),
                kind: PanelKind::Bar,
                group_by: Some("Contest_ID".to_string()),
                order: SortOrder::Descending,
                scale: Some(1000.0),
                reducers: vec![NamedReducer::new("Revenue", Reducer::sum("Purchase_Value"))],
                ..PanelConfig::default()
            },
            PanelConfig {
                title: "Revenue Share by Age Group".to_string(),
                dataset: "contest2".to_string(),
                kind: PanelKind::Pie,
                group_by: Some("Age_Group".to_string()),
                order: SortOrder::Descending,
                reducers: vec![NamedReducer::new(
                    "Share",
                    Reducer::percent_of_total("Purchase_Value"),
                )],
                ..PanelConfig::default()
            },
            PanelConfig {
                title: "Items Purchased per Contest".to_string(),
                dataset: "contest2".to_string(),
                kind: PanelKind::Stacked,
                group_by: Some("Contest_ID".to_string()),
                stack_by: Some("Item_Purchased".to_string()),
                value_column: Some("Purchase_Value".to_string()),
                ..PanelConfig::default()
            },
            PanelConfig {
                title: "Weekly Funnel".to_string(),
                dataset: "micromarket3".to_string(),
                kind: PanelKind::Line,
                group_by: Some("Week".to_string()),
                order: SortOrder::NumericLabel,
                reducers: vec![
                    NamedReducer::new("Visitors", Reducer::sum("Visitors")),
                    NamedReducer::new("Onboarding", Reducer::sum("Onboarding")),
                    NamedReducer::new("Churn", Reducer::sum("Churn")),
                ],
                ..PanelConfig::default()
            },
            PanelConfig {
                title: "Contest Entries".to_string(),
                dataset: "contest2".to_string(),
                kind: PanelKind::Table,
                columns: vec![
                    "Login_ID".to_string(),
                    "Contest_ID".to_string(),
                    "Item_Purchased".to_string(),
                ],
                ..PanelConfig::default()
            },
            PanelConfig {
                title: "Fan Drill-down".to_string(),
                dataset: "micromarket2".to_string(),
                kind: PanelKind::Drilldown,
                levels: vec![
                    "Gender".to_string(),
                    "Sport_Type".to_string(),
                    "Location".to_string(),
                    "Fan_Level".to_string(),
                ],
                root_label: Some("Count of UID".to_string()),
                ..PanelConfig::default()
            },
        ];

        Config {
            general: GeneralConfig {
                title: "Contest Dashboard".to_string(),
                ..GeneralConfig::default()
            },
            datasets: vec![contest, fans, funnel],
            panels,
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::example();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
