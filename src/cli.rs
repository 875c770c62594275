//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::dashboard::{DrillTarget, FilterOverride};
use clap::Parser;
use std::path::PathBuf;

/// Tallyboard - dashboards from CSV files
///
/// Load CSV datasets, apply a declarative dashboard definition (filters,
/// groupings, reducers) and render the aggregates as a Markdown or JSON
/// report.
///
/// Examples:
///   tallyboard
///   tallyboard --config dashboard.toml --format json
///   tallyboard --filter contest2:Contest_ID=C2 --filter Age_Group=18-25
///   tallyboard --drill "Fan Drill-down:Male,Football"
///   tallyboard --dry-run
///   tallyboard --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Path to the dashboard definition
    ///
    /// If not specified, looks for .tallyboard.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Output file path for the report
    ///
    /// Defaults to the `output` setting of the dashboard definition
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Directory relative dataset sources are resolved against
    #[arg(long, value_name = "DIR", env = "TALLYBOARD_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Equality filter, repeatable
    ///
    /// `COLUMN=VALUE` applies to every dataset that has the column,
    /// `DATASET:COLUMN=VALUE` to one dataset. An empty value clears the
    /// filter ("All").
    #[arg(
        short,
        long = "filter",
        value_name = "[DATASET:]COLUMN=VALUE",
        value_parser = parse_filter
    )]
    pub filters: Vec<FilterOverride>,

    /// Drill-down path, repeatable
    ///
    /// `LABEL,LABEL` applies to every drill-down panel deep enough to hold
    /// it, `PANEL:LABEL,LABEL` to the panel with that title.
    /// Example: --drill "Fan Drill-down:Male,Football"
    #[arg(long, value_name = "[PANEL:]LABELS", value_parser = parse_drill)]
    pub drill: Vec<DrillTarget>,

    /// Render only panels with this title (repeatable, case-insensitive)
    #[arg(long, value_name = "TITLE")]
    pub panel: Vec<String>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Timeout for remote dataset fetches, in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Dry run: load datasets and print their shape without writing a report
    #[arg(long)]
    pub dry_run: bool,

    /// List the CSV files under the data directory and exit
    #[arg(long)]
    pub list_data: bool,

    /// Generate a default .tallyboard.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl OutputFormat {
    /// File extension for reports in this format.
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Markdown => "md",
            OutputFormat::Json => "json",
        }
    }
}

/// Parse a `[DATASET:]COLUMN=VALUE` filter argument.
pub fn parse_filter(s: &str) -> Result<FilterOverride, String> {
    let (target, value) = s
        .split_once('=')
        .ok_or_else(|| format!("Filter '{}' must have the form [DATASET:]COLUMN=VALUE", s))?;

    let (dataset, column) = match target.split_once(':') {
        Some((dataset, column)) => {
            let dataset = dataset.trim();
            if dataset.is_empty() {
                return Err(format!("Filter '{}' has an empty dataset name", s));
            }
            (Some(dataset.to_string()), column.trim())
        }
        None => (None, target.trim()),
    };

    if column.is_empty() {
        return Err(format!("Filter '{}' has an empty column name", s));
    }

    Ok(FilterOverride {
        dataset,
        column: column.to_string(),
        value: value.to_string(),
    })
}

/// Parse a `[PANEL:]LABEL,LABEL` drill-down argument.
pub fn parse_drill(s: &str) -> Result<DrillTarget, String> {
    let (panel, labels) = match s.split_once(':') {
        Some((panel, labels)) => {
            let panel = panel.trim();
            if panel.is_empty() {
                return Err(format!("Drill path '{}' has an empty panel title", s));
            }
            (Some(panel.to_string()), labels)
        }
        None => (None, s),
    };

    let labels: Vec<&str> = labels.split(',').map(str::trim).collect();
    if labels.iter().any(|label| label.is_empty()) {
        return Err(format!("Drill path '{}' has an empty label", s));
    }

    Ok(DrillTarget {
        panel,
        path: labels.into_iter().collect(),
    })
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if self.dry_run && self.list_data {
            return Err("Cannot use both --dry-run and --list-data".to_string());
        }

        // Validate timeout if provided
        if let Some(timeout) = self.timeout {
            if timeout == 0 {
                return Err("Timeout must be at least 1 second".to_string());
            }
        }

        if let Some(ref config_path) = self.config {
            if !config_path.is_file() {
                return Err(format!(
                    "Config file does not exist: {}",
                    config_path.display()
                ));
            }
        }

        // Validate data directory if provided
        if let Some(ref data_dir) = self.data_dir {
            if !data_dir.exists() {
                return Err(format!(
                    "Data directory does not exist: {}",
                    data_dir.display()
                ));
            }
            if !data_dir.is_dir() {
                return Err(format!(
                    "Data path is not a directory: {}",
                    data_dir.display()
                ));
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }

    /// Where to write the report.
    ///
    /// An explicit `--output` wins. Otherwise the configured output is used,
    /// with its extension switched to match `--format`.
    pub fn output_path(&self, configured: &str) -> PathBuf {
        match self.output {
            Some(ref output) => output.clone(),
            None => PathBuf::from(configured).with_extension(self.format.extension()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_args() -> Args {
        Args {
            config: None,
            output: None,
            format: OutputFormat::Markdown,
            data_dir: None,
            filters: Vec::new(),
            drill: Vec::new(),
            panel: Vec::new(),
            verbose: false,
            quiet: false,
            timeout: None,
            dry_run: false,
            list_data: false,
            init_config: false,
        }
    }

    #[test]
    fn test_parse_filter_unscoped() {
        let filter = parse_filter("Contest_ID=C2").unwrap();
        assert_eq!(filter.dataset, None);
        assert_eq!(filter.column, "Contest_ID");
        assert_eq!(filter.value, "C2");
    }

    #[test]
    fn test_parse_filter_scoped_and_clearing() {
        let filter = parse_filter("micromarket2:Device=").unwrap();
        assert_eq!(filter.dataset.as_deref(), Some("micromarket2"));
        assert_eq!(filter.column, "Device");
        assert_eq!(filter.value, "");

        let filter = parse_filter("Age_Group=18=25").unwrap();
        assert_eq!(filter.value, "18=25");
    }

    #[test]
    fn test_parse_filter_invalid() {
        assert!(parse_filter("Contest_ID").is_err());
        assert!(parse_filter("=C2").is_err());
        assert!(parse_filter(":Contest_ID=C2").is_err());
    }

    #[test]
    fn test_clap_parses_repeated_filters() {
        let args = Args::try_parse_from([
            "tallyboard",
            "-f",
            "Contest_ID=C2",
            "--filter",
            "contest1:Age_Group=18-25",
            "--drill",
            "Male,Football",
            "--format",
            "json",
        ])
        .unwrap();

        assert_eq!(args.filters.len(), 2);
        assert_eq!(args.filters[1].dataset.as_deref(), Some("contest1"));
        assert_eq!(args.drill.len(), 1);
        assert_eq!(args.drill[0].panel, None);
        assert_eq!(args.drill[0].path.to_string(), "Male > Football");
        assert_eq!(args.format, OutputFormat::Json);
    }

    #[test]
    fn test_parse_drill_scoped() {
        let target = parse_drill("Fan Drill-down: Male, Football").unwrap();
        assert_eq!(target.panel.as_deref(), Some("Fan Drill-down"));
        assert_eq!(target.path.labels(), ["Male", "Football"]);
        assert_eq!(target.to_string(), "Fan Drill-down: Male > Football");

        let args = Args::try_parse_from([
            "tallyboard",
            "--drill",
            "Male",
            "--drill",
            "By Sport:Cricket",
        ])
        .unwrap();
        assert_eq!(args.drill.len(), 2);
        assert_eq!(args.drill[1].panel.as_deref(), Some("By Sport"));
    }

    #[test]
    fn test_parse_drill_invalid() {
        assert!(parse_drill("").is_err());
        assert!(parse_drill("Male,,Football").is_err());
        assert!(parse_drill(":Male").is_err());
        assert!(parse_drill("Fans:").is_err());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let mut args = make_args();
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());

        let mut args = make_args();
        args.dry_run = true;
        args.list_data = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut args = make_args();
        args.timeout = Some(0);
        assert!(args.validate().is_err());

        let mut args = make_args();
        args.config = Some(PathBuf::from("/definitely/not/here.toml"));
        assert!(args.validate().is_err());

        assert!(make_args().validate().is_ok());
    }

    #[test]
    fn test_output_path() {
        let mut args = make_args();
        assert_eq!(
            args.output_path("dashboard_report.md"),
            PathBuf::from("dashboard_report.md")
        );

        args.format = OutputFormat::Json;
        assert_eq!(
            args.output_path("dashboard_report.md"),
            PathBuf::from("dashboard_report.json")
        );

        args.output = Some(PathBuf::from("out.txt"));
        assert_eq!(args.output_path("dashboard_report.md"), PathBuf::from("out.txt"));
    }

    #[test]
    fn test_log_level() {
        let mut args = make_args();
        assert_eq!(args.log_level(), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }
}
