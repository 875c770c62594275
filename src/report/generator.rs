//! Markdown report generation.
//!
//! This module renders a [`DashboardReport`] as a Markdown document (one
//! section per panel, charts as data tables) or as pretty-printed JSON.

use super::format::{format_percent, format_scaled, scale_suffix};
use crate::analysis::DrillView;
use crate::dashboard::{PanelBody, PanelResult, StatCard, TableView};
use crate::models::{AggregateSeries, DashboardReport, DatasetSummary, ReportMetadata};
use anyhow::Result;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &DashboardReport) -> String {
    let mut output = String::new();

    // Title
    output.push_str(&format!("# {}\n\n", report.metadata.title));

    // Metadata section
    output.push_str(&generate_metadata_section(&report.metadata, report.datasets.len()));

    // Table of contents
    output.push_str(&generate_table_of_contents(report));

    // Datasets and active filters
    output.push_str(&generate_datasets_section(&report.datasets));

    // Panels
    output.push_str(&generate_panels_section(&report.panels));

    // Footer
    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(metadata: &ReportMetadata, dataset_count: usize) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!(
        "- **Generated:** {}\n",
        metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Datasets:** {}\n", dataset_count));
    section.push_str(&format!("- **Panels:** {}\n", metadata.panel_count));
    section.push_str(&format!(
        "- **Duration:** {:.1}s\n",
        metadata.duration_seconds
    ));
    section.push('\n');

    section
}

fn anchor(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '-' || *c == '_')
        .map(|c| if c == ' ' { '-' } else { c })
        .collect()
}

/// Generate the table of contents.
fn generate_table_of_contents(report: &DashboardReport) -> String {
    let mut toc = String::new();

    toc.push_str("## Table of Contents\n\n");
    toc.push_str("- [Metadata](#metadata)\n");
    toc.push_str("- [Datasets](#datasets)\n");
    toc.push_str("- [Panels](#panels)\n");

    for panel in &report.panels {
        toc.push_str(&format!("  - [{}](#{})\n", panel.title, anchor(&panel.title)));
    }

    toc.push('\n');

    toc
}

/// Generate the datasets section, including filter options.
fn generate_datasets_section(datasets: &[DatasetSummary]) -> String {
    let mut section = String::new();

    section.push_str("## Datasets\n\n");

    if datasets.is_empty() {
        section.push_str("No datasets were loaded.\n\n");
        return section;
    }

    section.push_str("| Dataset | Source | Rows | Filtered | Columns | Filters |\n");
    section.push_str("|:---|:---|---:|---:|---:|:---|\n");
    for dataset in datasets {
        section.push_str(&format!(
            "| {} | `{}` | {} | {} | {} | {} |\n",
            dataset.name,
            dataset.source,
            dataset.total_rows,
            dataset.filtered_rows,
            dataset.columns,
            escape_cell(&dataset.filters.to_string())
        ));
    }
    section.push('\n');

    let with_options: Vec<_> = datasets
        .iter()
        .filter(|d| !d.filter_options.is_empty())
        .collect();

    if !with_options.is_empty() {
        section.push_str("### Filter Options\n\n");
        for dataset in with_options {
            for options in &dataset.filter_options {
                let values: Vec<String> = options
                    .values
                    .iter()
                    .map(|v| {
                        if options.selected.as_deref() == Some(v.as_str()) {
                            format!("**{}**", v)
                        } else {
                            v.clone()
                        }
                    })
                    .collect();
                let all = if options.selected.is_none() { "**All**" } else { "All" };
                section.push_str(&format!(
                    "- {} `{}`: {}, {}\n",
                    dataset.name,
                    options.column,
                    all,
                    values.join(", ")
                ));
            }
        }
        section.push('\n');
    }

    section
}

/// Generate the panels section.
fn generate_panels_section(panels: &[PanelResult]) -> String {
    let mut section = String::new();

    section.push_str("## Panels\n\n");

    if panels.is_empty() {
        section.push_str("No panels are defined.\n\n");
        return section;
    }

    for panel in panels {
        section.push_str(&generate_panel_block(panel));
    }

    section
}

/// Generate a single panel block.
fn generate_panel_block(panel: &PanelResult) -> String {
    let mut block = String::new();

    block.push_str(&format!("### {}\n\n", panel.title));
    block.push_str(&format!(
        "*Kind: {} | Dataset: {} | Rows: {} | Filters: {}*\n\n",
        panel.kind, panel.dataset, panel.rows_considered, panel.filters
    ));

    let body = match panel.body {
        PanelBody::Cards { ref cards } => generate_cards(cards, panel.scale),
        PanelBody::Series {
            ref series,
            ref shares,
        } => generate_series(series, shares.as_deref(), panel.scale),
        PanelBody::Table { ref table } => generate_table(table),
        PanelBody::DrillDown { ref view } => generate_drilldown(view),
    };
    block.push_str(&body);

    block.push_str("---\n\n");

    block
}

fn generate_cards(cards: &[StatCard], scale: Option<f64>) -> String {
    let mut out = String::new();

    out.push_str("| Metric | Value |\n");
    out.push_str("|:---|---:|\n");
    for card in cards {
        let value = if card.percent {
            format_percent(card.value)
        } else {
            format!("{}{}", format_scaled(card.value, scale), scale_suffix(scale))
        };
        out.push_str(&format!("| {} | {} |\n", escape_cell(&card.label), value));
    }
    out.push('\n');

    out
}

fn generate_series(
    series: &AggregateSeries,
    shares: Option<&[f64]>,
    scale: Option<f64>,
) -> String {
    if series.is_empty() {
        return "_No data for the selected filters._\n\n".to_string();
    }

    let mut out = String::new();
    let names = series.series_names();
    let suffix = scale_suffix(scale);

    out.push_str("| Label |");
    for name in &names {
        out.push_str(&format!(" {}{} |", escape_cell(name), suffix));
    }
    if shares.is_some() {
        out.push_str(" Share |");
    }
    out.push('\n');

    out.push_str("|:---|");
    for _ in &names {
        out.push_str("---:|");
    }
    if shares.is_some() {
        out.push_str("---:|");
    }
    out.push('\n');

    for (i, point) in series.points.iter().enumerate() {
        out.push_str(&format!("| {} |", escape_cell(&point.label)));
        for (_, value) in &point.values {
            out.push_str(&format!(" {} |", format_scaled(*value, scale)));
        }
        if let Some(shares) = shares {
            let share = shares.get(i).copied().unwrap_or(0.0);
            out.push_str(&format!(" {} |", format_percent(share)));
        }
        out.push('\n');
    }
    out.push('\n');

    out
}

fn generate_table(table: &TableView) -> String {
    if table.columns.is_empty() {
        return "_No columns._\n\n".to_string();
    }

    let mut out = String::new();

    out.push_str(&format!(
        "| {} |\n",
        table
            .columns
            .iter()
            .map(|c| escape_cell(c))
            .collect::<Vec<_>>()
            .join(" | ")
    ));
    out.push_str(&format!("|{}\n", "---|".repeat(table.columns.len())));

    for row in &table.rows {
        out.push_str(&format!(
            "| {} |\n",
            row.iter()
                .map(|cell| escape_cell(cell))
                .collect::<Vec<_>>()
                .join(" | ")
        ));
    }
    out.push('\n');

    if table.truncated {
        out.push_str(&format!(
            "*Showing {} of {} rows.*\n\n",
            table.rows.len(),
            table.total_rows
        ));
    }

    out
}

fn generate_drilldown(view: &DrillView) -> String {
    let mut out = String::new();

    out.push_str(&format!("**Path:** {}\n\n", view.breadcrumbs.join(" > ")));
    out.push_str(&format!("**{}:** {}\n\n", view.node.name, view.node.value));

    match view.next_level {
        Some(ref level) if !view.children.is_empty() => {
            out.push_str(&format!("| {} | Count |\n", escape_cell(level)));
            out.push_str("|:---|---:|\n");
            for child in &view.children {
                out.push_str(&format!("| {} | {} |\n", escape_cell(&child.name), child.value));
            }
            out.push('\n');
        }
        Some(_) => out.push_str("_No rows at this level._\n\n"),
        None => out.push_str("*Deepest level reached.*\n\n"),
    }

    out
}

/// Escape characters that would break a Markdown table cell.
fn escape_cell(s: &str) -> String {
    s.replace('|', "\\|").replace('\n', " ")
}

/// Generate the report footer.
fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str(&format!(
        "*Report generated by tallyboard v{}*\n",
        env!("CARGO_PKG_VERSION")
    ));

    footer
}

/// Generate a JSON report.
pub fn generate_json_report(report: &DashboardReport) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{DrillNode, DrillView};
    use crate::config::PanelKind;
    use crate::models::{FilterOptions, FilterSpec, SeriesPoint};
    use chrono::Utc;

    fn series_panel(kind: PanelKind, scale: Option<f64>) -> PanelResult {
        PanelResult {
            title: "Revenue by Contest".to_string(),
            kind,
            dataset: "contest2".to_string(),
            filters: FilterSpec::new(),
            rows_considered: 3,
            scale,
            body: PanelBody::Series {
                series: AggregateSeries::new(vec![
                    SeriesPoint::new("C1", vec![("Revenue".to_string(), 15_000.0)]),
                    SeriesPoint::new("C2", vec![("Revenue".to_string(), 5_000.0)]),
                ]),
                shares: (kind == PanelKind::Pie).then(|| vec![75.0, 25.0]),
            },
        }
    }

    fn create_test_report() -> DashboardReport {
        DashboardReport {
            metadata: ReportMetadata {
                title: "Contest Dashboard".to_string(),
                generated_at: Utc::now(),
                panel_count: 2,
                duration_seconds: 0.4,
            },
            datasets: vec![DatasetSummary {
                name: "contest2".to_string(),
                source: "contest2.csv".to_string(),
                total_rows: 3,
                filtered_rows: 1,
                columns: 3,
                filters: FilterSpec::new().with("Contest_ID", "C2"),
                filter_options: vec![FilterOptions {
                    column: "Contest_ID".to_string(),
                    values: vec!["C1".to_string(), "C2".to_string()],
                    selected: Some("C2".to_string()),
                }],
            }],
            panels: vec![
                series_panel(PanelKind::Bar, Some(1000.0)),
                PanelResult {
                    title: "Fans".to_string(),
                    kind: PanelKind::Drilldown,
                    dataset: "micromarket2".to_string(),
                    filters: FilterSpec::new(),
                    rows_considered: 6,
                    scale: None,
                    body: PanelBody::DrillDown {
                        view: DrillView {
                            breadcrumbs: vec!["Count of UID".to_string(), "Male".to_string()],
                            node: DrillNode {
                                name: "Male".to_string(),
                                value: 4,
                                level: 1,
                            },
                            next_level: Some("Sport".to_string()),
                            children: vec![DrillNode {
                                name: "Football".to_string(),
                                value: 3,
                                level: 2,
                            }],
                        },
                    },
                },
            ],
        }
    }

    #[test]
    fn test_generate_markdown_report() {
        let report = create_test_report();
        let markdown = generate_markdown_report(&report);

        assert!(markdown.contains("# Contest Dashboard"));
        assert!(markdown.contains("## Metadata"));
        assert!(markdown.contains("## Datasets"));
        assert!(markdown.contains("## Panels"));
        assert!(markdown.contains("### Revenue by Contest"));
        assert!(markdown.contains("- [Fans](#fans)"));
        assert!(markdown.contains("| contest2 | `contest2.csv` | 3 | 1 | 3 | Contest_ID=C2 |"));
        assert!(markdown.contains("- contest2 `Contest_ID`: All, C1, **C2**"));
    }

    #[test]
    fn test_series_applies_display_scale() {
        let block = generate_panel_block(&series_panel(PanelKind::Bar, Some(1000.0)));

        assert!(block.contains("| Label | Revenue (K) |"));
        assert!(block.contains("| C1 | 15 |"));
        assert!(block.contains("| C2 | 5 |"));
    }

    #[test]
    fn test_pie_share_column() {
        let block = generate_panel_block(&series_panel(PanelKind::Pie, None));

        assert!(block.contains("| Label | Revenue | Share |"));
        assert!(block.contains("| C1 | 15K | 75.0% |"));
        assert!(block.contains("| C2 | 5000 | 25.0% |"));
    }

    #[test]
    fn test_no_share_column_without_shares() {
        let block = generate_panel_block(&series_panel(PanelKind::Bar, None));

        assert!(block.contains("| Label | Revenue |"));
        assert!(!block.contains("Share"));
    }

    #[test]
    fn test_scaled_values_are_not_compacted() {
        let mut panel = series_panel(PanelKind::Bar, Some(1000.0));
        panel.body = PanelBody::Series {
            series: AggregateSeries::new(vec![SeriesPoint::new(
                "C1",
                vec![("Revenue".to_string(), 15_000_000.0)],
            )]),
            shares: None,
        };
        let block = generate_panel_block(&panel);

        assert!(block.contains("| Label | Revenue (K) |"));
        assert!(block.contains("| C1 | 15000 |"));
    }

    #[test]
    fn test_drilldown_block() {
        let report = create_test_report();
        let block = generate_panel_block(&report.panels[1]);

        assert!(block.contains("**Path:** Count of UID > Male"));
        assert!(block.contains("**Male:** 4"));
        assert!(block.contains("| Sport | Count |"));
        assert!(block.contains("| Football | 3 |"));
    }

    #[test]
    fn test_table_escapes_and_truncates() {
        let table = TableView {
            columns: vec!["Item".to_string(), "Note".to_string()],
            rows: vec![vec!["Cap".to_string(), "a|b".to_string()]],
            total_rows: 5,
            truncated: true,
        };
        let out = generate_table(&table);

        assert!(out.contains("| Item | Note |"));
        assert!(out.contains("| Cap | a\\|b |"));
        assert!(out.contains("*Showing 1 of 5 rows.*"));
    }

    #[test]
    fn test_empty_series() {
        let out = generate_series(&AggregateSeries::default(), None, None);
        assert!(out.contains("No data"));
    }

    #[test]
    fn test_generate_json_report() {
        let report = create_test_report();
        let json = generate_json_report(&report).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["metadata"]["title"], "Contest Dashboard");
        assert_eq!(value["panels"][0]["series"][0]["Revenue"], 15_000.0);
        assert_eq!(value["panels"][1]["type"], "drill_down");
        assert_eq!(value["datasets"][0]["filters"]["Contest_ID"], "C2");
    }
}
