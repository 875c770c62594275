//! Tallyboard - dashboards from CSV files
//!
//! A CLI tool that loads CSV datasets, evaluates a dashboard definition
//! against them, and writes the aggregates as a Markdown or JSON report.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Error (bad arguments, unreadable data, invalid dashboard definition)

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tallyboard::cli::{Args, OutputFormat};
use tallyboard::config::{Config, DEFAULT_CONFIG_FILE};
use tallyboard::dashboard::{self, EvalContext};
use tallyboard::dataset::{self, Datasets};
use tallyboard::models::{DashboardReport, DatasetSummary, ReportMetadata};
use tallyboard::report;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Load configuration before logging so the file's `verbose` counts
    let (config, origin) = match load_config(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    init_logging(config.log_level(&args));

    info!("Tallyboard v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration: {}", origin);
    debug!("Arguments: {:?}", args);

    if let Err(e) = run_dashboard(args, config).await {
        error!("Dashboard failed: {:#}", e);
        eprintln!("\n❌ Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Handle --init-config: generate a default .tallyboard.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with an example dashboard.", DEFAULT_CONFIG_FILE);
    println!("   Edit it to point at your datasets and define your panels.");
    Ok(())
}

/// Initialize logging at the given level.
fn init_logging(level: tracing::Level) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Run the complete dashboard workflow.
async fn run_dashboard(args: Args, config: Config) -> Result<()> {
    let start_time = Instant::now();

    let data_dir = PathBuf::from(&config.general.data_dir);

    // Handle --list-data: list CSV files and exit
    if args.list_data {
        return handle_list_data(&data_dir);
    }

    if config.datasets.is_empty() {
        anyhow::bail!(
            "No datasets defined. Run `tallyboard --init-config` to create an example {}",
            DEFAULT_CONFIG_FILE
        );
    }

    if !args.panel.is_empty() && config.panels.is_empty() {
        warn!("No panel matched {:?}", args.panel);
    }

    // Step 1: Load every dataset
    println!(
        "📥 Loading {} dataset(s) from {}",
        config.datasets.len(),
        data_dir.display()
    );
    let datasets = dataset::load_all(
        &config.datasets,
        &data_dir,
        config.general.timeout_seconds,
        !args.quiet,
    )
    .await
    .context("Failed to load datasets")?;

    let ctx = EvalContext {
        overrides: args.filters.clone(),
        drill: args.drill.clone(),
    };
    let summaries = dashboard::summarize_datasets(&config, &datasets, &ctx);

    // Handle --dry-run: print dataset shapes and exit
    if args.dry_run {
        return handle_dry_run(&summaries, &datasets);
    }

    // Step 2: Evaluate panels
    println!("🧮 Evaluating {} panel(s)...", config.panels.len());
    let panels = dashboard::evaluate(&config, &datasets, &ctx)
        .context("Invalid dashboard definition")?;

    // Step 3: Build and save the report
    println!("📝 Generating report...");

    let duration = start_time.elapsed().as_secs_f64();
    let report = DashboardReport {
        metadata: ReportMetadata {
            title: config.general.title.clone(),
            generated_at: Utc::now(),
            panel_count: panels.len(),
            duration_seconds: duration,
        },
        datasets: summaries,
        panels,
    };

    let output = match args.format {
        OutputFormat::Json => report::generate_json_report(&report)?,
        OutputFormat::Markdown => report::generate_markdown_report(&report),
    };

    let output_path = args.output_path(&config.general.output);
    std::fs::write(&output_path, &output)
        .with_context(|| format!("Failed to write report to {}", output_path.display()))?;

    // Print summary
    println!("\n📊 Dashboard Summary:");
    for summary in &report.datasets {
        println!(
            "   {}: {} of {} rows (filters: {})",
            summary.name, summary.filtered_rows, summary.total_rows, summary.filters
        );
    }
    println!("   Panels: {}", report.panels.len());
    for target in &ctx.drill {
        println!("   Drill-down: {}", target);
    }
    println!("   Duration: {:.1}s", duration);
    println!(
        "\n✅ Dashboard complete! Report saved to: {}",
        output_path.display()
    );

    Ok(())
}

/// Handle --list-data: print the CSV files under the data directory.
fn handle_list_data(data_dir: &Path) -> Result<()> {
    println!("\n🔍 CSV files under {}:\n", data_dir.display());

    let files = dataset::list_csv_files(data_dir)?;

    if files.is_empty() {
        println!("   No CSV files found.");
    } else {
        for file in &files {
            println!("     📄 {} ({} bytes)", file.path, file.size);
        }
        println!("\n   Total: {} files", files.len());
    }

    Ok(())
}

/// Handle --dry-run: print row counts, columns and filter options.
fn handle_dry_run(summaries: &[DatasetSummary], datasets: &Datasets) -> Result<()> {
    println!("\n🔍 Dry run: datasets loaded, no report written.\n");

    for summary in summaries {
        println!(
            "   📄 {} ({}): {} rows, {} after filters",
            summary.name, summary.source, summary.total_rows, summary.filtered_rows
        );
        if let Some(dataset) = datasets.get(&summary.name) {
            println!("      Columns: {}", dataset.columns.join(", "));
        }
        for options in &summary.filter_options {
            println!(
                "      Filter {}: {}{}",
                options.column,
                options.values.join(", "),
                options
                    .selected
                    .as_ref()
                    .map(|s| format!(" (selected: {})", s))
                    .unwrap_or_default()
            );
        }
    }

    println!("\n✅ Dry run complete.");
    Ok(())
}

/// Load configuration from file or use defaults, merged with the CLI
/// arguments. Also returns where the configuration came from.
fn load_config(args: &Args) -> Result<(Config, String)> {
    let (mut config, origin) = match args.config {
        // Try explicit config path
        Some(ref config_path) => (
            Config::load(config_path)?,
            config_path.display().to_string(),
        ),
        // Try default location
        None => match Config::load_default()? {
            Some(config) => (config, DEFAULT_CONFIG_FILE.to_string()),
            None => (Config::default(), "defaults (no config file found)".to_string()),
        },
    };

    config.merge_with_args(args);
    Ok((config, origin))
}
