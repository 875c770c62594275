//! CSV dataset loading.
//!
//! Datasets come from local files (resolved against the data directory) or
//! from `http(s)` URLs. All configured datasets load concurrently; each one is
//! parsed into an immutable [`Dataset`] and shared behind an `Arc`.

use crate::config::DatasetConfig;
use crate::models::{CellValue, Dataset, Row};
use futures::future::try_join_all;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Loaded datasets keyed by name.
pub type Datasets = BTreeMap<String, Arc<Dataset>>;

/// Errors raised while acquiring or parsing a dataset.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to fetch {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("failed to parse CSV for dataset '{dataset}': {source}")]
    Csv {
        dataset: String,
        #[source]
        source: csv::Error,
    },

    #[error("dataset '{0}' is defined more than once")]
    Duplicate(String),
}

/// Where a dataset's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSource {
    /// Local file
    Path(PathBuf),
    /// Remote file fetched over HTTP(S)
    Url(String),
}

impl DataSource {
    /// Resolve a configured source string. Relative paths are joined onto `data_dir`.
    pub fn resolve(source: &str, data_dir: &Path) -> Self {
        if source.starts_with("http://") || source.starts_with("https://") {
            DataSource::Url(source.to_string())
        } else {
            let path = Path::new(source);
            if path.is_absolute() {
                DataSource::Path(path.to_path_buf())
            } else {
                DataSource::Path(data_dir.join(path))
            }
        }
    }
}

/// Parse CSV text (header row first) into a dataset.
///
/// Rows whose fields are all blank are skipped. Short rows leave their
/// trailing columns missing; extra fields beyond the header are dropped.
pub fn parse_csv<R: Read>(name: &str, input: R, dynamic_typing: bool) -> Result<Dataset, LoadError> {
    let csv_error = |source: csv::Error| LoadError::Csv {
        dataset: name.to_string(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(input);

    let columns: Vec<String> = reader
        .headers()
        .map_err(csv_error)?
        .iter()
        .map(String::from)
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_error)?;

        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }

        let row: Row = columns
            .iter()
            .zip(record.iter())
            .map(|(column, field)| (column.clone(), CellValue::from_field(field, dynamic_typing)))
            .collect();
        rows.push(row);
    }

    debug!(
        "Parsed dataset '{}': {} columns, {} rows",
        name,
        columns.len(),
        rows.len()
    );

    Ok(Dataset::new(name, columns, rows))
}

/// Load one dataset from its configured source.
pub async fn load_dataset(
    config: &DatasetConfig,
    data_dir: &Path,
    client: &reqwest::Client,
) -> Result<Dataset, LoadError> {
    let source = DataSource::resolve(&config.source, data_dir);
    debug!("Loading dataset '{}' from {:?}", config.name, source);

    let bytes = match source {
        DataSource::Path(path) => match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(source) => return Err(LoadError::Io { path, source }),
        },
        DataSource::Url(url) => {
            let http_error = |source: reqwest::Error| LoadError::Http {
                url: url.clone(),
                source,
            };
            client
                .get(&url)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(http_error)?
                .bytes()
                .await
                .map_err(http_error)?
                .to_vec()
        }
    };

    let dataset = parse_csv(&config.name, bytes.as_slice(), config.dynamic_typing)?;
    info!(
        "Loaded dataset '{}' ({} rows, {} columns)",
        dataset.name,
        dataset.len(),
        dataset.columns.len()
    );

    Ok(dataset)
}

/// Load every configured dataset concurrently.
pub async fn load_all(
    configs: &[DatasetConfig],
    data_dir: &Path,
    timeout_seconds: u64,
    show_progress: bool,
) -> Result<Datasets, LoadError> {
    let mut names: Vec<&str> = Vec::with_capacity(configs.len());
    for config in configs {
        if names.contains(&config.name.as_str()) {
            return Err(LoadError::Duplicate(config.name.clone()));
        }
        names.push(&config.name);
    }

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_seconds))
        .build()
        .map_err(LoadError::Client)?;

    let spinner = if show_progress {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}") {
            pb.set_style(style);
        }
        pb.set_message(format!("Loading {} dataset(s)", configs.len()));
        pb.enable_steady_tick(Duration::from_millis(100));
        Some(pb)
    } else {
        None
    };

    let loaded = try_join_all(
        configs
            .iter()
            .map(|config| load_dataset(config, data_dir, &client)),
    )
    .await;

    if let Some(pb) = spinner {
        match loaded {
            Ok(_) => pb.finish_with_message("Datasets loaded"),
            Err(_) => pb.abandon_with_message("Dataset loading failed"),
        }
    }

    Ok(loaded?
        .into_iter()
        .map(|dataset| (dataset.name.clone(), Arc::new(dataset)))
        .collect())
}
