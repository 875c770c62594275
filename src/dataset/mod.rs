//! Dataset acquisition.
//!
//! Loading CSV sources into [`Dataset`](crate::models::Dataset)s and listing
//! the CSV files available under a data directory.

pub mod catalog;
pub mod loader;

pub use catalog::{list_csv_files, CatalogEntry};
pub use loader::{load_all, load_dataset, parse_csv, DataSource, Datasets, LoadError};
