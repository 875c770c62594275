//! Tallyboard - dashboards from CSV files.
//!
//! Loads CSV datasets, runs a declarative dashboard definition (filters,
//! groupings, reducers, drill-downs) through a stateless aggregator, and
//! renders the results as Markdown or JSON.

pub mod analysis;
pub mod cli;
pub mod config;
pub mod dashboard;
pub mod dataset;
pub mod models;
pub mod report;
