//! Hierarchical drill-down navigation.
//!
//! A drill-down walks a fixed list of hierarchy columns (for example
//! Gender → Sport → City). The current position is a [`DrillPath`]: one
//! selected label per level already visited. Each label is applied as an
//! equality filter on its level's column, and the next level's column groups
//! what remains.

use crate::analysis::aggregator::{filter_rows, group_and_reduce};
use crate::models::{AggregationSpec, Dataset, FilterSpec, GroupKeySpec, Reducer, SortOrder};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Selected labels, one per visited hierarchy level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DrillPath(Vec<String>);

impl DrillPath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn labels(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for DrillPath {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for DrillPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(" > "))
    }
}

/// Illegal drill-down transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DrillError {
    #[error("cannot drill into '{label}': already at the deepest level ({depth})")]
    Terminal { label: String, depth: usize },
}

/// A node in the drill-down view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DrillNode {
    /// Node label.
    pub name: String,
    /// Number of rows under this node.
    pub value: usize,
    /// Depth in the hierarchy (0 = root).
    pub level: usize,
}

/// What the drill-down shows at its current position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrillView {
    /// Root label followed by the selected path.
    pub breadcrumbs: Vec<String>,
    /// The current node.
    pub node: DrillNode,
    /// Column the children are grouped by, unless terminal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_level: Option<String>,
    /// Children, largest first.
    pub children: Vec<DrillNode>,
}

impl DrillView {
    /// Returns true when no deeper level exists.
    pub fn is_terminal(&self) -> bool {
        self.next_level.is_none()
    }
}

/// Drill-down state over a fixed hierarchy of columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrillDown {
    root_label: String,
    levels: Vec<String>,
    path: DrillPath,
}

impl DrillDown {
    /// Creates a drill-down positioned at the root.
    pub fn new(root_label: impl Into<String>, levels: Vec<String>) -> Self {
        Self {
            root_label: root_label.into(),
            levels,
            path: DrillPath::new(),
        }
    }

    /// Replays `path` from the root.
    pub fn with_path(mut self, path: &DrillPath) -> Result<Self, DrillError> {
        for label in path.labels() {
            self.drill_into(label.clone())?;
        }
        Ok(self)
    }

    pub fn path(&self) -> &DrillPath {
        &self.path
    }

    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    /// Returns true when every level has a selected label.
    pub fn is_terminal(&self) -> bool {
        self.path.len() >= self.levels.len()
    }

    /// Select `label` at the current level and descend.
    pub fn drill_into(&mut self, label: impl Into<String>) -> Result<(), DrillError> {
        let label = label.into();
        if self.is_terminal() {
            return Err(DrillError::Terminal {
                label,
                depth: self.path.len(),
            });
        }
        self.path.0.push(label);
        Ok(())
    }

    /// Step back one level, returning the label that was deselected.
    pub fn go_back(&mut self) -> Option<String> {
        self.path.0.pop()
    }

    /// Return to the root.
    pub fn reset(&mut self) {
        self.path.0.clear();
    }

    /// Root label followed by the selected path.
    pub fn breadcrumbs(&self) -> Vec<String> {
        std::iter::once(self.root_label.clone())
            .chain(self.path.labels().iter().cloned())
            .collect()
    }

    /// Rows under the current node: one equality filter per selected level.
    pub fn current_rows(&self, dataset: &Dataset) -> Dataset {
        self.levels
            .iter()
            .zip(self.path.labels())
            .fold(dataset.clone(), |rows, (column, label)| {
                filter_rows(&rows, &FilterSpec::new().with(column.clone(), label.clone()))
            })
    }

    /// Evaluate the current position against a dataset.
    pub fn view(&self, dataset: &Dataset, fallback: &str) -> DrillView {
        let rows = self.current_rows(dataset);
        let depth = self.path.len();

        let name = self
            .path
            .labels()
            .last()
            .cloned()
            .unwrap_or_else(|| self.root_label.clone());

        let next_level = self.levels.get(depth).cloned();
        let children = match next_level {
            Some(ref column) => {
                let key = GroupKeySpec::new(column.clone()).with_fallback(fallback);
                let counts = AggregationSpec::new().with("count", Reducer::Count);
                group_and_reduce(&rows, &key, &counts, SortOrder::Descending)
                    .points
                    .into_iter()
                    .map(|point| DrillNode {
                        value: point.value_at(0) as usize,
                        name: point.label,
                        level: depth + 1,
                    })
                    .collect()
            }
            None => Vec::new(),
        };

        DrillView {
            breadcrumbs: self.breadcrumbs(),
            node: DrillNode {
                name,
                value: rows.len(),
                level: depth,
            },
            next_level,
            children,
        }
    }
}
