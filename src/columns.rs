//! Header-derived column mapping.

use crate::reference::column_letters;
use crate::row::Row;
use std::collections::{HashMap, HashSet};

/// Allow-list of header names.
///
/// Matching is exact and case-sensitive: `"Name"` does not admit `"name"` or
/// `" Name"`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnFilter {
    names: HashSet<String>,
}

impl ColumnFilter {
    /// Build a filter admitting exactly the given header names.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Check whether a header name is admitted.
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Number of names in the filter.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for ColumnFilter {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// A header column kept by the map.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Column {
    index: usize,
    name: String,
}

/// Mapping from 0-based column index to header name.
///
/// Built once from the first row of a worksheet and never extended. Columns
/// keep the order in which their headers appeared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnIndexMap {
    columns: Vec<Column>,
    by_index: HashMap<usize, usize>,
    /// Distinct header names in first-seen order
    names: Vec<String>,
}

impl ColumnIndexMap {
    /// Build the map from the header row's cells.
    ///
    /// `cells` yields `(column_index, value)` in document order. A cell is kept
    /// when its value is non-empty after trimming and, if a filter is given,
    /// the untrimmed value is in the filter.
    pub fn from_header<I>(cells: I, filter: Option<&ColumnFilter>) -> Self
    where
        I: IntoIterator<Item = (usize, Option<String>)>,
    {
        let mut map = Self::default();

        for (index, value) in cells {
            let Some(name) = value else { continue };
            if name.trim().is_empty() {
                continue;
            }
            if filter.is_some_and(|f| !f.contains(&name)) {
                continue;
            }
            if map.by_index.contains_key(&index) {
                log::warn!(
                    "header column {} appears more than once; keeping the first",
                    column_letters(index)
                );
                continue;
            }
            if map.names.contains(&name) {
                log::warn!(
                    "duplicate header {:?} in column {}; its values share one key",
                    name,
                    column_letters(index)
                );
            } else {
                map.names.push(name.clone());
            }

            map.by_index.insert(index, map.columns.len());
            map.columns.push(Column { index, name });
        }

        log::debug!("header row defines {} columns", map.columns.len());
        map
    }

    /// Header name for a column index, if the column is mapped.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.by_index
            .get(&index)
            .map(|&pos| self.columns[pos].name.as_str())
    }

    /// Check whether a column index is mapped.
    pub fn contains(&self, index: usize) -> bool {
        self.by_index.contains_key(&index)
    }

    /// Distinct header names in the order they appeared.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(|s| s.as_str())
    }

    /// Mapped `(column_index, header)` pairs in header order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.columns.iter().map(|c| (c.index, c.name.as_str()))
    }

    /// Number of mapped columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// A row holding every header with no value yet.
    pub(crate) fn blank_row(&self) -> Row {
        Row::with_columns(self.names())
    }
}
