//! Assembled worksheet rows.

use indexmap::IndexMap;
use serde::Serialize;

/// One data row keyed by header name.
///
/// Every row produced from a worksheet carries the same columns in the same
/// order. A column the source row had no value for is present with `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Row {
    values: IndexMap<String, Option<String>>,
}

impl Row {
    /// Create a row with every given column set to `None`.
    pub fn with_columns<'a, I>(columns: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        Self {
            values: columns
                .into_iter()
                .map(|name| (name.to_string(), None))
                .collect(),
        }
    }

    /// Set the value of an existing column. Unknown columns are ignored.
    pub(crate) fn set(&mut self, column: &str, value: Option<String>) {
        if let Some(slot) = self.values.get_mut(column) {
            *slot = value;
        }
    }

    /// Value of a column, or `None` if the column is absent or has no value.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.values.get(column).and_then(|v| v.as_deref())
    }

    /// Check whether the row has a column with this header.
    pub fn contains_column(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }

    /// Header names in order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(|k| k.as_str())
    }

    /// `(header, value)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Consume the row into its ordered map.
    pub fn into_inner(self) -> IndexMap<String, Option<String>> {
        self.values
    }
}

impl From<Row> for IndexMap<String, Option<String>> {
    fn from(row: Row) -> Self {
        row.values
    }
}

impl<'a> IntoIterator for &'a Row {
    type Item = (&'a String, &'a Option<String>);
    type IntoIter = indexmap::map::Iter<'a, String, Option<String>>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}
