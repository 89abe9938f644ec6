//! # sheetrows
//!
//! Streaming row extraction from XLSX spreadsheets.
//!
//! The first row of the first worksheet is treated as a header. Every later
//! row becomes a [`Row`] keyed by header name, with the same keys in the same
//! order for every row. Cells are never buffered as a whole sheet: rows are
//! decoded one at a time as they are pulled.
//!
//! ## Quick Start
//!
//! ```no_run
//! // Read every data row
//! let rows = sheetrows::read_rows("people.xlsx")?;
//! for row in &rows {
//!     println!("{:?}", row.get("Name"));
//! }
//!
//! // Keep only some columns
//! let rows = sheetrows::read_rows_with_columns("people.xlsx", ["Name"])?;
//! println!("{}", sheetrows::to_json_default(&rows)?);
//! # Ok::<(), sheetrows::Error>(())
//! ```
//!
//! ## Streaming
//!
//! ```no_run
//! use sheetrows::{CancellationToken, ReaderOptions, ReaderSession};
//!
//! let token = CancellationToken::new();
//! let session = ReaderSession::new(ReaderOptions::new().with_cancellation(token.clone()));
//!
//! let mut workbook = session.open("large.xlsx")?;
//! for row in workbook.rows()?.take(100) {
//!     println!("{:?}", row?);
//! }
//! # Ok::<(), sheetrows::Error>(())
//! ```

pub mod columns;
pub mod container;
pub mod decoder;
pub mod error;
pub mod json;
pub mod reference;
pub mod row;
pub mod session;
pub mod shared_strings;

// Re-exports
pub use columns::{ColumnFilter, ColumnIndexMap};
pub use container::{find_entry, ContainerSource, PartEntry, PartMatcher};
pub use decoder::{DecoderState, RowDecoder};
pub use error::{Error, Result};
pub use json::{to_json, to_json_default, JsonFormat};
pub use reference::{column_index, column_letters};
pub use row::Row;
pub use session::{CancellationToken, ReaderOptions, ReaderSession, Rows, Workbook};
pub use shared_strings::SharedStringTable;

use std::path::Path;

/// Read every data row of a spreadsheet with default options.
///
/// # Example
///
/// ```no_run
/// let rows = sheetrows::read_rows("people.xlsx")?;
/// println!("{} rows", rows.len());
/// # Ok::<(), sheetrows::Error>(())
/// ```
pub fn read_rows(path: impl AsRef<Path>) -> Result<Vec<Row>> {
    ReaderSession::default().read(path)
}

/// Read every data row, keeping only the named header columns.
///
/// Names match header text exactly. A name with no matching header is
/// ignored.
///
/// # Example
///
/// ```no_run
/// let rows = sheetrows::read_rows_with_columns("people.xlsx", ["Name", "City"])?;
/// # Ok::<(), sheetrows::Error>(())
/// ```
pub fn read_rows_with_columns<I, S>(path: impl AsRef<Path>, columns: I) -> Result<Vec<Row>>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    ReaderSession::new(ReaderOptions::new().with_columns(columns)).read(path)
}
