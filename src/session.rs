//! Reader configuration and the two-pass read pipeline.
//!
//! A [`ReaderSession`] holds configuration only. Opening a file produces a
//! [`Workbook`] that owns everything learned from that file: pass 1 loads
//! the shared strings on its own container handle and closes it, and each
//! call to [`Workbook::rows`] runs pass 2 on a fresh handle, yielding rows
//! lazily as the worksheet is decoded.

use crate::columns::{ColumnFilter, ColumnIndexMap};
use crate::container::{
    find_entry, ContainerHandle, ContainerSource, PartEntry, PartMatcher, SHARED_STRINGS_PART,
    WORKSHEET_PREFIX,
};
use crate::decoder::RowDecoder;
use crate::error::{Error, Result};
use crate::row::Row;
use crate::shared_strings::SharedStringTable;
use std::io::BufReader;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Default read buffer size in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 2048;

/// Shared flag for stopping a row stream from another thread.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Create a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Streams notice before decoding their next row.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Check whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Options for reading spreadsheets.
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    /// Read buffer size in bytes; affects I/O granularity only. Zero is read as one.
    pub buffer_size: usize,

    /// Header allow-list (None = every non-empty header)
    pub columns: Option<ColumnFilter>,

    /// Cooperative cancellation checked between rows
    pub cancellation: Option<CancellationToken>,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            columns: None,
            cancellation: None,
        }
    }
}

impl ReaderOptions {
    /// Create default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the read buffer size. Zero is raised to one byte.
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    /// Restrict output to the given header names.
    pub fn with_columns<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(ColumnFilter::new(names));
        self
    }

    /// Buffer size actually used for reads.
    fn effective_buffer_size(&self) -> usize {
        self.buffer_size.max(1)
    }

    /// Attach a cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// Reusable reader configuration.
///
/// A session keeps no per-file state, so one session can read any number of
/// files, one after another or from clones on separate threads.
///
/// # Example
///
/// ```no_run
/// use sheetrows::{ReaderOptions, ReaderSession};
///
/// let session = ReaderSession::new(ReaderOptions::new().with_columns(["Name", "Age"]));
/// let mut workbook = session.open("people.xlsx")?;
/// for row in workbook.rows()? {
///     let row = row?;
///     println!("{:?} is {:?}", row.get("Name"), row.get("Age"));
/// }
/// # Ok::<(), sheetrows::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct ReaderSession {
    options: ReaderOptions,
}

impl ReaderSession {
    /// Create a session with the given options.
    pub fn new(options: ReaderOptions) -> Self {
        Self { options }
    }

    /// The session's options.
    pub fn options(&self) -> &ReaderOptions {
        &self.options
    }

    /// Open a spreadsheet file and load its shared strings.
    pub fn open(&self, path: impl AsRef<Path>) -> Result<Workbook> {
        Workbook::load(ContainerSource::from_path(path), self.options.clone())
    }

    /// Open an in-memory spreadsheet and load its shared strings.
    pub fn open_bytes(&self, data: impl Into<Arc<[u8]>>) -> Result<Workbook> {
        Workbook::load(ContainerSource::from_bytes(data), self.options.clone())
    }

    /// Read every data row of a spreadsheet file.
    ///
    /// Any error aborts the read; no partial rows are returned.
    pub fn read(&self, path: impl AsRef<Path>) -> Result<Vec<Row>> {
        let mut workbook = self.open(path)?;
        let rows = workbook.rows()?.collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Read every data row of an in-memory spreadsheet.
    pub fn read_bytes(&self, data: impl Into<Arc<[u8]>>) -> Result<Vec<Row>> {
        let mut workbook = self.open_bytes(data)?;
        let rows = workbook.rows()?.collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }
}

/// State for reading one spreadsheet.
pub struct Workbook {
    source: ContainerSource,
    options: ReaderOptions,
    shared_strings: SharedStringTable,
    /// Handle of the most recent row pass. `Rows` borrows its part entry from
    /// this handle, so it must outlive the iterator.
    handle: Option<ContainerHandle>,
}

impl Workbook {
    fn load(source: ContainerSource, options: ReaderOptions) -> Result<Self> {
        log::debug!("opening {}", source);
        let buffer_size = options.effective_buffer_size();
        let shared_strings = Self::load_shared_strings(&source, buffer_size)?;

        Ok(Self {
            source,
            options,
            shared_strings,
            handle: None,
        })
    }

    /// Pass 1: find and parse the shared-string part on its own handle.
    fn load_shared_strings(
        source: &ContainerSource,
        buffer_size: usize,
    ) -> Result<SharedStringTable> {
        let mut handle = source.open(buffer_size)?;
        let matcher = PartMatcher::exact(SHARED_STRINGS_PART);

        let table = match find_entry(&mut handle, &matcher)? {
            Some(entry) => {
                SharedStringTable::parse(BufReader::with_capacity(buffer_size, entry))?
            }
            None => SharedStringTable::default(),
        };
        Ok(table)
    }

    /// Start a pass over the first worksheet's data rows.
    ///
    /// Each call opens a new container handle and decodes from the top, so
    /// the returned iterator is independent of earlier ones. A container with
    /// no worksheet part yields no rows.
    pub fn rows(&mut self) -> Result<Rows<'_>> {
        let buffer_size = self.options.effective_buffer_size();
        let handle = self.handle.insert(self.source.open(buffer_size)?);
        let matcher = PartMatcher::prefix(WORKSHEET_PREFIX);

        let decoder = find_entry(handle, &matcher)?.map(|entry| {
            RowDecoder::new(
                BufReader::with_capacity(buffer_size, entry),
                &self.shared_strings,
                self.options.columns.as_ref(),
            )
        });

        Ok(Rows {
            decoder,
            cancellation: self.options.cancellation.clone(),
        })
    }

    /// The shared strings loaded by pass 1.
    pub fn shared_strings(&self) -> &SharedStringTable {
        &self.shared_strings
    }

    /// Where this workbook is read from.
    pub fn source(&self) -> &ContainerSource {
        &self.source
    }
}

impl std::fmt::Debug for Workbook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workbook")
            .field("source", &self.source)
            .field("shared_strings", &self.shared_strings.len())
            .finish()
    }
}

type WorksheetDecoder<'a> = RowDecoder<'a, BufReader<PartEntry<'a, ContainerHandle>>>;

/// Lazy, forward-only sequence of data rows.
///
/// Rows are decoded on demand; dropping the iterator stops decoding. After
/// an error or cancellation the iterator ends.
pub struct Rows<'a> {
    decoder: Option<WorksheetDecoder<'a>>,
    cancellation: Option<CancellationToken>,
}

impl Rows<'_> {
    /// The header column map, once the first row has been pulled.
    pub fn columns(&self) -> Option<&ColumnIndexMap> {
        self.decoder.as_ref().and_then(|d| d.columns())
    }
}

impl Iterator for Rows<'_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.decoder.is_none() {
            return None;
        }

        if self.cancellation.as_ref().is_some_and(|t| t.is_cancelled()) {
            log::debug!("row stream cancelled");
            self.decoder = None;
            return Some(Err(Error::Cancelled));
        }

        self.decoder.as_mut()?.next()
    }
}
