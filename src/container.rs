//! Sequential entry scanning over a ZIP container.
//!
//! The scanner walks local file headers in storage order and never consults
//! the central directory, so a container can be consumed from any forward-only
//! byte source. Each search consumes the handle up to the matched entry; a
//! second search needs a fresh handle from [`ContainerSource::open`].

use crate::error::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use flate2::bufread::DeflateDecoder;
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Cursor, Read, Take};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Name of the shared-string dictionary part.
pub const SHARED_STRINGS_PART: &str = "xl/sharedStrings.xml";

/// Prefix shared by all worksheet parts.
pub const WORKSHEET_PREFIX: &str = "xl/worksheets/sheet";

/// Local File Header signature (PK\x03\x04).
const LFH_SIGNATURE: u32 = 0x0403_4b50;
/// Central Directory File Header signature (PK\x01\x02).
const CDFH_SIGNATURE: u32 = 0x0201_4b50;
/// End of Central Directory signature (PK\x05\x06).
const EOCD_SIGNATURE: u32 = 0x0605_4b50;
/// ZIP64 End of Central Directory signature (PK\x06\x06).
const ZIP64_EOCD_SIGNATURE: u32 = 0x0606_4b50;
/// Optional data descriptor signature (PK\x07\x08).
const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x0807_4b50;

const FLAG_ENCRYPTED: u16 = 1 << 0;
const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;
const ZIP64_EXTRA_ID: u16 = 0x0001;

/// A buffered handle over one pass through a container.
pub type ContainerHandle = BufReader<Box<dyn Read + Send>>;

/// Where container bytes come from.
///
/// Every call to [`open`](Self::open) yields an independent handle positioned
/// at the first byte, which is what lets a reader make two passes without
/// sharing a live handle.
#[derive(Clone)]
pub enum ContainerSource {
    /// A file on disk, reopened for every pass
    Path(PathBuf),
    /// An in-memory container
    Bytes(Arc<[u8]>),
}

impl ContainerSource {
    /// Create a source backed by a file path.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        ContainerSource::Path(path.as_ref().to_path_buf())
    }

    /// Create a source backed by an in-memory buffer.
    pub fn from_bytes(data: impl Into<Arc<[u8]>>) -> Self {
        ContainerSource::Bytes(data.into())
    }

    /// Open a new handle with the given read buffer size.
    pub fn open(&self, buffer_size: usize) -> Result<ContainerHandle> {
        let inner: Box<dyn Read + Send> = match self {
            ContainerSource::Path(path) => Box::new(File::open(path)?),
            ContainerSource::Bytes(data) => Box::new(Cursor::new(Arc::clone(data))),
        };
        Ok(BufReader::with_capacity(buffer_size.max(1), inner))
    }
}

impl fmt::Debug for ContainerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerSource::Path(path) => f.debug_tuple("Path").field(path).finish(),
            ContainerSource::Bytes(data) => f
                .debug_tuple("Bytes")
                .field(&format_args!("{} bytes", data.len()))
                .finish(),
        }
    }
}

impl fmt::Display for ContainerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerSource::Path(path) => write!(f, "{}", path.display()),
            ContainerSource::Bytes(data) => write!(f, "<memory: {} bytes>", data.len()),
        }
    }
}

/// How an entry name is matched while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartMatcher {
    /// The entry name must equal this string
    Exact(String),
    /// The entry name must start with this string
    Prefix(String),
}

impl PartMatcher {
    /// Match an entry by its full name.
    pub fn exact(name: impl Into<String>) -> Self {
        PartMatcher::Exact(name.into())
    }

    /// Match the first entry whose name starts with `prefix`.
    pub fn prefix(prefix: impl Into<String>) -> Self {
        PartMatcher::Prefix(prefix.into())
    }

    /// Check whether an entry name satisfies this matcher.
    pub fn matches(&self, name: &str) -> bool {
        match self {
            PartMatcher::Exact(expected) => name == expected,
            PartMatcher::Prefix(prefix) => name.starts_with(prefix.as_str()),
        }
    }
}

impl fmt::Display for PartMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartMatcher::Exact(name) => write!(f, "{}", name),
            PartMatcher::Prefix(prefix) => write!(f, "{}*", prefix),
        }
    }
}

/// ZIP compression methods understood by the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }
}

/// Parsed Local File Header.
#[derive(Debug, Clone)]
struct LocalHeader {
    name: String,
    flags: u16,
    method: CompressionMethod,
    compressed_size: u64,
    uncompressed_size: u64,
    zip64: bool,
}

impl LocalHeader {
    fn has_data_descriptor(&self) -> bool {
        self.flags & FLAG_DATA_DESCRIPTOR != 0
    }

    /// Compressed length, when the header records it.
    fn known_length(&self) -> Option<u64> {
        if self.has_data_descriptor() && self.compressed_size == 0 {
            None
        } else {
            Some(self.compressed_size)
        }
    }
}

/// Read the next Local File Header, or `None` once the central directory starts.
fn read_local_header<R: Read>(reader: &mut R) -> Result<Option<LocalHeader>> {
    let signature = reader.read_u32::<LittleEndian>()?;
    match signature {
        LFH_SIGNATURE => {}
        CDFH_SIGNATURE | EOCD_SIGNATURE | ZIP64_EOCD_SIGNATURE => return Ok(None),
        other => {
            return Err(Error::ZipArchive(format!(
                "Invalid local file header signature {:#010x}",
                other
            )))
        }
    }

    let _version_needed = reader.read_u16::<LittleEndian>()?;
    let flags = reader.read_u16::<LittleEndian>()?;
    let method = reader.read_u16::<LittleEndian>()?;
    let _last_mod_time = reader.read_u16::<LittleEndian>()?;
    let _last_mod_date = reader.read_u16::<LittleEndian>()?;
    let _crc32 = reader.read_u32::<LittleEndian>()?;
    let mut compressed_size = reader.read_u32::<LittleEndian>()? as u64;
    let mut uncompressed_size = reader.read_u32::<LittleEndian>()? as u64;
    let file_name_length = reader.read_u16::<LittleEndian>()?;
    let extra_field_length = reader.read_u16::<LittleEndian>()?;

    let mut file_name_bytes = vec![0u8; file_name_length as usize];
    reader.read_exact(&mut file_name_bytes)?;
    let name = String::from_utf8_lossy(&file_name_bytes).to_string();

    let mut extra = vec![0u8; extra_field_length as usize];
    reader.read_exact(&mut extra)?;

    // ZIP64 sizes are present only when the 32-bit fields are saturated
    let mut zip64 = false;
    let mut cursor = Cursor::new(extra.as_slice());
    while cursor.position() + 4 <= extra.len() as u64 {
        let header_id = cursor.read_u16::<LittleEndian>()?;
        let field_size = cursor.read_u16::<LittleEndian>()? as u64;
        let field_end = cursor.position() + field_size;

        if header_id == ZIP64_EXTRA_ID {
            zip64 = true;
            if uncompressed_size == 0xFFFF_FFFF && cursor.position() + 8 <= field_end {
                uncompressed_size = cursor.read_u64::<LittleEndian>()?;
            }
            if compressed_size == 0xFFFF_FFFF && cursor.position() + 8 <= field_end {
                compressed_size = cursor.read_u64::<LittleEndian>()?;
            }
        }
        cursor.set_position(field_end);
    }

    Ok(Some(LocalHeader {
        name,
        flags,
        method: CompressionMethod::from_u16(method),
        compressed_size,
        uncompressed_size,
        zip64,
    }))
}

/// Consume a data descriptor following entry data.
fn skip_data_descriptor<R: Read>(reader: &mut R, zip64: bool) -> Result<()> {
    // The signature is optional; without it the first word is the CRC
    if reader.read_u32::<LittleEndian>()? == DATA_DESCRIPTOR_SIGNATURE {
        let _crc32 = reader.read_u32::<LittleEndian>()?;
    }
    if zip64 {
        let _compressed = reader.read_u64::<LittleEndian>()?;
        let _uncompressed = reader.read_u64::<LittleEndian>()?;
    } else {
        let _compressed = reader.read_u32::<LittleEndian>()?;
        let _uncompressed = reader.read_u32::<LittleEndian>()?;
    }
    Ok(())
}

/// Advance past the data of an entry that did not match.
fn skip_entry<R: BufRead>(reader: &mut R, header: &LocalHeader) -> Result<()> {
    match header.known_length() {
        Some(length) => {
            let copied = io::copy(&mut reader.by_ref().take(length), &mut io::sink())?;
            if copied != length {
                return Err(Error::ZipArchive(format!(
                    "Truncated entry {}: expected {} bytes, found {}",
                    header.name, length, copied
                )));
            }
        }
        None if header.method == CompressionMethod::Deflate => {
            // Deflate streams are self-terminating, so decoding finds the end
            io::copy(&mut DeflateDecoder::new(&mut *reader), &mut io::sink())?;
        }
        None => {
            return Err(Error::ZipArchive(format!(
                "Cannot skip entry {}: size is only recorded after its data",
                header.name
            )))
        }
    }

    if header.has_data_descriptor() {
        skip_data_descriptor(reader, header.zip64)?;
    }
    Ok(())
}

enum EntryReader<'a, R: BufRead> {
    Stored(Take<&'a mut R>),
    Deflated(DeflateDecoder<Take<&'a mut R>>),
    DeflatedUnbounded(DeflateDecoder<&'a mut R>),
}

/// Decompressed content of one container entry.
///
/// The entry borrows the container handle; dropping it leaves the handle
/// open and owned by the caller.
pub struct PartEntry<'a, R: BufRead> {
    name: String,
    size: u64,
    reader: EntryReader<'a, R>,
}

impl<'a, R: BufRead> PartEntry<'a, R> {
    fn new(header: LocalHeader, reader: &'a mut R) -> Result<Self> {
        if header.flags & FLAG_ENCRYPTED != 0 {
            return Err(Error::ZipArchive(format!(
                "Entry {} is encrypted",
                header.name
            )));
        }

        let reader = match (header.method, header.known_length()) {
            (CompressionMethod::Stored, Some(length)) => EntryReader::Stored(reader.take(length)),
            (CompressionMethod::Deflate, Some(length)) => {
                EntryReader::Deflated(DeflateDecoder::new(reader.take(length)))
            }
            (CompressionMethod::Deflate, None) => {
                EntryReader::DeflatedUnbounded(DeflateDecoder::new(reader))
            }
            (CompressionMethod::Stored, None) => {
                return Err(Error::ZipArchive(format!(
                    "Stored entry {} has no recorded size",
                    header.name
                )))
            }
            (CompressionMethod::Unknown(method), _) => {
                return Err(Error::ZipArchive(format!(
                    "Unsupported compression method {} for entry {}",
                    method, header.name
                )))
            }
        };

        Ok(Self {
            name: header.name,
            size: header.uncompressed_size,
            reader,
        })
    }

    /// Full entry name inside the container.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Uncompressed size recorded in the local header (0 when deferred to a data descriptor).
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl<R: BufRead> Read for PartEntry<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.reader {
            EntryReader::Stored(inner) => {
                let read = inner.read(buf)?;
                // Take reports a clean EOF when the input is shorter than the entry
                if read == 0 && !buf.is_empty() && inner.limit() > 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!(
                            "entry {} ends {} bytes early",
                            self.name,
                            inner.limit()
                        ),
                    ));
                }
                Ok(read)
            }
            EntryReader::Deflated(inner) => inner.read(buf),
            EntryReader::DeflatedUnbounded(inner) => inner.read(buf),
        }
    }
}

impl<R: BufRead> fmt::Debug for PartEntry<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartEntry")
            .field("name", &self.name)
            .field("size", &self.size)
            .finish()
    }
}

/// Advance through entries in storage order and return the first match.
///
/// Returns `Ok(None)` when the central directory is reached without a match.
/// Entries before the match are consumed, so the handle cannot be searched again.
pub fn find_entry<'a, R: BufRead>(
    reader: &'a mut R,
    matcher: &PartMatcher,
) -> Result<Option<PartEntry<'a, R>>> {
    loop {
        let header = match read_local_header(reader)? {
            Some(header) => header,
            None => {
                log::debug!("no container entry matches {}", matcher);
                return Ok(None);
            }
        };

        if matcher.matches(&header.name) {
            log::debug!(
                "found container entry {} ({} bytes uncompressed)",
                header.name,
                header.uncompressed_size
            );
            return PartEntry::new(header, reader).map(Some);
        }

        log::trace!("skipping container entry {}", header.name);
        skip_entry(reader, &header)?;
    }
}
