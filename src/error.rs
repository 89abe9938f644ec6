//! Error types for the sheetrows library.

use std::io;
use thiserror::Error;

/// Result type alias for sheetrows operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reading a spreadsheet.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Error reading the ZIP container.
    #[error("ZIP archive error: {0}")]
    ZipArchive(String),

    /// Error parsing XML content.
    #[error("XML parse error: {0}")]
    XmlParse(String),

    /// A cell referenced a shared string past the end of the table.
    #[error("Shared string index {index} out of range (table has {len} entries)")]
    SharedStringIndex {
        /// Requested position
        index: usize,
        /// Number of entries in the table
        len: usize,
    },

    /// A shared-string cell did not carry a non-negative integer.
    #[error("Invalid shared string index: {0:?}")]
    InvalidSharedStringIndex(String),

    /// Reading was stopped through a cancellation token.
    #[error("Read cancelled")]
    Cancelled,

    /// Error serializing rows.
    #[error("Serialization error: {0}")]
    Serialize(String),
}

impl From<quick_xml::Error> for Error {
    fn from(err: quick_xml::Error) -> Self {
        match err {
            // Failures of the underlying part reader are not XML problems
            quick_xml::Error::Io(e) => Error::Io(io::Error::new(e.kind(), e.to_string())),
            other => Error::XmlParse(other.to_string()),
        }
    }
}

impl From<quick_xml::events::attributes::AttrError> for Error {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        Error::XmlParse(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialize(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::SharedStringIndex { index: 7, len: 3 };
        assert_eq!(
            err.to_string(),
            "Shared string index 7 out of range (table has 3 entries)"
        );

        let err = Error::InvalidSharedStringIndex("abc".to_string());
        assert_eq!(err.to_string(), "Invalid shared string index: \"abc\"");

        assert_eq!(Error::Cancelled.to_string(), "Read cancelled");
    }

    #[test]
    fn test_error_from_xml_reader_io() {
        let io_err = io::Error::new(io::ErrorKind::UnexpectedEof, "stream ended");
        let err: Error = quick_xml::Error::from(io_err).into();
        match err {
            Error::Io(e) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected Io, got {other:?}"),
        }

        let err: Error = quick_xml::Error::Syntax(quick_xml::errors::SyntaxError::UnclosedTag).into();
        assert!(matches!(err, Error::XmlParse(_)));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
