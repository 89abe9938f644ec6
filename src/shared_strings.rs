//! XLSX shared strings parsing.

use crate::error::{Error, Result};
use quick_xml::events::Event;
use std::io::BufRead;

/// Shared strings table.
///
/// Cells of type `s` carry a position into this table instead of their text.
/// Positions are assigned in document order, and an item without text still
/// occupies its slot so later positions stay aligned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SharedStringTable {
    /// All strings in order
    strings: Vec<String>,
}

impl SharedStringTable {
    /// Parse shared strings from a streaming XML source.
    ///
    /// The text of every `<t>` run inside an `<si>` item is concatenated;
    /// formatting and phonetic (`<rPh>`) runs are ignored.
    pub fn parse<R: BufRead>(source: R) -> Result<Self> {
        let mut strings = Vec::new();
        let mut reader = quick_xml::Reader::from_reader(source);
        reader.config_mut().trim_text(false);

        let mut buf = Vec::new();
        let mut in_si = false;
        let mut in_t = false;
        let mut phonetic_depth = 0usize;
        let mut depth = 0usize;
        let mut current_text = String::new();

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) => {
                    depth += 1;
                    match e.local_name().as_ref() {
                        b"si" => {
                            in_si = true;
                            current_text.clear();
                        }
                        b"rPh" if in_si => phonetic_depth += 1,
                        b"t" if in_si && phonetic_depth == 0 => in_t = true,
                        _ => {}
                    }
                }
                Event::Empty(e) => {
                    if e.local_name().as_ref() == b"si" {
                        strings.push(String::new());
                    }
                }
                Event::Text(e) if in_t => {
                    current_text.push_str(&e.unescape()?);
                }
                Event::CData(e) if in_t => {
                    current_text.push_str(&String::from_utf8_lossy(&e));
                }
                Event::End(e) => {
                    depth = depth.saturating_sub(1);
                    match e.local_name().as_ref() {
                        b"si" => {
                            strings.push(std::mem::take(&mut current_text));
                            in_si = false;
                            in_t = false;
                            phonetic_depth = 0;
                        }
                        b"rPh" if phonetic_depth > 0 => phonetic_depth -= 1,
                        b"t" => in_t = false,
                        _ => {}
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        if in_si {
            return Err(Error::XmlParse(
                "unexpected end of shared strings inside <si>".to_string(),
            ));
        }
        if depth != 0 {
            return Err(Error::XmlParse(format!(
                "unexpected end of shared strings with {} unclosed elements",
                depth
            )));
        }

        log::debug!("parsed {} shared strings", strings.len());
        Ok(Self { strings })
    }

    /// Parse shared strings from XML content.
    pub fn from_xml(xml: &str) -> Result<Self> {
        Self::parse(xml.as_bytes())
    }

    /// Get a string by index.
    ///
    /// An index at or past [`len`](Self::len) is an error, never an empty value.
    pub fn get(&self, index: usize) -> Result<&str> {
        self.strings
            .get(index)
            .map(|s| s.as_str())
            .ok_or(Error::SharedStringIndex {
                index,
                len: self.strings.len(),
            })
    }

    /// Get the count of shared strings.
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Iterate over the strings in position order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.strings.iter().map(|s| s.as_str())
    }
}
