//! Event-driven worksheet decoding.
//!
//! [`RowDecoder`] pulls XML events from a worksheet part and turns them into
//! [`Row`]s one at a time. The first `<row>` element is the header: it fixes
//! the [`ColumnIndexMap`] and produces no output. Every later row is
//! assembled against that map:
//!
//! ```text
//! AwaitingHeader --first row--> StreamingRows --end of input--> Done
//! ```
//!
//! Any error also moves the decoder to `Done`.

use crate::columns::{ColumnFilter, ColumnIndexMap};
use crate::error::{Error, Result};
use crate::reference::{column_index, column_letters};
use crate::row::Row;
use crate::shared_strings::SharedStringTable;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::io::BufRead;

/// Decoder lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// No row seen yet; the next row is the header
    AwaitingHeader,
    /// Header decoded; each row becomes output
    StreamingRows,
    /// Input exhausted or failed
    Done,
}

/// How a cell's payload is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellKind {
    /// `t="s"`: the payload is a shared-string position
    SharedString,
    /// `t="inlineStr"`: text lives in `<is>` runs
    InlineString,
    /// Numbers, booleans, errors, formula results
    Literal,
}

impl CellKind {
    fn from_type_attr(value: &[u8]) -> Self {
        match value {
            b"s" => CellKind::SharedString,
            b"inlineStr" => CellKind::InlineString,
            _ => CellKind::Literal,
        }
    }
}

/// The cell whose content is being read.
#[derive(Debug)]
struct PendingCell {
    column: usize,
    kind: CellKind,
    /// Unmapped data cells are only tracked to find their end
    keep: bool,
    raw: Option<String>,
}

impl PendingCell {
    fn resolve(self, shared_strings: &SharedStringTable) -> Result<Option<String>> {
        let Some(raw) = self.raw else {
            return Ok(None);
        };

        match self.kind {
            CellKind::SharedString => {
                let index = raw
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| Error::InvalidSharedStringIndex(raw.clone()))?;
                shared_strings.get(index).map(|s| Some(s.to_string()))
            }
            CellKind::InlineString | CellKind::Literal => Ok(Some(raw)),
        }
    }
}

/// Row and cell state driven by XML events.
struct RowAssembler<'a> {
    shared_strings: &'a SharedStringTable,
    filter: Option<&'a ColumnFilter>,
    state: DecoderState,
    columns: Option<ColumnIndexMap>,

    in_row: bool,
    header_cells: Vec<(usize, Option<String>)>,
    row: Option<Row>,
    /// Column assumed for a cell without a usable `r` attribute
    next_column: usize,

    cell: Option<PendingCell>,
    in_value: bool,
    in_inline: bool,
    in_inline_text: bool,
    phonetic_depth: usize,
    /// Elements opened and not yet closed
    depth: usize,

    rows_emitted: usize,
}

impl<'a> RowAssembler<'a> {
    fn new(shared_strings: &'a SharedStringTable, filter: Option<&'a ColumnFilter>) -> Self {
        Self {
            shared_strings,
            filter,
            state: DecoderState::AwaitingHeader,
            columns: None,
            in_row: false,
            header_cells: Vec::new(),
            row: None,
            next_column: 0,
            cell: None,
            in_value: false,
            in_inline: false,
            in_inline_text: false,
            phonetic_depth: 0,
            depth: 0,
            rows_emitted: 0,
        }
    }

    fn capturing(&self) -> bool {
        self.cell.as_ref().is_some_and(|c| c.keep) && (self.in_value || self.in_inline_text)
    }

    fn push_text(&mut self, text: &str) {
        if let Some(cell) = self.cell.as_mut() {
            cell.raw.get_or_insert_with(String::new).push_str(text);
        }
    }

    /// Mark the current cell as having a value element, even an empty one.
    fn open_value(&mut self) {
        if let Some(cell) = self.cell.as_mut().filter(|c| c.keep) {
            cell.raw.get_or_insert_with(String::new);
        }
    }

    fn start(&mut self, e: &BytesStart<'_>) -> Result<()> {
        self.depth += 1;
        match e.local_name().as_ref() {
            b"row" => self.begin_row(),
            b"c" if self.in_row => self.begin_cell(e)?,
            b"v" if self.cell.is_some() => {
                self.open_value();
                self.in_value = true;
            }
            b"is" if self.cell.is_some() => {
                self.open_value();
                self.in_inline = true;
            }
            b"rPh" if self.in_inline => self.phonetic_depth += 1,
            b"t" if self.in_inline && self.phonetic_depth == 0 => self.in_inline_text = true,
            _ => {}
        }
        Ok(())
    }

    fn empty(&mut self, e: &BytesStart<'_>) -> Result<Option<Row>> {
        match e.local_name().as_ref() {
            b"row" => {
                self.begin_row();
                return self.end_row();
            }
            b"c" if self.in_row => {
                self.begin_cell(e)?;
                self.end_cell()?;
            }
            b"v" | b"is" if self.cell.is_some() => self.open_value(),
            _ => {}
        }
        Ok(None)
    }

    fn end(&mut self, local_name: &[u8]) -> Result<Option<Row>> {
        self.depth = self.depth.saturating_sub(1);
        match local_name {
            b"row" if self.in_row => return self.end_row(),
            b"c" if self.cell.is_some() => self.end_cell()?,
            b"v" => self.in_value = false,
            b"is" => {
                self.in_inline = false;
                self.phonetic_depth = 0;
            }
            b"rPh" if self.phonetic_depth > 0 => self.phonetic_depth -= 1,
            b"t" => self.in_inline_text = false,
            _ => {}
        }
        Ok(None)
    }

    fn begin_row(&mut self) {
        self.in_row = true;
        self.next_column = 0;
        match (&self.state, &self.columns) {
            (DecoderState::StreamingRows, Some(columns)) => self.row = Some(columns.blank_row()),
            _ => self.header_cells.clear(),
        }
    }

    fn begin_cell(&mut self, e: &BytesStart<'_>) -> Result<()> {
        let mut reference: Option<String> = None;
        let mut kind = CellKind::Literal;

        for attr in e.attributes() {
            let attr = attr?;
            match attr.key.as_ref() {
                b"r" => reference = Some(attr.unescape_value()?.into_owned()),
                b"t" => kind = CellKind::from_type_attr(&attr.value),
                _ => {}
            }
        }

        let column = match reference.as_deref().map(|r| (r, column_index(r))) {
            Some((_, Some(column))) => column,
            Some((r, None)) => {
                log::warn!(
                    "unreadable cell reference {:?}; assuming column {}",
                    r,
                    column_letters(self.next_column)
                );
                self.next_column
            }
            None => self.next_column,
        };
        self.next_column = column + 1;

        let keep = match self.state {
            DecoderState::AwaitingHeader => true,
            DecoderState::StreamingRows => self.columns.as_ref().is_some_and(|c| c.contains(column)),
            DecoderState::Done => false,
        };
        if !keep {
            log::trace!("dropping cell in unmapped column {}", column_letters(column));
        }

        self.cell = Some(PendingCell {
            column,
            kind,
            keep,
            raw: None,
        });
        Ok(())
    }

    fn end_cell(&mut self) -> Result<()> {
        self.in_value = false;
        self.in_inline = false;
        self.in_inline_text = false;
        self.phonetic_depth = 0;

        let Some(cell) = self.cell.take() else {
            return Ok(());
        };
        if !cell.keep {
            return Ok(());
        }

        let column = cell.column;
        let value = cell.resolve(self.shared_strings)?;
        match self.state {
            DecoderState::AwaitingHeader => self.header_cells.push((column, value)),
            DecoderState::StreamingRows => {
                let name = self.columns.as_ref().and_then(|c| c.get(column));
                if let (Some(row), Some(name)) = (self.row.as_mut(), name) {
                    row.set(name, value);
                }
            }
            DecoderState::Done => {}
        }
        Ok(())
    }

    fn end_row(&mut self) -> Result<Option<Row>> {
        self.in_row = false;
        self.cell = None;

        match self.state {
            DecoderState::AwaitingHeader => {
                let cells = std::mem::take(&mut self.header_cells);
                self.columns = Some(ColumnIndexMap::from_header(cells, self.filter));
                self.state = DecoderState::StreamingRows;
                Ok(None)
            }
            DecoderState::StreamingRows => {
                let row = self.row.take();
                if row.is_some() {
                    self.rows_emitted += 1;
                }
                Ok(row)
            }
            DecoderState::Done => Ok(None),
        }
    }

    fn finish(&mut self) -> Result<()> {
        if self.in_row || self.cell.is_some() {
            return Err(Error::XmlParse(
                "unexpected end of worksheet inside <row>".to_string(),
            ));
        }
        if self.depth != 0 {
            return Err(Error::XmlParse(format!(
                "unexpected end of worksheet with {} unclosed elements",
                self.depth
            )));
        }
        log::debug!("worksheet decoded: {} data rows", self.rows_emitted);
        Ok(())
    }
}

/// Pull-based decoder producing one [`Row`] per call.
pub struct RowDecoder<'a, R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    assembler: RowAssembler<'a>,
}

impl<'a, R: BufRead> RowDecoder<'a, R> {
    /// Create a decoder over a worksheet part.
    ///
    /// Shared-string cells resolve against `shared_strings`; when `filter` is
    /// given, only admitted header columns make it into the column map.
    pub fn new(
        source: R,
        shared_strings: &'a SharedStringTable,
        filter: Option<&'a ColumnFilter>,
    ) -> Self {
        let mut reader = Reader::from_reader(source);
        reader.config_mut().trim_text(false);

        Self {
            reader,
            buf: Vec::new(),
            assembler: RowAssembler::new(shared_strings, filter),
        }
    }

    /// Decode the next data row.
    ///
    /// Returns `Ok(None)` once the worksheet is exhausted. After an error the
    /// decoder is `Done` and keeps returning `Ok(None)`.
    pub fn next_row(&mut self) -> Result<Option<Row>> {
        if self.assembler.state == DecoderState::Done {
            return Ok(None);
        }

        match self.advance() {
            Ok(Some(row)) => Ok(Some(row)),
            Ok(None) => {
                self.assembler.state = DecoderState::Done;
                Ok(None)
            }
            Err(e) => {
                self.assembler.state = DecoderState::Done;
                Err(e)
            }
        }
    }

    fn advance(&mut self) -> Result<Option<Row>> {
        loop {
            self.buf.clear();
            let emitted = match self.reader.read_event_into(&mut self.buf)? {
                Event::Start(e) => {
                    self.assembler.start(&e)?;
                    None
                }
                Event::Empty(e) => self.assembler.empty(&e)?,
                Event::End(e) => self.assembler.end(e.local_name().as_ref())?,
                Event::Text(e) => {
                    if self.assembler.capturing() {
                        self.assembler.push_text(&e.unescape()?);
                    }
                    None
                }
                Event::CData(e) => {
                    if self.assembler.capturing() {
                        self.assembler.push_text(&String::from_utf8_lossy(&e));
                    }
                    None
                }
                Event::Eof => {
                    self.assembler.finish()?;
                    return Ok(None);
                }
                _ => None,
            };

            if emitted.is_some() {
                return Ok(emitted);
            }
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DecoderState {
        self.assembler.state
    }

    /// The column map, once the header row has been decoded.
    pub fn columns(&self) -> Option<&ColumnIndexMap> {
        self.assembler.columns.as_ref()
    }
}

impl<R: BufRead> Iterator for RowDecoder<'_, R> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_row().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet(rows: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
  <dimension ref="A1:C3"/>
  <sheetData>{}</sheetData>
</worksheet>"#,
            rows
        )
    }

    fn decode(
        xml: &str,
        strings: &SharedStringTable,
        filter: Option<&ColumnFilter>,
    ) -> Result<Vec<Row>> {
        RowDecoder::new(xml.as_bytes(), strings, filter).collect()
    }

    fn pairs(row: &Row) -> Vec<(&str, Option<&str>)> {
        row.iter().collect()
    }

    #[test]
    fn test_header_then_literal_row() {
        let strings = SharedStringTable::from_xml(
            "<sst><si><t>Name</t></si><si><t>Age</t></si></sst>",
        )
        .unwrap();
        let xml = sheet(
            r#"<row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c></row>
<row r="2"><c r="A2" t="str"><v>Alice</v></c><c r="B2"><v>30</v></c></row>"#,
        );

        let rows = decode(&xml, &strings, None).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(
            pairs(&rows[0]),
            vec![("Name", Some("Alice")), ("Age", Some("30"))]
        );
    }

    #[test]
    fn test_state_transitions() {
        let strings = SharedStringTable::default();
        let xml = sheet(
            r#"<row><c r="A1" t="inlineStr"><is><t>H</t></is></c></row>
<row><c r="A2"><v>1</v></c></row>"#,
        );
        let mut decoder = RowDecoder::new(xml.as_bytes(), &strings, None);

        assert_eq!(decoder.state(), DecoderState::AwaitingHeader);
        assert!(decoder.columns().is_none());

        let row = decoder.next_row().unwrap().unwrap();
        assert_eq!(decoder.state(), DecoderState::StreamingRows);
        assert_eq!(row.get("H"), Some("1"));
        assert_eq!(decoder.columns().unwrap().len(), 1);

        assert!(decoder.next_row().unwrap().is_none());
        assert_eq!(decoder.state(), DecoderState::Done);
        assert!(decoder.next_row().unwrap().is_none());
    }

    #[test]
    fn test_missing_cells_become_none() {
        let strings = SharedStringTable::default();
        let xml = sheet(
            r#"<row><c r="A1" t="inlineStr"><is><t>Name</t></is></c><c r="B1" t="inlineStr"><is><t>City</t></is></c><c r="C1" t="inlineStr"><is><t>Zip</t></is></c></row>
<row><c r="A2" t="inlineStr"><is><t>Ann</t></is></c><c r="C2"><v>75001</v></c></row>
<row/>"#,
        );

        let rows = decode(&xml, &strings, None).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(
            pairs(&rows[0]),
            vec![("Name", Some("Ann")), ("City", None), ("Zip", Some("75001"))]
        );
        assert_eq!(
            pairs(&rows[1]),
            vec![("Name", None), ("City", None), ("Zip", None)]
        );
    }

    #[test]
    fn test_uniform_key_order_regardless_of_cell_order() {
        let strings = SharedStringTable::default();
        let xml = sheet(
            r#"<row><c r="A1"><v>a</v></c><c r="B1"><v>b</v></c></row>
<row><c r="B2"><v>2</v></c><c r="A2"><v>1</v></c></row>"#,
        );

        let rows = decode(&xml, &strings, None).unwrap();
        assert_eq!(rows[0].columns().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(rows[0].get("a"), Some("1"));
        assert_eq!(rows[0].get("b"), Some("2"));
    }

    #[test]
    fn test_sparse_header_uses_references() {
        let strings = SharedStringTable::default();
        let xml = sheet(
            r#"<row><c r="B1"><v>Second</v></c><c r="D1"><v>Fourth</v></c></row>
<row><c r="A2"><v>x</v></c><c r="B2"><v>y</v></c><c r="D2"><v>z</v></c></row>"#,
        );

        let rows = decode(&xml, &strings, None).unwrap();
        assert_eq!(
            pairs(&rows[0]),
            vec![("Second", Some("y")), ("Fourth", Some("z"))]
        );
    }

    #[test]
    fn test_missing_reference_falls_back_to_running_column() {
        let strings = SharedStringTable::default();
        let xml = sheet(
            r#"<row><c><v>A</v></c><c r="C1"><v>C</v></c><c><v>D</v></c></row>
<row><c><v>1</v></c><c><v>2</v></c><c><v>3</v></c><c><v>4</v></c></row>"#,
        );

        let rows = decode(&xml, &strings, None).unwrap();
        // Header columns land on 0, 2, 3; data cells on 0, 1, 2, 3
        assert_eq!(
            pairs(&rows[0]),
            vec![("A", Some("1")), ("C", Some("3")), ("D", Some("4"))]
        );
    }

    #[test]
    fn test_cells_beyond_header_are_dropped() {
        let strings = SharedStringTable::default();
        let xml = sheet(
            r#"<row><c r="A1"><v>Only</v></c></row>
<row><c r="A2"><v>kept</v></c><c r="Z2"><v>dropped</v></c></row>"#,
        );

        let rows = decode(&xml, &strings, None).unwrap();
        assert_eq!(pairs(&rows[0]), vec![("Only", Some("kept"))]);
    }

    #[test]
    fn test_unmapped_cells_are_not_resolved() {
        let strings = SharedStringTable::from_xml("<sst><si><t>Name</t></si></sst>").unwrap();
        let xml = sheet(
            r#"<row><c r="A1" t="s"><v>0</v></c></row>
<row><c r="A2"><v>ok</v></c><c r="B2" t="s"><v>99</v></c></row>"#,
        );

        let rows = decode(&xml, &strings, None).unwrap();
        assert_eq!(rows[0].get("Name"), Some("ok"));
    }

    #[test]
    fn test_filter_restricts_schema() {
        let strings = SharedStringTable::from_xml("<sst><si><t>Bob</t></si></sst>").unwrap();
        let filter = ColumnFilter::new(["Name", "Country"]);
        let xml = sheet(
            r#"<row><c r="A1" t="inlineStr"><is><t>Name</t></is></c><c r="B1" t="inlineStr"><is><t>City</t></is></c></row>
<row><c r="A2" t="s"><v>0</v></c><c r="B2" t="inlineStr"><is><t>Paris</t></is></c></row>"#,
        );

        let rows = decode(&xml, &strings, Some(&filter)).unwrap();
        assert_eq!(pairs(&rows[0]), vec![("Name", Some("Bob"))]);
    }

    #[test]
    fn test_value_forms() {
        let strings = SharedStringTable::default();
        let xml = sheet(
            r#"<row><c r="A1"><v>num</v></c><c r="B1"><v>bool</v></c><c r="C1"><v>formula</v></c><c r="D1"><v>empty</v></c><c r="E1"><v>blank</v></c><c r="F1"><v>err</v></c></row>
<row><c r="A2"><v>3.14</v></c><c r="B2" t="b"><v>1</v></c><c r="C2"><f>SUM(A2:A2)</f><v>3.14</v></c><c r="D2"><v/></c><c r="E2" s="1"/><c r="F2" t="e"><v>#DIV/0!</v></c></row>"#,
        );

        let rows = decode(&xml, &strings, None).unwrap();
        assert_eq!(
            pairs(&rows[0]),
            vec![
                ("num", Some("3.14")),
                ("bool", Some("1")),
                ("formula", Some("3.14")),
                ("empty", Some("")),
                ("blank", None),
                ("err", Some("#DIV/0!")),
            ]
        );
    }

    #[test]
    fn test_inline_string_runs_and_whitespace() {
        let strings = SharedStringTable::default();
        let xml = sheet(
            r#"<row><c r="A1"><v>Text</v></c></row>
<row><c r="A2" t="inlineStr"><is><r><t xml:space="preserve">  padded </t></r><r><t>&amp; more</t></r><rPh sb="0" eb="1"><t>skip</t></rPh></is></c></row>"#,
        );

        let rows = decode(&xml, &strings, None).unwrap();
        assert_eq!(rows[0].get("Text"), Some("  padded & more"));
    }

    #[test]
    fn test_shared_string_index_out_of_range() {
        let strings = SharedStringTable::from_xml("<sst><si><t>H</t></si></sst>").unwrap();
        let xml = sheet(
            r#"<row><c r="A1" t="s"><v>0</v></c></row>
<row><c r="A2" t="s"><v>1</v></c></row>"#,
        );

        let mut decoder = RowDecoder::new(xml.as_bytes(), &strings, None);
        let err = decoder.next_row().unwrap_err();
        assert!(matches!(err, Error::SharedStringIndex { index: 1, len: 1 }));
        assert_eq!(decoder.state(), DecoderState::Done);
        assert!(decoder.next_row().unwrap().is_none());
    }

    #[test]
    fn test_shared_string_index_not_numeric() {
        let strings = SharedStringTable::from_xml("<sst><si><t>H</t></si></sst>").unwrap();
        let xml = sheet(r#"<row><c r="A1" t="s"><v>zero</v></c></row>"#);

        let err = decode(&xml, &strings, None).unwrap_err();
        assert!(matches!(err, Error::InvalidSharedStringIndex(ref raw) if raw == "zero"));
    }

    #[test]
    fn test_header_only_and_empty_sheets() {
        let strings = SharedStringTable::default();

        let header_only = sheet(r#"<row><c r="A1"><v>H</v></c></row>"#);
        assert!(decode(&header_only, &strings, None).unwrap().is_empty());

        let no_rows = sheet("");
        assert!(decode(&no_rows, &strings, None).unwrap().is_empty());
    }

    #[test]
    fn test_empty_header_row() {
        let strings = SharedStringTable::default();
        let xml = sheet(r#"<row r="1"/><row r="2"><c r="A2"><v>x</v></c></row>"#);

        let rows = decode(&xml, &strings, None).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].is_empty());
    }

    #[test]
    fn test_prefixed_worksheet() {
        let strings = SharedStringTable::default();
        let xml = r#"<x:worksheet xmlns:x="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><x:sheetData>
<x:row><x:c r="A1"><x:v>K</x:v></x:c></x:row>
<x:row><x:c r="A2"><x:v>v</x:v></x:c></x:row>
</x:sheetData></x:worksheet>"#;

        let rows = decode(xml, &strings, None).unwrap();
        assert_eq!(rows[0].get("K"), Some("v"));
    }

    #[test]
    fn test_malformed_worksheet() {
        let strings = SharedStringTable::default();

        let mismatched = sheet(r#"<row><c r="A1"><v>H</v></c></row><row><c r="A2"><v>1</c></row>"#);
        assert!(matches!(
            decode(&mismatched, &strings, None),
            Err(Error::XmlParse(_))
        ));

        let truncated = r#"<worksheet><sheetData><row><c r="A1"><v>H</v></c></row><row><c r="A2"><v>1</v>"#;
        assert!(matches!(
            decode(truncated, &strings, None),
            Err(Error::XmlParse(_))
        ));
    }

    #[test]
    fn test_unclosed_root_is_rejected() {
        let strings = SharedStringTable::default();
        let xml = r#"<worksheet><sheetData><row><c r="A1"><v>H</v></c></row><row><c r="A2"><v>1</v></c></row>"#;

        let mut decoder = RowDecoder::new(xml.as_bytes(), &strings, None);
        assert_eq!(decoder.next_row().unwrap().unwrap().get("H"), Some("1"));
        assert!(matches!(decoder.next_row(), Err(Error::XmlParse(_))));
        assert_eq!(decoder.state(), DecoderState::Done);

        assert!(matches!(
            decode(xml, &strings, None),
            Err(Error::XmlParse(_))
        ));
    }

    #[test]
    fn test_rows_are_produced_incrementally() {
        let strings = SharedStringTable::default();
        let xml = sheet(
            r#"<row><c r="A1"><v>n</v></c></row>
<row><c r="A2"><v>1</v></c></row>
<row><c r="A3"><v>2</v></c></row>
<row><c r="A4"><v>oops</c></row>"#,
        );

        // The malformed tail is not reached when the consumer stops early
        let first: Vec<Row> = RowDecoder::new(xml.as_bytes(), &strings, None)
            .take(2)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[1].get("n"), Some("2"));
    }
}
