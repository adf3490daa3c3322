//! Worksheet cell access.
//!
//! Cells are located by zero-based (row, column) positions. Positions come
//! from the `r` attributes when present and are otherwise implied by document
//! order, the same way spreadsheet applications read them.

use std::collections::HashMap;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use super::package::{attr_value, REL_NS};
use super::PackageError;

/// Worksheet children that must follow `<drawing>` (CT_Worksheet order).
const DRAWING_SUCCESSORS: &[&[u8]] = &[
    b"legacyDrawing",
    b"legacyDrawingHF",
    b"drawingHF",
    b"picture",
    b"oleObjects",
    b"controls",
    b"webPublishItems",
    b"tableParts",
    b"extLst",
];

/// Rows per worksheet in the OOXML limits.
pub const MAX_ROWS: u32 = 1_048_576;
/// Columns per worksheet (`XFD`).
pub const MAX_COLS: u32 = 16_384;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellPos {
    pub row: u32,
    pub col: u32,
}

impl CellPos {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }
}

impl std::fmt::Display for CellPos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut letters = Vec::new();
        let mut n = u64::from(self.col) + 1;
        while n > 0 {
            let rem = (n - 1) % 26;
            letters.push((b'A' + rem as u8) as char);
            n = (n - 1) / 26;
        }
        let column: String = letters.into_iter().rev().collect();
        write!(f, "{}{}", column, u64::from(self.row) + 1)
    }
}

/// Parses an A1-style reference (`B3`, `$AA$10`) into a zero-based position.
/// References beyond `XFD1048576` are rejected.
pub fn parse_cell_ref(reference: &str) -> Option<CellPos> {
    let reference = reference.replace('$', "");
    let split = reference.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = reference.split_at(split);
    if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let mut col: u32 = 0;
    for c in letters.chars() {
        col = col
            .checked_mul(26)?
            .checked_add(c.to_ascii_uppercase() as u32 - 'A' as u32 + 1)?;
    }
    let row: u32 = digits.parse().ok()?;
    if row == 0 || row > MAX_ROWS || col > MAX_COLS {
        return None;
    }
    Some(CellPos::new(row - 1, col - 1))
}

/// A cell holding a string value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextCell {
    pub pos: CellPos,
    pub text: String,
}

/// Reads `xl/sharedStrings.xml`. Rich-text runs are concatenated; phonetic
/// runs are ignored.
pub fn parse_shared_strings(xml: &[u8]) -> Result<Vec<String>, PackageError> {
    let mut reader = Reader::from_reader(xml);
    let mut strings = Vec::new();
    let mut current: Option<String> = None;
    let mut phonetic_depth = 0usize;
    let mut in_t = false;
    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"rPh" => phonetic_depth += 1,
                b"t" => in_t = true,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Event::Text(t) if in_t && phonetic_depth == 0 => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&t.unescape()?);
                }
            }
            Event::CData(c) if in_t && phonetic_depth == 0 => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&String::from_utf8_lossy(&c));
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"si" => strings.push(current.take().unwrap_or_default()),
                b"rPh" => phonetic_depth = phonetic_depth.saturating_sub(1),
                b"t" => in_t = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(strings)
}

/// Tracks the implied position of rows and cells while streaming a sheet.
#[derive(Debug, Default)]
struct PositionTracker {
    row: Option<u32>,
    next_col: u32,
}

impl PositionTracker {
    fn enter_row(&mut self, e: &BytesStart<'_>) -> Result<(), PackageError> {
        let row = match attr_value(e, b"r")? {
            Some(r) => match r.trim().parse::<u32>() {
                Ok(n) if (1..=MAX_ROWS).contains(&n) => n - 1,
                _ => return Err(PackageError::Malformed(format!("invalid row number: {}", r))),
            },
            None => self.row.map_or(0, |r| r + 1),
        };
        if row >= MAX_ROWS {
            return Err(PackageError::Malformed(
                "worksheet has more rows than allowed".to_string(),
            ));
        }
        self.row = Some(row);
        self.next_col = 0;
        Ok(())
    }

    fn cell(&mut self, e: &BytesStart<'_>) -> Result<CellPos, PackageError> {
        let pos = match attr_value(e, b"r")? {
            Some(r) => parse_cell_ref(&r).ok_or_else(|| {
                PackageError::Malformed(format!("invalid cell reference: {}", r))
            })?,
            None => CellPos::new(self.row.unwrap_or(0), self.next_col),
        };
        if pos.col >= MAX_COLS {
            return Err(PackageError::Malformed(
                "row has more cells than allowed".to_string(),
            ));
        }
        self.next_col = pos.col + 1;
        Ok(pos)
    }
}

/// Reads events up to the end tag matching an already-consumed start tag.
fn collect_children<'a>(reader: &mut Reader<&'a [u8]>) -> Result<Vec<Event<'a>>, PackageError> {
    let mut events = Vec::new();
    let mut depth = 0usize;
    loop {
        let event = reader.read_event()?;
        match &event {
            Event::Start(_) => depth += 1,
            Event::End(_) if depth == 0 => return Ok(events),
            Event::End(_) => depth -= 1,
            Event::Eof => {
                return Err(PackageError::Malformed(
                    "unexpected end of worksheet inside a cell".to_string(),
                ))
            }
            _ => {}
        }
        events.push(event);
    }
}

/// String value of a cell, or `None` for non-text cells.
fn cell_text(
    cell: &BytesStart<'_>,
    children: &[Event<'_>],
    shared: &[String],
) -> Result<Option<String>, PackageError> {
    match attr_value(cell, b"t")?.as_deref() {
        Some("s") => {
            let raw = element_text(children, b"v", false)?;
            Ok(raw
                .and_then(|v| v.trim().parse::<usize>().ok())
                .and_then(|idx| shared.get(idx).cloned()))
        }
        Some("inlineStr") => element_text(children, b"t", true),
        _ => Ok(None),
    }
}

/// Concatenated text of every `name` element among `events`, skipping
/// phonetic runs when `skip_phonetic` is set.
fn element_text(
    events: &[Event<'_>],
    name: &[u8],
    skip_phonetic: bool,
) -> Result<Option<String>, PackageError> {
    let mut out: Option<String> = None;
    let mut inside = false;
    let mut phonetic_depth = 0usize;
    for event in events {
        match event {
            Event::Start(e) if skip_phonetic && e.local_name().as_ref() == b"rPh" => {
                phonetic_depth += 1
            }
            Event::End(e) if skip_phonetic && e.local_name().as_ref() == b"rPh" => {
                phonetic_depth = phonetic_depth.saturating_sub(1)
            }
            Event::Start(e) if e.local_name().as_ref() == name && phonetic_depth == 0 => {
                inside = true;
                out.get_or_insert_with(String::new);
            }
            Event::Empty(e) if e.local_name().as_ref() == name && phonetic_depth == 0 => {
                out.get_or_insert_with(String::new);
            }
            Event::End(e) if e.local_name().as_ref() == name => inside = false,
            Event::Text(t) if inside => {
                out.get_or_insert_with(String::new).push_str(&t.unescape()?)
            }
            Event::CData(c) if inside => out
                .get_or_insert_with(String::new)
                .push_str(&String::from_utf8_lossy(c)),
            _ => {}
        }
    }
    Ok(out)
}

/// Every text cell of a worksheet in document order.
pub fn read_text_cells(xml: &[u8], shared: &[String]) -> Result<Vec<TextCell>, PackageError> {
    let mut reader = Reader::from_reader(xml);
    let mut tracker = PositionTracker::default();
    let mut cells = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"row" => {
                tracker.enter_row(&e)?
            }
            Event::Start(e) if e.local_name().as_ref() == b"c" => {
                let pos = tracker.cell(&e)?;
                let children = collect_children(&mut reader)?;
                if let Some(text) = cell_text(&e, &children, shared)? {
                    cells.push(TextCell { pos, text });
                }
            }
            Event::Empty(e) if e.local_name().as_ref() == b"c" => {
                tracker.cell(&e)?;
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(cells)
}

/// Rewrites a worksheet, replacing the value of every cell in `edits` with
/// an inline string. When `drawing_rel` is set, a `<drawing>` element
/// referencing it is inserted at its schema position.
pub fn rewrite_sheet(
    xml: &[u8],
    edits: &HashMap<CellPos, String>,
    drawing_rel: Option<&str>,
) -> Result<Vec<u8>, PackageError> {
    let mut reader = Reader::from_reader(xml);
    let mut writer = Writer::new(Vec::new());
    let mut tracker = PositionTracker::default();
    let mut depth = 0usize;
    let mut root_prefix = String::new();
    let mut pending_drawing = drawing_rel;

    loop {
        match reader.read_event()? {
            Event::Eof => break,
            Event::Start(e) if e.local_name().as_ref() == b"c" => {
                let pos = tracker.cell(&e)?;
                let children = collect_children(&mut reader)?;
                match edits.get(&pos) {
                    Some(text) => write_inline_cell(&mut writer, &e, text)?,
                    None => {
                        let end = e.to_end().into_owned();
                        writer.write_event(Event::Start(e))?;
                        for child in children {
                            writer.write_event(child)?;
                        }
                        writer.write_event(Event::End(end))?;
                    }
                }
            }
            Event::Empty(e) if e.local_name().as_ref() == b"c" => {
                let pos = tracker.cell(&e)?;
                match edits.get(&pos) {
                    Some(text) => write_inline_cell(&mut writer, &e, text)?,
                    None => writer.write_event(Event::Empty(e))?,
                }
            }
            Event::Start(e) => {
                if depth == 0 {
                    root_prefix = element_prefix(&e);
                }
                if e.local_name().as_ref() == b"row" {
                    tracker.enter_row(&e)?;
                }
                if depth == 1 && DRAWING_SUCCESSORS.contains(&e.local_name().as_ref()) {
                    if let Some(rel) = pending_drawing.take() {
                        write_drawing(&mut writer, &root_prefix, rel)?;
                    }
                }
                depth += 1;
                writer.write_event(Event::Start(e))?;
            }
            Event::Empty(e) => {
                if e.local_name().as_ref() == b"row" {
                    tracker.enter_row(&e)?;
                }
                if depth == 1 && DRAWING_SUCCESSORS.contains(&e.local_name().as_ref()) {
                    if let Some(rel) = pending_drawing.take() {
                        write_drawing(&mut writer, &root_prefix, rel)?;
                    }
                }
                writer.write_event(Event::Empty(e))?;
            }
            Event::End(e) => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    if let Some(rel) = pending_drawing.take() {
                        write_drawing(&mut writer, &root_prefix, rel)?;
                    }
                }
                writer.write_event(Event::End(e))?;
            }
            event => writer.write_event(event)?,
        }
    }
    Ok(writer.into_inner())
}

/// `x:` for `<x:worksheet>`, empty for an unprefixed element.
fn element_prefix(e: &BytesStart<'_>) -> String {
    e.name()
        .prefix()
        .map(|p| format!("{}:", String::from_utf8_lossy(p.as_ref())))
        .unwrap_or_default()
}

fn write_inline_cell(
    writer: &mut Writer<Vec<u8>>,
    original: &BytesStart<'_>,
    text: &str,
) -> Result<(), PackageError> {
    let prefix = element_prefix(original);
    let cell_name = String::from_utf8_lossy(original.name().as_ref()).into_owned();
    let mut cell = BytesStart::new(cell_name.as_str());
    for attr in original.attributes().flatten() {
        if attr.key.as_ref() != b"t" {
            cell.push_attribute(attr);
        }
    }
    cell.push_attribute(("t", "inlineStr"));

    let is_name = format!("{}is", prefix);
    let t_name = format!("{}t", prefix);
    let mut t = BytesStart::new(t_name.as_str());
    t.push_attribute(("xml:space", "preserve"));

    writer.write_event(Event::Start(cell))?;
    writer.write_event(Event::Start(BytesStart::new(is_name.as_str())))?;
    writer.write_event(Event::Start(t))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(t_name.as_str())))?;
    writer.write_event(Event::End(BytesEnd::new(is_name.as_str())))?;
    writer.write_event(Event::End(BytesEnd::new(cell_name.as_str())))?;
    Ok(())
}

fn write_drawing(
    writer: &mut Writer<Vec<u8>>,
    prefix: &str,
    rel_id: &str,
) -> Result<(), PackageError> {
    let name = format!("{}drawing", prefix);
    let mut drawing = BytesStart::new(name.as_str());
    drawing.push_attribute(("xmlns:r", REL_NS));
    drawing.push_attribute(("r:id", rel_id));
    writer.write_event(Event::Empty(drawing))?;
    Ok(())
}
