//! OPC package access: the zip container of an `.xlsx` file, its parts and
//! relationship files.
//!
//! Parts are kept in archive order so that untouched parts are written back
//! exactly as they were read.

use std::io::{Cursor, Read, Write};

use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::PackageError;

/// Maximum decompressed bytes read from a single part (zip-bomb protection).
const MAX_PART_BYTES: u64 = 64 * 1024 * 1024;

pub const REL_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
pub const PACKAGE_REL_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
pub const REL_TYPE_OFFICE_DOCUMENT: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument";
pub const REL_TYPE_DRAWING: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/drawing";
pub const REL_TYPE_IMAGE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/image";

#[derive(Debug, Clone)]
struct Part {
    name: String,
    data: Vec<u8>,
}

/// In-memory copy of every part in a package.
#[derive(Debug, Clone)]
pub struct Package {
    parts: Vec<Part>,
}

impl Package {
    pub fn open(bytes: &[u8]) -> Result<Self, PackageError> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        let mut parts = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let entry = archive.by_index(i)?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            let mut data = Vec::new();
            entry.take(MAX_PART_BYTES).read_to_end(&mut data)?;
            if data.len() as u64 >= MAX_PART_BYTES {
                return Err(PackageError::Malformed(format!(
                    "part {} exceeds size limit ({} bytes)",
                    name, MAX_PART_BYTES
                )));
            }
            parts.push(Part { name, data });
        }
        Ok(Self { parts })
    }

    pub fn part(&self, name: &str) -> Option<&[u8]> {
        self.parts
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.data.as_slice())
    }

    pub fn require_part(&self, name: &str) -> Result<&[u8], PackageError> {
        self.part(name)
            .ok_or_else(|| PackageError::MissingPart(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.parts.iter().any(|p| p.name == name)
    }

    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().map(|p| p.name.as_str())
    }

    /// Replaces the part's content, or appends a new part.
    pub fn set_part(&mut self, name: &str, data: Vec<u8>) {
        match self.parts.iter_mut().find(|p| p.name == name) {
            Some(part) => part.data = data,
            None => self.parts.push(Part {
                name: name.to_string(),
                data,
            }),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, PackageError> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        for part in &self.parts {
            writer.start_file(part.name.as_str(), options)?;
            writer.write_all(&part.data)?;
        }
        Ok(writer.finish()?.into_inner())
    }

    /// Relationships declared for `part` (empty when it has no `_rels` file).
    pub fn relationships(&self, part: &str) -> Result<Vec<Relationship>, PackageError> {
        match self.part(&rels_part_name(part)) {
            Some(xml) => parse_relationships(xml),
            None => Ok(Vec::new()),
        }
    }

    /// Adds a relationship from `source_part` and returns its new id.
    pub fn add_relationship(
        &mut self,
        source_part: &str,
        rel_type: &str,
        target: &str,
    ) -> Result<String, PackageError> {
        let rels_name = rels_part_name(source_part);
        let existing = self.relationships(source_part)?;
        let id = next_relationship_id(&existing);
        let element = format!(
            r#"<Relationship Id="{}" Type="{}" Target="{}"/>"#,
            id,
            quick_xml::escape::escape(rel_type),
            quick_xml::escape::escape(target)
        );
        let updated = match self.part(&rels_name) {
            Some(xml) => insert_before_root_end(xml, element.as_bytes())?,
            None => format!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="{}">{}</Relationships>"#,
                PACKAGE_REL_NS, element
            )
            .into_bytes(),
        };
        self.set_part(&rels_name, updated);
        Ok(id)
    }

    /// Ensures `[Content_Types].xml` declares a default for `extension`.
    pub fn ensure_default_content_type(
        &mut self,
        extension: &str,
        content_type: &str,
    ) -> Result<(), PackageError> {
        let xml = self.require_part(CONTENT_TYPES_PART)?;
        let mut declared = false;
        visit_elements(xml, |e| {
            if e.local_name().as_ref() == b"Default" {
                if let Some(ext) = attr_value(e, b"Extension")? {
                    declared |= ext.eq_ignore_ascii_case(extension);
                }
            }
            Ok(())
        })?;
        if declared {
            return Ok(());
        }
        let element = format!(
            r#"<Default Extension="{}" ContentType="{}"/>"#,
            quick_xml::escape::escape(extension),
            quick_xml::escape::escape(content_type)
        );
        let updated = insert_before_root_end(xml, element.as_bytes())?;
        self.set_part(CONTENT_TYPES_PART, updated);
        Ok(())
    }

    /// Ensures `[Content_Types].xml` has an override for `part`.
    pub fn ensure_override_content_type(
        &mut self,
        part: &str,
        content_type: &str,
    ) -> Result<(), PackageError> {
        let xml = self.require_part(CONTENT_TYPES_PART)?;
        let part_name = format!("/{}", part);
        let mut declared = false;
        visit_elements(xml, |e| {
            if e.local_name().as_ref() == b"Override" {
                if let Some(name) = attr_value(e, b"PartName")? {
                    declared |= name.eq_ignore_ascii_case(&part_name);
                }
            }
            Ok(())
        })?;
        if declared {
            return Ok(());
        }
        let element = format!(
            r#"<Override PartName="{}" ContentType="{}"/>"#,
            quick_xml::escape::escape(&part_name),
            quick_xml::escape::escape(content_type)
        );
        let updated = insert_before_root_end(xml, element.as_bytes())?;
        self.set_part(CONTENT_TYPES_PART, updated);
        Ok(())
    }

    /// First `<prefix><N><suffix>` part name not present in the package.
    pub fn next_indexed_part(&self, prefix: &str, suffix: &str) -> String {
        let max = self
            .part_names()
            .filter_map(|name| name.strip_prefix(prefix))
            .filter_map(|rest| {
                let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
                digits.parse::<u32>().ok()
            })
            .max()
            .unwrap_or(0);
        format!("{}{}{}", prefix, max + 1, suffix)
    }
}

pub const CONTENT_TYPES_PART: &str = "[Content_Types].xml";

/// One `<Relationship>` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub id: String,
    pub rel_type: String,
    pub target: String,
    pub external: bool,
}

pub fn parse_relationships(xml: &[u8]) -> Result<Vec<Relationship>, PackageError> {
    let mut rels = Vec::new();
    visit_elements(xml, |e| {
        if e.local_name().as_ref() != b"Relationship" {
            return Ok(());
        }
        let id = attr_value(e, b"Id")?.unwrap_or_default();
        let rel_type = attr_value(e, b"Type")?.unwrap_or_default();
        let target = attr_value(e, b"Target")?.unwrap_or_default();
        let external = attr_value(e, b"TargetMode")?
            .map(|m| m.eq_ignore_ascii_case("External"))
            .unwrap_or(false);
        rels.push(Relationship {
            id,
            rel_type,
            target,
            external,
        });
        Ok(())
    })?;
    Ok(rels)
}

fn next_relationship_id(existing: &[Relationship]) -> String {
    let max = existing
        .iter()
        .filter_map(|r| r.id.strip_prefix("rId"))
        .filter_map(|n| n.parse::<u32>().ok())
        .max()
        .unwrap_or(0);
    format!("rId{}", max + 1)
}

/// `xl/worksheets/sheet1.xml` → `xl/worksheets/_rels/sheet1.xml.rels`.
pub fn rels_part_name(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{}/_rels/{}.rels", dir, file),
        None => format!("_rels/{}.rels", part),
    }
}

/// Resolves a relationship target against the part that declares it.
pub fn resolve_target(source_part: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }
    let mut segments: Vec<&str> = match source_part.rsplit_once('/') {
        Some((dir, _)) => dir.split('/').collect(),
        None => Vec::new(),
    };
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

/// Relative target from `source_part` to `target_part`, as Excel writes it.
pub fn relative_target(source_part: &str, target_part: &str) -> String {
    let source_dir: Vec<&str> = match source_part.rsplit_once('/') {
        Some((dir, _)) => dir.split('/').collect(),
        None => Vec::new(),
    };
    let target: Vec<&str> = target_part.split('/').collect();
    let common = source_dir
        .iter()
        .zip(target.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let mut parts: Vec<&str> = vec![".."; source_dir.len() - common];
    parts.extend(&target[common..]);
    parts.join("/")
}

/// Calls `f` for every start or empty element in document order.
pub fn visit_elements<F>(xml: &[u8], mut f: F) -> Result<(), PackageError>
where
    F: FnMut(&BytesStart<'_>) -> Result<(), PackageError>,
{
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) => f(&e)?,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(())
}

/// Unescaped value of the attribute whose (unprefixed) name is `key`.
pub fn attr_value(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, PackageError> {
    for attr in e.attributes().flatten() {
        if attr.key.as_ref() == key {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

/// Copies `xml` unchanged except that `fragment` is written just before the
/// root element closes. A self-closing root is expanded to hold it.
pub fn insert_before_root_end(xml: &[u8], fragment: &[u8]) -> Result<Vec<u8>, PackageError> {
    let mut reader = Reader::from_reader(xml);
    let mut writer = Writer::new(Vec::new());
    let mut buf = Vec::new();
    let mut depth = 0usize;
    let mut inserted = false;
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Start(e) => {
                depth += 1;
                writer.write_event(Event::Start(e))?;
            }
            Event::End(e) => {
                depth = depth.saturating_sub(1);
                if depth == 0 && !inserted {
                    writer.get_mut().write_all(fragment)?;
                    inserted = true;
                }
                writer.write_event(Event::End(e))?;
            }
            Event::Empty(e) if depth == 0 && !inserted => {
                let end = e.to_end().into_owned();
                writer.write_event(Event::Start(e))?;
                writer.get_mut().write_all(fragment)?;
                writer.write_event(Event::End(end))?;
                inserted = true;
            }
            event => writer.write_event(event)?,
        }
        buf.clear();
    }
    if !inserted {
        return Err(PackageError::Malformed("document has no root element".to_string()));
    }
    Ok(writer.into_inner())
}
