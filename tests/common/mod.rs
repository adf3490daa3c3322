//! Shared fixtures: hand-built `.xlsx` packages and a scripted image fetcher.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use formfill::error::FormError;
use formfill::fetch::ImageFetcher;
use formfill::xlsx::CellPos;
use quick_xml::events::Event;
use quick_xml::Reader;

pub const PNG: &[u8] = b"\x89PNG\r\n\x1a\nfake-signature";

#[derive(Debug, Clone, Copy)]
pub enum Cell<'a> {
    Shared(&'a str),
    Inline(&'a str),
    Number(f64),
}

pub struct SheetDef<'a> {
    pub name: &'a str,
    pub cells: Vec<(&'a str, Cell<'a>)>,
}

pub fn sheet<'a>(name: &'a str, cells: Vec<(&'a str, Cell<'a>)>) -> SheetDef<'a> {
    SheetDef { name, cells }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn row_of(reference: &str) -> u32 {
    reference
        .trim_start_matches(|c: char| c.is_ascii_alphabetic())
        .parse()
        .unwrap()
}

/// Builds a minimal but complete workbook. Shared-string cells reuse one
/// table entry per distinct string.
pub fn build_xlsx(sheets: &[SheetDef<'_>]) -> Vec<u8> {
    let mut shared: Vec<String> = Vec::new();
    let mut sheet_xml = Vec::new();

    for def in sheets {
        let mut rows: BTreeMap<u32, String> = BTreeMap::new();
        for (reference, cell) in &def.cells {
            let xml = match cell {
                Cell::Shared(text) => {
                    let idx = match shared.iter().position(|s| s == text) {
                        Some(idx) => idx,
                        None => {
                            shared.push(text.to_string());
                            shared.len() - 1
                        }
                    };
                    format!(r#"<c r="{}" t="s"><v>{}</v></c>"#, reference, idx)
                }
                Cell::Inline(text) => format!(
                    r#"<c r="{}" t="inlineStr"><is><t>{}</t></is></c>"#,
                    reference,
                    escape(text)
                ),
                Cell::Number(n) => format!(r#"<c r="{}"><v>{}</v></c>"#, reference, n),
            };
            rows.entry(row_of(reference)).or_default().push_str(&xml);
        }
        let body: String = rows
            .into_iter()
            .map(|(r, cells)| format!(r#"<row r="{}">{}</row>"#, r, cells))
            .collect();
        sheet_xml.push(format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheetData>{}</sheetData><pageMargins left="0.7" right="0.7" top="0.75" bottom="0.75" header="0.3" footer="0.3"/></worksheet>"#,
            body
        ));
    }

    let mut content_types = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/sharedStrings.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sharedStrings+xml"/>"#,
    );
    let mut workbook_sheets = String::new();
    let mut workbook_rels = String::new();
    for (i, def) in sheets.iter().enumerate() {
        let n = i + 1;
        content_types.push_str(&format!(
            r#"<Override PartName="/xl/worksheets/sheet{}.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#,
            n
        ));
        workbook_sheets.push_str(&format!(
            r#"<sheet name="{}" sheetId="{}" r:id="rId{}"/>"#,
            escape(def.name),
            n,
            n
        ));
        workbook_rels.push_str(&format!(
            r#"<Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet{}.xml"/>"#,
            n, n
        ));
    }
    content_types.push_str("</Types>");
    workbook_rels.push_str(&format!(
        r#"<Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/sharedStrings" Target="sharedStrings.xml"/>"#,
        sheets.len() + 1
    ));

    let shared_xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="{}" uniqueCount="{}">{}</sst>"#,
        shared.len(),
        shared.len(),
        shared
            .iter()
            .map(|s| format!("<si><t xml:space=\"preserve\">{}</t></si>", escape(s)))
            .collect::<String>()
    );

    let mut parts: Vec<(String, String)> = vec![
        ("[Content_Types].xml".to_string(), content_types),
        (
            "_rels/.rels".to_string(),
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#
                .to_string(),
        ),
        (
            "xl/workbook.xml".to_string(),
            format!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets>{}</sheets></workbook>"#,
                workbook_sheets
            ),
        ),
        (
            "xl/_rels/workbook.xml.rels".to_string(),
            format!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">{}</Relationships>"#,
                workbook_rels
            ),
        ),
        ("xl/sharedStrings.xml".to_string(), shared_xml),
    ];
    for (i, xml) in sheet_xml.into_iter().enumerate() {
        parts.push((format!("xl/worksheets/sheet{}.xml", i + 1), xml));
    }

    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        for (name, xml) in parts {
            zip.start_file(name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(xml.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }
    buf
}

/// Pictures anchored in a drawing part, as (cell, embed relationship id).
pub fn anchored_pictures(xml: &[u8]) -> Vec<(CellPos, String)> {
    let mut reader = Reader::from_reader(xml);
    let mut pictures = Vec::new();
    let mut in_from = false;
    let mut field: Option<&'static str> = None;
    let mut col = 0u32;
    let mut row = 0u32;
    loop {
        match reader.read_event().unwrap() {
            Event::Start(e) => match e.local_name().as_ref() {
                b"from" => in_from = true,
                b"col" if in_from => field = Some("col"),
                b"row" if in_from => field = Some("row"),
                _ => {}
            },
            Event::Text(t) => {
                if let Some(which) = field {
                    let value = t.unescape().unwrap().trim().parse::<u32>().unwrap();
                    if which == "col" {
                        col = value;
                    } else {
                        row = value;
                    }
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"from" => in_from = false,
                b"col" | b"row" => field = None,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"blip" => {
                let embed = e
                    .attributes()
                    .flatten()
                    .find(|a| a.key.local_name().as_ref() == b"embed")
                    .map(|a| a.unescape_value().unwrap().into_owned())
                    .unwrap_or_default();
                pictures.push((CellPos::new(row, col), embed));
            }
            Event::Eof => break,
            _ => {}
        }
    }
    pictures
}

/// Image fetcher answering from a fixed table. Unknown URLs fail.
#[derive(Default)]
pub struct StubFetcher {
    images: HashMap<String, Vec<u8>>,
    delay: Option<Duration>,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl StubFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(mut self, url: &str, bytes: &[u8]) -> Self {
        self.images.insert(url.to_string(), bytes.to_vec());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageFetcher for StubFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FormError> {
        self.calls.lock().unwrap().push(url.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.images
            .get(url)
            .cloned()
            .ok_or_else(|| FormError::RemoteFetch {
                url: url.to_string(),
                message: "HTTP 404 Not Found".to_string(),
            })
    }
}
