//! Reading and patching `.xlsx` workbooks.
//!
//! The workbook is kept as its zip parts; only the worksheets, relationship
//! files, drawings and content types that a fill touches are rewritten.
//! Everything else (styles, themes, shared strings, formulas) is copied
//! through byte for byte.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`package`] | zip parts, relationships, content types |
//! | [`sheet`] | cell positions, text cells, worksheet rewriting |
//! | [`drawing`] | picture embedding |

pub mod drawing;
pub mod package;
pub mod sheet;

use std::collections::HashMap;

pub use drawing::ImagePlacement;
pub use package::Package;
pub use sheet::{CellPos, TextCell};

use package::{attr_value, resolve_target, visit_elements, REL_TYPE_OFFICE_DOCUMENT};

const DEFAULT_WORKBOOK_PART: &str = "xl/workbook.xml";

/// Failure to read or write a workbook package.
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error("not a valid zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("malformed XML: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("missing part: {0}")]
    MissingPart(String),
    #[error("malformed workbook: {0}")]
    Malformed(String),
}

/// A worksheet as listed in the workbook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetRef {
    pub name: String,
    pub part: String,
}

/// An opened spreadsheet package.
#[derive(Debug)]
pub struct Workbook {
    package: Package,
    shared_strings: Vec<String>,
    sheets: Vec<SheetRef>,
}

impl Workbook {
    pub fn open(bytes: &[u8]) -> Result<Self, PackageError> {
        let package = Package::open(bytes)?;

        let workbook_part = package
            .relationships("")?
            .into_iter()
            .find(|r| r.rel_type == REL_TYPE_OFFICE_DOCUMENT)
            .map(|r| resolve_target("", &r.target))
            .unwrap_or_else(|| DEFAULT_WORKBOOK_PART.to_string());

        let sheets = list_sheets(&package, &workbook_part)?;

        let workbook_rels = package.relationships(&workbook_part)?;
        let shared_strings = match workbook_rels
            .iter()
            .find(|r| r.rel_type.ends_with("/sharedStrings"))
            .map(|r| resolve_target(&workbook_part, &r.target))
        {
            Some(part) => match package.part(&part) {
                Some(xml) => sheet::parse_shared_strings(xml)?,
                None => Vec::new(),
            },
            None => Vec::new(),
        };

        Ok(Self {
            package,
            shared_strings,
            sheets,
        })
    }

    /// Worksheets in workbook order.
    pub fn sheets(&self) -> &[SheetRef] {
        &self.sheets
    }

    pub fn package(&self) -> &Package {
        &self.package
    }

    /// Text cells of the sheet at `index`, in document order.
    pub fn text_cells(&self, index: usize) -> Result<Vec<TextCell>, PackageError> {
        let sheet = self.sheet(index)?;
        let xml = self.package.require_part(&sheet.part)?;
        sheet::read_text_cells(xml, &self.shared_strings)
    }

    /// Applies cell edits and image placements to the sheet at `index`.
    pub fn update_sheet(
        &mut self,
        index: usize,
        edits: &HashMap<CellPos, String>,
        images: &[ImagePlacement],
    ) -> Result<(), PackageError> {
        if edits.is_empty() && images.is_empty() {
            return Ok(());
        }
        let part = self.sheet(index)?.part.clone();
        let drawing_rel = drawing::embed_images(&mut self.package, &part, images)?;
        let xml = self.package.require_part(&part)?;
        let updated = sheet::rewrite_sheet(xml, edits, drawing_rel.as_deref())?;
        self.package.set_part(&part, updated);
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, PackageError> {
        self.package.to_bytes()
    }

    fn sheet(&self, index: usize) -> Result<&SheetRef, PackageError> {
        self.sheets
            .get(index)
            .ok_or_else(|| PackageError::Malformed(format!("no sheet at index {}", index)))
    }
}

/// Reads `<sheet name=".." r:id="..">` entries and resolves their parts.
fn list_sheets(package: &Package, workbook_part: &str) -> Result<Vec<SheetRef>, PackageError> {
    let xml = package.require_part(workbook_part)?;
    let rels = package.relationships(workbook_part)?;

    let mut entries: Vec<(String, String)> = Vec::new();
    visit_elements(xml, |e| {
        if e.local_name().as_ref() != b"sheet" {
            return Ok(());
        }
        let name = attr_value(e, b"name")?.unwrap_or_default();
        let rel_id = e
            .attributes()
            .flatten()
            .find(|a| a.key.local_name().as_ref() == b"id" && a.key.prefix().is_some())
            .map(|a| a.unescape_value().map(|v| v.into_owned()))
            .transpose()?;
        if let Some(rel_id) = rel_id {
            entries.push((name, rel_id));
        }
        Ok(())
    })?;

    let mut sheets = Vec::new();
    for (name, rel_id) in entries {
        let rel = rels
            .iter()
            .find(|r| r.id == rel_id)
            .ok_or_else(|| PackageError::Malformed(format!("sheet '{}' has no relationship {}", name, rel_id)))?;
        // Chartsheets and dialog sheets have no cells to fill.
        if !rel.rel_type.ends_with("/worksheet") {
            continue;
        }
        let part = resolve_target(workbook_part, &rel.target);
        if !package.contains(&part) {
            return Err(PackageError::MissingPart(part));
        }
        sheets.push(SheetRef { name, part });
    }
    Ok(sheets)
}
