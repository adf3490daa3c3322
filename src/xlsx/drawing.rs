//! Picture embedding for worksheets.
//!
//! Images become `xl/media/imageN.png` parts referenced from a DrawingML
//! part attached to the sheet. Each picture is a one-cell anchor: its
//! top-left corner sits on the cell, its size is fixed.

use super::package::{
    attr_value, insert_before_root_end, relative_target, resolve_target, visit_elements, Package,
    REL_NS, REL_TYPE_DRAWING, REL_TYPE_IMAGE,
};
use super::sheet::CellPos;
use super::PackageError;

pub const EMU_PER_PIXEL: u64 = 9525;
pub const SIGNATURE_WIDTH_PX: u64 = 120;
pub const SIGNATURE_HEIGHT_PX: u64 = 40;

const DRAWING_NS: &str = "http://schemas.openxmlformats.org/drawingml/2006/spreadsheetDrawing";
const MAIN_NS: &str = "http://schemas.openxmlformats.org/drawingml/2006/main";
const DRAWING_CONTENT_TYPE: &str = "application/vnd.openxmlformats-officedocument.drawing+xml";

/// An image to place on a sheet.
#[derive(Debug, Clone)]
pub struct ImagePlacement {
    pub pos: CellPos,
    pub png: Vec<u8>,
}

/// Adds `images` to the sheet stored at `sheet_part`.
///
/// Returns the relationship id of a newly created drawing, which the caller
/// must reference from the worksheet XML. Returns `None` when the sheet
/// already had a drawing and the pictures were appended to it.
pub fn embed_images(
    package: &mut Package,
    sheet_part: &str,
    images: &[ImagePlacement],
) -> Result<Option<String>, PackageError> {
    if images.is_empty() {
        return Ok(None);
    }

    let existing = package
        .relationships(sheet_part)?
        .into_iter()
        .find(|r| r.rel_type == REL_TYPE_DRAWING && !r.external);

    let (drawing_part, new_rel) = match existing {
        Some(rel) => (resolve_target(sheet_part, &rel.target), None),
        None => {
            let part = package.next_indexed_part("xl/drawings/drawing", ".xml");
            package.set_part(&part, empty_drawing().into_bytes());
            package.ensure_override_content_type(&part, DRAWING_CONTENT_TYPE)?;
            let rel_id = package.add_relationship(
                sheet_part,
                REL_TYPE_DRAWING,
                &relative_target(sheet_part, &part),
            )?;
            (part, Some(rel_id))
        }
    };

    package.ensure_default_content_type("png", "image/png")?;

    let mut next_shape_id = max_shape_id(package.require_part(&drawing_part)?)? + 1;
    let mut anchors = String::new();
    for image in images {
        let media = package.next_indexed_part("xl/media/image", ".png");
        package.set_part(&media, image.png.clone());
        let embed_id = package.add_relationship(
            &drawing_part,
            REL_TYPE_IMAGE,
            &relative_target(&drawing_part, &media),
        )?;
        anchors.push_str(&one_cell_anchor(image.pos, next_shape_id, &embed_id));
        next_shape_id += 1;
    }

    let updated = insert_before_root_end(package.require_part(&drawing_part)?, anchors.as_bytes())?;
    package.set_part(&drawing_part, updated);

    Ok(new_rel)
}

fn empty_drawing() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<xdr:wsDr xmlns:xdr="{}" xmlns:a="{}"></xdr:wsDr>"#,
        DRAWING_NS, MAIN_NS
    )
}

/// Highest `cNvPr` id already used in a drawing.
fn max_shape_id(xml: &[u8]) -> Result<u32, PackageError> {
    let mut max = 0;
    visit_elements(xml, |e| {
        if e.local_name().as_ref() == b"cNvPr" {
            if let Some(id) = attr_value(e, b"id")?.and_then(|v| v.parse::<u32>().ok()) {
                max = max.max(id);
            }
        }
        Ok(())
    })?;
    Ok(max)
}

/// Namespaces are declared on the anchor itself so it stays valid inside a
/// drawing that binds different prefixes.
fn one_cell_anchor(pos: CellPos, shape_id: u32, embed_id: &str) -> String {
    let cx = SIGNATURE_WIDTH_PX * EMU_PER_PIXEL;
    let cy = SIGNATURE_HEIGHT_PX * EMU_PER_PIXEL;
    format!(
        concat!(
            r#"<xdr:oneCellAnchor xmlns:xdr="{ns}" xmlns:a="{a}" xmlns:r="{r}">"#,
            r#"<xdr:from><xdr:col>{col}</xdr:col><xdr:colOff>0</xdr:colOff>"#,
            r#"<xdr:row>{row}</xdr:row><xdr:rowOff>0</xdr:rowOff></xdr:from>"#,
            r#"<xdr:ext cx="{cx}" cy="{cy}"/>"#,
            r#"<xdr:pic><xdr:nvPicPr><xdr:cNvPr id="{id}" name="Signature {id}"/>"#,
            r#"<xdr:cNvPicPr><a:picLocks noChangeAspect="1"/></xdr:cNvPicPr></xdr:nvPicPr>"#,
            r#"<xdr:blipFill><a:blip r:embed="{embed}"/><a:stretch><a:fillRect/></a:stretch></xdr:blipFill>"#,
            r#"<xdr:spPr><a:xfrm><a:off x="0" y="0"/><a:ext cx="{cx}" cy="{cy}"/></a:xfrm>"#,
            r#"<a:prstGeom prst="rect"><a:avLst/></a:prstGeom></xdr:spPr></xdr:pic>"#,
            r#"<xdr:clientData/></xdr:oneCellAnchor>"#,
        ),
        ns = DRAWING_NS,
        a = MAIN_NS,
        r = REL_NS,
        col = pos.col,
        row = pos.row,
        cx = cx,
        cy = cy,
        id = shape_id,
        embed = embed_id,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchor_uses_fixed_size_in_emu() {
        let xml = one_cell_anchor(CellPos::new(4, 2), 3, "rId1");
        assert!(xml.contains(r#"<xdr:ext cx="1143000" cy="381000"/>"#));
        assert!(xml.contains("<xdr:col>2</xdr:col>"));
        assert!(xml.contains("<xdr:row>4</xdr:row>"));
    }

    #[test]
    fn anchors_append_inside_drawing_root() {
        let anchors = format!(
            "{}{}",
            one_cell_anchor(CellPos::new(0, 1), 1, "rId1"),
            one_cell_anchor(CellPos::new(9, 0), 2, "rId2")
        );
        let drawing = insert_before_root_end(empty_drawing().as_bytes(), anchors.as_bytes()).unwrap();
        let text = String::from_utf8(drawing.clone()).unwrap();
        assert_eq!(text.matches("<xdr:oneCellAnchor ").count(), 2);
        assert!(text.contains(r#"<a:blip r:embed="rId2"/>"#));
        assert!(text.ends_with("</xdr:wsDr>"));
        assert_eq!(max_shape_id(&drawing).unwrap(), 2);
    }
}
