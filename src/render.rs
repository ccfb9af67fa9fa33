//! Export file rendering.
//!
//! CSV output is RFC 4180 via the `csv` crate. XLSX output is a minimal
//! single-sheet workbook ("Records") built with `zip` and inline strings,
//! so no shared-string table is needed.

use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;

use contact_ledger_core::error::{LedgerError, Result};
use contact_ledger_core::models::{ExportFormat, ProjectedRecord};

pub const MIME_CSV: &str = "text/csv; charset=utf-8";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

const SHEET_NAME: &str = "Records";

pub fn content_type(format: ExportFormat) -> &'static str {
    match format {
        ExportFormat::Csv => MIME_CSV,
        ExportFormat::Xlsx => MIME_XLSX,
    }
}

/// Render a header row of `fields` followed by one row per record.
pub fn render(format: ExportFormat, fields: &[String], rows: &[ProjectedRecord]) -> Result<Vec<u8>> {
    match format {
        ExportFormat::Csv => render_csv(fields, rows),
        ExportFormat::Xlsx => render_xlsx(fields, rows),
    }
}

fn render_csv(fields: &[String], rows: &[ProjectedRecord]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(fields).map_err(LedgerError::storage)?;
    for row in rows {
        writer.write_record(row.cells()).map_err(LedgerError::storage)?;
    }
    writer.into_inner().map_err(LedgerError::storage)
}

const CONTENT_TYPES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/></Types>"#;

const ROOT_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

const WORKBOOK_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#;

fn workbook_xml() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="{}" sheetId="1" r:id="rId1"/></sheets></workbook>"#,
        SHEET_NAME
    )
}

/// 0-based column index → spreadsheet letters (`0` → `A`, `26` → `AA`).
fn column_letters(mut col: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push((b'A' + (col % 26) as u8) as char);
        if col < 26 {
            break;
        }
        col = col / 26 - 1;
    }
    letters.iter().rev().collect()
}

/// XML 1.0 forbids most control characters even when escaped.
fn xml_safe(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\t' | '\n' | '\r'))
        .collect()
}

fn push_row<'a>(xml: &mut String, row_num: usize, cells: impl Iterator<Item = &'a str>) {
    xml.push_str(&format!(r#"<row r="{}">"#, row_num));
    for (col, value) in cells.enumerate() {
        let safe = xml_safe(value);
        xml.push_str(&format!(
            r#"<c r="{}{}" t="inlineStr"><is><t xml:space="preserve">{}</t></is></c>"#,
            column_letters(col),
            row_num,
            quick_xml::escape::escape(safe.as_str())
        ));
    }
    xml.push_str("</row>");
}

fn sheet_xml(fields: &[String], rows: &[ProjectedRecord]) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
    );
    push_row(&mut xml, 1, fields.iter().map(String::as_str));
    for (i, row) in rows.iter().enumerate() {
        push_row(&mut xml, i + 2, row.cells());
    }
    xml.push_str("</sheetData></worksheet>");
    xml
}

fn render_xlsx(fields: &[String], rows: &[ProjectedRecord]) -> Result<Vec<u8>> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let parts: [(&str, String); 5] = [
        ("[Content_Types].xml", CONTENT_TYPES_XML.to_string()),
        ("_rels/.rels", ROOT_RELS_XML.to_string()),
        ("xl/workbook.xml", workbook_xml()),
        ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS_XML.to_string()),
        ("xl/worksheets/sheet1.xml", sheet_xml(fields, rows)),
    ];
    for (name, body) in parts {
        zip.start_file(name, options).map_err(LedgerError::storage)?;
        zip.write_all(body.as_bytes()).map_err(LedgerError::storage)?;
    }

    let cursor = zip.finish().map_err(LedgerError::storage)?;
    Ok(cursor.into_inner())
}
