//! Tabular file decoding for ingestion (CSV, XLSX).
//!
//! Both formats are decoded into [`RawRow`]s: the first row is the header,
//! every later row is paired with it column by column. Fully blank rows are
//! skipped. For XLSX only the first worksheet is read; shared strings,
//! inline strings and numeric cells are supported.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use contact_ledger_core::error::{LedgerError, Result};
use contact_ledger_core::models::RawRow;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 64 * 1024 * 1024;

/// Worksheet column limit (`XFD`).
const MAX_COLUMNS: u32 = 16_384;

/// Worksheet row limit.
const MAX_ROW_NUMBER: u32 = 1_048_576;

/// Upper bound on header columns × data rows materialized from one sheet.
const MAX_XLSX_CELLS: usize = 10_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Csv,
    Xlsx,
}

impl SourceFormat {
    /// Pick the decoder from the original filename's extension (case-insensitive).
    pub fn from_filename(filename: &str) -> Result<SourceFormat> {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("csv") => Ok(SourceFormat::Csv),
            Some("xlsx") => Ok(SourceFormat::Xlsx),
            _ => Err(LedgerError::UnsupportedFormat(filename.to_string())),
        }
    }
}

/// Decode `bytes` into raw rows, refusing files with more than `max_rows`
/// data rows.
pub fn read_rows(bytes: &[u8], format: SourceFormat, max_rows: usize) -> Result<Vec<RawRow>> {
    let (headers, rows) = match format {
        SourceFormat::Csv => read_csv_table(bytes)?,
        SourceFormat::Xlsx => read_xlsx_table(bytes, max_rows)?,
    };

    if rows.len() > max_rows {
        return Err(LedgerError::invalid(format!(
            "file has {} data rows; the limit is {}",
            rows.len(),
            max_rows
        )));
    }

    Ok(rows
        .into_iter()
        .map(|cells| {
            headers
                .iter()
                .enumerate()
                .map(|(i, h)| (h.clone(), cells.get(i).cloned().unwrap_or_default()))
                .collect()
        })
        .collect())
}

fn is_blank(cells: &[String]) -> bool {
    cells.iter().all(|c| c.trim().is_empty())
}

type Table = (Vec<String>, Vec<Vec<String>>);

fn read_csv_table(bytes: &[u8]) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| LedgerError::parse(format!("CSV header: {}", e)))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| LedgerError::parse(format!("CSV: {}", e)))?;
        let cells: Vec<String> = record.iter().map(str::to_string).collect();
        if !is_blank(&cells) {
            rows.push(cells);
        }
    }
    Ok((headers, rows))
}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn ooxml_err<E: std::fmt::Display>(e: E) -> LedgerError {
    LedgerError::parse(format!("XLSX: {}", e))
}

fn read_zip_entry_bounded(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>> {
    let entry = archive.by_name(name).map_err(ooxml_err)?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(ooxml_err)?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ooxml_err(format!(
            "entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

fn read_xlsx_table(bytes: &[u8], max_rows: usize) -> Result<Table> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(ooxml_err)?;

    let shared_strings = if archive.by_name("xl/sharedStrings.xml").is_ok() {
        let xml = read_zip_entry_bounded(&mut archive, "xl/sharedStrings.xml")?;
        parse_shared_strings(&xml)?
    } else {
        Vec::new()
    };

    let sheet = first_worksheet_name(&mut archive)?;
    let sheet_xml = read_zip_entry_bounded(&mut archive, &sheet)?;
    let mut grid = parse_sheet(&sheet_xml, &shared_strings)?.into_values();

    let Some(header_row) = grid.next() else {
        return Ok((Vec::new(), Vec::new()));
    };

    // Columns without a header cannot map to a field. The grid holds only
    // non-empty cells, so a row with any headed cell is a non-blank row.
    let data: Vec<BTreeMap<u32, String>> = grid
        .filter(|cells| cells.keys().any(|c| header_row.contains_key(c)))
        .collect();
    if data.len() > max_rows {
        return Err(LedgerError::invalid(format!(
            "file has {} data rows; the limit is {}",
            data.len(),
            max_rows
        )));
    }

    let columns: Vec<u32> = header_row.keys().copied().collect();
    if columns.len().saturating_mul(data.len()) > MAX_XLSX_CELLS {
        return Err(ooxml_err(format!(
            "sheet has {} columns x {} rows; the limit is {} cells",
            columns.len(),
            data.len(),
            MAX_XLSX_CELLS
        )));
    }
    let headers: Vec<String> = header_row.into_values().collect();

    let rows = data
        .into_iter()
        .map(|mut cells| {
            columns
                .iter()
                .map(|c| cells.remove(c).unwrap_or_default())
                .collect::<Vec<String>>()
        })
        .filter(|cells| !is_blank(cells))
        .collect();

    Ok((headers, rows))
}

/// Resolve the first `<sheet>` of `xl/workbook.xml` through the workbook
/// relationships. Archives without a workbook part fall back to the
/// lowest-numbered `xl/worksheets/sheetN.xml`.
fn first_worksheet_name(archive: &mut Archive<'_>) -> Result<String> {
    let has_workbook = archive.by_name("xl/workbook.xml").is_ok();
    let has_rels = archive.by_name("xl/_rels/workbook.xml.rels").is_ok();
    if has_workbook && has_rels {
        let workbook = read_zip_entry_bounded(archive, "xl/workbook.xml")?;
        let rels = read_zip_entry_bounded(archive, "xl/_rels/workbook.xml.rels")?;
        let rel_id = first_sheet_rel_id(&workbook)?
            .ok_or_else(|| ooxml_err("workbook has no worksheets"))?;
        let target = relationship_target(&rels, &rel_id)?
            .ok_or_else(|| ooxml_err(format!("no relationship target for sheet {}", rel_id)))?;
        let path = match target.strip_prefix('/') {
            Some(absolute) => absolute.to_string(),
            None => format!("xl/{}", target),
        };
        return Ok(path);
    }

    archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .min_by_key(|name| {
            name.trim_start_matches("xl/worksheets/sheet")
                .trim_end_matches(".xml")
                .parse::<u32>()
                .unwrap_or(u32::MAX)
        })
        .map(str::to_string)
        .ok_or_else(|| ooxml_err("workbook has no worksheets"))
}

fn first_sheet_rel_id(workbook_xml: &[u8]) -> Result<Option<String>> {
    let mut reader = Reader::from_reader(workbook_xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"sheet" => {
                // `r:id`, whatever the relationships namespace prefix is
                let id = e
                    .attributes()
                    .flatten()
                    .find(|a| a.key.prefix().is_some() && a.key.local_name().as_ref() == b"id")
                    .map(|a| String::from_utf8_lossy(a.value.as_ref()).into_owned());
                return Ok(id);
            }
            Ok(Event::Eof) => return Ok(None),
            Err(e) => return Err(ooxml_err(e)),
            _ => {}
        }
        buf.clear();
    }
}

fn relationship_target(rels_xml: &[u8], rel_id: &str) -> Result<Option<String>> {
    let mut reader = Reader::from_reader(rels_xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == b"Relationship"
                    && attr(&e, b"Id").as_deref() == Some(rel_id) =>
            {
                return Ok(attr(&e, b"Target"));
            }
            Ok(Event::Eof) => return Ok(None),
            Err(e) => return Err(ooxml_err(e)),
            _ => {}
        }
        buf.clear();
    }
}

/// Shared string table; rich-text runs inside one `<si>` are concatenated.
fn parse_shared_strings(xml: &[u8]) -> Result<Vec<String>> {
    let mut strings = Vec::new();
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = current.is_some(),
                _ => {}
            },
            Ok(Event::Text(te)) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&te.unescape().map_err(ooxml_err)?);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"si" => strings.extend(current.take()),
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml_err(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn attr(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .map(|a| String::from_utf8_lossy(a.value.as_ref()).into_owned())
}

/// `"BC12"` → (column 54, row 12). Column is 0-based, row as written.
/// References past column `XFD` or row 1048576 are rejected.
fn parse_cell_ref(r: &str) -> Option<(u32, u32)> {
    let split = r.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = r.split_at(split);
    if letters.is_empty() || letters.len() > 3 {
        return None;
    }
    let mut col: u32 = 0;
    for c in letters.chars() {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        let digit = c.to_ascii_uppercase() as u32 - 'A' as u32 + 1;
        col = col.checked_mul(26)?.checked_add(digit)?;
    }
    if col > MAX_COLUMNS {
        return None;
    }
    let row = parse_row_number(digits)?;
    Some((col - 1, row))
}

fn parse_row_number(raw: &str) -> Option<u32> {
    raw.parse::<u32>()
        .ok()
        .filter(|r| (1..=MAX_ROW_NUMBER).contains(r))
}

/// Row number from a `<row r="..">` attribute, or the one after `prev`.
fn row_number(e: &BytesStart<'_>, prev: u32) -> Result<u32> {
    match attr(e, b"r") {
        Some(r) => parse_row_number(&r).ok_or_else(|| ooxml_err(format!("invalid row number '{}'", r))),
        None => prev
            .checked_add(1)
            .filter(|r| *r <= MAX_ROW_NUMBER)
            .ok_or_else(|| ooxml_err("too many rows")),
    }
}

/// 0-based column from a `<c r="..">` attribute, or `next` when absent.
fn cell_column(e: &BytesStart<'_>, next: u32) -> Result<u32> {
    let col = match attr(e, b"r") {
        Some(r) => {
            parse_cell_ref(&r)
                .ok_or_else(|| ooxml_err(format!("invalid cell reference '{}'", r)))?
                .0
        }
        None => next,
    };
    if col >= MAX_COLUMNS {
        return Err(ooxml_err("too many columns"));
    }
    Ok(col)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum CellKind {
    Shared,
    Inline,
    Other,
}

/// Sparse grid: row number → column → cell text.
fn parse_sheet(xml: &[u8], shared: &[String]) -> Result<BTreeMap<u32, BTreeMap<u32, String>>> {
    let mut grid: BTreeMap<u32, BTreeMap<u32, String>> = BTreeMap::new();
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut row_num: u32 = 0;
    let mut next_col: u32 = 0;
    let mut cell: Option<(u32, CellKind)> = None;
    let mut text = String::new();
    let mut in_value = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => {
                    row_num = row_number(&e, row_num)?;
                    next_col = 0;
                }
                b"c" => {
                    let col = cell_column(&e, next_col)?;
                    let kind = match attr(&e, b"t").as_deref() {
                        Some("s") => CellKind::Shared,
                        Some("inlineStr") => CellKind::Inline,
                        _ => CellKind::Other,
                    };
                    cell = Some((col, kind));
                    next_col = col + 1;
                    text.clear();
                }
                b"v" => in_value = cell.is_some(),
                b"t" => in_value = matches!(cell, Some((_, CellKind::Inline))),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"row" => {
                    row_num = row_number(&e, row_num)?;
                    next_col = 0;
                }
                b"c" => {
                    next_col = cell_column(&e, next_col)? + 1;
                }
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                text.push_str(&te.unescape().map_err(ooxml_err)?);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    if let Some((col, kind)) = cell.take() {
                        let value = match kind {
                            CellKind::Shared => text
                                .trim()
                                .parse::<usize>()
                                .ok()
                                .and_then(|i| shared.get(i).cloned())
                                .unwrap_or_default(),
                            CellKind::Inline | CellKind::Other => std::mem::take(&mut text),
                        };
                        if !value.is_empty() {
                            grid.entry(row_num).or_default().insert(col, value);
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml_err(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(grid)
}
