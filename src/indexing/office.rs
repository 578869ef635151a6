//! Text extraction for Office Open XML documents (docx, xlsx, pptx).
//!
//! Each format is a zip archive of XML parts. Only visible text is kept:
//! paragraphs for documents and slides, cell values for sheets.

use crate::core::error::{Error, Result};
use crate::indexing::content::DocumentExtractor;
use crate::storage::index::file_extension;
use async_trait::async_trait;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;
use xml::reader::{EventReader, XmlEvent};
use zip::result::ZipError;
use zip::ZipArchive;

/// Word, Excel and PowerPoint text via `zip` + `xml-rs`
pub struct OfficeExtractor;

#[async_trait]
impl DocumentExtractor for OfficeExtractor {
    fn handles(&self, extension: &str) -> bool {
        matches!(extension, "docx" | "xlsx" | "pptx")
    }

    async fn extract_text(&self, path: &Path) -> Result<Option<String>> {
        let path = path.to_path_buf();
        let text = tokio::task::spawn_blocking(move || extract_office_text(&path))
            .await
            .map_err(|e| Error::Extraction(format!("Office task join error: {}", e)))??;

        Ok((!text.trim().is_empty()).then_some(text))
    }
}

/// Plain text of an Office document, chosen by extension
pub fn extract_office_text(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    let mut archive = ZipArchive::new(file)
        .map_err(|e| Error::Extraction(format!("Not an Office document: {}", e)))?;

    match file_extension(path).as_str() {
        "docx" => docx_text(&mut archive),
        "pptx" => pptx_text(&mut archive),
        "xlsx" => xlsx_text(&mut archive),
        other => Err(Error::Extraction(format!("Unsupported Office format: .{}", other))),
    }
}

fn docx_text<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<String> {
    let Some(xml) = read_part(archive, "word/document.xml")? else {
        return Ok(String::new());
    };
    Ok(non_empty(paragraphs(&xml, "p")?).join("\n"))
}

fn pptx_text<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<String> {
    let mut parts = Vec::new();
    for (i, name) in numbered_parts(archive, "ppt/slides/slide").iter().enumerate() {
        parts.push(format!("[Slide {}]", i + 1));
        if let Some(xml) = read_part(archive, name)? {
            parts.extend(non_empty(paragraphs(&xml, "p")?));
        }
    }
    Ok(parts.join("\n"))
}

fn xlsx_text<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<String> {
    let shared = match read_part(archive, "xl/sharedStrings.xml")? {
        Some(xml) => paragraphs(&xml, "si")?,
        None => Vec::new(),
    };
    let names = match read_part(archive, "xl/workbook.xml")? {
        Some(xml) => sheet_names(&xml)?,
        None => Vec::new(),
    };

    let mut parts = Vec::new();
    for (i, part) in numbered_parts(archive, "xl/worksheets/sheet").iter().enumerate() {
        let name = names
            .get(i)
            .cloned()
            .unwrap_or_else(|| format!("Sheet{}", i + 1));
        parts.push(format!("[Sheet: {}]", name));
        if let Some(xml) = read_part(archive, part)? {
            parts.extend(sheet_rows(&xml, &shared)?);
        }
    }
    Ok(parts.join("\n"))
}

/// Contents of an archive member, `None` if the member is missing
fn read_part<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<Option<String>> {
    let mut part = match archive.by_name(name) {
        Ok(part) => part,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(Error::Extraction(format!("Failed to read {}: {}", name, e))),
    };
    let mut xml = String::new();
    part.read_to_string(&mut xml)?;
    Ok(Some(xml))
}

/// Members named `<prefix><n>.xml`, in numeric order (slide2 before slide10)
fn numbered_parts<R: Read + Seek>(archive: &ZipArchive<R>, prefix: &str) -> Vec<String> {
    let mut parts: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| {
            let number = name.strip_prefix(prefix)?.strip_suffix(".xml")?.parse().ok()?;
            Some((number, name.to_string()))
        })
        .collect();
    parts.sort();
    parts.into_iter().map(|(_, name)| name).collect()
}

fn malformed(e: xml::reader::Error) -> Error {
    Error::Extraction(format!("Malformed Office XML: {}", e))
}

/// Trimmed text of every `block` element, empty ones included, joining
/// the `t` runs inside each
fn paragraphs(xml: &str, block: &str) -> Result<Vec<String>> {
    let mut blocks = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    for event in EventReader::from_str(xml) {
        match event.map_err(malformed)? {
            XmlEvent::StartElement { name, .. } if name.local_name == "t" => in_text = true,
            XmlEvent::EndElement { name } => {
                if name.local_name == "t" {
                    in_text = false;
                } else if name.local_name == block {
                    blocks.push(current.trim().to_string());
                    current.clear();
                }
            }
            XmlEvent::Characters(text) | XmlEvent::Whitespace(text) if in_text => {
                current.push_str(&text)
            }
            _ => {}
        }
    }
    Ok(blocks)
}

fn non_empty(blocks: Vec<String>) -> Vec<String> {
    blocks.into_iter().filter(|b| !b.is_empty()).collect()
}

fn sheet_names(workbook: &str) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for event in EventReader::from_str(workbook) {
        if let XmlEvent::StartElement {
            name, attributes, ..
        } = event.map_err(malformed)?
        {
            if name.local_name == "sheet" {
                if let Some(attr) = attributes.iter().find(|a| a.name.local_name == "name") {
                    names.push(attr.value.clone());
                }
            }
        }
    }
    Ok(names)
}

/// Non-empty rows of a worksheet, cells joined with " | ".
/// Shared-string cells (`t="s"`) are resolved against `shared`.
fn sheet_rows(xml: &str, shared: &[String]) -> Result<Vec<String>> {
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut cell_type = String::new();
    let mut value = String::new();
    let mut in_value = false;

    for event in EventReader::from_str(xml) {
        match event.map_err(malformed)? {
            XmlEvent::StartElement {
                name, attributes, ..
            } => match name.local_name.as_str() {
                "c" => {
                    cell_type = attributes
                        .iter()
                        .find(|a| a.name.local_name == "t")
                        .map(|a| a.value.clone())
                        .unwrap_or_default();
                    value.clear();
                }
                "v" | "t" => in_value = true,
                _ => {}
            },
            XmlEvent::EndElement { name } => match name.local_name.as_str() {
                "v" | "t" => in_value = false,
                "c" => {
                    let text = if cell_type == "s" {
                        value
                            .trim()
                            .parse::<usize>()
                            .ok()
                            .and_then(|i| shared.get(i))
                            .cloned()
                            .unwrap_or_default()
                    } else {
                        value.trim().to_string()
                    };
                    if !text.is_empty() {
                        row.push(text);
                    }
                }
                "row" => {
                    if !row.is_empty() {
                        rows.push(row.join(" | "));
                        row.clear();
                    }
                }
                _ => {}
            },
            XmlEvent::Characters(text) | XmlEvent::Whitespace(text) if in_value => {
                value.push_str(&text)
            }
            _ => {}
        }
    }
    Ok(rows)
}
