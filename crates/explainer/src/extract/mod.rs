//! Slide text extraction from `.pptx` decks.
//!
//! A deck is a zip archive. Slide order comes from the `p:sldIdLst` of
//! `ppt/presentation.xml`, resolved through its relationships part; decks
//! without a usable list fall back to the numeric order of
//! `ppt/slides/slideN.xml`. A slide's text is every paragraph of every text
//! body on the slide, paragraphs joined with newlines.

use std::collections::HashMap;
use std::io::{Read, Seek};
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::ExtractionError;

const PRESENTATION_PART: &str = "ppt/presentation.xml";
const PRESENTATION_RELS_PART: &str = "ppt/_rels/presentation.xml.rels";

/// Turns a document into its ordered per-slide text.
pub trait SlideExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<Vec<String>, ExtractionError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PptxExtractor;

impl PptxExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl SlideExtractor for PptxExtractor {
    fn extract(&self, path: &Path) -> Result<Vec<String>, ExtractionError> {
        let file = std::fs::File::open(path).map_err(|e| ExtractionError::ReadDocument {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut archive = zip::ZipArchive::new(file)
            .map_err(|e| ExtractionError::InvalidArchive(e.to_string()))?;

        let parts = slide_parts(&mut archive)?;
        parts
            .iter()
            .map(|part| {
                let xml = read_part(&mut archive, part)?;
                parse_slide_xml(&xml, part)
            })
            .collect()
    }
}

fn read_part<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
) -> Result<String, ExtractionError> {
    let mut part = archive
        .by_name(name)
        .map_err(|_| ExtractionError::MissingPart(name.to_string()))?;

    let mut content = String::new();
    part.read_to_string(&mut content)
        .map_err(|e| ExtractionError::MalformedXml {
            part: name.to_string(),
            detail: e.to_string(),
        })?;
    Ok(content)
}

/// Slide part names in presentation order.
fn slide_parts<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
) -> Result<Vec<String>, ExtractionError> {
    let has_presentation = archive.index_for_name(PRESENTATION_PART).is_some();
    let has_rels = archive.index_for_name(PRESENTATION_RELS_PART).is_some();

    if has_presentation && has_rels {
        let presentation = read_part(archive, PRESENTATION_PART)?;
        let rels = read_part(archive, PRESENTATION_RELS_PART)?;
        let ids = parse_slide_id_list(&presentation)?;
        let targets = parse_relationships(&rels)?;

        let ordered: Vec<String> = ids
            .iter()
            .filter_map(|id| targets.get(id))
            .map(|target| resolve_target(target))
            .collect();
        if !ordered.is_empty() {
            return Ok(ordered);
        }
    } else if !has_presentation {
        return Err(ExtractionError::MissingPart(PRESENTATION_PART.to_string()));
    }

    Ok(numbered_slide_parts(archive))
}

fn numbered_slide_parts<R: Read + Seek>(archive: &zip::ZipArchive<R>) -> Vec<String> {
    let mut numbered: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| {
            let number = name
                .strip_prefix("ppt/slides/slide")?
                .strip_suffix(".xml")?
                .parse::<u32>()
                .ok()?;
            Some((number, name.to_string()))
        })
        .collect();
    numbered.sort_by_key(|(number, _)| *number);
    numbered.into_iter().map(|(_, name)| name).collect()
}

/// `Target` attributes are relative to `ppt/` unless absolute.
fn resolve_target(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("ppt/{}", target),
    }
}

fn attribute(element: &BytesStart<'_>, matches: impl Fn(&[u8]) -> bool) -> Option<String> {
    element
        .attributes()
        .filter_map(|a| a.ok())
        .find(|a| matches(a.key.as_ref()))
        .and_then(|a| a.unescape_value().ok())
        .map(|v| v.into_owned())
}

/// Relationship ids of `p:sldId` entries, in order.
fn parse_slide_id_list(xml: &str) -> Result<Vec<String>, ExtractionError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut ids = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e))
                if e.local_name().as_ref() == b"sldId" =>
            {
                // The relationship id is the namespaced `r:id`, not the bare `id`.
                let rel_id = attribute(e, |key| {
                    key.ends_with(b":id") && key.len() > b":id".len()
                });
                if let Some(rel_id) = rel_id {
                    ids.push(rel_id);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ExtractionError::MalformedXml {
                    part: PRESENTATION_PART.to_string(),
                    detail: e.to_string(),
                })
            }
            _ => {}
        }
    }
    Ok(ids)
}

fn parse_relationships(xml: &str) -> Result<HashMap<String, String>, ExtractionError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut targets = HashMap::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                let is_slide = attribute(e, |key| key == b"Type")
                    .is_some_and(|t| t.ends_with("/slide"));
                let id = attribute(e, |key| key == b"Id");
                let target = attribute(e, |key| key == b"Target");
                if let (true, Some(id), Some(target)) = (is_slide, id, target) {
                    targets.insert(id, target);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ExtractionError::MalformedXml {
                    part: PRESENTATION_RELS_PART.to_string(),
                    detail: e.to_string(),
                })
            }
            _ => {}
        }
    }
    Ok(targets)
}

fn parse_slide_xml(xml: &str, part: &str) -> Result<String, ExtractionError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut text_body_depth = 0usize;
    let mut in_paragraph = false;
    let mut in_text = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"txBody" => text_body_depth += 1,
                b"p" if text_body_depth > 0 => {
                    in_paragraph = true;
                    current.clear();
                }
                b"t" if in_paragraph => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(ref e)) => {
                // An empty `<a:p/>` is a blank line in the text body.
                if text_body_depth > 0 && e.local_name().as_ref() == b"p" {
                    paragraphs.push(String::new());
                }
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"txBody" => text_body_depth = text_body_depth.saturating_sub(1),
                b"p" if in_paragraph => {
                    paragraphs.push(std::mem::take(&mut current));
                    in_paragraph = false;
                }
                b"t" => in_text = false,
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if in_text {
                    let decoded = e.decode().map_err(|err| ExtractionError::MalformedXml {
                        part: part.to_string(),
                        detail: err.to_string(),
                    })?;
                    current.push_str(&decoded);
                }
            }
            Ok(Event::GeneralRef(e)) => {
                if in_text {
                    if let Some(ch) = e.resolve_char_ref().ok().flatten() {
                        current.push(ch);
                    } else if let Ok(name) = e.decode() {
                        if let Some(resolved) = quick_xml::escape::resolve_predefined_entity(&name)
                        {
                            current.push_str(resolved);
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ExtractionError::MalformedXml {
                    part: part.to_string(),
                    detail: e.to_string(),
                })
            }
            _ => {}
        }
    }

    while paragraphs.last().is_some_and(|p| p.is_empty()) {
        paragraphs.pop();
    }
    Ok(paragraphs.join("\n"))
}
