//! Fixture builders and scripted collaborators.

#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::time::Instant;
use zip::write::SimpleFileOptions;

use explainer::{ServiceError, TextGenerator};

/// Builds a minimal but well-formed `.pptx` deck in memory.
pub struct DeckBuilder {
    slides: Vec<Vec<String>>,
}

impl DeckBuilder {
    pub fn new() -> Self {
        Self { slides: Vec::new() }
    }

    /// Adds a slide with one text body holding `paragraphs`.
    pub fn slide(mut self, paragraphs: &[&str]) -> Self {
        self.slides
            .push(paragraphs.iter().map(|p| p.to_string()).collect());
        self
    }

    /// Adds `count` slides titled `Slide 1` .. `Slide N`.
    pub fn numbered(mut self, count: usize) -> Self {
        for i in 1..=count {
            self.slides.push(vec![format!("Slide {}", i)]);
        }
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();

        let mut part = |name: &str, content: String| {
            zip.start_file(name, options).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        };

        part("[Content_Types].xml", content_types(self.slides.len()));
        part("ppt/presentation.xml", presentation(self.slides.len()));
        part(
            "ppt/_rels/presentation.xml.rels",
            presentation_rels(self.slides.len()),
        );
        for (i, paragraphs) in self.slides.iter().enumerate() {
            part(&format!("ppt/slides/slide{}.xml", i + 1), slide(paragraphs));
        }

        zip.finish().unwrap().into_inner()
    }
}

impl Default for DeckBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn content_types(count: usize) -> String {
    let overrides: String = (1..=count)
        .map(|i| {
            format!(
                r#"<Override PartName="/ppt/slides/slide{}.xml" ContentType="application/vnd.openxmlformats-officedocument.presentationml.slide+xml"/>"#,
                i
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Override PartName="/ppt/presentation.xml" ContentType="application/vnd.openxmlformats-officedocument.presentationml.presentation.main+xml"/>{}</Types>"#,
        overrides
    )
}

fn presentation(count: usize) -> String {
    let ids: String = (1..=count)
        .map(|i| format!(r#"<p:sldId id="{}" r:id="rId{}"/>"#, 255 + i, i + 1))
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><p:presentation xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships" xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main"><p:sldIdLst>{}</p:sldIdLst></p:presentation>"#,
        ids
    )
}

fn presentation_rels(count: usize) -> String {
    let rels: String = (1..=count)
        .map(|i| {
            format!(
                r#"<Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/slide" Target="slides/slide{}.xml"/>"#,
                i + 1,
                i
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">{}</Relationships>"#,
        rels
    )
}

fn slide(paragraphs: &[String]) -> String {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<a:p><a:r><a:t>{}</a:t></a:r></a:p>", escape(p)))
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><p:sld xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main"><p:cSld><p:spTree><p:sp><p:txBody><a:bodyPr/>{}</p:txBody></p:sp></p:spTree></p:cSld></p:sld>"#,
        body
    )
}

/// Answers every prompt with `explained: <prompt>` and records when each
/// call started.
#[derive(Default)]
pub struct EchoGenerator {
    pub calls: Mutex<Vec<(Instant, String)>>,
}

impl EchoGenerator {
    pub fn prompts(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn starts(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|(t, _)| *t).collect()
    }
}

#[async_trait]
impl TextGenerator for EchoGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, ServiceError> {
        self.calls
            .lock()
            .unwrap()
            .push((Instant::now(), prompt.to_string()));
        Ok(format!("explained: {}", prompt))
    }
}

/// Fails the first `failures` calls with `error`, then echoes.
pub struct FlakyGenerator {
    failures: u32,
    error: ServiceError,
    calls: AtomicU32,
}

impl FlakyGenerator {
    pub fn new(failures: u32, error: ServiceError) -> Self {
        Self {
            failures,
            error,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for FlakyGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, ServiceError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            return Err(self.error.clone());
        }
        Ok(format!("explained: {}", prompt))
    }
}
