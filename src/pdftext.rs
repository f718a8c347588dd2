//! Page Text - what a reader of the PDF would extract from each page

use lopdf::Document;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TextError {
    #[error("Cannot read {}: {source}", path.display())]
    Io { path: PathBuf, source: std::io::Error },

    #[error("Not a readable PDF: {0}")]
    Load(#[source] lopdf::Error),

    #[error("Page {page} out of range (document has {count})")]
    PageOutOfRange { page: u32, count: usize },

    #[error("Cannot extract text from page {page}: {source}")]
    Extract { page: u32, source: lopdf::Error },
}

/// All text on a page, in content order. Pages are numbered from 1.
pub trait PageTextSource {
    fn page_count(&self) -> usize;
    fn page_text(&self, page: u32) -> Result<String, TextError>;
}

pub struct LopdfText {
    doc: Document,
    pages: Vec<u32>,
}

impl LopdfText {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TextError> {
        let doc = Document::load_mem(bytes).map_err(TextError::Load)?;
        Ok(Self::from_document(doc))
    }

    pub fn load(path: &Path) -> Result<Self, TextError> {
        let bytes = std::fs::read(path)
            .map_err(|source| TextError::Io { path: path.to_path_buf(), source })?;
        Self::from_bytes(&bytes)
    }

    pub fn from_document(doc: Document) -> Self {
        let pages = doc.get_pages().keys().copied().collect();
        Self { doc, pages }
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }
}

impl PageTextSource for LopdfText {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_text(&self, page: u32) -> Result<String, TextError> {
        if !self.pages.contains(&page) {
            return Err(TextError::PageOutOfRange { page, count: self.pages.len() });
        }
        self.doc
            .extract_text(&[page])
            .map_err(|source| TextError::Extract { page, source })
    }
}
