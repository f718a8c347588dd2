//! Audit - read every page's provenance back and check its chain

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::codec::ProvenanceCodec;
use crate::links::{self, Link};
use crate::pagedata::PageData;
use crate::pdftext::PageTextSource;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub links: BTreeMap<u32, Link>,
    /// Pages with no usable provenance, or whose text could not be read
    pub missing: Vec<u32>,
}

impl AuditReport {
    /// Every page has provenance and every chain is complete.
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.links.values().all(|l| l.is_linked)
    }
}

/// Decoded provenance per page (1-based). Unreadable pages are left out.
pub fn read_page_data(
    source: &dyn PageTextSource,
    codec: &ProvenanceCodec,
) -> BTreeMap<u32, PageData> {
    let mut pages = BTreeMap::new();
    for page in 1..=source.page_count() as u32 {
        match source.page_text(page) {
            Ok(text) => {
                if let Some(data) = codec.select(&text) {
                    pages.insert(page, data);
                }
            }
            Err(e) => tracing::warn!(page, error = %e, "cannot read page text"),
        }
    }
    pages
}

pub fn audit(source: &dyn PageTextSource, codec: &ProvenanceCodec) -> AuditReport {
    let pages = read_page_data(source, codec);
    let missing: Vec<u32> = (1..=source.page_count() as u32)
        .filter(|p| !pages.contains_key(p))
        .collect();
    for page in &missing {
        tracing::warn!(page, "page has no usable provenance");
    }
    AuditReport { links: links::check(&pages), missing }
}
