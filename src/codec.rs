//! Provenance Codec - page history embedded as page text
//!
//! Wire format (fixed, shared with every document produced so far):
//!
//! ```text
//! START_TAG base64(json) END_TAG START_HASH sha256-hex END_HASH
//! ```
//!
//! The checksum is a tamper signal, not a gate: a mismatch is logged once
//! per codec and the payload is still handed back to the caller.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

use crate::hashing;
use crate::pagedata::PageData;

pub const START_TAG: &str = "<gradex-pagedata>";
pub const END_TAG: &str = "</gradex-pagedata>";
pub const START_HASH: &str = "<hash>";
pub const END_HASH: &str = "</hash>";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Payload is not base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Payload is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Payload is not page data: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodecConfig {
    #[serde(default = "default_start_tag")]
    pub start_tag: String,
    #[serde(default = "default_end_tag")]
    pub end_tag: String,
    #[serde(default = "default_start_hash")]
    pub start_hash: String,
    #[serde(default = "default_end_hash")]
    pub end_hash: String,
    /// Drop `previous` records older than this many days; keep all if unset
    #[serde(default)]
    pub prune_after_days: Option<u32>,
}

fn default_start_tag() -> String { START_TAG.into() }
fn default_end_tag() -> String { END_TAG.into() }
fn default_start_hash() -> String { START_HASH.into() }
fn default_end_hash() -> String { END_HASH.into() }

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            start_tag: default_start_tag(),
            end_tag: default_end_tag(),
            start_hash: default_start_hash(),
            end_hash: default_end_hash(),
            prune_after_days: None,
        }
    }
}

/// One tagged block found in page text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub payload: String,
    pub checksum: Option<String>,
    pub verified: bool,
}

#[derive(Debug, Default)]
pub struct ProvenanceCodec {
    config: CodecConfig,
    mismatch_logged: AtomicBool,
}

impl ProvenanceCodec {
    pub fn new(config: CodecConfig) -> Self {
        Self { config, mismatch_logged: AtomicBool::new(false) }
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Whether any decode on this codec has seen a bad or missing checksum.
    pub fn mismatch_seen(&self) -> bool {
        self.mismatch_logged.load(Ordering::Relaxed)
    }

    pub fn encode(&self, data: &PageData) -> Result<String, CodecError> {
        let json = serde_json::to_string(data)?;
        let payload = STANDARD.encode(json);
        let sum = hashing::checksum(&payload);
        let c = &self.config;
        Ok(format!(
            "{}{}{}{}{}{}",
            c.start_tag, payload, c.end_tag, c.start_hash, sum, c.end_hash
        ))
    }

    /// Scan page text left to right for tagged blocks.
    pub fn decode(&self, text: &str) -> Vec<Candidate> {
        let c = &self.config;
        let mut found = Vec::new();
        let mut rest = text;

        while let Some(start) = rest.find(&c.start_tag) {
            let body = &rest[start + c.start_tag.len()..];
            let Some(end) = body.find(&c.end_tag) else { break };
            // an earlier copy that lost its end tag is skipped, not merged
            let from = body[..end]
                .rfind(&c.start_tag)
                .map_or(0, |i| i + c.start_tag.len());
            let payload = &body[from..end];
            rest = &body[end + c.end_tag.len()..];

            // the hash belongs to this block only if it precedes the next one
            let next_block = rest.find(&c.start_tag).unwrap_or(rest.len());
            let mut checksum = None;
            if let Some(h) = rest[..next_block].find(&c.start_hash) {
                let hash_body = &rest[h + c.start_hash.len()..];
                if let Some(he) = hash_body.find(&c.end_hash) {
                    checksum = Some(hash_body[..he].to_string());
                    rest = &hash_body[he + c.end_hash.len()..];
                }
            }

            let verified = checksum.as_deref().is_some_and(|sum| hashing::verify(payload, sum));
            if !verified {
                self.note_mismatch(checksum.is_some());
            }
            found.push(Candidate { payload: payload.to_string(), checksum, verified });
        }
        found
    }

    fn note_mismatch(&self, had_checksum: bool) {
        if !self.mismatch_logged.swap(true, Ordering::Relaxed) {
            if had_checksum {
                tracing::warn!("page data checksum mismatch; using payload anyway");
            } else {
                tracing::warn!("page data has no checksum; using payload anyway");
            }
        }
    }

    pub fn unmarshal(&self, payload: &str) -> Result<PageData, DecodeError> {
        let bytes = STANDARD.decode(payload.trim())?;
        let json = String::from_utf8(bytes)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// The first candidate on the page that decodes to a record with an
    /// identity. `None` means the page has no usable provenance.
    pub fn select(&self, text: &str) -> Option<PageData> {
        for candidate in self.decode(text) {
            match self.unmarshal(&candidate.payload) {
                Ok(data) if !data.is_empty() => return Some(data),
                Ok(_) => tracing::debug!("skipping page data without identity"),
                Err(e) => tracing::debug!(error = %e, "skipping undecodable page data"),
            }
        }
        None
    }

    /// Remove `previous` records older than the configured horizon.
    /// Returns how many were removed.
    pub fn prune(&self, data: &mut PageData, now: DateTime<Utc>) -> usize {
        let Some(days) = self.config.prune_after_days else { return 0 };
        // a horizon past the calendar range keeps everything
        let cutoff = Duration::try_days(i64::from(days)).and_then(|h| now.checked_sub_signed(h));
        let Some(cutoff) = cutoff else { return 0 };
        let before = data.previous.len();
        data.previous.retain(|d| d.process.time >= cutoff);
        before - data.previous.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pagedata::{FileDetail, ItemDetail, PageDetail, ProcessDetail};

    fn sample() -> PageData {
        let own = FileDetail { path: "a.pdf".into(), uuid: "f".into(), number: 1, of: 1 };
        PageData::new(PageDetail::root(ProcessDetail::new("ingest", "me", "", "mark"), own, ItemDetail::default()))
    }

    #[test]
    fn test_encode_layout() {
        let codec = ProvenanceCodec::default();
        let text = codec.encode(&sample()).unwrap();
        assert!(text.starts_with(START_TAG));
        assert!(text.ends_with(END_HASH));
        let candidates = codec.decode(&text);
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].verified);
        assert!(!codec.mismatch_seen());
    }

    #[test]
    fn test_decode_ignores_surrounding_text() {
        let codec = ProvenanceCodec::default();
        let data = sample();
        let text = format!("Page 1\nheader {} footer", codec.encode(&data).unwrap());
        assert_eq!(codec.select(&text), Some(data));
    }

    #[test]
    fn test_missing_hash_still_returns_payload() {
        let codec = ProvenanceCodec::default();
        let encoded = codec.encode(&sample()).unwrap();
        let unhashed = &encoded[..encoded.find(START_HASH).unwrap()];
        let candidates = codec.decode(unhashed);
        assert_eq!(candidates.len(), 1);
        assert!(!candidates[0].verified);
        assert!(candidates[0].checksum.is_none());
        assert!(codec.mismatch_seen());
    }

    #[test]
    fn test_unterminated_block_is_ignored() {
        let codec = ProvenanceCodec::default();
        assert!(codec.decode("<gradex-pagedata>abc").is_empty());
        assert!(codec.select("nothing here").is_none());
    }

    #[test]
    fn test_custom_sentinels() {
        let codec = ProvenanceCodec::new(CodecConfig {
            start_tag: "[[".into(),
            end_tag: "]]".into(),
            start_hash: "{{".into(),
            end_hash: "}}".into(),
            prune_after_days: None,
        });
        let data = sample();
        let text = codec.encode(&data).unwrap();
        assert!(text.starts_with("[["));
        assert_eq!(codec.select(&text), Some(data));
    }

    #[test]
    fn test_prune_drops_old_records() {
        let codec = ProvenanceCodec::new(CodecConfig { prune_after_days: Some(30), ..Default::default() });
        let now = Utc::now();
        let mut old = sample().current;
        old.process.time = now - Duration::days(90);
        let mut recent = sample().current;
        recent.process.time = now - Duration::days(2);
        let mut data = PageData { current: sample().current, previous: vec![old, recent.clone()] };

        assert_eq!(codec.prune(&mut data, now), 1);
        assert_eq!(data.previous, vec![recent]);
    }

    #[test]
    fn test_prune_horizon_out_of_range_keeps_everything() {
        let config = CodecConfig { prune_after_days: Some(200_000_000), ..Default::default() };
        let codec = ProvenanceCodec::new(config);
        let mut data = sample();
        data.previous.push(sample().current);
        assert_eq!(codec.prune(&mut data, Utc::now()), 0);
        assert_eq!(data.previous.len(), 1);
    }

    #[test]
    fn test_truncated_copy_does_not_swallow_next() {
        let codec = ProvenanceCodec::default();
        let data = sample();
        let good = codec.encode(&data).unwrap();
        let cut = good.replacen(END_TAG, "", 1);

        let candidates = codec.decode(&format!("{cut} {good}"));
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].verified);
        assert_eq!(codec.select(&format!("{cut} {good}")), Some(data));
    }

    #[test]
    fn test_prune_without_horizon_keeps_everything() {
        let codec = ProvenanceCodec::default();
        let mut data = sample();
        data.previous.push(sample().current);
        assert_eq!(codec.prune(&mut data, Utc::now()), 0);
        assert_eq!(data.previous.len(), 1);
    }
}
