//! Element Properties - prefill paragraphs and combo box options
//!
//! Properties live in an element's `<desc>` as `key: value` entries separated
//! by `;` or newlines, e.g. `size: 9; align: center; text: Marker initials`.
//! A description with no keyed entries is taken verbatim.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_FONT_SIZE: f64 = 10.0;

#[derive(Debug, Error, PartialEq)]
pub enum PropertyError {
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Align {
    #[default]
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParagraphStyle {
    pub font_size: f64,
    pub align: Align,
    /// RGB components in 0..=1
    pub color: [f32; 3],
}

impl Default for ParagraphStyle {
    fn default() -> Self {
        Self {
            font_size: DEFAULT_FONT_SIZE,
            align: Align::Left,
            color: [0.0, 0.0, 0.0],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Paragraph {
    pub style: ParagraphStyle,
    pub text: String,
}

fn entries(raw: &str) -> Vec<(String, String)> {
    raw.split(|c| c == ';' || c == '\n')
        .filter_map(|entry| {
            let (key, value) = entry.split_once(':')?;
            let key = key.trim().to_ascii_lowercase();
            if key.is_empty() || key.contains(char::is_whitespace) {
                return None;
            }
            Some((key, value.trim().to_string()))
        })
        .collect()
}

fn parse_color(value: &str) -> Option<[f32; 3]> {
    let hex = value.strip_prefix('#')?;
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let channel = |i: usize| {
        u8::from_str_radix(&hex[i..i + 2], 16)
            .ok()
            .map(|v| v as f32 / 255.0)
    };
    Some([channel(0)?, channel(2)?, channel(4)?])
}

pub fn parse_paragraph(raw: &str) -> Result<Paragraph, PropertyError> {
    let entries = entries(raw);
    if entries.is_empty() {
        return Ok(Paragraph { style: ParagraphStyle::default(), text: raw.trim().to_string() });
    }

    let mut paragraph = Paragraph::default();
    for (key, value) in entries {
        let invalid = || PropertyError::InvalidValue { key: key.clone(), value: value.clone() };
        match key.as_str() {
            "size" | "font-size" => {
                let size: f64 = value.trim_end_matches("pt").parse().map_err(|_| invalid())?;
                if !(size.is_finite() && size > 0.0) {
                    return Err(invalid());
                }
                paragraph.style.font_size = size;
            }
            "align" => {
                paragraph.style.align = match value.as_str() {
                    "left" => Align::Left,
                    "center" | "centre" => Align::Center,
                    "right" => Align::Right,
                    _ => return Err(invalid()),
                };
            }
            "color" | "colour" => {
                paragraph.style.color = parse_color(&value).ok_or_else(invalid)?;
            }
            "text" => paragraph.text = value,
            // unknown keys are authoring notes
            _ => {}
        }
    }
    Ok(paragraph)
}

pub fn parse_options(raw: &str) -> Vec<String> {
    let listed = entries(raw)
        .into_iter()
        .find(|(key, _)| key == "options" || key == "option")
        .map(|(_, value)| value);
    let source = listed.as_deref().unwrap_or(raw);
    source
        .split(|c| c == ',' || c == '\n')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_description_is_text() {
        let p = parse_paragraph("  Initials  ").unwrap();
        assert_eq!(p.text, "Initials");
        assert_eq!(p.style, ParagraphStyle::default());
    }

    #[test]
    fn test_keyed_paragraph() {
        let p = parse_paragraph("size: 8pt; align: center\ncolor: #ff0000; text: Page OK?").unwrap();
        assert_eq!(p.style.font_size, 8.0);
        assert_eq!(p.style.align, Align::Center);
        assert_eq!(p.style.color, [1.0, 0.0, 0.0]);
        assert_eq!(p.text, "Page OK?");
    }

    #[test]
    fn test_bad_size_is_error() {
        let err = parse_paragraph("size: big; text: x").unwrap_err();
        assert_eq!(err, PropertyError::InvalidValue { key: "size".into(), value: "big".into() });
    }

    #[test]
    fn test_non_ascii_color_is_error() {
        let err = parse_paragraph("color: #a\u{e9}\u{20ac}; text: x").unwrap_err();
        assert!(matches!(err, PropertyError::InvalidValue { ref key, .. } if key == "color"));
        assert!(parse_paragraph("color: #12345g").is_err());
    }

    #[test]
    fn test_options_keyed_and_bare() {
        assert_eq!(parse_options("options: Yes, No ,Maybe"), vec!["Yes", "No", "Maybe"]);
        assert_eq!(parse_options("A\nB\n\nC"), vec!["A", "B", "C"]);
        assert!(parse_options("").is_empty());
    }
}
